// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only builders, gated behind `#[cfg(any(test, feature = "test-support"))]`
//! so downstream crates can build fixtures without re-deriving every field.

use crate::domain::{RepoRef, Task, TaskPath, TaskStatus};

fn default_task_path() -> TaskPath {
    TaskPath::new(RepoRef::new("org", "demo"), 10)
}

crate::builder! {
    pub struct TaskBuilder => Task {
        set {
            path: TaskPath = default_task_path(),
            status: TaskStatus = TaskStatus::Queued,
            created_at_ms: u64 = 0
        }
        option {
            session_id: crate::domain::SessionId = None,
            worktree_path: String = None,
            worker_id: crate::domain::WorkerId = None,
            repo_slot: u32 = None,
            daemon_id: crate::domain::DaemonId = None,
            heartbeat_at_ms: u64 = None,
            checkpoint: serde_json::Value = None,
            pr_url: String = None,
            completed_at_ms: u64 = None
        }
    }
}
