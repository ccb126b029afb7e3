// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The label-backed queue: canonical label vocabulary, the per-`(repo,
//! issue)` lock manager, the stale-sweep/no-flap queue driver, and the
//! issue sync poller that keeps the durable projection current.

pub mod driver;
pub mod labels;
pub mod lock;
pub mod sync;

pub use driver::{
    DependencyCoverage, DependencyProvider, LabelMutator, NoDependencyProvider, NoopPruner, QueueDriver,
    QueueDriverConfig, QueueError, WorktreePruner,
};
pub use labels::LabelPlan;
pub use lock::{LockGuard, LockManager};
pub use sync::{FetchedIssue, IssuePage, IssueSource, SyncFetchError, SyncPoller, SyncPollerConfig, SyncState, TickOutcome};
