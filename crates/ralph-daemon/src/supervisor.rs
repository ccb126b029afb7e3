// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Root supervisor: wires the scheduler, throttle engine, and control
//! file into one polling loop, and performs the startup reconciliation
//! a crash or restart requires before new claims are allowed.

use std::collections::HashMap;
use std::sync::Arc;

use ralph_core::domain::{RepoConfig, RepoRef, Task, TaskStatus};
use ralph_core::{Clock, DaemonId};
use ralph_engine::scheduler::Scheduler;
use ralph_engine::throttle::{ThrottleEngine, ThrottleReport};
use ralph_storage::StateStore;
use tracing::{info, warn};

use crate::control::{ControlFile, ControlMode};

/// A task left `Starting`/`InProgress` whose lease is no longer live
/// (daemon crashed mid-run) is reclaimed to `Queued` so the scheduler
/// can pick it back up; a task still holding a live lease is left
/// alone since another daemon (or this one, mid-restart) owns it.
///
/// `session_id`/`worktree_path` survive the reset: the scheduler only
/// ever claims `queued` tasks, so status must still drop to `Queued`,
/// but a surviving session id is the signal the worker's resume
/// entrypoint (spec's "status in-progress" wording, adapted to the
/// scheduler's queued-only claim precondition) uses to reconnect
/// instead of starting the pipeline over.
pub fn reconcile_orphaned_tasks(store: &StateStore, daemon_id: &DaemonId) -> Vec<Task> {
    let mut reclaimed = Vec::new();
    for task in store.all_tasks() {
        if !matches!(task.status, TaskStatus::Starting | TaskStatus::InProgress) {
            continue;
        }
        let op_state = store.get_op_state(&task.path);
        let owned_by_us = task.daemon_id.as_ref() == Some(daemon_id);
        let live = op_state.as_ref().map(|s| s.is_live()).unwrap_or(false);
        if owned_by_us && !live {
            let mut reset = task.clone();
            reset.status = TaskStatus::Queued;
            reset.worker_id = None;
            reset.daemon_id = None;
            reset.repo_slot = None;
            reset.heartbeat_at_ms = None;
            reclaimed.push(reset);
        }
    }
    reclaimed
}

/// Groups queued tasks by repo for one scheduler pass.
pub fn candidates_by_repo(tasks: &[Task]) -> HashMap<RepoRef, Vec<Task>> {
    let mut grouped: HashMap<RepoRef, Vec<Task>> = HashMap::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Queued) {
        grouped.entry(task.path.repo.clone()).or_default().push(task.clone());
    }
    grouped
}

pub struct Supervisor<C: Clock> {
    store: Arc<StateStore>,
    clock: C,
    daemon_id: DaemonId,
    scheduler: Scheduler<C>,
    throttle: ThrottleEngine,
    repo_configs: Vec<RepoConfig>,
}

impl<C: Clock + Clone> Supervisor<C> {
    pub fn new(store: Arc<StateStore>, clock: C, daemon_id: DaemonId, max_workers: u32, throttle: ThrottleEngine, repo_configs: Vec<RepoConfig>) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&store), clock.clone(), daemon_id.clone(), max_workers);
        Self { store, clock, daemon_id, scheduler, throttle, repo_configs }
    }

    /// Runs once at startup, before the polling loop begins accepting
    /// new claims: reclaims orphaned leases left by a crash.
    pub fn reconcile_on_startup(&self) -> usize {
        let reclaimed = reconcile_orphaned_tasks(&self.store, &self.daemon_id);
        let count = reclaimed.len();
        for task in reclaimed {
            if let Err(e) = self.store.snapshot_task(task.clone()) {
                warn!(path = %task.path, error = %e, "failed to reclaim orphaned task on startup");
            }
        }
        if count > 0 {
            info!(count, "reclaimed orphaned tasks on startup");
        }
        count
    }

    /// One polling iteration: honors `control`, evaluates throttle, and
    /// makes at most one claim. Returns the claimed task, if any.
    pub fn tick(&self, control: &ControlFile, throttle_windows: &[ralph_core::domain::ThrottleWindow], worker_id: ralph_core::domain::WorkerId) -> Option<Task> {
        if control.mode.rejects_new_claims() {
            return None;
        }

        let now_ms = self.clock.epoch_ms();
        let report: ThrottleReport = self.throttle.evaluate(throttle_windows, now_ms);

        let tasks = self.store.all_tasks();
        let candidates = candidates_by_repo(&tasks);

        match self.scheduler.claim_next(&self.repo_configs, &candidates, report.state, worker_id) {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, "scheduler claim attempt failed");
                None
            }
        }
    }

    pub fn control_mode_requests_checkpoint(control: &ControlFile) -> bool {
        matches!(control.mode, ControlMode::Paused)
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
