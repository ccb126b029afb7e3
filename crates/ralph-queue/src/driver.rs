// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The label-backed queue driver (C4): every read join, the stale-sweep
//! rule, the no-flap guard, and blocked-by reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use ralph_core::domain::{IssueState, OpState, PrSnapshot, PrState, RepoRef, Task, TaskPath, TaskStatus};
use ralph_core::Clock;
use ralph_core::Event;
use ralph_storage::StateStore;
use thiserror::Error;
use tracing::{info, instrument};

use crate::labels::{self, LabelPlan};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] ralph_storage::StoreError),
    #[error("label mutation failed: {0}")]
    Mutation(String),
}

/// Seam for mutating labels on the forge; kept trait-erased rather than
/// generic over a transport so the driver is not parameterized over the
/// forge client's type parameters.
#[async_trait]
pub trait LabelMutator: Send + Sync {
    async fn mutate_issue_labels(&self, repo: &RepoRef, issue_number: u64, plan: &LabelPlan) -> Result<(), QueueError>;
}

/// Dependency coverage for a task's `blocked-by` reconciliation.
/// `coverage_known = false` means "cannot determine", which must never
/// mutate the `ralph:blocked` marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyCoverage {
    pub has_open_blocker: bool,
    pub coverage_known: bool,
}

pub trait DependencyProvider: Send + Sync {
    fn coverage(&self, path: &TaskPath) -> DependencyCoverage;
}

/// No-op provider: coverage is always unknown, so blocked-by
/// reconciliation never mutates anything. Used where a repo has no
/// relationship data source configured.
pub struct NoDependencyProvider;

impl DependencyProvider for NoDependencyProvider {
    fn coverage(&self, _path: &TaskPath) -> DependencyCoverage {
        DependencyCoverage { has_open_blocker: false, coverage_known: false }
    }
}

pub trait WorktreePruner: Send + Sync {
    fn prune(&self, path: &TaskPath);
}

pub struct NoopPruner;

impl WorktreePruner for NoopPruner {
    fn prune(&self, _path: &TaskPath) {}
}

pub struct QueueDriverConfig {
    pub ownership_ttl_ms: u64,
    pub pr_freshness_ms: u64,
    pub daemon_id: ralph_core::domain::DaemonId,
}

pub struct QueueDriver<C: Clock> {
    store: Arc<StateStore>,
    mutator: Arc<dyn LabelMutator>,
    dependencies: Arc<dyn DependencyProvider>,
    pruner: Arc<dyn WorktreePruner>,
    clock: C,
    config: QueueDriverConfig,
}

impl<C: Clock> QueueDriver<C> {
    pub fn new(
        store: Arc<StateStore>,
        mutator: Arc<dyn LabelMutator>,
        dependencies: Arc<dyn DependencyProvider>,
        pruner: Arc<dyn WorktreePruner>,
        clock: C,
        config: QueueDriverConfig,
    ) -> Self {
        Self { store, mutator, dependencies, pruner, clock, config }
    }

    fn issue_is_open(&self, path: &TaskPath) -> bool {
        matches!(self.store.get_issue(&path.repo, path.issue_number).map(|i| i.state), Some(IssueState::Open))
    }

    fn fresh_open_pr(&self, path: &TaskPath, now_ms: u64) -> Option<PrSnapshot> {
        self.store
            .get_prs(&path.repo, path.issue_number)
            .into_iter()
            .find(|pr| pr.state == PrState::Open && now_ms.saturating_sub(pr.recorded_at_ms) < self.config.pr_freshness_ms)
    }

    /// All five stale-sweep conditions at once; `true` means the task is
    /// eligible to be downgraded back to `queued`.
    fn stale_sweep_eligible(&self, task: &Task, op_state: Option<&OpState>, now_ms: u64) -> bool {
        let cond1 = match op_state {
            Some(op) => op.is_stale(self.config.ownership_ttl_ms, now_ms),
            None => true,
        };
        let cond2 = self.fresh_open_pr(&task.path, now_ms).is_none();
        let cond3 = !(task.status == TaskStatus::Blocked && task.session_id.is_none());
        let cond4 = !task.has_live_session(self.config.ownership_ttl_ms, now_ms);
        let cond5 = op_state.map(|op| op.daemon_id != self.config.daemon_id).unwrap_or(true);
        cond1 && cond2 && cond3 && cond4 && cond5
    }

    #[instrument(skip(self))]
    async fn sweep_stale_in_progress(&self) -> Result<(), QueueError> {
        let now_ms = self.clock.epoch_ms();
        let candidates: Vec<Task> =
            self.store.all_tasks().into_iter().filter(|t| t.status == TaskStatus::InProgress).collect();

        for task in candidates {
            let op_state = self.store.get_op_state(&task.path);
            if !self.stale_sweep_eligible(&task, op_state.as_ref(), now_ms) {
                continue;
            }

            info!(path = %task.path, "stale-sweep downgrading in-progress task to queued");
            if op_state.is_some() {
                self.store.run_in_transaction(|_| {
                    vec![Event::OpStateReleased { path: task.path.clone(), released_at_ms: now_ms, reason: "stale-sweep".to_string() }]
                })?;
            }
            self.pruner.prune(&task.path);

            let current_labels: Vec<String> =
                self.store.get_labels(&task.path.repo, task.path.issue_number).map(|l| l.labels.into_iter().collect()).unwrap_or_default();
            let plan = labels::plan_status_label_set(&current_labels, TaskStatus::Queued);
            if !plan.is_empty() {
                self.mutator.mutate_issue_labels(&task.path.repo, task.path.issue_number, &plan).await?;
            }

            let mut updated = task.clone();
            updated.status = TaskStatus::Queued;
            self.store.snapshot_task(updated)?;
        }
        Ok(())
    }

    /// `getTasksByStatus`: applies the stale-sweep before reading, for
    /// `in-progress` queries (the only status the sweep can change).
    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, QueueError> {
        if status == TaskStatus::InProgress {
            self.sweep_stale_in_progress().await?;
        }
        Ok(self
            .store
            .all_tasks()
            .into_iter()
            .filter(|t| t.status == status && self.issue_is_open(&t.path))
            .collect())
    }

    /// `getQueuedTasks`: as above for `queued`, plus blocked-by
    /// reconciliation against the dependency provider.
    pub async fn get_queued_tasks(&self) -> Result<Vec<Task>, QueueError> {
        let queued = self.get_tasks_by_status(TaskStatus::Queued).await?;
        for task in &queued {
            self.reconcile_blocked_by(&task.path).await?;
        }
        Ok(queued)
    }

    async fn reconcile_blocked_by(&self, path: &TaskPath) -> Result<(), QueueError> {
        let coverage = self.dependencies.coverage(path);
        if !coverage.coverage_known {
            return Ok(());
        }
        let current_labels: Vec<String> =
            self.store.get_labels(&path.repo, path.issue_number).map(|l| l.labels.into_iter().collect()).unwrap_or_default();
        let has_marker = current_labels.iter().any(|l| labels::normalize(l) == labels::BLOCKED_MARKER);

        let plan = if coverage.has_open_blocker && !has_marker {
            LabelPlan { add: vec![labels::BLOCKED_MARKER.to_string()], remove: Vec::new() }
        } else if !coverage.has_open_blocker && has_marker {
            LabelPlan { add: Vec::new(), remove: vec![labels::BLOCKED_MARKER.to_string()] }
        } else {
            LabelPlan::default()
        };

        if !plan.is_empty() {
            self.mutator.mutate_issue_labels(&path.repo, path.issue_number, &plan).await?;
        }
        Ok(())
    }

    /// `updateTaskStatus`: atomic label plan then mutation; on success,
    /// persists the task snapshot with `newStatus` applied.
    pub async fn update_task_status(&self, mut task: Task, new_status: TaskStatus) -> Result<bool, QueueError> {
        let current_labels: Vec<String> =
            self.store.get_labels(&task.path.repo, task.path.issue_number).map(|l| l.labels.into_iter().collect()).unwrap_or_default();
        let plan = labels::plan_status_label_set(&current_labels, new_status);

        if !plan.is_empty() {
            self.mutator.mutate_issue_labels(&task.path.repo, task.path.issue_number, &plan).await?;
        }

        task.status = new_status;
        self.store.snapshot_task(task)?;
        Ok(true)
    }

    pub fn plan_ralph_priority_label_set(&self, current_labels: &[String], desired: u8) -> LabelPlan {
        labels::plan_priority_label_set(current_labels, desired)
    }

    /// `initialPoll`: the first tick after startup. Strictly read-only —
    /// no sweep, no bootstrap, no mutation — to avoid spurious writes
    /// against freshly-observed state.
    pub fn initial_poll(&self) -> Vec<Task> {
        self.store.all_tasks()
    }

    /// Creates a [`Task`] row for every open issue the sync poller has
    /// recorded a `ralph:status:queued` label on but that has no task
    /// handle yet — the missing link between label-driven intake and the
    /// scheduler, which only ever looks at existing task rows.
    pub fn bootstrap_tasks_from_labels(&self) -> Result<Vec<Task>, QueueError> {
        let now_ms = self.clock.epoch_ms();
        let mut created = Vec::new();
        for issue in self.store.all_issues() {
            if issue.state != IssueState::Open {
                continue;
            }
            let path = TaskPath::new(issue.repo.clone(), issue.number);
            if self.store.get_task(&path).is_some() {
                continue;
            }
            let current_labels: Vec<String> =
                self.store.get_labels(&issue.repo, issue.number).map(|l| l.labels.into_iter().collect()).unwrap_or_default();
            let is_queued = current_labels.iter().any(|l| labels::parse_status_label(l) == Some(TaskStatus::Queued));
            if !is_queued {
                continue;
            }

            let task = Task::new(path, now_ms);
            self.store.snapshot_task(task.clone())?;
            info!(path = %task.path, "bootstrapped task from a queued label");
            created.push(task);
        }
        Ok(created)
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
