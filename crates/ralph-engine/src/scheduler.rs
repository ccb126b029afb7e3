// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler (C7): per-repo slot bitmaps, priority-weighted round-robin
//! claiming, and the throttle gate that stops or slows new claims.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use ralph_core::domain::{OpState, PrState, RepoConfig, RepoRef, Task, TaskStatus, WorkerId};
use ralph_core::{Clock, DaemonId, Event};
use ralph_storage::StateStore;
use thiserror::Error;
use tracing::{info, instrument};

use crate::throttle::ThrottleState;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] ralph_storage::StoreError),
}

/// Free/in-use tracking for one repo's `[0..concurrencySlots)` range.
#[derive(Debug)]
pub struct SlotBitmap {
    capacity: u32,
    in_use: BTreeSet<u32>,
}

impl SlotBitmap {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, in_use: BTreeSet::new() }
    }

    /// Reuses `preferred` if it is free; otherwise allocates the lowest
    /// free slot. Returns `None` when the repo's slots are saturated.
    pub fn allocate(&mut self, preferred: Option<u32>) -> Option<u32> {
        if let Some(p) = preferred {
            if p < self.capacity && !self.in_use.contains(&p) {
                self.in_use.insert(p);
                return Some(p);
            }
        }
        let free = (0..self.capacity).find(|slot| !self.in_use.contains(slot))?;
        self.in_use.insert(free);
        Some(free)
    }

    pub fn release(&mut self, slot: u32) {
        self.in_use.remove(&slot);
    }

    pub fn in_use_count(&self) -> u32 {
        self.in_use.len() as u32
    }
}

/// A task is claimable when queued, with no open PR already associated
/// to its issue, and no live lease held by any daemon.
pub fn is_claimable(task: &Task, op_state: Option<&OpState>, has_open_pr: bool) -> bool {
    task.status == TaskStatus::Queued && !has_open_pr && !op_state.map(OpState::is_live).unwrap_or(false)
}

/// Repos ordered by `schedulerPriority` descending, ties broken
/// lexicographically by `owner/name` — the "weighting" the round-robin
/// claim walk honors.
pub fn repo_priority_order(repos: &[RepoConfig]) -> Vec<RepoRef> {
    let mut ordered: Vec<&RepoConfig> = repos.iter().collect();
    ordered.sort_by(|a, b| b.scheduler_priority.cmp(&a.scheduler_priority).then_with(|| a.repo.full_name().cmp(&b.repo.full_name())));
    ordered.into_iter().map(|c| c.repo.clone()).collect()
}

pub struct Scheduler<C: Clock> {
    store: Arc<StateStore>,
    clock: C,
    daemon_id: DaemonId,
    max_workers: u32,
    slots: Mutex<HashMap<RepoRef, SlotBitmap>>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(store: Arc<StateStore>, clock: C, daemon_id: DaemonId, max_workers: u32) -> Self {
        Self { store, clock, daemon_id, max_workers, slots: Mutex::new(HashMap::new()) }
    }

    fn global_in_use(&self) -> u32 {
        self.slots.lock().values().map(SlotBitmap::in_use_count).sum()
    }

    /// One claim attempt across every repo in priority order. Returns
    /// `Ok(None)` when the throttle gate is closed, global capacity is
    /// saturated, or no claimable task remains anywhere.
    #[instrument(skip(self, repo_configs, candidates))]
    pub fn claim_next(
        &self,
        repo_configs: &[RepoConfig],
        candidates: &HashMap<RepoRef, Vec<Task>>,
        throttle: ThrottleState,
        worker_id: WorkerId,
    ) -> Result<Option<Task>, SchedulerError> {
        if matches!(throttle, ThrottleState::Hard | ThrottleState::Pause) {
            return Ok(None);
        }
        if self.global_in_use() >= self.max_workers {
            return Ok(None);
        }

        let now_ms = self.clock.epoch_ms();
        let mut slots = self.slots.lock();

        for repo in repo_priority_order(repo_configs) {
            let Some(tasks) = candidates.get(&repo) else { continue };
            let concurrency = repo_configs.iter().find(|c| c.repo == repo).map(|c| c.concurrency_slots).unwrap_or(0);
            let bitmap = slots.entry(repo.clone()).or_insert_with(|| SlotBitmap::new(concurrency));

            for task in tasks {
                let op_state = self.store.get_op_state(&task.path);
                let has_open_pr = self.store.get_prs(&task.path.repo, task.path.issue_number).into_iter().any(|pr| pr.state == PrState::Open);
                if !is_claimable(task, op_state.as_ref(), has_open_pr) {
                    continue;
                }

                let Some(slot) = bitmap.allocate(task.repo_slot) else { continue };

                let new_op = OpState {
                    path: task.path.clone(),
                    daemon_id: self.daemon_id.clone(),
                    worker_id: Some(worker_id.clone()),
                    session_id: task.session_id.clone(),
                    worktree_path: task.worktree_path.clone(),
                    heartbeat_at_ms: now_ms,
                    released_at_ms: None,
                    released_reason: None,
                };
                let mut claimed = task.clone();
                claimed.status = TaskStatus::Starting;
                claimed.repo_slot = Some(slot);
                claimed.worker_id = Some(worker_id.clone());
                claimed.daemon_id = Some(self.daemon_id.clone());
                claimed.heartbeat_at_ms = Some(now_ms);

                let claimed_for_tx = claimed.clone();
                match self.store.run_in_transaction(move |_| {
                    vec![Event::OpStateClaimed { state: new_op.clone() }, Event::TaskUpserted { task: claimed_for_tx.clone() }]
                }) {
                    Ok(()) => {
                        info!(path = %claimed.path, slot, "claimed task");
                        return Ok(Some(claimed));
                    }
                    Err(e) => {
                        bitmap.release(slot);
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(None)
    }

    /// Releases a repo slot, called by the worker's finalize step (or by
    /// cancellation cleanup that chooses to give the slot back rather
    /// than leave the op-state claimed for a resuming restart).
    pub fn release_slot(&self, repo: &RepoRef, slot: u32) {
        if let Some(bitmap) = self.slots.lock().get_mut(repo) {
            bitmap.release(slot);
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
