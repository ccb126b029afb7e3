// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The in-memory projection every component reads from. `apply_event` is
//! a total, idempotent function of `&Event` — folding the same event in
//! twice must leave the state exactly as it was after the first fold, so
//! WAL replay after a crash is always safe to re-run from any point at
//! or before the last durable checkpoint.

use std::collections::BTreeMap;

use ralph_core::domain::{
    DaemonRecord, GateResult, IssueSnapshot, LabelSet, OpState, PrSnapshot, RalphRun, RepoRef,
    RunId, SyncCursor, Task, TaskPath, ThrottleWindow, TokenTotal, WindowKind,
};
use ralph_core::event::Event;
use serde::{Deserialize, Serialize};

/// Current on-disk schema version. Bump when `MaterializedState`'s shape
/// changes in a way `serde` cannot absorb, and register a migration.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializedState {
    pub issues: BTreeMap<(RepoRef, u64), IssueSnapshot>,
    pub issue_labels: BTreeMap<(RepoRef, u64), LabelSet>,
    pub tasks: BTreeMap<TaskPath, Task>,
    pub prs: BTreeMap<(RepoRef, u64), Vec<PrSnapshot>>,
    pub op_states: BTreeMap<TaskPath, OpState>,
    pub idempotency_keys: BTreeMap<String, ralph_core::domain::IdempotencyKey>,
    pub ralph_runs: BTreeMap<RunId, RalphRun>,
    pub sync_cursors: BTreeMap<RepoRef, SyncCursor>,
    pub throttle_windows: BTreeMap<(String, WindowKind), ThrottleWindow>,
    pub daemon_record: Option<DaemonRecord>,
}

impl MaterializedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the state. Total and idempotent: applying
    /// the same event twice leaves the state as it was after the first.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::IssueSnapshotted { snapshot } => self.apply_issue_snapshot(snapshot),
            Event::LabelsSnapshotted { repo, issue_number, labels } => {
                self.apply_labels_snapshot(repo, *issue_number, labels)
            }
            Event::TaskUpserted { task } => self.apply_task_upsert(task),
            Event::TaskDeleted { path } => {
                self.tasks.remove(path);
            }
            Event::PrSnapshotted { snapshot } => self.apply_pr_snapshot(snapshot),
            Event::OpStateClaimed { state } => self.apply_op_state_claim(state),
            Event::OpStateHeartbeat { path, daemon_id, heartbeat_at_ms } => {
                self.apply_op_state_heartbeat(path, daemon_id, *heartbeat_at_ms)
            }
            Event::OpStateReleased { path, released_at_ms, reason } => {
                self.apply_op_state_release(path, *released_at_ms, reason)
            }
            Event::IdempotencyKeyRecorded { key, scope, payload, created_at_ms } => {
                self.idempotency_keys.entry(key.clone()).or_insert_with(|| {
                    ralph_core::domain::IdempotencyKey {
                        key: key.clone(),
                        scope: scope.clone(),
                        payload: payload.clone(),
                        created_at_ms: *created_at_ms,
                    }
                });
            }
            Event::IdempotencyKeyUpserted { key, payload } => {
                if let Some(existing) = self.idempotency_keys.get_mut(key) {
                    existing.payload = Some(payload.clone());
                }
            }
            Event::IdempotencyKeyDeleted { key } => {
                self.idempotency_keys.remove(key);
            }
            Event::RunStarted { run } => {
                self.ralph_runs.entry(run.run_id).or_insert_with(|| run.clone());
            }
            Event::RunCompleted { run_id, completed_at_ms, outcome } => {
                if let Some(run) = self.ralph_runs.get_mut(run_id) {
                    run.completed_at_ms = Some(*completed_at_ms);
                    run.outcome = Some(*outcome);
                }
            }
            Event::GateRowsEnsured { run_id, updated_at_ms } => {
                self.apply_gate_rows_ensured(run_id, *updated_at_ms)
            }
            Event::GateResultUpserted { result } => self.apply_gate_result_upsert(result),
            Event::StepMetricRecorded { metric } => {
                if let Some(run) = self.ralph_runs.get_mut(&metric.run_id) {
                    run.step_metrics.push(metric.clone());
                }
            }
            Event::TokenTotalsAccumulated { run_id, delta } => {
                if let Some(run) = self.ralph_runs.get_mut(run_id) {
                    run.token_totals.input_tokens += delta.input_tokens;
                    run.token_totals.output_tokens += delta.output_tokens;
                    run.token_totals.cached_tokens += delta.cached_tokens;
                }
            }
            Event::SyncCursorAdvanced { cursor } => self.apply_sync_cursor(cursor),
            Event::ThrottleWindowObserved { window } => {
                self.throttle_windows
                    .insert((window.provider_id.clone(), window.window_kind), window.clone());
            }
            Event::DaemonRegistered { record } => {
                self.daemon_record = Some(record.clone());
            }
            Event::DaemonHeartbeat { daemon_id, heartbeat_at_ms } => {
                if let Some(record) = &mut self.daemon_record {
                    if record.daemon_id == *daemon_id {
                        record.heartbeat_at_ms = (*heartbeat_at_ms).max(record.heartbeat_at_ms);
                    }
                }
            }
        }
    }

    fn apply_issue_snapshot(&mut self, snapshot: &IssueSnapshot) {
        let key = (snapshot.repo.clone(), snapshot.number);
        match self.issues.get(&key) {
            Some(existing) if existing.recorded_at_ms >= snapshot.recorded_at_ms => {}
            _ => {
                self.issues.insert(key, snapshot.clone());
            }
        }
    }

    fn apply_labels_snapshot(&mut self, repo: &RepoRef, issue_number: u64, labels: &LabelSet) {
        let key = (repo.clone(), issue_number);
        match self.issue_labels.get(&key) {
            Some(existing) if existing.recorded_at_ms >= labels.recorded_at_ms => {}
            _ => {
                self.issue_labels.insert(key, labels.clone());
            }
        }
    }

    fn apply_task_upsert(&mut self, task: &Task) {
        match self.tasks.get(&task.path) {
            Some(existing) if existing.created_at_ms > task.created_at_ms => {}
            _ => {
                self.tasks.insert(task.path.clone(), task.clone());
            }
        }
    }

    fn apply_pr_snapshot(&mut self, snapshot: &PrSnapshot) {
        let key = (snapshot.repo.clone(), snapshot.issue_number);
        let entries = self.prs.entry(key).or_default();
        if let Some(existing) = entries.iter_mut().find(|p| p.pr_url == snapshot.pr_url) {
            if snapshot.recorded_at_ms >= existing.recorded_at_ms {
                *existing = snapshot.clone();
            }
        } else {
            entries.push(snapshot.clone());
        }
    }

    fn apply_op_state_claim(&mut self, state: &OpState) {
        self.op_states.insert(state.path.clone(), state.clone());
    }

    fn apply_op_state_heartbeat(
        &mut self,
        path: &TaskPath,
        daemon_id: &ralph_core::domain::DaemonId,
        heartbeat_at_ms: u64,
    ) {
        if let Some(state) = self.op_states.get_mut(path) {
            if state.daemon_id == *daemon_id && state.is_live() {
                state.heartbeat_at_ms = heartbeat_at_ms.max(state.heartbeat_at_ms);
            }
        }
    }

    fn apply_op_state_release(&mut self, path: &TaskPath, released_at_ms: u64, reason: &str) {
        if let Some(state) = self.op_states.get_mut(path) {
            if state.released_at_ms.is_none() {
                state.released_at_ms = Some(released_at_ms);
                state.released_reason = Some(reason.to_string());
            }
        }
    }

    fn apply_gate_rows_ensured(&mut self, run_id: &RunId, updated_at_ms: u64) {
        if let Some(run) = self.ralph_runs.get_mut(run_id) {
            for gate in ralph_core::domain::Gate::ALL {
                if !run.gate_results.iter().any(|g| g.gate == gate) {
                    run.gate_results.push(GateResult {
                        run_id: *run_id,
                        gate,
                        status: ralph_core::domain::GateStatus::Pending,
                        command: None,
                        reason: None,
                        url: None,
                        pr_number: None,
                        pr_url: None,
                        updated_at_ms,
                    });
                }
            }
        }
    }

    fn apply_gate_result_upsert(&mut self, result: &GateResult) {
        if let Some(run) = self.ralph_runs.get_mut(&result.run_id) {
            if let Some(existing) = run.gate_results.iter_mut().find(|g| g.gate == result.gate) {
                if result.updated_at_ms >= existing.updated_at_ms {
                    *existing = result.clone();
                }
            } else {
                run.gate_results.push(result.clone());
            }
        }
    }

    fn apply_sync_cursor(&mut self, cursor: &SyncCursor) {
        match self.sync_cursors.get(&cursor.repo) {
            Some(existing)
                if existing.last_sync_at_ms.unwrap_or(0) > cursor.last_sync_at_ms.unwrap_or(0) => {}
            _ => {
                self.sync_cursors.insert(cursor.repo.clone(), cursor.clone());
            }
        }
    }
}

/// A point-in-time capture of `MaterializedState`, tagged with the
/// schema version it was written under and the WAL `seq` it reflects so
/// replay only needs to process the tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub v: u32,
    pub seq: u64,
    pub state: MaterializedState,
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
