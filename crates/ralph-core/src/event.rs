// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Event` enum is the unit of durability: every write the store
//! accepts is first appended to the WAL as one of these, then folded
//! into `MaterializedState` by `apply_event`. `apply_event` must be a
//! total, idempotent function of `&Event` — applying the same event
//! twice is a no-op beyond the first.

use serde::{Deserialize, Serialize};

use crate::domain::{
    DaemonId, DaemonRecord, GateResult, IssueSnapshot, LabelSet, OpState, PrSnapshot, RalphRun,
    RepoRef, RunId, StepMetric, SyncCursor, Task, TaskPath, ThrottleWindow, TokenTotal,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    IssueSnapshotted { snapshot: IssueSnapshot },
    LabelsSnapshotted { repo: RepoRef, issue_number: u64, labels: LabelSet },
    TaskUpserted { task: Task },
    TaskDeleted { path: TaskPath },
    PrSnapshotted { snapshot: PrSnapshot },
    OpStateClaimed { state: OpState },
    OpStateHeartbeat { path: TaskPath, daemon_id: DaemonId, heartbeat_at_ms: u64 },
    OpStateReleased { path: TaskPath, released_at_ms: u64, reason: String },
    IdempotencyKeyRecorded {
        key: String,
        scope: String,
        payload: Option<serde_json::Value>,
        created_at_ms: u64,
    },
    IdempotencyKeyUpserted { key: String, payload: serde_json::Value },
    IdempotencyKeyDeleted { key: String },
    RunStarted { run: RalphRun },
    RunCompleted { run_id: RunId, completed_at_ms: u64, outcome: crate::domain::RunOutcome },
    GateRowsEnsured { run_id: RunId, updated_at_ms: u64 },
    GateResultUpserted { result: GateResult },
    StepMetricRecorded { metric: StepMetric },
    TokenTotalsAccumulated { run_id: RunId, delta: TokenTotal },
    SyncCursorAdvanced { cursor: SyncCursor },
    ThrottleWindowObserved { window: ThrottleWindow },
    DaemonRegistered { record: DaemonRecord },
    DaemonHeartbeat { daemon_id: DaemonId, heartbeat_at_ms: u64 },
}

impl Event {
    /// Short, stable name used in log fields and the WAL's on-disk
    /// representation's `type` tag (mirrors `serde`'s internal tagging
    /// but exposed for logging without re-serializing).
    pub fn name(&self) -> &'static str {
        match self {
            Event::IssueSnapshotted { .. } => "issue_snapshotted",
            Event::LabelsSnapshotted { .. } => "labels_snapshotted",
            Event::TaskUpserted { .. } => "task_upserted",
            Event::TaskDeleted { .. } => "task_deleted",
            Event::PrSnapshotted { .. } => "pr_snapshotted",
            Event::OpStateClaimed { .. } => "op_state_claimed",
            Event::OpStateHeartbeat { .. } => "op_state_heartbeat",
            Event::OpStateReleased { .. } => "op_state_released",
            Event::IdempotencyKeyRecorded { .. } => "idempotency_key_recorded",
            Event::IdempotencyKeyUpserted { .. } => "idempotency_key_upserted",
            Event::IdempotencyKeyDeleted { .. } => "idempotency_key_deleted",
            Event::RunStarted { .. } => "run_started",
            Event::RunCompleted { .. } => "run_completed",
            Event::GateRowsEnsured { .. } => "gate_rows_ensured",
            Event::GateResultUpserted { .. } => "gate_result_upserted",
            Event::StepMetricRecorded { .. } => "step_metric_recorded",
            Event::TokenTotalsAccumulated { .. } => "token_totals_accumulated",
            Event::SyncCursorAdvanced { .. } => "sync_cursor_advanced",
            Event::ThrottleWindowObserved { .. } => "throttle_window_observed",
            Event::DaemonRegistered { .. } => "daemon_registered",
            Event::DaemonHeartbeat { .. } => "daemon_heartbeat",
        }
    }

    /// The `(repo, issue)` this event concerns, when applicable — used
    /// to attach structured log fields without matching on variants at
    /// every call site.
    pub fn task_path(&self) -> Option<&TaskPath> {
        match self {
            Event::TaskUpserted { task } => Some(&task.path),
            Event::TaskDeleted { path } => Some(path),
            Event::OpStateClaimed { state } => Some(&state.path),
            Event::OpStateHeartbeat { path, .. } => Some(path),
            Event::OpStateReleased { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
