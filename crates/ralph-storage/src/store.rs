// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The public façade every other component talks to. A single writer
//! (guarded by an internal lock) keeps transactions short: each public
//! operation below is one WAL append (or append-batch) followed by one
//! in-memory fold, never a long-held lock across an I/O wait elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use ralph_core::domain::{
    DaemonRecord, Gate, GateResult, IdempotencyKey, IssueSnapshot, LabelSet, OpState, PrSnapshot,
    RalphRun, RepoRef, RunId, SyncCursor, Task, TaskPath, ThrottleWindow,
};
use ralph_core::event::Event;
use thiserror::Error;

use crate::migration::{MigrationError, MigrationRegistry};
use crate::state::{MaterializedState, Snapshot, SCHEMA_VERSION};
use crate::wal::{Wal, WalError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSort {
    TokenTotal,
    TriageScore,
}

#[derive(Debug, Clone, Default)]
pub struct ListRunsFilter {
    pub sort: Option<RunSort>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
    pub include_missing: bool,
}

pub struct StateStore {
    wal: Wal,
    snapshot_path: PathBuf,
    state: Mutex<MaterializedState>,
}

impl StateStore {
    /// Opens the store at `wal_path`/`snapshot_path`, loading the most
    /// recent snapshot (migrating it forward through `migrations` if its
    /// version is older than [`SCHEMA_VERSION`]) and replaying every WAL
    /// entry written after that snapshot's `seq`.
    pub fn open(
        wal_path: impl AsRef<Path>,
        snapshot_path: impl AsRef<Path>,
        migrations: &MigrationRegistry,
    ) -> Result<Self, StoreError> {
        let snapshot_path = snapshot_path.as_ref().to_path_buf();
        let wal = Wal::open(wal_path)?;

        let (mut state, snapshot_seq) = if snapshot_path.exists() {
            let raw = fs::read_to_string(&snapshot_path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let version = value["v"].as_u64().unwrap_or(0) as u32;
            let seq = value["seq"].as_u64().unwrap_or(0);
            let state_value = value["state"].clone();
            let migrated = migrations.migrate(version, state_value)?;
            let state: MaterializedState = serde_json::from_value(migrated)?;
            (state, seq)
        } else {
            (MaterializedState::new(), 0)
        };

        for entry in wal.entries_after(snapshot_seq)? {
            state.apply_event(&entry.event);
        }
        wal.mark_processed(wal.current_seq());

        Ok(Self { wal, snapshot_path, state: Mutex::new(state) })
    }

    fn append_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal.append(event.clone())?;
        self.state.lock().apply_event(&event);
        Ok(())
    }

    pub fn snapshot_issue(&self, snapshot: IssueSnapshot) -> Result<(), StoreError> {
        self.append_and_apply(Event::IssueSnapshotted { snapshot })
    }

    pub fn snapshot_labels(
        &self,
        repo: RepoRef,
        issue_number: u64,
        labels: LabelSet,
    ) -> Result<(), StoreError> {
        self.append_and_apply(Event::LabelsSnapshotted { repo, issue_number, labels })
    }

    pub fn snapshot_task(&self, task: Task) -> Result<(), StoreError> {
        self.append_and_apply(Event::TaskUpserted { task })
    }

    pub fn snapshot_pr(&self, snapshot: PrSnapshot) -> Result<(), StoreError> {
        self.append_and_apply(Event::PrSnapshotted { snapshot })
    }

    pub fn snapshot_run(&self, run: RalphRun) -> Result<(), StoreError> {
        self.append_and_apply(Event::RunStarted { run })
    }

    pub fn snapshot_sync_cursor(&self, cursor: SyncCursor) -> Result<(), StoreError> {
        self.append_and_apply(Event::SyncCursorAdvanced { cursor })
    }

    pub fn snapshot_throttle_window(&self, window: ThrottleWindow) -> Result<(), StoreError> {
        self.append_and_apply(Event::ThrottleWindowObserved { window })
    }

    pub fn register_daemon(&self, record: DaemonRecord) -> Result<(), StoreError> {
        self.append_and_apply(Event::DaemonRegistered { record })
    }

    pub fn heartbeat_daemon(
        &self,
        daemon_id: ralph_core::domain::DaemonId,
        heartbeat_at_ms: u64,
    ) -> Result<(), StoreError> {
        self.append_and_apply(Event::DaemonHeartbeat { daemon_id, heartbeat_at_ms })
    }

    /// Inserts the fixed six-gate set as `pending` rows for `run_id`,
    /// idempotent: re-ensuring never duplicates an existing row.
    pub fn ensure_gate_rows(&self, run_id: RunId, updated_at_ms: u64) -> Result<(), StoreError> {
        self.append_and_apply(Event::GateRowsEnsured { run_id, updated_at_ms })
    }

    pub fn upsert_gate_result(&self, result: GateResult) -> Result<(), StoreError> {
        self.append_and_apply(Event::GateResultUpserted { result })
    }

    pub fn record_step_metric(&self, metric: ralph_core::domain::StepMetric) -> Result<(), StoreError> {
        self.append_and_apply(Event::StepMetricRecorded { metric })
    }

    pub fn accumulate_token_totals(
        &self,
        run_id: RunId,
        delta: ralph_core::domain::TokenTotal,
    ) -> Result<(), StoreError> {
        self.append_and_apply(Event::TokenTotalsAccumulated { run_id, delta })
    }

    pub fn complete_run(
        &self,
        run_id: RunId,
        completed_at_ms: u64,
        outcome: ralph_core::domain::RunOutcome,
    ) -> Result<(), StoreError> {
        self.append_and_apply(Event::RunCompleted { run_id, completed_at_ms, outcome })
    }

    /// Read-only ranking of runs by token total or (when no windowed
    /// data exists) insertion order, honoring the `since`/`until`/
    /// `include_missing` filter.
    pub fn list_ralph_runs_top(&self, filter: ListRunsFilter, limit: usize) -> Vec<RalphRun> {
        let state = self.state.lock();
        let mut runs: Vec<RalphRun> = state
            .ralph_runs
            .values()
            .filter(|r| match filter.since_ms {
                Some(since) => r.started_at_ms >= since,
                None => true,
            })
            .filter(|r| match filter.until_ms {
                Some(until) => r.started_at_ms <= until,
                None => true,
            })
            .filter(|r| filter.include_missing || r.outcome.is_some())
            .cloned()
            .collect();

        match filter.sort.unwrap_or(RunSort::TokenTotal) {
            RunSort::TokenTotal => {
                runs.sort_by(|a, b| b.token_totals.total().cmp(&a.token_totals.total()))
            }
            RunSort::TriageScore => runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms)),
        }
        runs.truncate(limit);
        runs
    }

    pub fn get_task(&self, path: &TaskPath) -> Option<Task> {
        self.state.lock().tasks.get(path).cloned()
    }

    pub fn get_op_state(&self, path: &TaskPath) -> Option<OpState> {
        self.state.lock().op_states.get(path).cloned()
    }

    pub fn get_labels(&self, repo: &RepoRef, issue_number: u64) -> Option<LabelSet> {
        self.state.lock().issue_labels.get(&(repo.clone(), issue_number)).cloned()
    }

    pub fn get_issue(&self, repo: &RepoRef, issue_number: u64) -> Option<IssueSnapshot> {
        self.state.lock().issues.get(&(repo.clone(), issue_number)).cloned()
    }

    pub fn get_prs(&self, repo: &RepoRef, issue_number: u64) -> Vec<PrSnapshot> {
        self.state.lock().prs.get(&(repo.clone(), issue_number)).cloned().unwrap_or_default()
    }

    pub fn get_sync_cursor(&self, repo: &RepoRef) -> Option<SyncCursor> {
        self.state.lock().sync_cursors.get(repo).cloned()
    }

    pub fn get_idempotency_key(&self, key: &str) -> Option<IdempotencyKey> {
        self.state.lock().idempotency_keys.get(key).cloned()
    }

    pub fn get_run(&self, run_id: RunId) -> Option<RalphRun> {
        self.state.lock().ralph_runs.get(&run_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.values().cloned().collect()
    }

    pub fn all_issues(&self) -> Vec<IssueSnapshot> {
        self.state.lock().issues.values().cloned().collect()
    }

    pub fn get_throttle_windows(&self) -> Vec<ThrottleWindow> {
        self.state.lock().throttle_windows.values().cloned().collect()
    }

    /// Sums token usage across every run started at or after `since_ms`.
    /// `TokenTotal` carries no `Add` impl of its own (WAL-side
    /// accumulation happens per-run in [`crate::state::MaterializedState`]),
    /// so this folds the three fields by hand across runs.
    pub fn token_totals_since(&self, since_ms: u64) -> ralph_core::domain::TokenTotal {
        let state = self.state.lock();
        state
            .ralph_runs
            .values()
            .filter(|r| r.started_at_ms >= since_ms)
            .fold(ralph_core::domain::TokenTotal::default(), |mut acc, r| {
                acc.input_tokens += r.token_totals.input_tokens;
                acc.output_tokens += r.token_totals.output_tokens;
                acc.cached_tokens += r.token_totals.cached_tokens;
                acc
            })
    }

    /// Runs `f` against a read-only snapshot of the current state,
    /// collecting the events it wants to commit, then appends all of
    /// them as one WAL batch before folding any of them into state —
    /// so a reader never observes a partially-applied transaction.
    pub fn run_in_transaction<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&MaterializedState) -> Vec<Event>,
    {
        let events = {
            let state = self.state.lock();
            f(&state)
        };
        if events.is_empty() {
            return Ok(());
        }
        self.wal.append_batch(events.clone())?;
        let mut state = self.state.lock();
        for event in &events {
            state.apply_event(event);
        }
        Ok(())
    }

    /// Writes a point-in-time snapshot and truncates the WAL prefix it
    /// now covers.
    pub fn save_snapshot(&self) -> Result<(), StoreError> {
        let seq = self.wal.current_seq();
        let state = self.state.lock().clone();
        let snapshot = Snapshot { v: SCHEMA_VERSION, seq, state };
        let json = serde_json::to_string(&snapshot)?;
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.snapshot_path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.snapshot_path)?;
        self.wal.truncate_before(seq + 1)?;
        Ok(())
    }

    pub fn close_for_tests(&self) -> Result<(), StoreError> {
        self.wal.flush()?;
        Ok(())
    }

    /// Exposes the fixed gate set helper so callers can build a fresh
    /// run's initial rows without reaching into `ralph_core` directly.
    pub fn gate_set() -> [Gate; 6] {
        Gate::ALL
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
