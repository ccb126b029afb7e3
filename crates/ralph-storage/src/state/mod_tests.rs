// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ralph_core::domain::{
    DaemonId, Gate, GateStatus, IssueState, RepoRef, RunOutcome, SessionId, TaskStatus,
};

fn repo() -> RepoRef {
    RepoRef::new("org", "demo")
}

fn path() -> TaskPath {
    TaskPath::new(repo(), 10)
}

#[test]
fn task_upsert_then_delete_round_trips() {
    let mut state = MaterializedState::new();
    let task = Task::new(path(), 1);
    state.apply_event(&Event::TaskUpserted { task: task.clone() });
    assert_eq!(state.tasks.get(&path()).unwrap().status, TaskStatus::Queued);

    state.apply_event(&Event::TaskDeleted { path: path() });
    assert!(state.tasks.get(&path()).is_none());
}

#[test]
fn apply_event_is_idempotent_for_task_upsert() {
    let mut state = MaterializedState::new();
    let task = Task::new(path(), 1);
    let ev = Event::TaskUpserted { task };
    state.apply_event(&ev);
    let after_first = state.clone();
    state.apply_event(&ev);
    assert_eq!(serde_json::to_value(&state).unwrap(), serde_json::to_value(&after_first).unwrap());
}

#[test]
fn issue_snapshot_last_writer_wins_on_recorded_at() {
    let mut state = MaterializedState::new();
    let older = IssueSnapshot {
        repo: repo(),
        number: 10,
        title: "old".into(),
        state: IssueState::Open,
        url: "u".into(),
        github_updated_at_ms: 1,
        recorded_at_ms: 100,
    };
    let newer = IssueSnapshot { title: "new".into(), recorded_at_ms: 200, ..older.clone() };

    state.apply_event(&Event::IssueSnapshotted { snapshot: newer.clone() });
    state.apply_event(&Event::IssueSnapshotted { snapshot: older });

    let stored = state.issues.get(&(repo(), 10)).unwrap();
    assert_eq!(stored.title, "new");
}

#[test]
fn op_state_heartbeat_only_advances_for_current_owner() {
    let mut state = MaterializedState::new();
    let daemon_a = DaemonId::new();
    let daemon_b = DaemonId::new();
    let claim = OpState {
        path: path(),
        daemon_id: daemon_a,
        worker_id: None,
        session_id: None,
        worktree_path: None,
        heartbeat_at_ms: 1_000,
        released_at_ms: None,
        released_reason: None,
    };
    state.apply_event(&Event::OpStateClaimed { state: claim });

    state.apply_event(&Event::OpStateHeartbeat { path: path(), daemon_id: daemon_b, heartbeat_at_ms: 5_000 });
    assert_eq!(state.op_states.get(&path()).unwrap().heartbeat_at_ms, 1_000);

    state.apply_event(&Event::OpStateHeartbeat { path: path(), daemon_id: daemon_a, heartbeat_at_ms: 5_000 });
    assert_eq!(state.op_states.get(&path()).unwrap().heartbeat_at_ms, 5_000);
}

#[test]
fn op_state_release_is_idempotent_and_keeps_first_reason() {
    let mut state = MaterializedState::new();
    let claim = OpState {
        path: path(),
        daemon_id: DaemonId::new(),
        worker_id: None,
        session_id: None,
        worktree_path: None,
        heartbeat_at_ms: 0,
        released_at_ms: None,
        released_reason: None,
    };
    state.apply_event(&Event::OpStateClaimed { state: claim });
    state.apply_event(&Event::OpStateReleased { path: path(), released_at_ms: 10, reason: "finalized".into() });
    state.apply_event(&Event::OpStateReleased { path: path(), released_at_ms: 20, reason: "stale_sweep".into() });

    let stored = state.op_states.get(&path()).unwrap();
    assert_eq!(stored.released_at_ms, Some(10));
    assert_eq!(stored.released_reason.as_deref(), Some("finalized"));
}

#[test]
fn only_one_live_op_state_per_task_path_invariant() {
    let mut state = MaterializedState::new();
    let daemon = DaemonId::new();
    state.apply_event(&Event::OpStateClaimed {
        state: OpState {
            path: path(),
            daemon_id: daemon,
            worker_id: None,
            session_id: None,
            worktree_path: None,
            heartbeat_at_ms: 0,
            released_at_ms: None,
            released_reason: None,
        },
    });
    state.apply_event(&Event::OpStateReleased { path: path(), released_at_ms: 5, reason: "finalized".into() });
    state.apply_event(&Event::OpStateClaimed {
        state: OpState {
            path: path(),
            daemon_id: daemon,
            worker_id: None,
            session_id: Some(SessionId::new()),
            worktree_path: None,
            heartbeat_at_ms: 10,
            released_at_ms: None,
            released_reason: None,
        },
    });

    let live = state.op_states.get(&path()).unwrap();
    assert!(live.is_live());
}

#[test]
fn idempotency_key_record_is_first_writer_wins() {
    let mut state = MaterializedState::new();
    state.apply_event(&Event::IdempotencyKeyRecorded {
        key: "pr-create:org/demo#10:bot/integration".into(),
        scope: "pr-create".into(),
        payload: Some(serde_json::json!({"ownerDaemon": "a"})),
        created_at_ms: 100,
    });
    state.apply_event(&Event::IdempotencyKeyRecorded {
        key: "pr-create:org/demo#10:bot/integration".into(),
        scope: "pr-create".into(),
        payload: Some(serde_json::json!({"ownerDaemon": "b"})),
        created_at_ms: 200,
    });

    let stored = state.idempotency_keys.get("pr-create:org/demo#10:bot/integration").unwrap();
    assert_eq!(stored.created_at_ms, 100);
    assert_eq!(stored.payload.as_ref().unwrap()["ownerDaemon"], "a");
}

#[test]
fn idempotency_key_upsert_replaces_payload_after_claim() {
    let mut state = MaterializedState::new();
    state.apply_event(&Event::IdempotencyKeyRecorded {
        key: "k".into(),
        scope: "s".into(),
        payload: None,
        created_at_ms: 0,
    });
    state.apply_event(&Event::IdempotencyKeyUpserted { key: "k".into(), payload: serde_json::json!({"done": true}) });
    assert_eq!(state.idempotency_keys.get("k").unwrap().payload.as_ref().unwrap()["done"], true);
}

#[test]
fn gate_rows_ensured_inserts_fixed_set_once() {
    let mut state = MaterializedState::new();
    let run = sample_run();
    let run_id = run.run_id;
    state.apply_event(&Event::RunStarted { run });
    state.apply_event(&Event::GateRowsEnsured { run_id, updated_at_ms: 1 });
    state.apply_event(&Event::GateRowsEnsured { run_id, updated_at_ms: 2 });

    let stored = state.ralph_runs.get(&run_id).unwrap();
    assert_eq!(stored.gate_results.len(), Gate::ALL.len());
}

#[test]
fn gate_result_upsert_keeps_one_row_per_gate() {
    let mut state = MaterializedState::new();
    let run = sample_run();
    let run_id = run.run_id;
    state.apply_event(&Event::RunStarted { run });
    state.apply_event(&Event::GateRowsEnsured { run_id, updated_at_ms: 1 });

    state.apply_event(&Event::GateResultUpserted {
        result: GateResult {
            run_id,
            gate: Gate::Ci,
            status: GateStatus::Pass,
            command: None,
            reason: None,
            url: None,
            pr_number: None,
            pr_url: None,
            updated_at_ms: 5,
        },
    });

    let stored = state.ralph_runs.get(&run_id).unwrap();
    let ci_rows: Vec<_> = stored.gate_results.iter().filter(|g| g.gate == Gate::Ci).collect();
    assert_eq!(ci_rows.len(), 1);
    assert_eq!(ci_rows[0].status, GateStatus::Pass);
}

#[test]
fn token_totals_accumulate_across_events() {
    let mut state = MaterializedState::new();
    let run = sample_run();
    let run_id = run.run_id;
    state.apply_event(&Event::RunStarted { run });
    state.apply_event(&Event::TokenTotalsAccumulated {
        run_id,
        delta: ralph_core::domain::TokenTotal { input_tokens: 10, output_tokens: 5, cached_tokens: 0 },
    });
    state.apply_event(&Event::TokenTotalsAccumulated {
        run_id,
        delta: ralph_core::domain::TokenTotal { input_tokens: 1, output_tokens: 1, cached_tokens: 1 },
    });

    let stored = state.ralph_runs.get(&run_id).unwrap();
    assert_eq!(stored.token_totals.total(), 18);
}

#[test]
fn run_completed_records_outcome_and_timestamp() {
    let mut state = MaterializedState::new();
    let run = sample_run();
    let run_id = run.run_id;
    state.apply_event(&Event::RunStarted { run });
    state.apply_event(&Event::RunCompleted { run_id, completed_at_ms: 42, outcome: RunOutcome::Success });

    let stored = state.ralph_runs.get(&run_id).unwrap();
    assert_eq!(stored.completed_at_ms, Some(42));
    assert_eq!(stored.outcome, Some(RunOutcome::Success));
}

#[test]
fn sync_cursor_advance_is_monotonic_non_decreasing() {
    let mut state = MaterializedState::new();
    state.apply_event(&Event::SyncCursorAdvanced {
        cursor: SyncCursor { repo: repo(), last_sync_at_ms: Some(100), ..SyncCursor::empty(repo()) },
    });
    state.apply_event(&Event::SyncCursorAdvanced {
        cursor: SyncCursor { repo: repo(), last_sync_at_ms: Some(50), ..SyncCursor::empty(repo()) },
    });

    assert_eq!(state.sync_cursors.get(&repo()).unwrap().last_sync_at_ms, Some(100));
}

fn sample_run() -> RalphRun {
    RalphRun {
        run_id: ralph_core::domain::RunId::new(),
        repo: repo(),
        issue_number: 10,
        task_path: path(),
        attempt_kind: "build".into(),
        started_at_ms: 0,
        completed_at_ms: None,
        outcome: None,
        gate_results: Vec::new(),
        step_metrics: Vec::new(),
        token_totals: ralph_core::domain::TokenTotal::default(),
    }
}
