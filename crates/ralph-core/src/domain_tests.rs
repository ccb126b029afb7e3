// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn repo() -> RepoRef {
    RepoRef::new("org", "demo")
}

#[test]
fn repo_ref_full_name_and_slug() {
    let r = repo();
    assert_eq!(r.full_name(), "org/demo");
    assert_eq!(r.slug(), "org-demo");
}

#[test]
fn task_path_display() {
    let path = TaskPath::new(repo(), 10);
    assert_eq!(path.to_string(), "org/demo#10");
}

#[test]
fn task_has_live_session_requires_session_and_fresh_heartbeat() {
    let mut task = Task::new(TaskPath::new(repo(), 10), 0);
    assert!(!task.has_live_session(60_000, 100_000));

    task.session_id = Some(SessionId::new());
    task.heartbeat_at_ms = Some(99_000);
    assert!(task.has_live_session(60_000, 100_000));

    task.heartbeat_at_ms = Some(0);
    assert!(!task.has_live_session(60_000, 100_000));
}

#[test]
fn op_state_is_stale_only_when_live_and_past_ttl() {
    let base = OpState {
        path: TaskPath::new(repo(), 10),
        daemon_id: DaemonId::new(),
        worker_id: None,
        session_id: None,
        worktree_path: None,
        heartbeat_at_ms: 0,
        released_at_ms: None,
        released_reason: None,
    };
    assert!(base.is_stale(1_000, 1_000));
    assert!(!base.is_stale(1_000, 999));

    let mut released = base.clone();
    released.released_at_ms = Some(5);
    assert!(!released.is_stale(1_000, 1_000_000));
}

#[parameterized(
    earliest_wins = { &[(200, "https://x/2"), (100, "https://x/1")], "https://x/1" },
    tie_broken_by_url = { &[(100, "https://x/2"), (100, "https://x/1")], "https://x/1" },
)]
fn select_canonical_pr_is_stable(input: &[(u64, &str)], expected_url: &str) {
    let snapshots: Vec<PrSnapshot> = input
        .iter()
        .map(|(created_at, url)| PrSnapshot {
            repo: repo(),
            issue_number: 10,
            pr_url: url.to_string(),
            state: PrState::Open,
            head_sha: None,
            base_ref: None,
            recorded_at_ms: 0,
            created_at_ms: Some(*created_at),
        })
        .collect();
    let picked = select_canonical_pr(&snapshots).expect("non-empty input");
    assert_eq!(picked.pr_url, expected_url);
}

#[test]
fn select_canonical_pr_stable_under_permutation() {
    let mut snapshots = vec![
        PrSnapshot {
            repo: repo(),
            issue_number: 10,
            pr_url: "https://x/1".into(),
            state: PrState::Open,
            head_sha: None,
            base_ref: None,
            recorded_at_ms: 0,
            created_at_ms: Some(100),
        },
        PrSnapshot {
            repo: repo(),
            issue_number: 10,
            pr_url: "https://x/2".into(),
            state: PrState::Open,
            head_sha: None,
            base_ref: None,
            recorded_at_ms: 0,
            created_at_ms: Some(200),
        },
    ];
    let forward = select_canonical_pr(&snapshots).unwrap().pr_url.clone();
    snapshots.reverse();
    let reversed = select_canonical_pr(&snapshots).unwrap().pr_url.clone();
    assert_eq!(forward, reversed);
}

#[test]
fn gate_all_covers_fixed_set_in_pipeline_order() {
    assert_eq!(
        Gate::ALL,
        [
            Gate::Preflight,
            Gate::PlanReview,
            Gate::ProductReview,
            Gate::DevexReview,
            Gate::Ci,
            Gate::PrEvidence,
        ]
    );
}

#[test]
fn token_total_sums_all_buckets() {
    let t = TokenTotal { input_tokens: 10, output_tokens: 20, cached_tokens: 5 };
    assert_eq!(t.total(), 35);
}

#[test]
fn throttle_window_pct_handles_zero_budget() {
    let w = ThrottleWindow {
        provider_id: "anthropic".into(),
        window_kind: WindowKind::Rolling5h,
        budget_tokens: 0,
        observed_tokens: 10,
    };
    assert_eq!(w.pct(), 0.0);
}

#[test]
fn throttle_window_pct_computes_ratio() {
    let w = ThrottleWindow {
        provider_id: "anthropic".into(),
        window_kind: WindowKind::Weekly,
        budget_tokens: 200,
        observed_tokens: 50,
    };
    assert_eq!(w.pct(), 25.0);
}
