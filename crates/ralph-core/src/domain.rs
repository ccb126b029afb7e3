// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Value types shared by every component: repos, issues, tasks, PRs,
//! leases, idempotency keys, runs/gates, sync cursors, throttle windows,
//! and the daemon record. Nothing here performs I/O.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::define_id;
use crate::simple_display;

define_id! {
    /// Identifies one attempt at driving a task through the worker pipeline.
    pub struct RunId("run-");
}

define_id! {
    /// Identifies a live daemon process (one per host, enforced by the startup lock).
    pub struct DaemonId("dmn-");
}

define_id! {
    /// Identifies an agent subprocess session, reconnectable across restarts.
    pub struct SessionId("ses-");
}

define_id! {
    /// Identifies a worker coroutine slot within a repo's pool.
    pub struct WorkerId("wkr-");
}

/// `{owner, name}` identity of a forge repository. Immutable per daemon
/// lifetime; config changes require a restart to take effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self { owner: owner.into(), name: name.into() }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn slug(&self) -> String {
        format!("{}-{}", self.owner, self.name).to_lowercase()
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Resolved per-repo configuration the scheduler and worker consult.
/// Configuration *parsing* is out of scope; this is the already-resolved
/// shape components are handed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo: RepoRef,
    pub bot_branch: String,
    pub concurrency_slots: u32,
    pub required_checks: Vec<String>,
    pub preflight_commands: Vec<String>,
    pub setup_commands: Vec<String>,
    pub scheduler_priority: i32,
}

/// Path identifying the logical task handle for one `(repo, issue)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskPath {
    pub repo: RepoRef,
    pub issue_number: u64,
}

impl TaskPath {
    pub fn new(repo: RepoRef, issue_number: u64) -> Self {
        Self { repo, issue_number }
    }
}

impl std::fmt::Display for TaskPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo.full_name(), self.issue_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueState {
    Open,
    Closed,
}

simple_display! {
    IssueState {
        Open => "open",
        Closed => "closed",
    }
}

/// Source of truth for queue eligibility, refreshed on each sync tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub repo: RepoRef,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub url: String,
    pub github_updated_at_ms: u64,
    pub recorded_at_ms: u64,
}

/// Label set for one issue, recorded with its own snapshot timestamp so
/// last-writer-wins can be enforced independent of the issue body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSet {
    pub labels: BTreeSet<String>,
    pub recorded_at_ms: u64,
}

impl LabelSet {
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Starting,
    InProgress,
    WaitingOnPr,
    Blocked,
    Throttled,
    Done,
    Escalated,
}

simple_display! {
    TaskStatus {
        Queued => "queued",
        Starting => "starting",
        InProgress => "in-progress",
        WaitingOnPr => "waiting-on-pr",
        Blocked => "blocked",
        Throttled => "throttled",
        Done => "done",
        Escalated => "escalated",
    }
}

/// Logical handle for an `(repo, issue)` pair, created implicitly the
/// first time an issue becomes queue-eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub path: TaskPath,
    pub status: TaskStatus,
    pub session_id: Option<SessionId>,
    pub worktree_path: Option<String>,
    pub worker_id: Option<WorkerId>,
    pub repo_slot: Option<u32>,
    pub daemon_id: Option<DaemonId>,
    pub heartbeat_at_ms: Option<u64>,
    pub checkpoint: Option<serde_json::Value>,
    pub pr_url: Option<String>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
}

impl Task {
    pub fn new(path: TaskPath, created_at_ms: u64) -> Self {
        Self {
            path,
            status: TaskStatus::Queued,
            session_id: None,
            worktree_path: None,
            worker_id: None,
            repo_slot: None,
            daemon_id: None,
            heartbeat_at_ms: None,
            checkpoint: None,
            pr_url: None,
            created_at_ms,
            completed_at_ms: None,
        }
    }

    pub fn has_live_session(&self, ttl_ms: u64, now_ms: u64) -> bool {
        match (&self.session_id, self.heartbeat_at_ms) {
            (Some(_), Some(hb)) => now_ms.saturating_sub(hb) < ttl_ms,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

simple_display! {
    PrState {
        Open => "open",
        Merged => "merged",
        Closed => "closed",
    }
}

/// A pull request associated with an issue. `select_canonical_pr` picks
/// the one whose `created_at_ms` is earliest, ties broken by URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrSnapshot {
    pub repo: RepoRef,
    pub issue_number: u64,
    pub pr_url: String,
    pub state: PrState,
    pub head_sha: Option<String>,
    pub base_ref: Option<String>,
    pub recorded_at_ms: u64,
    pub created_at_ms: Option<u64>,
}

/// Selects the canonical PR for an issue: earliest `created_at_ms`, ties
/// broken by URL. Stable under any permutation of the input slice.
pub fn select_canonical_pr(snapshots: &[PrSnapshot]) -> Option<&PrSnapshot> {
    snapshots.iter().min_by(|a, b| {
        let ka = (a.created_at_ms.unwrap_or(u64::MAX), &a.pr_url);
        let kb = (b.created_at_ms.unwrap_or(u64::MAX), &b.pr_url);
        ka.cmp(&kb)
    })
}

/// The lease row for a task: which daemon/worker currently owns it. At
/// most one row with `released_at_ms == None` exists per task path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpState {
    pub path: TaskPath,
    pub daemon_id: DaemonId,
    pub worker_id: Option<WorkerId>,
    pub session_id: Option<SessionId>,
    pub worktree_path: Option<String>,
    pub heartbeat_at_ms: u64,
    pub released_at_ms: Option<u64>,
    pub released_reason: Option<String>,
}

impl OpState {
    pub fn is_live(&self) -> bool {
        self.released_at_ms.is_none()
    }

    pub fn is_stale(&self, ttl_ms: u64, now_ms: u64) -> bool {
        self.is_live() && now_ms.saturating_sub(self.heartbeat_at_ms) >= ttl_ms
    }
}

/// Append-claim record: first writer wins, payload may be upserted after
/// the initial claim. Used for single-flight PR creation, single-post
/// comments, and DX-survey write-back dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key: String,
    pub scope: String,
    pub payload: Option<serde_json::Value>,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gate {
    Preflight,
    PlanReview,
    ProductReview,
    DevexReview,
    Ci,
    PrEvidence,
}

simple_display! {
    Gate {
        Preflight => "preflight",
        PlanReview => "plan_review",
        ProductReview => "product_review",
        DevexReview => "devex_review",
        Ci => "ci",
        PrEvidence => "pr_evidence",
    }
}

impl Gate {
    /// The fixed gate set every run gets rows for, in pipeline order.
    pub const ALL: [Gate; 6] = [
        Gate::Preflight,
        Gate::PlanReview,
        Gate::ProductReview,
        Gate::DevexReview,
        Gate::Ci,
        Gate::PrEvidence,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateStatus {
    Pending,
    Pass,
    Fail,
}

simple_display! {
    GateStatus {
        Pending => "pending",
        Pass => "pass",
        Fail => "fail",
    }
}

/// Row-level result for one `(run, gate)` pair; always exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub run_id: RunId,
    pub gate: Gate,
    pub status: GateStatus,
    pub command: Option<String>,
    pub reason: Option<String>,
    pub url: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetric {
    pub run_id: RunId,
    pub step: String,
    pub duration_ms: u64,
    pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenTotal {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenTotal {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cached_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    Blocked,
    Escalated,
    Aborted,
}

simple_display! {
    RunOutcome {
        Success => "success",
        Blocked => "blocked",
        Escalated => "escalated",
        Aborted => "aborted",
    }
}

/// One attempt at driving a task through the pipeline, with nested
/// gate results, step metrics, and token totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphRun {
    pub run_id: RunId,
    pub repo: RepoRef,
    pub issue_number: u64,
    pub task_path: TaskPath,
    pub attempt_kind: String,
    pub started_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub outcome: Option<RunOutcome>,
    pub gate_results: Vec<GateResult>,
    pub step_metrics: Vec<StepMetric>,
    pub token_totals: TokenTotal,
}

/// Per-repo cursor for the issue sync poller, and a separate cursor for
/// the done-reconciler's merged-PR search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCursor {
    pub repo: RepoRef,
    pub last_sync_at_ms: Option<u64>,
    pub last_seen_issue_updated_at_ms: Option<u64>,
    pub last_merged_at_ms: Option<u64>,
    pub last_pr_number: Option<u64>,
}

impl SyncCursor {
    pub fn empty(repo: RepoRef) -> Self {
        Self { repo, ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Rolling5h,
    Weekly,
}

simple_display! {
    WindowKind {
        Rolling5h => "rolling5h",
        Weekly => "weekly",
    }
}

/// Token-budget accounting for one `(provider, window kind)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleWindow {
    pub provider_id: String,
    pub window_kind: WindowKind,
    pub budget_tokens: u64,
    pub observed_tokens: u64,
}

impl ThrottleWindow {
    pub fn pct(&self) -> f64 {
        if self.budget_tokens == 0 {
            0.0
        } else {
            self.observed_tokens as f64 / self.budget_tokens as f64 * 100.0
        }
    }
}

/// Record for the single live daemon on a host; created by the startup
/// lock and refreshed on each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub daemon_id: DaemonId,
    pub pid: u32,
    pub started_at_ms: u64,
    pub heartbeat_at_ms: u64,
    pub control_root: String,
    pub control_file_path: String,
    pub ralph_version: String,
    pub command: String,
    pub cwd: String,
}

#[cfg(test)]
#[path = "domain_tests.rs"]
mod tests;
