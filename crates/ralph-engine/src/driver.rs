// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async execution of one claimed task through the worker pipeline.
//! Every branch decision is delegated to the pure functions in
//! [`crate::worker`]; this module only supplies the I/O around them —
//! spawning the agent, preparing the worktree, swapping labels, and
//! ticking the watchdog — so the decision logic stays testable without
//! any of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ralph_core::domain::{IssueState, RalphRun, RepoConfig, RepoRef, RunId, RunOutcome, SessionId, Task, TaskStatus, TokenTotal};
use ralph_core::failure::FailureClass;
use ralph_core::Clock;
use ralph_forge::ForgeApiError;
use ralph_queue::{LabelMutator, LockManager, QueueError};
use ralph_storage::leases::LeaseRegistry;
use ralph_storage::{StateStore, StoreError};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::agent::{AgentEvent, AgentSpawnConfig, AgentSpawnError, AgentSpawner};
use crate::errors::{classify_agent_outcome, classify_forge_error, AgentOutcome};
use crate::watchdog::{self, Signal, Trip, WatchdogConfig, WatchdogMonitor};
use crate::worker::{
    decide_claim, evaluate_lease_contention, finalize_label_plan, parse_dx_survey_envelope, pr_create_lease_key, resolve_required_checks,
    should_retry_base_branch_modified, terminal_status_for, worktree_action, worktree_path, ClaimDecision, LeaseContentionAction, WorktreeAction,
};

/// Seam for preparing the on-disk git worktree a task's agent runs in.
/// Narrowed to the three outcomes [`crate::worker::worktree_action`]
/// already decides between; the driver never touches git directly.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
    async fn is_dirty(&self, path: &str) -> bool;
    async fn prepare(&self, path: &str, action: WorktreeAction) -> Result<(), WorktreeError>;
}

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("worktree operation failed: {0}")]
    Failed(String),
}

/// Seam for the PR-create-and-merge half of the pipeline, narrowed to
/// the four forge operations [`crate::worker`]'s pure functions
/// (`resolve_required_checks`, `should_retry_base_branch_modified`)
/// reason about. The driver never talks to the forge transport
/// directly.
#[async_trait]
pub trait PrGate: Send + Sync {
    async fn create_pr(&self, repo: &RepoRef, title: &str, head: &str, base: &str, body: &str) -> Result<Value, ForgeApiError>;
    async fn merge_pr(&self, repo: &RepoRef, number: u64) -> Result<Value, ForgeApiError>;
    async fn update_branch(&self, repo: &RepoRef, number: u64) -> Result<(), ForgeApiError>;
    async fn required_status_checks(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>, ForgeApiError>;
}

/// Seam for the best-effort comment the driver posts when a task lands
/// on `blocked`/`escalated`. A forge error here never fails the
/// pipeline — the task has already landed by the time this is called.
#[async_trait]
pub trait CommentPoster: Send + Sync {
    async fn post_comment(&self, repo: &RepoRef, issue_number: u64, body: &str) -> Result<(), ForgeApiError>;
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Spawn(#[from] AgentSpawnError),
    #[error(transparent)]
    Forge(#[from] ForgeApiError),
}

/// Wait budget and minimum age for the PR-create lease self-heal rule.
/// Production-scale picks, an order of magnitude above the unit-test
/// values `evaluate_lease_contention` is tested against, long enough
/// that a normal PR-create round trip never triggers contention
/// handling at all.
const PR_CREATE_CONFLICT_WAIT_MS: u64 = 120_000;
const PR_CREATE_LEASE_MIN_AGE_MS: u64 = 90_000;
const PR_CREATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often an idle agent run is ticked against the watchdog while
/// waiting for its next event.
const WATCHDOG_TICK_INTERVAL: Duration = Duration::from_secs(5);

struct AgentRunOutcome {
    failure: Option<FailureClass>,
    result_text: Option<String>,
    /// Recovered from the agent's result marker payload under the
    /// `pr_url` key — a convention this worker defines, not one the
    /// agent contract documented elsewhere. Lets a Build agent that
    /// already opened a PR (e.g. retried after a restart) short-circuit
    /// `create_and_merge_pr`.
    pr_url: Option<String>,
    /// Recovered from the marker payload's `session_id` key, same
    /// invented convention as `pr_url`. Persisted onto the task so a
    /// later crash/restart can resume into this session.
    session_id: Option<String>,
    tokens: TokenTotal,
}

pub struct WorkerDriver<C: Clock> {
    store: Arc<StateStore>,
    spawner: Arc<dyn AgentSpawner>,
    labels: Arc<dyn LabelMutator>,
    worktrees: Arc<dyn WorktreeManager>,
    pr_gate: Arc<dyn PrGate>,
    comments: Arc<dyn CommentPoster>,
    locks: Arc<LockManager>,
    clock: C,
    watchdog_config: WatchdogConfig,
    blocked_comment_coalesce_ms: u64,
}

impl<C: Clock> WorkerDriver<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        spawner: Arc<dyn AgentSpawner>,
        labels: Arc<dyn LabelMutator>,
        worktrees: Arc<dyn WorktreeManager>,
        pr_gate: Arc<dyn PrGate>,
        comments: Arc<dyn CommentPoster>,
        locks: Arc<LockManager>,
        clock: C,
        watchdog_config: WatchdogConfig,
        blocked_comment_coalesce_ms: u64,
    ) -> Self {
        Self { store, spawner, labels, worktrees, pr_gate, comments, locks, clock, watchdog_config, blocked_comment_coalesce_ms }
    }

    /// Drives one claimed task from `claim` through `finalize`, returning
    /// the terminal status it lands on. A closed-upstream issue is
    /// skipped without ever spawning an agent; a task claimed with a
    /// live session id resumes into the Build agent via `reconnect`
    /// instead of replanning from scratch; any agent failure is
    /// classified and lands the task on `blocked` or `escalated` instead
    /// of propagating past the pipeline.
    pub async fn run(&self, repo_config: &RepoConfig, mut task: Task, issue_state: IssueState, current_labels: &[String], worktree_root: &str) -> Result<TaskStatus, DriverError> {
        if decide_claim(issue_state) == ClaimDecision::SkipAlreadyClosed {
            task.status = TaskStatus::Done;
            task.session_id = None;
            task.worktree_path = None;
            task.completed_at_ms = Some(self.clock.epoch_ms());
            self.store.snapshot_task(task)?;
            info!(reason = crate::worker::SKIPPED_CLOSED_UPSTREAM_REASON, "skipping task with closed upstream issue");
            return Ok(TaskStatus::Done);
        }

        // The scheduler always sets `Starting` on claim (see
        // `Scheduler::claim_next`), so a surviving `session_id` — never
        // present on a freshly created task — is the only signal left
        // that this claim is a resume of a crash-orphaned run rather
        // than a fresh one.
        let resuming = task.session_id.is_some();
        let run_id = RunId::new();
        let now_ms = self.clock.epoch_ms();
        self.store.snapshot_run(RalphRun {
            run_id,
            repo: task.path.repo.clone(),
            issue_number: task.path.issue_number,
            task_path: task.path.clone(),
            attempt_kind: if resuming { "resume".to_string() } else { "fresh".to_string() },
            started_at_ms: now_ms,
            completed_at_ms: None,
            outcome: None,
            gate_results: Vec::new(),
            step_metrics: Vec::new(),
            token_totals: TokenTotal::default(),
        })?;
        self.store.ensure_gate_rows(run_id, now_ms)?;

        let slot = task.repo_slot.unwrap_or(0);
        let path = worktree_path(worktree_root, &repo_config.repo.full_name(), slot, task.path.issue_number);

        if resuming {
            info!(path = %task.path, "resuming an in-progress task through its existing agent session");
        } else {
            let exists = self.worktrees.exists(&path).await;
            let dirty = exists && self.worktrees.is_dirty(&path).await;
            self.worktrees.prepare(&path, worktree_action(exists, dirty, false)).await?;
            task.worktree_path = Some(path.clone());
        }

        let in_bot_plan = ralph_queue::labels::plan_enter_in_bot_label_set(current_labels);
        if !in_bot_plan.is_empty() {
            self.labels.mutate_issue_labels(&task.path.repo, task.path.issue_number, &in_bot_plan).await?;
        }

        let roles: &[(crate::agent::AgentRole, bool)] =
            if resuming { &[(crate::agent::AgentRole::Build, true)] } else { &[(crate::agent::AgentRole::Plan, false), (crate::agent::AgentRole::Build, false)] };

        for (role, resume_this) in roles.iter().copied() {
            let session_id = task.session_id.as_ref().map(|s| s.to_string());
            let outcome = self.run_agent(run_id, role, &path, session_id, resume_this).await?;
            if let Some(session_id) = outcome.session_id {
                task.session_id = Some(SessionId::from_string(session_id));
            }
            if let Some(pr_url) = outcome.pr_url {
                task.pr_url = Some(pr_url);
            }
            if let Some(class) = outcome.failure {
                return self.land_on_failure(run_id, &mut task, class).await;
            }
        }

        if task.pr_url.is_none() {
            if let Some(class) = self.create_and_merge_pr(repo_config, &mut task).await? {
                return self.land_on_failure(run_id, &mut task, class).await;
            }
        } else {
            info!(path = %task.path, "build agent already recovered a pr url; skipping pr-create");
        }

        let survey = self.run_agent(run_id, crate::agent::AgentRole::Survey, &path, task.session_id.as_ref().map(|s| s.to_string()), false).await?;
        if let Some(session_id) = survey.session_id {
            task.session_id = Some(SessionId::from_string(session_id));
        }
        if let Some(class) = survey.failure {
            return self.land_on_failure(run_id, &mut task, class).await;
        }
        if let Some(envelope) = survey.result_text.as_deref().and_then(parse_dx_survey_envelope) {
            task.checkpoint = Some(envelope);
        } else {
            warn!(path = %task.path, "survey agent produced no dx_survey envelope");
        }

        let plan = finalize_label_plan(current_labels);
        if !plan.is_empty() {
            self.labels.mutate_issue_labels(&task.path.repo, task.path.issue_number, &plan).await?;
        }

        task.status = TaskStatus::Done;
        task.completed_at_ms = Some(self.clock.epoch_ms());
        self.store.snapshot_task(task)?;
        self.store.complete_run(run_id, self.clock.epoch_ms(), RunOutcome::Success)?;
        Ok(TaskStatus::Done)
    }

    /// Opens (or finds the existing) PR for the task's bot branch and
    /// merges it, retrying exactly once on a "base branch was modified"
    /// 405 per [`should_retry_base_branch_modified`]. The in-process
    /// per-issue lock serializes same-process racers; the durable
    /// [`LeaseRegistry`] claim serializes across processes/restarts
    /// (spec §4.8 item 4, §8 scenario 3) and backs the self-heal rule
    /// for a lease abandoned by a crashed daemon. Returns
    /// `Ok(Some(class))` instead of an error so the caller can run the
    /// normal failure-landing path.
    async fn create_and_merge_pr(&self, repo_config: &RepoConfig, task: &mut Task) -> Result<Option<FailureClass>, DriverError> {
        let _lease = self.locks.lock(&task.path.repo, task.path.issue_number).await;
        let lease_key = pr_create_lease_key(&repo_config.repo.full_name(), task.path.issue_number, &repo_config.bot_branch);
        let leases = LeaseRegistry::new(self.store.as_ref());
        let started_ms = self.clock.epoch_ms();
        let mut already_attempted = false;

        loop {
            let now_ms = self.clock.epoch_ms();
            if leases.record_key(lease_key.clone(), "pr-create", None, now_ms)? {
                break;
            }

            if let Some(pr) = self.store.get_prs(&task.path.repo, task.path.issue_number).into_iter().find(|pr| pr.state != ralph_core::domain::PrState::Closed) {
                task.pr_url = Some(pr.pr_url);
                info!(path = %task.path, lease_key, "pr-create lease contended but a PR was already published; reusing it");
                return Ok(None);
            }

            let waited_ms = now_ms.saturating_sub(started_ms);
            let lease_age_ms = self.store.get_idempotency_key(&lease_key).map(|k| now_ms.saturating_sub(k.created_at_ms)).unwrap_or(0);
            match evaluate_lease_contention(waited_ms, PR_CREATE_CONFLICT_WAIT_MS, lease_age_ms, PR_CREATE_LEASE_MIN_AGE_MS, already_attempted) {
                LeaseContentionAction::Wait => tokio::time::sleep(PR_CREATE_POLL_INTERVAL).await,
                LeaseContentionAction::SelfHeal => {
                    already_attempted = true;
                    if leases.try_self_heal(&lease_key, PR_CREATE_LEASE_MIN_AGE_MS, now_ms)? {
                        info!(path = %task.path, lease_key, "self-healed a stuck pr-create lease");
                    } else {
                        tokio::time::sleep(PR_CREATE_POLL_INTERVAL).await;
                    }
                }
                LeaseContentionAction::BackOff => {
                    warn!(path = %task.path, lease_key, "pr-create lease contended; backing off for a later attempt");
                    return Ok(None);
                }
            }
        }
        info!(path = %task.path, lease_key, "acquired pr-create lease");

        let title = format!("ralph: {}", task.path);
        let body = String::new();
        let pr = match self.pr_gate.create_pr(&task.path.repo, &title, &repo_config.bot_branch, "main", &body).await {
            Ok(pr) => pr,
            Err(e) => return Ok(Some(classify_forge_error(&e))),
        };
        if let Some(url) = pr.get("html_url").and_then(Value::as_str) {
            task.pr_url = Some(url.to_string());
        }
        let pr_number = pr.get("number").and_then(Value::as_u64);

        let bot_branch_checks = self.pr_gate.required_status_checks(&task.path.repo, &repo_config.bot_branch).await.unwrap_or_default();
        let default_branch_checks = self.pr_gate.required_status_checks(&task.path.repo, "main").await.unwrap_or_default();
        let required = resolve_required_checks(&repo_config.required_checks, &bot_branch_checks, &default_branch_checks);
        if !required.is_empty() {
            info!(path = %task.path, ?required, "merge gate requires these checks");
        }

        let Some(pr_number) = pr_number else {
            warn!(path = %task.path, "pr-create response carried no PR number; leaving task for a later merge attempt");
            return Ok(None);
        };

        self.merge_with_retry(task, pr_number).await
    }

    async fn merge_with_retry(&self, task: &Task, pr_number: u64) -> Result<Option<FailureClass>, DriverError> {
        match self.pr_gate.merge_pr(&task.path.repo, pr_number).await {
            Ok(_) => Ok(None),
            Err(e) if classify_forge_error(&e) == FailureClass::BaseBranchModified && should_retry_base_branch_modified(0) => {
                warn!(path = %task.path, "base branch modified during merge; updating branch and retrying once");
                self.pr_gate.update_branch(&task.path.repo, pr_number).await?;
                match self.pr_gate.merge_pr(&task.path.repo, pr_number).await {
                    Ok(_) => Ok(None),
                    Err(e) => Ok(Some(classify_forge_error(&e))),
                }
            }
            Err(e) => Ok(Some(classify_forge_error(&e))),
        }
    }

    async fn land_on_failure(&self, run_id: RunId, task: &mut Task, class: FailureClass) -> Result<TaskStatus, DriverError> {
        let status = terminal_status_for(class);
        task.status = status;
        task.completed_at_ms = Some(self.clock.epoch_ms());
        self.store.snapshot_task(task.clone())?;
        let outcome = if status == TaskStatus::Escalated { RunOutcome::Escalated } else { RunOutcome::Blocked };
        self.store.complete_run(run_id, self.clock.epoch_ms(), outcome)?;
        warn!(path = %task.path, ?class, ?status, "worker pipeline stopped on failure");
        self.post_blocked_comment(task, class).await?;
        Ok(status)
    }

    /// Posts a best-effort comment explaining why the task landed on
    /// `blocked`/`escalated`, coalesced per (repo, issue) within
    /// `blocked_comment_coalesce_ms` (spec §5: "Blocked-comment writes
    /// for the same (repo, issue) are coalesced within a configurable
    /// window"), reusing the same per-issue lock that serializes label
    /// mutations for that issue.
    async fn post_blocked_comment(&self, task: &Task, class: FailureClass) -> Result<(), DriverError> {
        let _lease = self.locks.lock(&task.path.repo, task.path.issue_number).await;
        let leases = LeaseRegistry::new(self.store.as_ref());
        let now_ms = self.clock.epoch_ms();
        let dedupe_key = format!("blocked-comment:{}#{}", task.path.repo.full_name(), task.path.issue_number);

        if let Some(payload) = leases.get_payload(&dedupe_key) {
            let posted_at_ms = payload.get("posted_at_ms").and_then(Value::as_u64).unwrap_or(0);
            if now_ms.saturating_sub(posted_at_ms) < self.blocked_comment_coalesce_ms {
                return Ok(());
            }
        } else {
            leases.record_key(dedupe_key.clone(), "blocked-comment", None, now_ms)?;
        }

        let marker = format!("failure:{class:?}");
        let body = watchdog::marker_comment("blocked", &task.path.repo.full_name(), task.path.issue_number, &marker, &format!("Worker pipeline stopped on `{class:?}`."));
        match self.comments.post_comment(&task.path.repo, task.path.issue_number, &body).await {
            Ok(()) => leases.upsert_key(dedupe_key, serde_json::json!({ "posted_at_ms": now_ms }))?,
            Err(e) => warn!(path = %task.path, error = %e, "best-effort blocked comment failed"),
        }
        Ok(())
    }

    /// Spawns (or, when `resume` is set, reconnects to) the agent and
    /// drives its event stream through a [`WatchdogMonitor`] tick loop
    /// until the stream ends or the watchdog trips. A trip cancels the
    /// subprocess with the configured kill grace and lands the run on
    /// [`FailureClass::WatchdogTrip`], which [`terminal_status_for`]
    /// already escalates.
    async fn run_agent(&self, run_id: RunId, role: crate::agent::AgentRole, workspace_path: &str, session_id: Option<String>, resume: bool) -> Result<AgentRunOutcome, DriverError> {
        let mut handle = match (resume, session_id.clone()) {
            (true, Some(existing_session_id)) => self.spawner.reconnect(&existing_session_id, workspace_path).await?,
            _ => {
                let config = AgentSpawnConfig { role, workspace_path: workspace_path.to_string(), session_id, prompt: String::new() };
                self.spawner.spawn(config).await?
            }
        };

        let mut monitor = WatchdogMonitor::new(self.watchdog_config.clone(), self.clock.epoch_ms());
        let mut ticker = tokio::time::interval(WATCHDOG_TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // interval fires immediately once; consume that tick so the loop below ticks on cadence.

        let mut marker: Option<(String, Value)> = None;
        let mut tripped: Option<Trip> = None;

        'drive: loop {
            tokio::select! {
                event = handle.next_event() => {
                    let Some(event) = event else { break 'drive };
                    let now_ms = self.clock.epoch_ms();
                    monitor.on_event(&event, now_ms);
                    if matches!(event, AgentEvent::ToolStart { .. }) {
                        if let Some(trip) = monitor.check_loop() {
                            tripped = Some(trip);
                            break 'drive;
                        }
                    }
                    if let AgentEvent::ResultMarker { kind, payload } = event {
                        marker = Some((kind, payload));
                    }
                }
                _ = ticker.tick() => {
                    let now_ms = self.clock.epoch_ms();
                    for signal in monitor.tick(now_ms) {
                        match signal {
                            Signal::Trip(trip) => {
                                tripped = Some(trip);
                            }
                            Signal::SoftWarning { tool_name, call_id } => {
                                warn!(tool_name, call_id, "watchdog soft warning");
                            }
                        }
                    }
                    if tripped.is_some() {
                        break 'drive;
                    }
                }
            }
        }

        if let Some(trip) = tripped {
            warn!(?trip, "watchdog tripped; cancelling agent");
            handle.cancel(self.watchdog_config.kill_grace).await;
            let _ = handle.wait().await;
            return Ok(AgentRunOutcome { failure: Some(FailureClass::WatchdogTrip), result_text: None, pr_url: None, session_id: None, tokens: TokenTotal::default() });
        }

        let exit = handle.wait().await;

        let outcome = if exit.exit_code != 0 {
            AgentOutcome::NonZeroExit { code: exit.exit_code }
        } else if marker.is_none() {
            AgentOutcome::MalformedMarker { detail: "agent exited without a result marker".to_string() }
        } else {
            AgentOutcome::Success
        };

        let payload = marker.as_ref().map(|(_, payload)| payload.clone());
        let pr_url = payload.as_ref().and_then(|p| p.get("pr_url")).and_then(Value::as_str).map(str::to_string);
        let session_id = payload.as_ref().and_then(|p| p.get("session_id")).and_then(Value::as_str).map(str::to_string);
        let tokens = payload
            .as_ref()
            .and_then(|p| p.get("tokens"))
            .and_then(|v| serde_json::from_value::<TokenTotal>(v.clone()).ok())
            .unwrap_or_default();
        self.store.accumulate_token_totals(run_id, tokens.clone())?;

        Ok(AgentRunOutcome { failure: classify_agent_outcome(&outcome), result_text: marker.map(|(_, payload)| payload.to_string()), pr_url, session_id, tokens })
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
