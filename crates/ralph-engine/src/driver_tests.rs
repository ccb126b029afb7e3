// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::{AgentExit, AgentHandle, DecodeStats};
use parking_lot::Mutex as PLMutex;
use ralph_core::domain::{RepoRef, TaskPath};
use ralph_core::FakeClock;
use ralph_forge::ForgeApiError;
use ralph_queue::LabelPlan;
use ralph_storage::MigrationRegistry;
use std::collections::VecDeque;

fn repo_config() -> RepoConfig {
    RepoConfig {
        repo: RepoRef::new("org", "demo"),
        bot_branch: "bot/integration".to_string(),
        concurrency_slots: 1,
        required_checks: Vec::new(),
        preflight_commands: Vec::new(),
        setup_commands: Vec::new(),
        scheduler_priority: 0,
    }
}

fn open_store(dir: &std::path::Path) -> Arc<StateStore> {
    Arc::new(StateStore::open(dir.join("wal.jsonl"), dir.join("snapshot.json"), &MigrationRegistry::new(ralph_storage::SCHEMA_VERSION)).unwrap())
}

struct ScriptedHandle {
    events: VecDeque<AgentEvent>,
    exit_code: i32,
}

#[async_trait]
impl AgentHandle for ScriptedHandle {
    async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.pop_front()
    }

    async fn wait(&mut self) -> AgentExit {
        AgentExit { exit_code: self.exit_code, stats: DecodeStats::default() }
    }

    async fn cancel(&mut self, _grace: std::time::Duration) {}
}

struct ScriptedSpawner {
    exit_code: i32,
    marker: Option<Value>,
}

#[async_trait]
impl AgentSpawner for ScriptedSpawner {
    async fn spawn(&self, _config: AgentSpawnConfig) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        let mut events = VecDeque::new();
        if let Some(payload) = self.marker.clone() {
            events.push_back(AgentEvent::ResultMarker { kind: "BUILD_RESULT".to_string(), payload });
        }
        Ok(Box::new(ScriptedHandle { events, exit_code: self.exit_code }))
    }

    async fn reconnect(&self, _session_id: &str, _workspace_path: &str) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        Err(AgentSpawnError::SessionNotFound("not supported in tests".to_string()))
    }
}

/// Records whether each call dispatched through `spawn` (fresh) or
/// `reconnect` (resume), succeeding both with the given marker.
struct RecordingSpawner {
    marker: Option<Value>,
    spawn_calls: PLMutex<u32>,
    reconnect_calls: PLMutex<u32>,
}

impl RecordingSpawner {
    fn new(marker: Option<Value>) -> Self {
        Self { marker, spawn_calls: PLMutex::new(0), reconnect_calls: PLMutex::new(0) }
    }
}

#[async_trait]
impl AgentSpawner for RecordingSpawner {
    async fn spawn(&self, _config: AgentSpawnConfig) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        *self.spawn_calls.lock() += 1;
        let mut events = VecDeque::new();
        if let Some(payload) = self.marker.clone() {
            events.push_back(AgentEvent::ResultMarker { kind: "BUILD_RESULT".to_string(), payload });
        }
        Ok(Box::new(ScriptedHandle { events, exit_code: 0 }))
    }

    async fn reconnect(&self, _session_id: &str, _workspace_path: &str) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        *self.reconnect_calls.lock() += 1;
        let mut events = VecDeque::new();
        if let Some(payload) = self.marker.clone() {
            events.push_back(AgentEvent::ResultMarker { kind: "BUILD_RESULT".to_string(), payload });
        }
        Ok(Box::new(ScriptedHandle { events, exit_code: 0 }))
    }
}

struct NoopComments;

#[async_trait]
impl CommentPoster for NoopComments {
    async fn post_comment(&self, _repo: &RepoRef, _issue_number: u64, _body: &str) -> Result<(), ForgeApiError> {
        Ok(())
    }
}

struct RecordingLabelMutator {
    calls: PLMutex<Vec<LabelPlan>>,
}

#[async_trait]
impl LabelMutator for RecordingLabelMutator {
    async fn mutate_issue_labels(&self, _repo: &RepoRef, _issue_number: u64, plan: &LabelPlan) -> Result<(), QueueError> {
        self.calls.lock().push(plan.clone());
        Ok(())
    }
}

struct FakeWorktrees;

#[async_trait]
impl WorktreeManager for FakeWorktrees {
    async fn exists(&self, _path: &str) -> bool {
        false
    }
    async fn is_dirty(&self, _path: &str) -> bool {
        false
    }
    async fn prepare(&self, _path: &str, _action: WorktreeAction) -> Result<(), WorktreeError> {
        Ok(())
    }
}

/// A fake [`PrGate`] that always opens PR #1 and merges cleanly, unless
/// configured to fail the first merge attempt with a given class.
struct FakePrGate {
    fail_first_merge_with: Option<FailureClass>,
    merge_attempts: PLMutex<u32>,
}

impl FakePrGate {
    fn clean() -> Self {
        Self { fail_first_merge_with: None, merge_attempts: PLMutex::new(0) }
    }

    fn failing_merge(class: FailureClass) -> Self {
        Self { fail_first_merge_with: Some(class), merge_attempts: PLMutex::new(0) }
    }
}

fn forge_error_for(class: FailureClass) -> ForgeApiError {
    let status = match class {
        FailureClass::BaseBranchModified => 405,
        FailureClass::Conflict => 409,
        FailureClass::AuthDenied => 401,
        _ => 500,
    };
    ForgeApiError::new("FORGE_ERROR", "synthetic failure").with_status(status)
}

#[async_trait]
impl PrGate for FakePrGate {
    async fn create_pr(&self, _repo: &RepoRef, _title: &str, _head: &str, _base: &str, _body: &str) -> Result<Value, ForgeApiError> {
        Ok(serde_json::json!({"number": 1, "html_url": "https://example.invalid/pr/1"}))
    }

    async fn merge_pr(&self, _repo: &RepoRef, _number: u64) -> Result<Value, ForgeApiError> {
        let mut attempts = self.merge_attempts.lock();
        *attempts += 1;
        if *attempts == 1 {
            if let Some(class) = self.fail_first_merge_with {
                return Err(forge_error_for(class));
            }
        }
        Ok(serde_json::json!({"merged": true}))
    }

    async fn update_branch(&self, _repo: &RepoRef, _number: u64) -> Result<(), ForgeApiError> {
        Ok(())
    }

    async fn required_status_checks(&self, _repo: &RepoRef, _branch: &str) -> Result<Vec<String>, ForgeApiError> {
        Ok(Vec::new())
    }
}

fn survey_marker() -> Value {
    serde_json::json!({"schema": "ralph.dx_survey.v1", "summary": "ok"})
}

fn driver_with(dir: &std::path::Path, exit_code: i32, marker: Option<Value>, pr_gate: Arc<dyn PrGate>) -> (WorkerDriver<FakeClock>, Arc<RecordingLabelMutator>) {
    let store = open_store(dir);
    let mutator = Arc::new(RecordingLabelMutator { calls: PLMutex::new(Vec::new()) });
    let driver = WorkerDriver::new(
        store,
        Arc::new(ScriptedSpawner { exit_code, marker }),
        Arc::clone(&mutator) as Arc<dyn LabelMutator>,
        Arc::new(FakeWorktrees),
        pr_gate,
        Arc::new(NoopComments) as Arc<dyn CommentPoster>,
        Arc::new(LockManager::new()),
        FakeClock::new(),
        WatchdogConfig::default(),
        60_000,
    );
    (driver, mutator)
}

fn driver_with_spawner(
    dir: &std::path::Path,
    spawner: Arc<RecordingSpawner>,
    worktrees: Arc<dyn WorktreeManager>,
) -> (WorkerDriver<FakeClock>, Arc<RecordingLabelMutator>) {
    let store = open_store(dir);
    let mutator = Arc::new(RecordingLabelMutator { calls: PLMutex::new(Vec::new()) });
    let driver = WorkerDriver::new(
        store,
        spawner as Arc<dyn AgentSpawner>,
        Arc::clone(&mutator) as Arc<dyn LabelMutator>,
        worktrees,
        Arc::new(FakePrGate::clean()),
        Arc::new(NoopComments) as Arc<dyn CommentPoster>,
        Arc::new(LockManager::new()),
        FakeClock::new(),
        WatchdogConfig::default(),
        60_000,
    );
    (driver, mutator)
}

struct RecordingWorktrees {
    prepare_calls: PLMutex<u32>,
}

#[async_trait]
impl WorktreeManager for RecordingWorktrees {
    async fn exists(&self, _path: &str) -> bool {
        false
    }
    async fn is_dirty(&self, _path: &str) -> bool {
        false
    }
    async fn prepare(&self, _path: &str, _action: WorktreeAction) -> Result<(), WorktreeError> {
        *self.prepare_calls.lock() += 1;
        Ok(())
    }
}

#[tokio::test]
async fn a_task_claimed_with_a_surviving_session_id_resumes_via_reconnect_and_skips_worktree_prep() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = Task::new(TaskPath::new(repo_config().repo, 20), 0);
    task.session_id = Some(ralph_core::domain::SessionId::from_string("sess-resume-1"));

    let spawner = Arc::new(RecordingSpawner::new(Some(survey_marker())));
    let worktrees = Arc::new(RecordingWorktrees { prepare_calls: PLMutex::new(0) });
    let (driver, _mutator) = driver_with_spawner(dir.path(), Arc::clone(&spawner), worktrees.clone() as Arc<dyn WorktreeManager>);

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
    // Build resumes via reconnect; the trailing Survey stage always goes
    // through an ordinary (non-resuming) spawn.
    assert_eq!(*spawner.reconnect_calls.lock(), 1);
    assert_eq!(*spawner.spawn_calls.lock(), 1);
    assert_eq!(*worktrees.prepare_calls.lock(), 0);
}

#[tokio::test]
async fn a_fresh_task_with_no_session_id_dispatches_plan_and_build_via_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 21), 0);

    let spawner = Arc::new(RecordingSpawner::new(Some(survey_marker())));
    let worktrees = Arc::new(RecordingWorktrees { prepare_calls: PLMutex::new(0) });
    let (driver, _mutator) = driver_with_spawner(dir.path(), Arc::clone(&spawner), worktrees.clone() as Arc<dyn WorktreeManager>);

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
    assert_eq!(*spawner.reconnect_calls.lock(), 0);
    // Plan, Build, and the trailing Survey stage each spawn fresh.
    assert_eq!(*spawner.spawn_calls.lock(), 3);
    assert_eq!(*worktrees.prepare_calls.lock(), 1);
}

#[tokio::test]
async fn skips_a_task_whose_issue_already_closed_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 1), 0);
    let (driver, _mutator) = driver_with(dir.path(), 0, Some(survey_marker()), Arc::new(FakePrGate::clean()));

    let status = driver.run(&repo_config(), task, IssueState::Closed, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
}

#[tokio::test]
async fn drives_a_healthy_task_through_to_done_opens_a_pr_and_relabels() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 2), 0);
    let (driver, mutator) = driver_with(dir.path(), 0, Some(survey_marker()), Arc::new(FakePrGate::clean()));

    let status = driver.run(&repo_config(), task, IssueState::Open, &["ralph:status:in-progress".to_string()], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
    assert_eq!(mutator.calls.lock().len(), 2);
}

#[tokio::test]
async fn a_nonzero_agent_exit_lands_the_task_on_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 3), 0);
    let (driver, _mutator) = driver_with(dir.path(), 1, None, Arc::new(FakePrGate::clean()));

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Blocked);
}

#[tokio::test]
async fn an_agent_exiting_with_no_result_marker_at_all_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 4), 0);
    let (driver, _mutator) = driver_with(dir.path(), 0, None, Arc::new(FakePrGate::clean()));

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Blocked);
}

#[tokio::test]
async fn a_survey_marker_that_is_not_a_dx_survey_envelope_does_not_fail_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 7), 0);
    let (driver, _mutator) = driver_with(dir.path(), 0, Some(serde_json::json!({"note": "no structured output"})), Arc::new(FakePrGate::clean()));

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
}

#[tokio::test]
async fn a_base_branch_modified_merge_failure_retries_once_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 5), 0);
    let (driver, _mutator) = driver_with(dir.path(), 0, Some(survey_marker()), Arc::new(FakePrGate::failing_merge(FailureClass::BaseBranchModified)));

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Done);
}

#[tokio::test]
async fn a_merge_conflict_lands_the_task_on_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new(TaskPath::new(repo_config().repo, 6), 0);
    let (driver, _mutator) = driver_with(dir.path(), 0, Some(survey_marker()), Arc::new(FakePrGate::failing_merge(FailureClass::Conflict)));

    let status = driver.run(&repo_config(), task, IssueState::Open, &[], "/tmp/worktrees").await.unwrap();
    assert_eq!(status, TaskStatus::Blocked);
}
