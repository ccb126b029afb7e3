// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete `LabelMutator`/`IssueSource` adapters wrapping a
//! `ForgeClient`, closing the trait-erased seams `ralph-queue` defines
//! against the forge's actual GitHub-shaped wire format, plus the
//! subprocess-backed `AgentSpawner` and `GitWorktreeManager` that close
//! `ralph-engine`'s equivalent seams against a real CLI agent and a
//! real git checkout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ralph_core::domain::{IssueState, RepoRef};
use ralph_core::Clock;
use ralph_engine::agent::{decode_line, AgentEvent, AgentExit, AgentHandle, AgentSpawnConfig, AgentSpawnError, AgentSpawner, DecodeStats};
use ralph_engine::driver::{WorktreeError, WorktreeManager};
use ralph_engine::worker::WorktreeAction;
use ralph_forge::{ForgeApiError, ForgeClient, ForgeTransport};
use ralph_queue::{FetchedIssue, IssuePage, IssueSource, LabelMutator, LabelPlan, QueueError};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::warn;

pub struct ForgeLabelMutator<T: ForgeTransport, C: Clock> {
    client: std::sync::Arc<ForgeClient<T, C>>,
}

impl<T: ForgeTransport, C: Clock> ForgeLabelMutator<T, C> {
    pub fn new(client: std::sync::Arc<ForgeClient<T, C>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<T: ForgeTransport, C: Clock> LabelMutator for ForgeLabelMutator<T, C> {
    async fn mutate_issue_labels(&self, repo: &RepoRef, issue_number: u64, plan: &LabelPlan) -> Result<(), QueueError> {
        if !plan.add.is_empty() {
            self.client.add_labels(&repo.owner, &repo.name, issue_number, &plan.add).await.map_err(map_forge_error)?;
        }
        for label in &plan.remove {
            self.client.remove_label(&repo.owner, &repo.name, issue_number, label).await.map_err(map_forge_error)?;
        }
        Ok(())
    }
}

fn map_forge_error(e: ForgeApiError) -> QueueError {
    QueueError::Mutation(e.message)
}

pub struct ForgeIssueSource<T: ForgeTransport, C: Clock> {
    client: std::sync::Arc<ForgeClient<T, C>>,
}

impl<T: ForgeTransport, C: Clock> ForgeIssueSource<T, C> {
    pub fn new(client: std::sync::Arc<ForgeClient<T, C>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<T: ForgeTransport, C: Clock> IssueSource for ForgeIssueSource<T, C> {
    async fn list_issues(&self, repo: &RepoRef, since_rfc3339: &str, cursor: Option<String>) -> Result<IssuePage, ralph_queue::SyncFetchError> {
        let page = self
            .client
            .list_issues(&repo.owner, &repo.name, since_rfc3339, cursor)
            .await
            .map_err(|e| ralph_queue::SyncFetchError { message: e.message, retry_after: parse_retry_after_secs(e.retry_after.as_deref()) })?;

        Ok(IssuePage { items: page.items.iter().filter_map(parse_issue).collect(), next_cursor: page.next_cursor })
    }
}

fn parse_issue(raw: &Value) -> Option<FetchedIssue> {
    let number = raw.get("number")?.as_u64()?;
    let title = raw.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    let state = match raw.get("state").and_then(Value::as_str) {
        Some("closed") => IssueState::Closed,
        _ => IssueState::Open,
    };
    let url = raw.get("html_url").and_then(Value::as_str).unwrap_or_default().to_string();
    let updated_at_ms = raw.get("updated_at").and_then(Value::as_str).and_then(parse_rfc3339_ms).unwrap_or(0);
    let labels = raw
        .get("labels")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|l| l.get("name").and_then(Value::as_str).map(str::to_string)).collect())
        .unwrap_or_default();
    let is_pull_request = raw.get("pull_request").is_some();

    Some(FetchedIssue { number, title, state, url, updated_at_ms, labels, is_pull_request })
}

fn parse_rfc3339_ms(s: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp_millis().max(0) as u64)
}

fn parse_retry_after_secs(raw: Option<&str>) -> Option<std::time::Duration> {
    raw.and_then(|s| s.parse::<u64>().ok()).map(std::time::Duration::from_secs)
}

/// Spawns the configured agent CLI as a subprocess, streaming its
/// stdout as newline-delimited JSON through [`decode_line`]. One
/// process per [`AgentSpawner::spawn`] call; `reconnect` re-invokes the
/// same binary with `--resume <session_id>` rather than attaching to a
/// still-running process, since nothing here keeps child handles alive
/// across daemon restarts.
pub struct SubprocessAgentSpawner {
    binary: String,
}

impl SubprocessAgentSpawner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn command_for(&self, config: &AgentSpawnConfig, resume: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--agent").arg(config.role.as_cli_value()).arg("--workspace").arg(&config.workspace_path);
        if let Some(session_id) = resume.or(config.session_id.as_deref()) {
            cmd.arg("--resume").arg(session_id);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl AgentSpawner for SubprocessAgentSpawner {
    async fn spawn(&self, config: AgentSpawnConfig) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        let prompt = config.prompt.clone();
        let mut cmd = self.command_for(&config, None);
        let mut child = cmd.spawn().map_err(|e| AgentSpawnError::Spawn(e.to_string()))?;

        if !prompt.is_empty() {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        }

        Ok(Box::new(SubprocessAgentHandle::new(child)?))
    }

    async fn reconnect(&self, session_id: &str, workspace_path: &str) -> Result<Box<dyn AgentHandle>, AgentSpawnError> {
        let config = AgentSpawnConfig {
            role: ralph_engine::agent::AgentRole::Build,
            workspace_path: workspace_path.to_string(),
            session_id: Some(session_id.to_string()),
            prompt: String::new(),
        };
        let mut cmd = self.command_for(&config, Some(session_id));
        let child = cmd.spawn().map_err(|e| AgentSpawnError::Spawn(e.to_string()))?;
        Ok(Box::new(SubprocessAgentHandle::new(child)?))
    }
}

struct SubprocessAgentHandle {
    child: Child,
    lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    stats: DecodeStats,
}

impl SubprocessAgentHandle {
    fn new(mut child: Child) -> Result<Self, AgentSpawnError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentSpawnError::Spawn("agent process spawned without a piped stdout".to_string()))?;
        let lines = BufReader::new(stdout).lines();
        Ok(Self { child, lines, stats: DecodeStats::default() })
    }
}

#[async_trait]
impl AgentHandle for SubprocessAgentHandle {
    async fn next_event(&mut self) -> Option<AgentEvent> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            if let Some(event) = decode_line(&line, &mut self.stats) {
                return Some(event);
            }
        }
    }

    async fn wait(&mut self) -> AgentExit {
        let status = self.child.wait().await;
        let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
        AgentExit { exit_code, stats: self.stats }
    }

    async fn cancel(&mut self, grace: Duration) {
        if let Some(pid) = self.child.id() {
            let _ = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
        }
        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}

/// Prepares a task's workspace as a real `git worktree`, following the
/// same create/reuse/prune-and-recreate decision
/// [`ralph_engine::worker::worktree_action`] already made.
pub struct GitWorktreeManager {
    repo_root: String,
}

impl GitWorktreeManager {
    pub fn new(repo_root: impl Into<String>) -> Self {
        Self { repo_root: repo_root.into() }
    }

    async fn run_git(&self, args: &[&str]) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .output()
            .await
            .map_err(|e| WorktreeError::Failed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::Failed(stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorktreeManager for GitWorktreeManager {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn is_dirty(&self, path: &str) -> bool {
        let output = Command::new("git").arg("-C").arg(path).args(["status", "--porcelain"]).output().await;
        match output {
            Ok(out) => out.status.success() && !out.stdout.is_empty(),
            Err(e) => {
                warn!(path, error = %e, "failed to check worktree dirty state; treating as clean");
                false
            }
        }
    }

    async fn prepare(&self, path: &str, action: WorktreeAction) -> Result<(), WorktreeError> {
        match action {
            WorktreeAction::Reuse => Ok(()),
            WorktreeAction::Create => {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| WorktreeError::Failed(e.to_string()))?;
                }
                self.run_git(&["worktree", "add", "--detach", path]).await
            }
            WorktreeAction::PruneAndRecreate => {
                self.run_git(&["worktree", "remove", "--force", path]).await.ok();
                self.run_git(&["worktree", "add", "--detach", path]).await
            }
        }
    }
}

/// Closes [`ralph_engine::driver::PrGate`] against a real `ForgeClient`,
/// the counterpart to [`ForgeLabelMutator`] for the PR-create/merge
/// half of the pipeline.
pub struct ForgePrGate<T: ForgeTransport, C: Clock> {
    client: std::sync::Arc<ForgeClient<T, C>>,
}

impl<T: ForgeTransport, C: Clock> ForgePrGate<T, C> {
    pub fn new(client: std::sync::Arc<ForgeClient<T, C>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<T: ForgeTransport, C: Clock> ralph_engine::driver::PrGate for ForgePrGate<T, C> {
    async fn create_pr(&self, repo: &RepoRef, title: &str, head: &str, base: &str, body: &str) -> Result<Value, ForgeApiError> {
        self.client.create_pr(&repo.owner, &repo.name, title, head, base, body).await
    }

    async fn merge_pr(&self, repo: &RepoRef, number: u64) -> Result<Value, ForgeApiError> {
        self.client.merge_pr(&repo.owner, &repo.name, number).await
    }

    async fn update_branch(&self, repo: &RepoRef, number: u64) -> Result<(), ForgeApiError> {
        self.client.update_branch(&repo.owner, &repo.name, number).await
    }

    async fn required_status_checks(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>, ForgeApiError> {
        self.client.get_required_status_checks(&repo.owner, &repo.name, branch).await
    }
}

/// Closes [`ralph_engine::driver::CommentPoster`] against a real
/// `ForgeClient`, the adapter the driver uses to post its best-effort
/// blocked/escalated comment.
pub struct ForgeCommentPoster<T: ForgeTransport, C: Clock> {
    client: std::sync::Arc<ForgeClient<T, C>>,
}

impl<T: ForgeTransport, C: Clock> ForgeCommentPoster<T, C> {
    pub fn new(client: std::sync::Arc<ForgeClient<T, C>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<T: ForgeTransport, C: Clock> ralph_engine::driver::CommentPoster for ForgeCommentPoster<T, C> {
    async fn post_comment(&self, repo: &RepoRef, issue_number: u64, body: &str) -> Result<(), ForgeApiError> {
        self.client.create_comment(&repo.owner, &repo.name, issue_number, body).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "adapters_tests.rs"]
mod tests;
