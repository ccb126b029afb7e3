// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-repo issue sync poller (C5): a time-driven `{Idle, Fetching,
//! Backoff, Stopped}` state machine that keeps the durable issue/label
//! projection current without ever advancing its cursor past a failed
//! fetch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use ralph_core::domain::{IssueSnapshot, IssueState, LabelSet, RepoRef, SyncCursor};
use ralph_core::Clock;
use ralph_storage::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::driver::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { had_changes: bool },
    Aborted,
    Failed,
}

/// One issue as reported by the forge, already normalized away from the
/// wire shape; PR filtering (`pull_request` field presence) happens
/// before this reaches the poller's fold step.
#[derive(Debug, Clone)]
pub struct FetchedIssue {
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub url: String,
    pub updated_at_ms: u64,
    pub labels: Vec<String>,
    pub is_pull_request: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IssuePage {
    pub items: Vec<FetchedIssue>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncFetchError {
    pub message: String,
    pub retry_after: Option<Duration>,
}

/// Seam over the forge's paginated issue listing, kept trait-erased for
/// the same reason as `LabelMutator`: the poller should not carry the
/// forge client's transport/clock type parameters.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn list_issues(
        &self,
        repo: &RepoRef,
        since_rfc3339: &str,
        cursor: Option<String>,
    ) -> Result<IssuePage, SyncFetchError>;
}

pub struct SyncPollerConfig {
    pub base_interval: Duration,
    pub max_backoff: Duration,
    /// When false, an open issue carrying none of the recognized
    /// workflow labels is dropped rather than snapshotted — keeps the
    /// projection from filling up with issues the queue never acts on.
    pub store_all_open: bool,
}

impl Default for SyncPollerConfig {
    fn default() -> Self {
        Self { base_interval: Duration::from_secs(30), max_backoff: Duration::from_secs(15 * 60), store_all_open: false }
    }
}

fn is_relevant(issue: &FetchedIssue, store_all_open: bool) -> bool {
    if store_all_open && issue.state == IssueState::Open {
        return true;
    }
    issue.labels.iter().any(|l| {
        crate::labels::is_status_label(l)
            || crate::labels::is_priority_label(l)
            || crate::labels::is_verify_label(l)
            || crate::labels::normalize(l) == crate::labels::BLOCKED_MARKER
    })
}

pub struct SyncPoller<C: Clock> {
    repo: RepoRef,
    store: Arc<StateStore>,
    source: Arc<dyn IssueSource>,
    clock: C,
    config: SyncPollerConfig,
    state: SyncMutex<SyncState>,
    consecutive_failures: AtomicU32,
}

impl<C: Clock> SyncPoller<C> {
    pub fn new(repo: RepoRef, store: Arc<StateStore>, source: Arc<dyn IssueSource>, clock: C, config: SyncPollerConfig) -> Self {
        Self { repo, store, source, clock, config, state: SyncMutex::new(SyncState::Idle), consecutive_failures: AtomicU32::new(0) }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    pub fn stop(&self) {
        *self.state.lock() = SyncState::Stopped;
    }

    /// The delay before the next tick should run: jittered uniform in
    /// `[1, 1.5] x base` on a clean run, multiplied (and capped) per
    /// consecutive failure, or the forge's own `Retry-After` when the
    /// most recent failure carried one.
    pub fn next_delay(&self, retry_after: Option<Duration>) -> Duration {
        if let Some(ra) = retry_after {
            return ra.min(self.config.max_backoff);
        }
        let failures = self.consecutive_failures.load(Ordering::SeqCst).min(8);
        let jitter = rand::thread_rng().gen_range(1.0..=1.5);
        let multiplier = 1u64 << failures;
        let delay = self.config.base_interval.mul_f64(jitter) * multiplier as u32;
        delay.min(self.config.max_backoff)
    }

    #[instrument(skip(self, cancel), fields(repo = %self.repo))]
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickOutcome, QueueError> {
        if *self.state.lock() == SyncState::Stopped || cancel.is_cancelled() {
            return Ok(TickOutcome::Aborted);
        }
        *self.state.lock() = SyncState::Fetching;

        let cursor = self.store.get_sync_cursor(&self.repo).unwrap_or_else(|| SyncCursor::empty(self.repo.clone()));
        let since_ms = cursor.last_sync_at_ms.unwrap_or(0).saturating_sub(5_000);
        let since_rfc3339 = ms_to_rfc3339(since_ms);

        let mut cursor_param = None;
        let mut newest_updated_ms = cursor.last_seen_issue_updated_at_ms.unwrap_or(0);
        let mut had_changes = false;

        loop {
            if cancel.is_cancelled() {
                *self.state.lock() = SyncState::Idle;
                return Ok(TickOutcome::Aborted);
            }

            let page = match self.source.list_issues(&self.repo, &since_rfc3339, cursor_param.clone()).await {
                Ok(page) => page,
                Err(err) => {
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    *self.state.lock() = SyncState::Backoff;
                    warn!(repo = %self.repo, error = %err.message, "issue sync fetch failed, cursor not advanced");
                    return Ok(TickOutcome::Failed);
                }
            };

            for item in &page.items {
                if item.is_pull_request || !is_relevant(item, self.config.store_all_open) {
                    continue;
                }
                self.store.snapshot_issue(IssueSnapshot {
                    repo: self.repo.clone(),
                    number: item.number,
                    title: item.title.clone(),
                    state: item.state,
                    url: item.url.clone(),
                    github_updated_at_ms: item.updated_at_ms,
                    recorded_at_ms: self.clock.epoch_ms(),
                })?;
                self.store.snapshot_labels(
                    self.repo.clone(),
                    item.number,
                    LabelSet { labels: item.labels.iter().cloned().collect(), recorded_at_ms: self.clock.epoch_ms() },
                )?;
                had_changes = true;
                newest_updated_ms = newest_updated_ms.max(item.updated_at_ms);
            }

            cursor_param = page.next_cursor;
            if cursor_param.is_none() {
                break;
            }
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.store.snapshot_sync_cursor(SyncCursor {
            repo: self.repo.clone(),
            last_sync_at_ms: Some(self.clock.epoch_ms()),
            last_seen_issue_updated_at_ms: Some(newest_updated_ms),
            ..cursor
        })?;
        *self.state.lock() = SyncState::Idle;
        info!(repo = %self.repo, had_changes, "issue sync tick complete");
        Ok(TickOutcome::Completed { had_changes })
    }
}

fn ms_to_rfc3339(ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms as i64)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339()
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
