// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control plane (C11): a file-backed `control.json` the daemon polls
//! each loop iteration, plus an in-memory dashboard ring buffer of
//! typed, secret-redacted events for an optional read-only surface.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use ralph_engine::watchdog::redact;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Running,
    Draining,
    Paused,
}

impl Default for ControlMode {
    fn default() -> Self {
        ControlMode::Running
    }
}

impl ControlMode {
    /// `draining` and `paused` both reject new scheduler claims.
    pub fn rejects_new_claims(self) -> bool {
        matches!(self, ControlMode::Draining | ControlMode::Paused)
    }

    /// Only `paused` additionally asks in-flight workers to checkpoint
    /// and release their slot.
    pub fn requests_checkpoint(self) -> bool {
        matches!(self, ControlMode::Paused)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ControlFile {
    pub mode: ControlMode,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Reads the control file, defaulting to `running` when it does not
/// yet exist (a fresh daemon has nothing to read on its first loop).
pub fn read_control_file(path: &Path) -> Result<ControlFile, ControlError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ControlFile::default()),
        Err(e) => Err(e.into()),
    }
}

/// Writes the control file via a temp-file-then-rename so a reader
/// never observes a half-written file.
pub fn write_control_file(path: &Path, control: &ControlFile) -> Result<(), ControlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(control)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Typed dashboard event kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardEvent {
    WorkerCreated { repo: String, issue_number: u64, worker_id: String },
    Checkpoint { repo: String, issue_number: u64, detail: String },
    Throttle { state: String, pct: f64 },
    Watchdog { repo: String, issue_number: u64, detail: String },
}

pub trait DashboardSink: Send + Sync {
    fn record(&self, event: DashboardEvent);
    fn recent(&self, limit: usize) -> Vec<DashboardEvent>;
}

/// Append-only in-memory ring buffer; secrets (PAT-shaped tokens, home
/// directory paths) are redacted out of free-text fields before an
/// event is stored.
pub struct RingDashboard {
    capacity: usize,
    home_dir: Option<String>,
    events: Mutex<VecDeque<DashboardEvent>>,
}

impl RingDashboard {
    pub fn new(capacity: usize, home_dir: Option<String>) -> Self {
        Self { capacity, home_dir, events: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    fn redact_event(&self, event: DashboardEvent) -> DashboardEvent {
        let home = self.home_dir.as_deref();
        match event {
            DashboardEvent::Checkpoint { repo, issue_number, detail } => {
                DashboardEvent::Checkpoint { repo, issue_number, detail: redact(&detail, home) }
            }
            DashboardEvent::Watchdog { repo, issue_number, detail } => {
                DashboardEvent::Watchdog { repo, issue_number, detail: redact(&detail, home) }
            }
            other => other,
        }
    }
}

impl DashboardSink for RingDashboard {
    fn record(&self, event: DashboardEvent) {
        let redacted = self.redact_event(event);
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(redacted);
    }

    fn recent(&self, limit: usize) -> Vec<DashboardEvent> {
        let events = self.events.lock();
        events.iter().rev().take(limit).rev().cloned().collect()
    }
}

/// Serializes the ring buffer's current contents for the token-gated
/// HTTP read endpoint.
pub fn dashboard_snapshot(sink: &dyn DashboardSink, limit: usize) -> Value {
    serde_json::json!({ "events": sink.recent(limit) })
}

pub fn dashboard_path(control_dir: &Path) -> PathBuf {
    control_dir.join("dashboard-token")
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
