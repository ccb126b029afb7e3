// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized filesystem layout resolution: every path the daemon
//! reads or writes is resolved here, honoring the documented env-var
//! overrides and XDG fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathsError {
    #[error("could not determine home directory (HOME is unset)")]
    NoHome,
}

fn home_dir() -> Result<PathBuf, PathsError> {
    dirs::home_dir().ok_or(PathsError::NoHome)
}

/// Every path the daemon needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Paths {
    pub ralph_root: PathBuf,
    pub config_toml: PathBuf,
    pub config_json: PathBuf,
    pub legacy_config_json: PathBuf,
    pub state_db: PathBuf,
    pub sessions_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub control_dir: PathBuf,
    pub daemon_lock_dir: PathBuf,
    pub daemon_registry: PathBuf,
    pub legacy_daemon_registry: PathBuf,
    pub control_file: PathBuf,
    pub run_logs_dir: PathBuf,
}

impl Paths {
    /// Resolves the full layout from the current environment.
    pub fn resolve() -> Result<Self, PathsError> {
        let home = home_dir()?;
        let ralph_root = home.join(".ralph");
        let xdg_state = std::env::var("XDG_STATE_HOME").map(PathBuf::from).unwrap_or_else(|_| home.join(".local/state"));

        Ok(Self {
            config_toml: ralph_root.join("config.toml"),
            config_json: ralph_root.join("config.json"),
            legacy_config_json: xdg_config_home(&home).join("opencode/ralph/ralph.json"),
            state_db: std::env::var("RALPH_STATE_DB_PATH").map(PathBuf::from).unwrap_or_else(|_| ralph_root.join("state.sqlite")),
            sessions_dir: std::env::var("RALPH_SESSIONS_DIR").map(PathBuf::from).unwrap_or_else(|_| ralph_root.join("sessions")),
            worktrees_dir: std::env::var("RALPH_WORKTREES_DIR").map(PathBuf::from).unwrap_or_else(|_| ralph_root.join("worktrees")),
            control_dir: ralph_root.join("control"),
            daemon_lock_dir: ralph_root.join("control/daemon.lock"),
            daemon_registry: ralph_root.join("control/daemon-registry.json"),
            legacy_daemon_registry: home.join(".local/state/ralph/daemon.json"),
            control_file: ralph_root.join("control/control.json"),
            run_logs_dir: xdg_state.join("ralph/run-logs"),
            ralph_root,
        })
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    pub fn session_events_log(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("events.jsonl")
    }

    pub fn session_lock(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("active.lock")
    }

    pub fn session_nudges_log(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("nudges.jsonl")
    }

    pub fn worktree(&self, repo_slug: &str, slot: u32, issue_number: u64) -> PathBuf {
        self.worktrees_dir.join(repo_slug).join(format!("slot-{slot}")).join(issue_number.to_string()).join("task-a")
    }

    pub fn run_log(&self, repo_slug: &str, issue_number: u64, stage: &str, ts_ms: u64) -> PathBuf {
        self.run_logs_dir.join(repo_slug).join(issue_number.to_string()).join(format!("{stage}-{ts_ms}.log"))
    }
}

fn xdg_config_home(home: &std::path::Path) -> PathBuf {
    std::env::var("XDG_CONFIG_HOME").map(PathBuf::from).unwrap_or_else(|_| home.join(".config"))
}

/// `RALPH_GITHUB_BLOCKED_COMMENT_COALESCE_MS` and
/// `RALPH_GITHUB_WRITE_COALESCE_WINDOW_MS` both gate blocked-comment
/// coalescing; the narrower name wins when both are set.
pub fn blocked_comment_coalesce_window(default_ms: u64) -> Duration {
    let narrow = std::env::var("RALPH_GITHUB_BLOCKED_COMMENT_COALESCE_MS").ok().and_then(|s| s.parse::<u64>().ok());
    let wide = std::env::var("RALPH_GITHUB_WRITE_COALESCE_WINDOW_MS").ok().and_then(|s| s.parse::<u64>().ok());
    Duration::from_millis(narrow.or(wide).unwrap_or(default_ms))
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
