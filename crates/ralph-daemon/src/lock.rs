// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup lock (C6): an exclusive `mkdir` race against
//! `~/.ralph/control/daemon.lock`, with pid-liveness and start-identity
//! checks on `EEXIST` so a dead daemon's lock self-heals but a live
//! one's does not.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub daemon_id: String,
    pub started_at_ms: u64,
    /// Process start-time token; `None` when it could not be read (e.g.
    /// non-Linux, or `/proc` unavailable).
    pub start_identity: Option<u64>,
    pub cmdline: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCandidate {
    Live,
    Missing,
    Stale,
    Conflict,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another ralph daemon is already running (pid {0}); see `ralph drain`/`ralph status`")]
    AlreadyRunning(u32),
    #[error("lock ownership could not be verified unambiguously; refusing to start")]
    AmbiguousOwner,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

const OWNER_FILE: &str = "owner.json";

/// Reads `/proc/<pid>/stat`'s 22nd field (process start time, in clock
/// ticks since boot) as a liveness-independent identity token. Returns
/// `None` off Linux or when the file cannot be parsed.
#[cfg(target_os = "linux")]
pub fn read_start_identity(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(19).and_then(|s| s.parse::<u64>().ok())
}

#[cfg(not(target_os = "linux"))]
pub fn read_start_identity(_pid: u32) -> Option<u64> {
    None
}

/// Liveness check via `/proc/<pid>` existence on Linux; elsewhere this
/// shells out to `kill -0` rather than reaching for raw FFI, since the
/// workspace forbids `unsafe_code`.
fn pid_is_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        return Path::new(&format!("/proc/{pid}")).exists();
    }
    std::process::Command::new("kill").arg("-0").arg(pid.to_string()).status().map(|status| status.success()).unwrap_or(true)
}

/// Classifies a candidate owner record against live process state.
pub fn classify_candidate(owner: &LockOwner, expected_cmdline_marker: &str) -> LockCandidate {
    if !pid_is_alive(owner.pid) {
        return LockCandidate::Stale;
    }
    if !owner.cmdline.contains(expected_cmdline_marker) {
        return LockCandidate::Conflict;
    }
    match read_start_identity(owner.pid) {
        Some(current) => match owner.start_identity {
            Some(recorded) if recorded == current => LockCandidate::Live,
            Some(_) => LockCandidate::Stale,
            None => LockCandidate::Live,
        },
        None => LockCandidate::Live,
    }
}

/// Guard owning the lock directory; removes it on drop so a clean
/// shutdown always releases the slot immediately.
#[derive(Debug)]
pub struct DaemonLock {
    dir: PathBuf,
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(error = %e, dir = %self.dir.display(), "failed to remove daemon lock directory on shutdown");
        }
    }
}

/// Acquires the startup lock at `lock_dir`, recovering a stale lock
/// left behind by a dead process and refusing outright when a live
/// daemon (or an unverifiable one) already holds it.
pub fn acquire(lock_dir: &Path, owner: LockOwner, cmdline_marker: &str) -> Result<DaemonLock, LockError> {
    if let Some(parent) = lock_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::create_dir(lock_dir) {
        Ok(()) => {
            write_owner(lock_dir, &owner)?;
            info!(pid = owner.pid, daemon_id = %owner.daemon_id, "acquired daemon startup lock");
            Ok(DaemonLock { dir: lock_dir.to_path_buf() })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            recover_existing(lock_dir, owner, cmdline_marker)
        }
        Err(e) => Err(e.into()),
    }
}

fn recover_existing(lock_dir: &Path, owner: LockOwner, cmdline_marker: &str) -> Result<DaemonLock, LockError> {
    let owner_path = lock_dir.join(OWNER_FILE);
    let existing = match std::fs::read_to_string(&owner_path) {
        Ok(text) => serde_json::from_str::<LockOwner>(&text).ok(),
        Err(_) => None,
    };

    let Some(existing) = existing else {
        // Owner file missing or unparseable: liveness is ambiguous.
        return Err(LockError::AmbiguousOwner);
    };

    match classify_candidate(&existing, cmdline_marker) {
        LockCandidate::Live => Err(LockError::AlreadyRunning(existing.pid)),
        LockCandidate::Conflict => Err(LockError::AmbiguousOwner),
        LockCandidate::Stale | LockCandidate::Missing => {
            warn!(pid = existing.pid, "recovering stale daemon lock");
            std::fs::remove_dir_all(lock_dir)?;
            std::fs::create_dir(lock_dir)?;
            write_owner(lock_dir, &owner)?;
            Ok(DaemonLock { dir: lock_dir.to_path_buf() })
        }
    }
}

fn write_owner(lock_dir: &Path, owner: &LockOwner) -> Result<(), LockError> {
    let tmp_path = lock_dir.join(format!("{OWNER_FILE}.tmp"));
    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(serde_json::to_string_pretty(owner)?.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, lock_dir.join(OWNER_FILE))?;
    Ok(())
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
