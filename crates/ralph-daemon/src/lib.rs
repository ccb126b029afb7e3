// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lock & discovery, the control plane, forge-backed queue
//! adapters, config resolution, and the root supervisor that wires
//! every other crate together behind the `ralphd` binary.

pub mod adapters;
pub mod config;
pub mod control;
pub mod lock;
pub mod paths;
pub mod supervisor;

pub use adapters::{ForgeCommentPoster, ForgeIssueSource, ForgeLabelMutator, ForgePrGate, GitWorktreeManager, SubprocessAgentSpawner};
pub use config::{ConfigError, ResolvedConfig};
pub use control::{
    dashboard_path, dashboard_snapshot, read_control_file, write_control_file, ControlError, ControlFile, ControlMode, DashboardEvent, DashboardSink,
    RingDashboard,
};
pub use lock::{acquire as acquire_lock, DaemonLock, LockError, LockOwner};
pub use paths::{Paths, PathsError};
pub use supervisor::Supervisor;
