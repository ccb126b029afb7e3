// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ralphd — the Ralph orchestrator daemon.
//!
//! Acquires the startup lock, reconciles leases left by a prior crash,
//! then polls the control file and scheduler in a loop until asked to
//! drain or shut down. A `SyncPoller` per configured repo keeps the
//! issue/label projection current in the background; each poll tick
//! bootstraps any freshly-queued issue into a task row before the
//! scheduler is given a chance to claim it.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use ralph_core::domain::{IssueState, ThrottleWindow, WindowKind};
use ralph_core::{Clock, DaemonId, DaemonRecord, SystemClock, WorkerId};
use ralph_daemon::{
    acquire_lock, dashboard_path, dashboard_snapshot, read_control_file, ConfigError, ControlMode, DashboardEvent, DashboardSink, ForgeCommentPoster,
    ForgeIssueSource, ForgeLabelMutator, ForgePrGate, GitWorktreeManager, LockError, LockOwner, Paths, ResolvedConfig, RingDashboard, Supervisor,
    SubprocessAgentSpawner,
};
use ralph_engine::driver::WorkerDriver;
use ralph_forge::{ForgeClient, ReqwestForgeTransport, SandboxPolicy};
use ralph_queue::{LockManager, NoDependencyProvider, NoopPruner, QueueDriver, QueueDriverConfig};
use ralph_storage::{MigrationRegistry, StateStore, SCHEMA_VERSION};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CMDLINE_MARKER: &str = "ralphd";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_FORGE_BASE_URL: &str = "https://api.github.com";
const FORGE_TOKEN_ENV_VAR: &str = "RALPH_FORGE_TOKEN";
const AGENT_BINARY_ENV_VAR: &str = "RALPH_AGENT_BINARY";
const DEFAULT_AGENT_BINARY: &str = "ralph-agent";
const DASHBOARD_ADDR_ENV_VAR: &str = "RALPH_DASHBOARD_ADDR";
const PR_FRESHNESS_MS: u64 = 10 * 60_000;
const ROLLING_WINDOW_MS: u64 = 5 * 3600_000;
const WEEKLY_WINDOW_MS: u64 = 7 * 24 * 3600_000;
const DASHBOARD_RING_CAPACITY: usize = 500;
const BLOCKED_COMMENT_DEFAULT_COALESCE_MS: u64 = 15 * 60_000;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => std::process::exit(0),
        Err(StartupFailure::LockConflict) => std::process::exit(2),
        Err(StartupFailure::Fatal(e)) => {
            eprintln!("ralphd: fatal startup error: {e}");
            std::process::exit(1);
        }
    }
}

enum StartupFailure {
    LockConflict,
    Fatal(anyhow::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for StartupFailure {
    fn from(e: E) -> Self {
        StartupFailure::Fatal(anyhow::Error::new(e))
    }
}

async fn run() -> Result<(), StartupFailure> {
    setup_logging();

    if matches!(std::env::args().nth(1).as_deref(), Some("--version" | "-V")) {
        println!("ralphd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let paths = Paths::resolve()?;
    std::fs::create_dir_all(&paths.control_dir)?;
    std::fs::create_dir_all(&paths.sessions_dir)?;
    std::fs::create_dir_all(&paths.worktrees_dir)?;

    let daemon_id = DaemonId::new();
    let owner = LockOwner {
        pid: std::process::id(),
        daemon_id: daemon_id.to_string(),
        started_at_ms: SystemClock.epoch_ms(),
        start_identity: ralph_daemon::lock::read_start_identity(std::process::id()),
        cmdline: CMDLINE_MARKER.to_string(),
    };

    let lock = match acquire_lock(&paths.daemon_lock_dir, owner, CMDLINE_MARKER) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning(pid)) => {
            error!(pid, "another ralphd instance already holds the startup lock");
            return Err(StartupFailure::LockConflict);
        }
        Err(LockError::AmbiguousOwner) => {
            error!("startup lock owner file is unreadable; refusing to start");
            return Err(StartupFailure::LockConflict);
        }
        Err(e) => return Err(e.into()),
    };

    let repos = ralph_daemon::config::repos_from_env();
    let config = ResolvedConfig::new(repos).map_err(config_error_to_fatal)?;

    let store = Arc::new(StateStore::open(&paths.state_db, paths.ralph_root.join("snapshot.json"), &MigrationRegistry::new(SCHEMA_VERSION))?);

    store.register_daemon(DaemonRecord {
        daemon_id: daemon_id.clone(),
        pid: std::process::id(),
        started_at_ms: SystemClock.epoch_ms(),
        heartbeat_at_ms: SystemClock.epoch_ms(),
        control_root: paths.control_dir.display().to_string(),
        control_file_path: paths.control_file.display().to_string(),
        ralph_version: env!("CARGO_PKG_VERSION").to_string(),
        command: CMDLINE_MARKER.to_string(),
        cwd: std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default(),
    })?;

    let supervisor = Arc::new(Supervisor::new(Arc::clone(&store), SystemClock, daemon_id.clone(), config.max_workers, ralph_engine::throttle::ThrottleEngine::new(config.throttle.clone(), None), config.repos.clone()));

    let reclaimed = supervisor.reconcile_on_startup();
    info!(reclaimed, "startup reconciliation complete");

    let forge_client = Arc::new(ForgeClient::new(
        ReqwestForgeTransport::new(DEFAULT_FORGE_BASE_URL, FORGE_TOKEN_ENV_VAR),
        SystemClock,
        SandboxPolicy::production(),
    ));
    let agent_binary = std::env::var(AGENT_BINARY_ENV_VAR).unwrap_or_else(|_| DEFAULT_AGENT_BINARY.to_string());
    let worktree_root = paths.worktrees_dir.display().to_string();
    let issue_locks = Arc::new(LockManager::new());
    let blocked_comment_coalesce_ms = ralph_daemon::paths::blocked_comment_coalesce_window(BLOCKED_COMMENT_DEFAULT_COALESCE_MS).as_millis() as u64;

    let queue_driver = Arc::new(QueueDriver::new(
        Arc::clone(&store),
        Arc::new(ForgeLabelMutator::new(Arc::clone(&forge_client))) as Arc<dyn ralph_queue::LabelMutator>,
        Arc::new(NoDependencyProvider) as Arc<dyn ralph_queue::DependencyProvider>,
        Arc::new(NoopPruner) as Arc<dyn ralph_queue::WorktreePruner>,
        SystemClock,
        QueueDriverConfig { ownership_ttl_ms: config.ownership_ttl_ms, pr_freshness_ms: PR_FRESHNESS_MS, daemon_id: daemon_id.clone() },
    ));

    let shutdown = CancellationToken::new();
    for repo_config in &config.repos {
        let poller = ralph_queue::SyncPoller::new(
            repo_config.repo.clone(),
            Arc::clone(&store),
            Arc::new(ForgeIssueSource::new(Arc::clone(&forge_client))) as Arc<dyn ralph_queue::IssueSource>,
            SystemClock,
            ralph_queue::SyncPollerConfig::default(),
        );
        tokio::spawn(run_sync_poller(poller, shutdown.clone()));
    }

    let dashboard: Arc<dyn DashboardSink> = Arc::new(RingDashboard::new(DASHBOARD_RING_CAPACITY, std::env::var("HOME").ok()));
    let dashboard_token = format!("{:032x}", rand::thread_rng().gen::<u128>());
    std::fs::write(dashboard_path(&paths.control_dir), &dashboard_token)?;
    if let Ok(addr) = std::env::var(DASHBOARD_ADDR_ENV_VAR) {
        tokio::spawn(run_dashboard_endpoint(addr, Arc::clone(&dashboard), dashboard_token.clone(), shutdown.clone()));
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    info!(pid = std::process::id(), "ralphd ready");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let control = read_control_file(&paths.control_file).unwrap_or_default();
                if matches!(control.mode, ControlMode::Paused) {
                    continue;
                }

                if let Err(e) = queue_driver.bootstrap_tasks_from_labels() {
                    warn!(error = %e, "failed to bootstrap tasks from labels");
                }
                if let Err(e) = queue_driver.get_queued_tasks().await {
                    warn!(error = %e, "failed to reconcile queued tasks before scheduling");
                }

                let now_ms = SystemClock.epoch_ms();
                let throttle_windows = [
                    ThrottleWindow {
                        provider_id: "agent".to_string(),
                        window_kind: WindowKind::Rolling5h,
                        budget_tokens: config.rolling_budget_tokens,
                        observed_tokens: store.token_totals_since(now_ms.saturating_sub(ROLLING_WINDOW_MS)).total(),
                    },
                    ThrottleWindow {
                        provider_id: "agent".to_string(),
                        window_kind: WindowKind::Weekly,
                        budget_tokens: config.weekly_budget_tokens,
                        observed_tokens: store.token_totals_since(now_ms.saturating_sub(WEEKLY_WINDOW_MS)).total(),
                    },
                ];

                if let Some(task) = supervisor.tick(&control, &throttle_windows, WorkerId::new()) {
                    info!(path = %task.path, "claimed task");
                    dashboard.record(DashboardEvent::WorkerCreated {
                        repo: task.path.repo.full_name(),
                        issue_number: task.path.issue_number,
                        worker_id: task.worker_id.as_ref().map(|w| w.to_string()).unwrap_or_default(),
                    });
                    let Some(repo_config) = config.repos.iter().find(|r| r.repo == task.path.repo).cloned() else {
                        warn!(path = %task.path, "claimed task has no matching repo configuration; skipping dispatch");
                        continue;
                    };
                    tokio::spawn(drive_claimed_task(
                        Arc::clone(&store),
                        Arc::clone(&forge_client),
                        Arc::clone(&issue_locks),
                        agent_binary.clone(),
                        repo_config,
                        task,
                        worktree_root.clone(),
                        config.watchdog.clone(),
                        blocked_comment_coalesce_ms,
                    ));
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    shutdown.cancel();
    drop(lock);
    info!("ralphd stopped");
    Ok(())
}

/// Drives one repo's issue sync poller on its own backoff-aware cadence
/// until the shutdown token fires.
async fn run_sync_poller<C: Clock>(poller: ralph_queue::SyncPoller<C>, shutdown: CancellationToken) {
    while !shutdown.is_cancelled() {
        let delay = poller.next_delay(None);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
        if let Err(e) = poller.tick(&shutdown).await {
            warn!(error = %e, "sync poller tick failed");
        }
    }
}

/// A minimal, token-gated read-only HTTP endpoint for the dashboard
/// ring buffer: one request line in, one JSON or 403 response out. No
/// HTTP server crate is in the dependency stack, so this hand-rolls the
/// bare minimum rather than pulling one in just for a single read route.
async fn run_dashboard_endpoint(addr: String, dashboard: Arc<dyn DashboardSink>, token: String, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr, error = %e, "failed to bind dashboard endpoint; leaving it disabled");
            return;
        }
    };
    info!(addr, "dashboard endpoint listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((socket, _)) = accepted else { continue };
                let dashboard = Arc::clone(&dashboard);
                let token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_dashboard_request(socket, dashboard.as_ref(), &token).await {
                        warn!(error = %e, "dashboard request failed");
                    }
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn serve_dashboard_request(mut socket: tokio::net::TcpStream, dashboard: &dyn DashboardSink, token: &str) -> std::io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut lines = BufReader::new(reader).lines();
    let request_line = lines.next_line().await?.unwrap_or_default();
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let provided = path.split_once('?').and_then(|(_, q)| q.split('&').find_map(|kv| kv.strip_prefix("token="))).unwrap_or("");

    if provided != token {
        writer.write_all(b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\n\r\n").await?;
        return Ok(());
    }

    let body = dashboard_snapshot(dashboard, 200).to_string();
    let response = format!("HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}", body.len(), body);
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Fetches the claimed task's live issue state and labels, then drives
/// it through the worker pipeline. Runs as its own task so a slow or
/// stuck agent never blocks the polling loop from claiming other work.
#[allow(clippy::too_many_arguments)]
async fn drive_claimed_task(
    store: Arc<StateStore>,
    forge_client: Arc<ForgeClient<ReqwestForgeTransport, SystemClock>>,
    issue_locks: Arc<LockManager>,
    agent_binary: String,
    repo_config: ralph_core::domain::RepoConfig,
    task: ralph_core::domain::Task,
    worktree_root: String,
    watchdog_config: ralph_engine::watchdog::WatchdogConfig,
    blocked_comment_coalesce_ms: u64,
) {
    let path = task.path.clone();
    let issue = match forge_client.get_issue(&path.repo.owner, &path.repo.name, path.issue_number).await {
        Ok(issue) => issue,
        Err(e) => {
            error!(%path, error = %e, "failed to fetch issue state before dispatch; leaving task claimed for a retry");
            return;
        }
    };
    let issue_state = match issue.get("state").and_then(|v| v.as_str()) {
        Some("closed") => IssueState::Closed,
        _ => IssueState::Open,
    };
    let current_labels = forge_client.list_labels(&path.repo.owner, &path.repo.name, path.issue_number).await.unwrap_or_default();

    let repo_checkout = std::path::Path::new(&worktree_root)
        .parent()
        .unwrap_or_else(|| std::path::Path::new(&worktree_root))
        .join("repos")
        .join(&repo_config.repo.owner)
        .join(&repo_config.repo.name);

    let driver = WorkerDriver::new(
        store,
        Arc::new(SubprocessAgentSpawner::new(agent_binary)),
        Arc::new(ForgeLabelMutator::new(Arc::clone(&forge_client))),
        Arc::new(GitWorktreeManager::new(repo_checkout.display().to_string())),
        Arc::new(ForgePrGate::new(Arc::clone(&forge_client))),
        Arc::new(ForgeCommentPoster::new(Arc::clone(&forge_client))),
        issue_locks,
        SystemClock,
        watchdog_config,
        blocked_comment_coalesce_ms,
    );

    match driver.run(&repo_config, task, issue_state, &current_labels, &worktree_root).await {
        Ok(status) => info!(%path, ?status, "worker pipeline finished"),
        Err(e) => error!(%path, error = %e, "worker pipeline failed"),
    }
}

fn config_error_to_fatal(e: ConfigError) -> StartupFailure {
    warn!(error = %e, "no usable repo configuration; continuing with an empty schedule is not supported");
    StartupFailure::Fatal(anyhow::Error::new(e))
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
