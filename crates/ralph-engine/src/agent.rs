// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess seam (C8 dependency): a `AgentSpawner` trait over
//! the one contract the worker actually depends on — a newline-delimited
//! JSON event stream and an exit status — plus the NDJSON decoder that
//! turns raw lines into typed [`AgentEvent`]s without halting on the
//! first malformed one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Which pipeline role the agent subprocess is invoked for; becomes the
/// `agent=` CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Plan,
    Build,
    Survey,
    CiTriage,
}

impl AgentRole {
    pub fn as_cli_value(self) -> &'static str {
        match self {
            AgentRole::Plan => "plan",
            AgentRole::Build => "build",
            AgentRole::Survey => "survey",
            AgentRole::CiTriage => "ci-triage",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSpawnConfig {
    pub role: AgentRole,
    pub workspace_path: String,
    pub session_id: Option<String>,
    pub prompt: String,
}

/// Typed decoding of one NDJSON line from the agent's stdout. Unknown
/// `type` discriminants decode to `Unknown` rather than failing so a
/// future agent version never halts an older worker build.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolStart { call_id: String, tool_name: String, args: Value },
    ToolEnd { call_id: String, tool_name: String },
    Progress { detail: String },
    Log { line: String },
    /// The final `RALPH_<KIND>:<json>` marker line, split into its kind
    /// tag and parsed payload.
    ResultMarker { kind: String, payload: Value },
    Unknown { raw_type: String },
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, rename = "callId")]
    call_id: Option<String>,
    #[serde(default, rename = "toolName")]
    tool_name: Option<String>,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    line: Option<String>,
}

/// Running tally of lines this worker run has failed to decode. Exposed
/// so the worker can attach it to the run's step metrics without the
/// decoder owning any storage concerns itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeStats {
    pub parsed: u64,
    pub parse_errors: u64,
}

/// Decodes one line of agent stdout. A blank line decodes to `None`.
/// The terminal `RALPH_<KIND>:<json>` marker format is checked before
/// falling back to general NDJSON `{type: ...}` decoding since it never
/// itself is valid bare JSON.
pub fn decode_line(line: &str, stats: &mut DecodeStats) -> Option<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("RALPH_") {
        if let Some((kind, payload_str)) = rest.split_once(':') {
            return match serde_json::from_str::<Value>(payload_str) {
                Ok(payload) => {
                    stats.parsed += 1;
                    Some(AgentEvent::ResultMarker { kind: kind.to_string(), payload })
                }
                Err(_) => {
                    stats.parse_errors += 1;
                    None
                }
            };
        }
    }

    let raw: RawEvent = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(_) => {
            stats.parse_errors += 1;
            return None;
        }
    };
    stats.parsed += 1;

    Some(match raw.event_type.as_str() {
        "tool_start" => AgentEvent::ToolStart {
            call_id: raw.call_id.unwrap_or_default(),
            tool_name: raw.tool_name.unwrap_or_default(),
            args: raw.args.unwrap_or(Value::Null),
        },
        "tool_end" => AgentEvent::ToolEnd { call_id: raw.call_id.unwrap_or_default(), tool_name: raw.tool_name.unwrap_or_default() },
        "progress" => AgentEvent::Progress { detail: raw.detail.unwrap_or_default() },
        "log" => AgentEvent::Log { line: raw.line.unwrap_or_default() },
        other => AgentEvent::Unknown { raw_type: other.to_string() },
    })
}

#[derive(Debug, Clone)]
pub struct AgentExit {
    pub exit_code: i32,
    pub stats: DecodeStats,
}

#[derive(Debug, Error)]
pub enum AgentSpawnError {
    #[error("agent process could not be started: {0}")]
    Spawn(String),
    #[error("agent session {0} not found")]
    SessionNotFound(String),
}

/// A single in-flight agent subprocess: its event stream and exit
/// status, consumed by the worker and fed to the watchdog.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Pulls the next decoded event, or `None` once the stream is
    /// exhausted (the process has exited).
    async fn next_event(&mut self) -> Option<AgentEvent>;

    /// Blocks until the subprocess exits, yielding its code and the
    /// accumulated decode stats.
    async fn wait(&mut self) -> AgentExit;

    /// Sends SIGTERM, waiting up to `grace` before a hard SIGKILL.
    /// Called by the watchdog on a trip and by the worker on
    /// cancellation.
    async fn cancel(&mut self, grace: std::time::Duration);
}

impl std::fmt::Debug for dyn AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn AgentHandle")
    }
}

/// Seam for spawning/reconnecting an agent subprocess, narrowed down to
/// the one contract the worker depends on: an NDJSON event stream and
/// an exit code, not a richer PTY or persistent-process surface.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn spawn(&self, config: AgentSpawnConfig) -> Result<Box<dyn AgentHandle>, AgentSpawnError>;

    /// Reconnects to an already-running session (the worker's `resume`
    /// entrypoint), rather than starting a fresh subprocess.
    async fn reconnect(&self, session_id: &str, workspace_path: &str) -> Result<Box<dyn AgentHandle>, AgentSpawnError>;
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
