// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchdog / Stall / Loop detector (C9): three cooperating monitors over
//! the agent's NDJSON event stream, plus the secret/path redaction used
//! before any trip detail reaches a forge comment.

use std::collections::HashMap;
use std::time::Duration;

use crate::agent::AgentEvent;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub soft_ms: u64,
    pub hard_ms: u64,
    pub idle_ms: u64,
    pub loop_window: usize,
    pub loop_threshold: usize,
    pub kill_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { soft_ms: 60_000, hard_ms: 300_000, idle_ms: 180_000, loop_window: 20, loop_threshold: 4, kill_grace: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogTimeout {
    pub tool_name: String,
    pub call_id: String,
    pub elapsed_ms: u64,
    pub soft_ms: u64,
    pub hard_ms: u64,
    pub last_progress_ms_ago: u64,
    pub recent_events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StallTimeout {
    pub idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopTrip {
    pub window_count: usize,
    pub sample: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trip {
    Watchdog(WatchdogTimeout),
    Stall(StallTimeout),
    Loop(LoopTrip),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    SoftWarning { tool_name: String, call_id: String },
    Trip(Trip),
}

struct ActiveTool {
    tool_name: String,
    started_ms: u64,
    last_progress_ms: u64,
    warned: bool,
}

/// Consumes the decoded event stream alongside a wall-clock tick,
/// surfacing soft warnings and hard trips. Stateful by design: the
/// watchdog's job is precisely to remember how long each tool has been
/// quiet.
pub struct WatchdogMonitor {
    config: WatchdogConfig,
    active_tools: HashMap<String, ActiveTool>,
    last_activity_ms: u64,
    recent_tool_args: Vec<String>,
    recent_events: Vec<String>,
}

impl WatchdogMonitor {
    pub fn new(config: WatchdogConfig, now_ms: u64) -> Self {
        Self { config, active_tools: HashMap::new(), last_activity_ms: now_ms, recent_tool_args: Vec::new(), recent_events: Vec::new() }
    }

    fn push_recent(&mut self, label: String) {
        self.recent_events.push(label);
        if self.recent_events.len() > 10 {
            self.recent_events.remove(0);
        }
    }

    /// Feeds one decoded event at the instant it arrived. Marks fresh
    /// progress so the stall detector's clock resets.
    pub fn on_event(&mut self, event: &AgentEvent, now_ms: u64) {
        self.last_activity_ms = now_ms;
        match event {
            AgentEvent::ToolStart { call_id, tool_name, args } => {
                self.push_recent(format!("tool_start:{tool_name}"));
                self.active_tools.insert(call_id.clone(), ActiveTool { tool_name: tool_name.clone(), started_ms: now_ms, last_progress_ms: now_ms, warned: false });
                let key = format!("{tool_name}:{args}");
                self.recent_tool_args.push(key);
                if self.recent_tool_args.len() > self.config.loop_window {
                    self.recent_tool_args.remove(0);
                }
            }
            AgentEvent::ToolEnd { call_id, tool_name } => {
                self.push_recent(format!("tool_end:{tool_name}"));
                self.active_tools.remove(call_id);
            }
            AgentEvent::Progress { .. } => {
                for tool in self.active_tools.values_mut() {
                    tool.last_progress_ms = now_ms;
                }
            }
            AgentEvent::Log { .. } => {}
            AgentEvent::ResultMarker { kind, .. } => self.push_recent(format!("result:{kind}")),
            AgentEvent::Unknown { raw_type } => self.push_recent(format!("unknown:{raw_type}")),
        }
    }

    /// Checks the loop detector immediately after a `ToolStart`: if the
    /// same `(tool, args)` pair repeats at or above `loop_threshold`
    /// times within the trailing `loop_window`, trip.
    pub fn check_loop(&self) -> Option<Trip> {
        let latest = self.recent_tool_args.last()?;
        let count = self.recent_tool_args.iter().filter(|a| *a == latest).count();
        if count >= self.config.loop_threshold {
            Some(Trip::Loop(LoopTrip { window_count: count, sample: latest.clone() }))
        } else {
            None
        }
    }

    /// Called on an idle tick (no event has arrived recently) to check
    /// the stall and per-tool watchdog timers.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Signal> {
        let mut signals = Vec::new();

        let idle = now_ms.saturating_sub(self.last_activity_ms);
        if idle >= self.config.idle_ms {
            signals.push(Signal::Trip(Trip::Stall(StallTimeout { idle_ms: idle })));
            return signals;
        }

        for (call_id, tool) in self.active_tools.iter_mut() {
            let since_progress = now_ms.saturating_sub(tool.last_progress_ms);
            if since_progress >= self.config.hard_ms {
                signals.push(Signal::Trip(Trip::Watchdog(WatchdogTimeout {
                    tool_name: tool.tool_name.clone(),
                    call_id: call_id.clone(),
                    elapsed_ms: now_ms.saturating_sub(tool.started_ms),
                    soft_ms: self.config.soft_ms,
                    hard_ms: self.config.hard_ms,
                    last_progress_ms_ago: since_progress,
                    recent_events: self.recent_events.clone(),
                })));
            } else if since_progress >= self.config.soft_ms && !tool.warned {
                tool.warned = true;
                signals.push(Signal::SoftWarning { tool_name: tool.tool_name.clone(), call_id: call_id.clone() });
            }
        }
        signals
    }
}

const SECRET_PREFIXES: &[&str] = &["ghp_", "gho_", "ghu_", "ghs_", "ghr_", "github_pat_"];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Redacts GitHub PAT-shaped tokens (`ghp_…` etc.) and, when a home
/// directory is supplied, any absolute path beneath it — the two
/// sensitive-surface categories a watchdog trip comment can otherwise
/// leak.
pub fn redact(text: &str, home_dir: Option<&str>) -> String {
    let mut with_paths = text.to_string();
    if let Some(home) = home_dir {
        if !home.is_empty() {
            with_paths = with_paths.replace(home, "~");
        }
    }

    let mut out = String::with_capacity(with_paths.len());
    let chars: Vec<char> = with_paths.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if is_token_char(chars[i]) {
            let start = i;
            while i < chars.len() && is_token_char(chars[i]) {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            match SECRET_PREFIXES.iter().find(|p| token.starts_with(**p)) {
                Some(prefix) => {
                    out.push_str(prefix);
                    out.push_str("[REDACTED]");
                }
                None => out.push_str(&token),
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Derives the stable marker id embedded in a watchdog/verification
/// comment (`<!-- ralph-<kind>:v1 id=<hash> -->`) so restarts recognize
/// a comment they already posted instead of double-posting.
pub fn marker_id(repo_full_name: &str, issue_number: u64, marker: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    (repo_full_name, issue_number, marker).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn marker_comment(kind: &str, repo_full_name: &str, issue_number: u64, marker: &str, body: &str) -> String {
    format!("<!-- ralph-{kind}:v1 id={} -->\n{body}", marker_id(repo_full_name, issue_number, marker))
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
