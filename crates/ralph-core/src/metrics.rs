// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide counters cheap enough to bump on every hot-path event,
//! read out by the control plane's dashboard channel and by tests.
//! Adapted from the daemon's effect-logging counters, scoped down to the
//! handful this system actually needs: agent-stream parse errors, gate
//! pass/fail tallies, and throttle-window observations.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters a daemon accumulates over its lifetime. One instance lives in
/// the root supervisor and is shared (via `Arc`) with every component
/// that needs to bump a counter.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Malformed NDJSON lines dropped from an agent event stream.
    pub agent_parse_errors: Counter,
    /// Gate rows that resolved to `pass`.
    pub gate_pass_total: Counter,
    /// Gate rows that resolved to `fail`.
    pub gate_fail_total: Counter,
    /// Stale-sweep reclaims performed (`in-progress` -> `queued`).
    pub stale_sweep_reclaims: Counter,
    /// Watchdog/stall/loop trips recorded.
    pub watchdog_trips: Counter,
    /// Forge requests retried due to a transient classification.
    pub forge_retries: Counter,
    /// Tasks that reached `escalated`.
    pub escalations: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot as flat `(name, value)` pairs, the shape the control
    /// plane's dashboard channel serializes for its read endpoint.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("agent_parse_errors", self.agent_parse_errors.get()),
            ("gate_pass_total", self.gate_pass_total.get()),
            ("gate_fail_total", self.gate_fail_total.get()),
            ("stale_sweep_reclaims", self.stale_sweep_reclaims.get()),
            ("watchdog_trips", self.watchdog_trips.get()),
            ("forge_retries", self.forge_retries.get()),
            ("escalations", self.escalations.get()),
        ]
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
