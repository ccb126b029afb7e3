// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolved, already-validated daemon configuration. Parsing `config.toml`
//! / `config.json` / the legacy `ralph.json` file into this shape is an
//! external concern (owned by whatever loads the file and hands us plain
//! values); this module only assembles and validates the result.

use ralph_core::domain::{RepoConfig, RepoRef};
use ralph_engine::throttle::ThrottleConfig;
use ralph_engine::watchdog::WatchdogConfig;

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub max_workers: u32,
    pub ownership_ttl_ms: u64,
    pub repos: Vec<RepoConfig>,
    pub throttle: ThrottleConfig,
    pub watchdog: WatchdogConfig,
    pub rolling_budget_tokens: u64,
    pub weekly_budget_tokens: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no repos configured")]
    NoRepos,
    #[error("duplicate repo entry: {0}")]
    DuplicateRepo(String),
}

impl ResolvedConfig {
    /// Builds a config from already-resolved repo entries, applying
    /// defaults for any setting not present in the loaded file.
    pub fn new(repos: Vec<RepoConfig>) -> Result<Self, ConfigError> {
        Self::validate(&repos)?;
        Ok(Self {
            max_workers: default_max_workers(),
            ownership_ttl_ms: default_ownership_ttl_ms(),
            repos,
            throttle: ThrottleConfig::default(),
            watchdog: WatchdogConfig::default(),
            rolling_budget_tokens: default_rolling_budget_tokens(),
            weekly_budget_tokens: default_weekly_budget_tokens(),
        })
    }

    fn validate(repos: &[RepoConfig]) -> Result<(), ConfigError> {
        if repos.is_empty() {
            return Err(ConfigError::NoRepos);
        }
        let mut seen = std::collections::HashSet::new();
        for r in repos {
            let slug = format!("{}/{}", r.repo.owner, r.repo.name);
            if !seen.insert(slug.clone()) {
                return Err(ConfigError::DuplicateRepo(slug));
            }
        }
        Ok(())
    }
}

fn default_max_workers() -> u32 {
    std::env::var("RALPH_MAX_WORKERS").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(4)
}

fn default_ownership_ttl_ms() -> u64 {
    std::env::var("RALPH_OWNERSHIP_TTL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(15 * 60_000)
}

fn default_rolling_budget_tokens() -> u64 {
    std::env::var("RALPH_TOKEN_BUDGET_ROLLING5H").ok().and_then(|v| v.parse().ok()).unwrap_or(5_000_000)
}

fn default_weekly_budget_tokens() -> u64 {
    std::env::var("RALPH_TOKEN_BUDGET_WEEKLY").ok().and_then(|v| v.parse().ok()).unwrap_or(40_000_000)
}

/// Minimal ambient repo list for environments with no config loader wired
/// in yet: `RALPH_REPOS` is a comma-separated list of `owner/name` pairs,
/// each given the same default bot branch and slot count. A real config
/// loader producing richer [`RepoConfig`] entries per repo replaces this.
pub fn repos_from_env() -> Vec<RepoConfig> {
    std::env::var("RALPH_REPOS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter_map(|entry| {
                    let entry = entry.trim();
                    let (owner, name) = entry.split_once('/')?;
                    Some(RepoConfig {
                        repo: RepoRef::new(owner, name),
                        bot_branch: "ralph/bot".to_string(),
                        concurrency_slots: 1,
                        required_checks: Vec::new(),
                        preflight_commands: Vec::new(),
                        setup_commands: Vec::new(),
                        scheduler_priority: 0,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
