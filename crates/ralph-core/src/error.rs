// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types shared across crate boundaries. Each component adds its
//! own typed error at its own boundary (`StoreError`, `ForgeApiError`,
//! `QueueError`, ...); this module only holds the handful of parse/
//! validation errors that belong to the domain types themselves.

use thiserror::Error;

use crate::domain::{RepoRef, TaskPath};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainParseError {
    #[error("invalid repo reference {0:?}: expected \"owner/name\"")]
    InvalidRepoRef(String),
    #[error("invalid task path {0:?}: expected \"owner/name#issue\"")]
    InvalidTaskPath(String),
}

/// Parses a `"owner/name"` string into a [`RepoRef`].
pub fn parse_repo_ref(s: &str) -> Result<RepoRef, DomainParseError> {
    let (owner, name) = s
        .split_once('/')
        .filter(|(o, n)| !o.is_empty() && !n.is_empty())
        .ok_or_else(|| DomainParseError::InvalidRepoRef(s.to_string()))?;
    Ok(RepoRef::new(owner, name))
}

/// Parses an `"owner/name#issue"` string into a [`TaskPath`].
pub fn parse_task_path(s: &str) -> Result<TaskPath, DomainParseError> {
    let (repo_part, issue_part) = s
        .split_once('#')
        .ok_or_else(|| DomainParseError::InvalidTaskPath(s.to_string()))?;
    let repo = parse_repo_ref(repo_part)
        .map_err(|_| DomainParseError::InvalidTaskPath(s.to_string()))?;
    let issue_number: u64 = issue_part
        .parse()
        .map_err(|_| DomainParseError::InvalidTaskPath(s.to_string()))?;
    Ok(TaskPath::new(repo, issue_number))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
