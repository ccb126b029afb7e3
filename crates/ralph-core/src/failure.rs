// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed failure taxonomy so no component ever decides retry/block/escalate
//! policy by matching substrings out of an error message.

use serde::{Deserialize, Serialize};

use crate::simple_display;

/// The outcome classification from spec §7's error-handling table. Every
/// forge call and agent outcome is reduced to exactly one of these before
/// the worker state machine acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Network/5xx/429/secondary rate limit — retry with backoff.
    Transient,
    /// 401/403 "resource not accessible", missing token — escalate.
    AuthDenied,
    /// 409/422 "already exists" — treated as idempotent success.
    Conflict,
    /// HTTP 405 "Base branch was modified" — retry once, then block.
    BaseBranchModified,
    /// Agent sandbox denial (e.g. "external_directory permission denied").
    PolicyDenied,
    /// Agent tool-schema invalid (`invalid_function_parameters`).
    SchemaInvalid,
    /// Watchdog/stall/loop trip exceeded its retry budget.
    WatchdogTrip,
    /// Unparseable NDJSON line from the agent event stream.
    MalformedEvent,
}

simple_display! {
    FailureClass {
        Transient => "transient",
        AuthDenied => "auth_denied",
        Conflict => "conflict",
        BaseBranchModified => "base_branch_modified",
        PolicyDenied => "policy_denied",
        SchemaInvalid => "schema_invalid",
        WatchdogTrip => "watchdog_trip",
        MalformedEvent => "malformed_event",
    }
}

impl FailureClass {
    /// Whether the worker should retry this attempt rather than
    /// transitioning the task to a terminal state.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::Conflict)
    }

    /// Whether this classification should surface as an escalation
    /// (writeback comment + notify event) rather than a quiet block.
    pub fn is_escalating(&self) -> bool {
        matches!(
            self,
            FailureClass::AuthDenied
                | FailureClass::PolicyDenied
                | FailureClass::SchemaInvalid
                | FailureClass::WatchdogTrip
        )
    }
}

/// Stable error codes for the forge-schema-validation surface (claims
/// JSONL canonicalization and similar our-own-input validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimIssueCode {
    ParseJson,
    Schema,
    IdDuplicate,
    DomainUnknown,
    ParseNotObject,
}

simple_display! {
    ClaimIssueCode {
        ParseJson => "E_PARSE_JSON",
        Schema => "E_SCHEMA",
        IdDuplicate => "E_ID_DUPLICATE",
        DomainUnknown => "E_DOMAIN_UNKNOWN",
        ParseNotObject => "E_PARSE_NOT_OBJECT",
    }
}

/// One structured complaint about a claims-JSONL input line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimIssue {
    pub code: ClaimIssueCode,
    pub line: usize,
    pub path: Option<String>,
    pub message: String,
}

impl ClaimIssue {
    pub fn new(code: ClaimIssueCode, line: usize, message: impl Into<String>) -> Self {
        Self { code, line, path: None, message: message.into() }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
