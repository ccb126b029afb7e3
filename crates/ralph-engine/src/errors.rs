// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure classification functions: every forge error and agent outcome is
//! reduced to exactly one [`FailureClass`] here, once, so the worker
//! state machine never matches on error strings.

use ralph_core::failure::FailureClass;
use ralph_forge::ForgeApiError;

/// Agent subprocess outcome as observed at exit: either a clean run
/// (possibly with a structured `RALPH_<KIND>:` marker we couldn't parse)
/// or a named policy/schema denial surfaced in its final event.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Success,
    PolicyDenied { detail: String },
    SchemaInvalid { detail: String },
    MalformedMarker { detail: String },
    NonZeroExit { code: i32 },
}

/// Classifies a forge API error per the error-handling table: status
/// code and response text are the only signals consulted, never a
/// substring match on `message` at the call site.
pub fn classify_forge_error(err: &ForgeApiError) -> FailureClass {
    let text = err.response_text.as_deref().unwrap_or("");

    match err.status {
        Some(401) | Some(403) => FailureClass::AuthDenied,
        Some(405) => FailureClass::BaseBranchModified,
        Some(409) => FailureClass::Conflict,
        Some(422) if text.contains("already exists") => FailureClass::Conflict,
        Some(422) => FailureClass::Conflict,
        Some(429) => FailureClass::Transient,
        Some(s) if (500..600).contains(&s) => FailureClass::Transient,
        None => FailureClass::Transient,
        Some(_) => FailureClass::Transient,
    }
}

/// Classifies a terminal agent outcome. Non-zero exits with no more
/// specific signal default to `Transient` so the worker retries a
/// plain crash before giving up on it.
pub fn classify_agent_outcome(outcome: &AgentOutcome) -> Option<FailureClass> {
    match outcome {
        AgentOutcome::Success => None,
        AgentOutcome::PolicyDenied { .. } => Some(FailureClass::PolicyDenied),
        AgentOutcome::SchemaInvalid { .. } => Some(FailureClass::SchemaInvalid),
        AgentOutcome::MalformedMarker { .. } => Some(FailureClass::MalformedEvent),
        AgentOutcome::NonZeroExit { .. } => Some(FailureClass::Transient),
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
