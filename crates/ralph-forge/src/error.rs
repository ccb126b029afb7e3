// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The one structured error type every forge operation returns.

use serde::Serialize;
use thiserror::Error;

/// Mirrors the forge client's contract error exactly: a typed shape
/// rather than a raw string, so callers classify by field instead of
/// pattern-matching text.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ForgeApiError {
    pub message: String,
    pub code: String,
    pub status: Option<u16>,
    pub request_id: Option<String>,
    pub response_text: Option<String>,
    /// Raw `Retry-After` header value, carried alongside the contract
    /// fields so the client's retry loop can honor it without parsing
    /// the header back out of `message`.
    pub retry_after: Option<String>,
}

impl ForgeApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            status: None,
            request_id: None,
            response_text: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_response_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }

    pub fn sandbox_tripwire(message: impl Into<String>) -> Self {
        Self::new("SANDBOX_TRIPWIRE", message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new("NETWORK_ERROR", message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
