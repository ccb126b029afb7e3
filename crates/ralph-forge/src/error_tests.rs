// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn builder_methods_populate_optional_fields() {
    let err = ForgeApiError::new("NOT_FOUND", "missing")
        .with_status(404)
        .with_request_id("req-1")
        .with_response_text("{}")
        .with_retry_after("30");

    assert_eq!(err.status, Some(404));
    assert_eq!(err.request_id.as_deref(), Some("req-1"));
    assert_eq!(err.response_text.as_deref(), Some("{}"));
    assert_eq!(err.retry_after.as_deref(), Some("30"));
}

#[test]
fn sandbox_tripwire_carries_the_fixed_code() {
    let err = ForgeApiError::sandbox_tripwire("blocked");
    assert_eq!(err.code, "SANDBOX_TRIPWIRE");
}

#[test]
fn display_renders_the_message() {
    let err = ForgeApiError::new("X", "something broke");
    assert_eq!(err.to_string(), "something broke");
}
