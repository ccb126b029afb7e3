// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn auth_denial_status_codes_are_non_retriable() {
    for status in [401u16, 403] {
        let err = ForgeApiError::new("E", "denied").with_status(status);
        assert_eq!(classify_forge_error(&err), FailureClass::AuthDenied);
        assert!(!classify_forge_error(&err).is_retriable());
    }
}

#[test]
fn base_branch_modified_maps_to_its_own_class() {
    let err = ForgeApiError::new("E", "base branch modified").with_status(405);
    assert_eq!(classify_forge_error(&err), FailureClass::BaseBranchModified);
}

#[test]
fn conflict_and_already_exists_are_idempotent_success_class() {
    let conflict = ForgeApiError::new("E", "conflict").with_status(409);
    assert_eq!(classify_forge_error(&conflict), FailureClass::Conflict);

    let exists = ForgeApiError::new("E", "nope").with_status(422).with_response_text("label already exists");
    assert_eq!(classify_forge_error(&exists), FailureClass::Conflict);
}

#[test]
fn server_errors_and_rate_limits_are_transient() {
    for status in [429u16, 500, 502, 503] {
        let err = ForgeApiError::new("E", "oops").with_status(status);
        assert_eq!(classify_forge_error(&err), FailureClass::Transient);
        assert!(classify_forge_error(&err).is_retriable());
    }
}

#[test]
fn network_error_with_no_status_is_transient() {
    let err = ForgeApiError::network("connection reset");
    assert_eq!(classify_forge_error(&err), FailureClass::Transient);
}

#[test]
fn agent_success_classifies_to_none() {
    assert!(classify_agent_outcome(&AgentOutcome::Success).is_none());
}

#[test]
fn agent_policy_denial_is_escalating() {
    let class = classify_agent_outcome(&AgentOutcome::PolicyDenied { detail: "external_directory permission denied".into() }).unwrap();
    assert_eq!(class, FailureClass::PolicyDenied);
    assert!(class.is_escalating());
}

#[test]
fn agent_schema_invalid_is_escalating() {
    let class = classify_agent_outcome(&AgentOutcome::SchemaInvalid { detail: "invalid_function_parameters".into() }).unwrap();
    assert_eq!(class, FailureClass::SchemaInvalid);
    assert!(class.is_escalating());
}

#[test]
fn agent_malformed_marker_is_malformed_event_not_escalating() {
    let class = classify_agent_outcome(&AgentOutcome::MalformedMarker { detail: "bad json".into() }).unwrap();
    assert_eq!(class, FailureClass::MalformedEvent);
    assert!(!class.is_escalating());
}

#[test]
fn agent_nonzero_exit_defaults_to_retriable_transient() {
    let class = classify_agent_outcome(&AgentOutcome::NonZeroExit { code: 1 }).unwrap();
    assert_eq!(class, FailureClass::Transient);
    assert!(class.is_retriable());
}
