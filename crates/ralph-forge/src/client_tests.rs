// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::transport::FakeForgeTransport;
use ralph_core::FakeClock;
use serde_json::json;
use std::time::Duration;

fn client(fake: FakeForgeTransport) -> ForgeClient<FakeForgeTransport, FakeClock> {
    ForgeClient::new(fake, FakeClock::new(), SandboxPolicy::production())
        .with_retry_policy(RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(10) })
}

#[tokio::test]
async fn get_issue_returns_data_on_success() {
    let fake = FakeForgeTransport::new();
    fake.push_ok(ForgeResponse { data: json!({"number": 10}), status: 200, etag: None, link: None, not_modified: false });
    let c = client(fake);
    let data = c.get_issue("org", "demo", 10).await.unwrap();
    assert_eq!(data["number"], 10);
}

#[tokio::test]
async fn retriable_error_is_retried_until_success() {
    let fake = FakeForgeTransport::new();
    fake.push_err(ForgeApiError::new("SERVER_ERROR", "boom").with_status(503));
    fake.push_ok(ForgeResponse { data: json!({"number": 10}), status: 200, etag: None, link: None, not_modified: false });
    let c = client(fake);
    let data = c.get_issue("org", "demo", 10).await.unwrap();
    assert_eq!(data["number"], 10);
}

#[tokio::test]
async fn non_retriable_error_fails_immediately() {
    let fake = FakeForgeTransport::new();
    fake.push_err(ForgeApiError::new("NOT_FOUND", "gone").with_status(404));
    fake.push_ok(ForgeResponse { data: json!({}), status: 200, etag: None, link: None, not_modified: false });
    let c = client(fake);
    let err = c.get_issue("org", "demo", 10).await.unwrap_err();
    assert_eq!(err.status, Some(404));
}

#[tokio::test]
async fn retries_are_bounded_by_max_attempts() {
    let fake = FakeForgeTransport::new();
    for _ in 0..5 {
        fake.push_err(ForgeApiError::new("SERVER_ERROR", "boom").with_status(500));
    }
    let c = client(fake);
    let err = c.get_issue("org", "demo", 10).await.unwrap_err();
    assert_eq!(err.status, Some(500));
}

#[tokio::test]
async fn add_labels_treats_conflict_as_idempotent_success() {
    let fake = FakeForgeTransport::new();
    fake.push_err(ForgeApiError::new("CONFLICT", "already present").with_status(409));
    let c = client(fake);
    c.add_labels("org", "demo", 10, &["ralph:status:queued".to_string()]).await.unwrap();
}

#[tokio::test]
async fn create_pr_treats_already_exists_422_as_success() {
    let fake = FakeForgeTransport::new();
    fake.push_err(
        ForgeApiError::new("UNPROCESSABLE", "validation failed").with_status(422).with_response_text("A pull request already exists for org:feature."),
    );
    let c = client(fake);
    let data = c.create_pr("org", "demo", "t", "feature", "main", "body").await.unwrap();
    assert_eq!(data["already_exists"], true);
}

#[tokio::test]
async fn sandbox_check_blocks_before_any_transport_call() {
    let fake = FakeForgeTransport::new();
    let c = ForgeClient::new(fake, FakeClock::new(), SandboxPolicy::sandbox(vec!["acme".into()], "ralph-sandbox-"));
    let err = c.patch_issue("other", "prod-repo", 1, json!({})).await.unwrap_err();
    assert_eq!(err.code, "SANDBOX_TRIPWIRE");
}

#[tokio::test]
async fn not_modified_list_issues_preserves_cursor_with_empty_page() {
    let fake = FakeForgeTransport::new();
    fake.push_ok(ForgeResponse::not_modified(Some("W/\"abc\"".to_string())));
    let c = client(fake);
    let page = c.list_issues("org", "demo", "2026-01-01T00:00:00Z", None).await.unwrap();
    assert!(page.not_modified);
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn list_issues_extracts_next_cursor_from_link_header() {
    let fake = FakeForgeTransport::new();
    fake.push_ok(ForgeResponse {
        data: json!([{"number": 1}]),
        status: 200,
        etag: None,
        link: Some(r#"<https://api.github.com/repos/org/demo/issues?page=2>; rel="next""#.to_string()),
        not_modified: false,
    });
    let c = client(fake);
    let page = c.list_issues("org", "demo", "2026-01-01T00:00:00Z", None).await.unwrap();
    assert_eq!(page.next_cursor.as_deref(), Some("https://api.github.com/repos/org/demo/issues?page=2"));
}
