// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn is_mutation_distinguishes_get_from_writes() {
    assert!(!HttpMethod::Get.is_mutation());
    assert!(HttpMethod::Post.is_mutation());
    assert!(HttpMethod::Patch.is_mutation());
    assert!(HttpMethod::Put.is_mutation());
    assert!(HttpMethod::Delete.is_mutation());
}

#[test]
fn graphql_mutation_keyword_scan_detects_mutation() {
    let req = ForgeRequest::new(HttpMethod::Post, "/graphql")
        .with_body(json!({"query": "mutation { addLabel(input: {}) { clientMutationId } }"}));
    assert!(req.is_graphql_mutation());
}

#[test]
fn graphql_query_without_mutation_keyword_is_not_flagged() {
    let req = ForgeRequest::new(HttpMethod::Post, "/graphql")
        .with_body(json!({"query": "query { repository(name: \"demo\") { id } }"}));
    assert!(!req.is_graphql_mutation());
}

#[test]
fn graphql_scan_does_not_false_positive_on_substrings() {
    let req = ForgeRequest::new(HttpMethod::Post, "/graphql")
        .with_body(json!({"query": "query { commutationField }"}));
    assert!(!req.is_graphql_mutation());
}

#[tokio::test]
async fn fake_transport_replays_queued_responses_in_order() {
    let fake = FakeForgeTransport::new();
    fake.push_ok(ForgeResponse { data: json!({"n": 1}), status: 200, etag: None, link: None, not_modified: false });
    fake.push_err(ForgeApiError::new("NOT_FOUND", "gone").with_status(404));

    let first = fake.request(ForgeRequest::new(HttpMethod::Get, "/a")).await.unwrap();
    assert_eq!(first.data["n"], 1);

    let second = fake.request(ForgeRequest::new(HttpMethod::Get, "/b")).await;
    assert!(second.is_err());
    assert_eq!(fake.request_count(), 2);
}

#[tokio::test]
async fn fake_transport_records_requests_made() {
    let fake = FakeForgeTransport::new();
    fake.push_ok(ForgeResponse { data: json!(null), status: 200, etag: None, link: None, not_modified: false });
    let _ = fake.request(ForgeRequest::new(HttpMethod::Patch, "/repos/org/demo/issues/10")).await;
    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/repos/org/demo/issues/10");
    assert_eq!(requests[0].method, HttpMethod::Patch);
}
