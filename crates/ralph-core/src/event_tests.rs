// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::domain::RepoRef;

fn path() -> TaskPath {
    TaskPath::new(RepoRef::new("org", "demo"), 10)
}

#[test]
fn name_is_stable_and_snake_case() {
    let ev = Event::TaskDeleted { path: path() };
    assert_eq!(ev.name(), "task_deleted");
}

#[test]
fn task_path_extracted_for_lease_events() {
    let ev = Event::OpStateReleased { path: path(), released_at_ms: 5, reason: "finalized".into() };
    assert_eq!(ev.task_path(), Some(&path()));
}

#[test]
fn task_path_is_none_for_events_without_one() {
    let ev = Event::IdempotencyKeyDeleted { key: "k".into() };
    assert_eq!(ev.task_path(), None);
}

#[test]
fn event_serializes_with_type_tag() {
    let ev = Event::IdempotencyKeyDeleted { key: "pr-create:org/demo#10:bot/integration".into() };
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "IdempotencyKeyDeleted");
    assert_eq!(json["key"], "pr-create:org/demo#10:bot/integration");
}

#[test]
fn event_roundtrips_through_json() {
    let ev = Event::TaskDeleted { path: path() };
    let json = serde_json::to_string(&ev).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back.name(), ev.name());
}
