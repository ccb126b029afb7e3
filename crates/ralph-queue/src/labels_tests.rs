// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    canonical = { "ralph:status:queued", Some(TaskStatus::Queued) },
    legacy_alias = { "ralph:queued", Some(TaskStatus::Queued) },
    mixed_case = { "Ralph:Status:In-Progress", Some(TaskStatus::InProgress) },
    unknown = { "ralph:status:unknown", None },
    unrelated_label = { "good-first-issue", None },
)]
fn status_label_parsing(label: &str, expected: Option<TaskStatus>) {
    assert_eq!(parse_status_label(label), expected);
}

#[test]
fn status_label_roundtrips_through_display_form() {
    for status in [
        TaskStatus::Queued,
        TaskStatus::Starting,
        TaskStatus::InProgress,
        TaskStatus::WaitingOnPr,
        TaskStatus::Blocked,
        TaskStatus::Throttled,
        TaskStatus::Done,
        TaskStatus::Escalated,
    ] {
        let label = status_label(status);
        assert_eq!(parse_status_label(label), Some(status));
    }
}

#[parameterized(
    p0 = { "ralph:priority:p0", Some(0) },
    p4 = { "ralph:priority:p4", Some(4) },
    out_of_range = { "ralph:priority:p9", None },
    not_a_number = { "ralph:priority:phigh", None },
    wrong_prefix = { "ralph:status:queued", None },
)]
fn priority_label_parsing(label: &str, expected: Option<u8>) {
    assert_eq!(parse_priority_label(label), expected);
}

#[test]
fn plan_priority_label_set_removes_all_other_priority_labels() {
    let current = vec!["ralph:priority:p1".to_string(), "ralph:priority:p3".to_string(), "good-first-issue".to_string()];
    let plan = plan_priority_label_set(&current, 2);
    assert_eq!(plan.add, vec!["ralph:priority:p2".to_string()]);
    assert_eq!(plan.remove.len(), 2);
    assert!(plan.remove.contains(&"ralph:priority:p1".to_string()));
    assert!(plan.remove.contains(&"ralph:priority:p3".to_string()));
}

#[test]
fn plan_priority_label_set_is_no_op_when_already_applied() {
    let current = vec!["ralph:priority:p2".to_string()];
    let plan = plan_priority_label_set(&current, 2);
    assert!(plan.is_empty());
}

#[test]
fn plan_status_label_set_swaps_in_progress_for_queued() {
    let current = vec!["ralph:status:in-progress".to_string(), "ralph:priority:p2".to_string()];
    let plan = plan_status_label_set(&current, TaskStatus::Queued);
    assert_eq!(plan.add, vec!["ralph:status:queued".to_string()]);
    assert_eq!(plan.remove, vec!["ralph:status:in-progress".to_string()]);
}

#[test]
fn plan_status_label_set_is_no_op_when_already_applied() {
    let current = vec!["ralph:status:done".to_string()];
    let plan = plan_status_label_set(&current, TaskStatus::Done);
    assert!(plan.is_empty());
}

#[test]
fn verify_and_blocked_marker_recognition() {
    assert!(is_verify_label("ralph:verify:parent"));
    assert!(!is_verify_label("ralph:status:queued"));
    assert_eq!(BLOCKED_MARKER, "ralph:blocked");
}
