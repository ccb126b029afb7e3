// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical label vocabulary, case-insensitive normalization, and the
//! legacy-alias table. The legacy `ralph:queued` form is a recognized
//! alias at parse time: a rolling upgrade must keep recognizing old
//! data, not just read it historically.

use ralph_core::domain::TaskStatus;

pub const BLOCKED_MARKER: &str = "ralph:blocked";
pub const VERIFY_PREFIX: &str = "ralph:verify:";

/// Marks an `in-progress` task whose agent subprocess is actively
/// running — a sub-state of [`TaskStatus::InProgress`], not a distinct
/// status of its own, so it shares the `ralph:status:*` family's
/// at-most-one-label invariant with every other status label.
pub const IN_BOT_LABEL: &str = "ralph:status:in-bot";

/// Lowercases a label for vocabulary matching; labels are compared
/// case-insensitively but stored/emitted in their canonical casing.
pub fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

pub fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "ralph:status:queued",
        TaskStatus::Starting => "ralph:status:starting",
        TaskStatus::InProgress => "ralph:status:in-progress",
        TaskStatus::WaitingOnPr => "ralph:status:waiting-on-pr",
        TaskStatus::Blocked => "ralph:status:blocked",
        TaskStatus::Throttled => "ralph:status:throttled",
        TaskStatus::Done => "ralph:status:done",
        TaskStatus::Escalated => "ralph:status:escalated",
    }
}

/// Parses a normalized label into a [`TaskStatus`], recognizing the
/// legacy bare `ralph:queued` alias alongside the canonical
/// `ralph:status:queued` form. `ralph:status:in-bot` parses to
/// `InProgress`, the status it is a running sub-state of, so a stray
/// in-bot label is swept like any other non-desired status label by
/// [`plan_status_label_set`].
pub fn parse_status_label(label: &str) -> Option<TaskStatus> {
    let normalized = normalize(label);
    match normalized.as_str() {
        "ralph:status:queued" | "ralph:queued" => Some(TaskStatus::Queued),
        "ralph:status:starting" => Some(TaskStatus::Starting),
        "ralph:status:in-progress" => Some(TaskStatus::InProgress),
        IN_BOT_LABEL => Some(TaskStatus::InProgress),
        "ralph:status:waiting-on-pr" => Some(TaskStatus::WaitingOnPr),
        "ralph:status:blocked" => Some(TaskStatus::Blocked),
        "ralph:status:throttled" => Some(TaskStatus::Throttled),
        "ralph:status:done" => Some(TaskStatus::Done),
        "ralph:status:escalated" => Some(TaskStatus::Escalated),
        _ => None,
    }
}

pub fn is_status_label(label: &str) -> bool {
    parse_status_label(label).is_some()
}

/// Priority is `ralph:priority:p{0..4}`; exactly one winner is allowed
/// on an issue at a time.
pub fn priority_label(p: u8) -> String {
    format!("ralph:priority:p{p}")
}

pub fn parse_priority_label(label: &str) -> Option<u8> {
    let normalized = normalize(label);
    let suffix = normalized.strip_prefix("ralph:priority:p")?;
    suffix.parse::<u8>().ok().filter(|p| *p <= 4)
}

pub fn is_priority_label(label: &str) -> bool {
    parse_priority_label(label).is_some()
}

pub fn is_verify_label(label: &str) -> bool {
    normalize(label).starts_with(VERIFY_PREFIX)
}

/// A label mutation plan: add these, remove these. Both lists are
/// disjoint and already deduplicated by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// `planRalphPriorityLabelSet`: add the desired priority label, remove
/// every other priority label present on the issue.
pub fn plan_priority_label_set(current_labels: &[String], desired: u8) -> LabelPlan {
    let desired_label = priority_label(desired);
    let mut remove = Vec::new();
    let mut already_present = false;
    for label in current_labels {
        if let Some(p) = parse_priority_label(label) {
            if p == desired {
                already_present = true;
            } else {
                remove.push(label.clone());
            }
        }
    }
    let add = if already_present { Vec::new() } else { vec![desired_label] };
    LabelPlan { add, remove }
}

/// Shared swap logic behind every status transition: add `desired`,
/// remove any other `ralph:status:*` label present (which should never
/// be more than one per the at-most-one-status-label invariant, but a
/// stray duplicate is defensively swept too).
fn plan_status_label_swap(current_labels: &[String], desired: String) -> LabelPlan {
    let mut remove = Vec::new();
    let mut already_present = false;
    for label in current_labels {
        if is_status_label(label) {
            let normalized = normalize(label);
            if normalized == normalize(&desired) {
                already_present = true;
            } else {
                remove.push(label.clone());
            }
        }
    }
    let add = if already_present { Vec::new() } else { vec![desired] };
    LabelPlan { add, remove }
}

/// Status transition plan: add the new status label, remove the old
/// one (and any stray duplicate status labels, which should not exist
/// per invariant but are defensively swept here too).
pub fn plan_status_label_set(current_labels: &[String], new_status: TaskStatus) -> LabelPlan {
    plan_status_label_swap(current_labels, status_label(new_status).to_string())
}

/// Plan for entering the in-bot running sub-state when an agent
/// subprocess starts: swaps in `ralph:status:in-bot` for whatever
/// status label is currently present (ordinarily `in-progress`).
/// Finalize's swap to `done` then sweeps it back out like any other
/// non-desired status label.
pub fn plan_enter_in_bot_label_set(current_labels: &[String]) -> LabelPlan {
    plan_status_label_swap(current_labels, IN_BOT_LABEL.to_string())
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod tests;
