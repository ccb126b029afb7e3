// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker state machine (C8): the seven-state pipeline
//! (`claimed → plan → implement → pr-create → merge-gate → survey →
//! finalize`) plus the `resume`/`escalate`/`block`/`defer` side entries.
//! Each transition's decision logic is a small pure function so the
//! policy is testable without a live agent subprocess or forge call.

use ralph_core::domain::{IssueState, TaskStatus};
use ralph_core::failure::FailureClass;
use ralph_queue::LabelPlan;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Claimed,
    Plan,
    Implement,
    PrCreate,
    MergeGate,
    Survey,
    Finalize,
}

/// What `claim` decides about an upstream issue that may have closed
/// out from under a queued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    ProceedToWorktree,
    SkipAlreadyClosed,
}

pub fn decide_claim(issue_state: IssueState) -> ClaimDecision {
    match issue_state {
        IssueState::Open => ClaimDecision::ProceedToWorktree,
        IssueState::Closed => ClaimDecision::SkipAlreadyClosed,
    }
}

pub const SKIPPED_CLOSED_UPSTREAM_REASON: &str = "Skipped: issue already closed upstream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeAction {
    Create,
    Reuse,
    PruneAndRecreate,
}

/// Whether an existing worktree directory should be reused or wiped:
/// a dirty tree with no live PR branch is safe to discard; one backing
/// a live PR is preserved so in-flight review context survives.
pub fn worktree_action(exists: bool, dirty: bool, live_pr_branch: bool) -> WorktreeAction {
    if !exists {
        WorktreeAction::Create
    } else if !dirty || live_pr_branch {
        WorktreeAction::Reuse
    } else {
        WorktreeAction::PruneAndRecreate
    }
}

pub fn worktree_path(worktree_root: &str, repo_slug: &str, slot: u32, issue_number: u64) -> String {
    format!("{worktree_root}/{repo_slug}/slot-{slot}/{issue_number}/task-a")
}

/// Required-check resolution order for the merge gate: explicit config
/// wins; else branch protection on the bot branch; else the default
/// branch's protection; else gating is disabled (empty list).
pub fn resolve_required_checks(explicit: &[String], bot_branch_protection: &[String], default_branch_protection: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        explicit.to_vec()
    } else if !bot_branch_protection.is_empty() {
        bot_branch_protection.to_vec()
    } else if !default_branch_protection.is_empty() {
        default_branch_protection.to_vec()
    } else {
        Vec::new()
    }
}

/// Whether a 405 "Base branch was modified" response should trigger an
/// update-branch-and-retry, or whether the retry budget (exactly one)
/// is already spent and the merge should block instead.
pub fn should_retry_base_branch_modified(attempts_so_far: u32) -> bool {
    attempts_so_far < 1
}

pub const BASE_BRANCH_MODIFIED_BLOCK_REASON: &str = "auto-update: base branch changed";

/// PR-create lease contention (spec §4.8 item 4, §8 scenario 3): the
/// second writer waits for the first to publish, and may self-heal a
/// stuck lease exactly once per process lifetime once it is old enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseContentionAction {
    /// Still within the wait window; poll again shortly.
    Wait,
    /// Wait window elapsed, lease is old enough, and self-heal has not
    /// yet been attempted: reclaim it.
    SelfHeal,
    /// Wait window elapsed but either too young or already attempted:
    /// back off with bounded exponential delay instead of reclaiming.
    BackOff,
}

pub fn evaluate_lease_contention(
    waited_ms: u64,
    wait_budget_ms: u64,
    lease_age_ms: u64,
    min_age_ms: u64,
    already_attempted: bool,
) -> LeaseContentionAction {
    if waited_ms < wait_budget_ms {
        LeaseContentionAction::Wait
    } else if lease_age_ms >= min_age_ms && !already_attempted {
        LeaseContentionAction::SelfHeal
    } else {
        LeaseContentionAction::BackOff
    }
}

pub fn pr_create_lease_key(repo_full_name: &str, issue_number: u64, bot_branch: &str) -> String {
    format!("pr-create:{repo_full_name}#{issue_number}:{bot_branch}")
}

/// Parses the `ralph.dx_survey.v1` JSON envelope from free-form agent
/// text: a direct JSON object, a fenced ```json code block, or (last
/// resort) the first balanced `{...}` span found anywhere in the text.
pub fn parse_dx_survey_envelope(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(direct) = serde_json::from_str::<Value>(trimmed) {
        if is_dx_survey_envelope(&direct) {
            return Some(direct);
        }
    }

    if let Some(fenced) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            if is_dx_survey_envelope(&value) {
                return Some(value);
            }
        }
    }

    first_json_object(trimmed).filter(is_dx_survey_envelope)
}

fn is_dx_survey_envelope(value: &Value) -> bool {
    value.get("schema").and_then(Value::as_str) == Some("ralph.dx_survey.v1")
}

fn extract_fenced_json(text: &str) -> Option<String> {
    let start = text.find("```json")?;
    let after = &text[start + "```json".len()..];
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

/// Scans for the first `{...}` span with balanced braces (ignoring
/// braces inside string literals) and attempts to parse it.
fn first_json_object(text: &str) -> Option<Value> {
    let bytes: Vec<char> = text.chars().collect();
    let open = bytes.iter().position(|&c| c == '{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &c) in bytes[open..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = open + offset + 1;
                    let candidate: String = bytes[open..end].iter().collect();
                    return serde_json::from_str(&candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// The label transition every successful run finishes with: swap
/// whatever status label is present for `ralph:status:done`.
pub fn finalize_label_plan(current_labels: &[String]) -> LabelPlan {
    ralph_queue::labels::plan_status_label_set(current_labels, TaskStatus::Done)
}

/// Whether a terminal failure classification escalates (writeback
/// comment + notify) or is a quiet `block`.
pub fn terminal_status_for(class: FailureClass) -> TaskStatus {
    if class.is_escalating() {
        TaskStatus::Escalated
    } else {
        TaskStatus::Blocked
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
