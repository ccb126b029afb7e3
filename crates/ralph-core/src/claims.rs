// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claims-JSONL canonicalization: our own input-validation surface (not
//! the forge's), producing a stable `(domain, id)`-sorted record set plus
//! a structured complaint list instead of throwing on the first bad line.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::failure::{ClaimIssue, ClaimIssueCode};

/// Domains a claims line is permitted to declare; anything else is
/// `E_DOMAIN_UNKNOWN`.
const KNOWN_DOMAINS: &[&str] = &["claims", "worktree", "session", "lease"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub domain: String,
    pub id: String,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalizeResult {
    pub records: Vec<ClaimRecord>,
    pub issues: Vec<ClaimIssue>,
}

impl CanonicalizeResult {
    /// Re-serializes the canonical record set back to JSONL, in sort
    /// order, so idempotency (`canonicalize(canonicalize(x)) == x`) is
    /// directly testable by feeding this back in.
    pub fn to_jsonl(&self) -> String {
        self.records.iter().filter_map(|r| serde_json::to_string(&r.extra).ok()).collect::<Vec<_>>().join("\n")
    }
}

/// Parses a claims JSONL document into a `(domain, id)`-sorted record
/// set. Each line is independent: a malformed or duplicate line is
/// recorded as a `ClaimIssue` and excluded from the output rather than
/// aborting the whole parse.
pub fn canonicalize(input: &str) -> CanonicalizeResult {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut records = Vec::new();
    let mut issues = Vec::new();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                issues.push(ClaimIssue::new(ClaimIssueCode::ParseJson, line_no, e.to_string()));
                continue;
            }
        };
        let Some(obj) = value.as_object() else {
            issues.push(ClaimIssue::new(ClaimIssueCode::ParseNotObject, line_no, "line is not a JSON object"));
            continue;
        };

        let domain = match obj.get("domain").and_then(Value::as_str) {
            Some(d) => d.to_string(),
            None => {
                issues.push(ClaimIssue::new(ClaimIssueCode::Schema, line_no, "missing `domain` field"));
                continue;
            }
        };
        let id = match obj.get("id").and_then(Value::as_str) {
            Some(i) => i.to_string(),
            None => {
                issues.push(ClaimIssue::new(ClaimIssueCode::Schema, line_no, "missing `id` field"));
                continue;
            }
        };
        if !KNOWN_DOMAINS.contains(&domain.as_str()) {
            issues.push(ClaimIssue::new(ClaimIssueCode::DomainUnknown, line_no, format!("unknown domain `{domain}`")));
            continue;
        }

        let key = (domain.clone(), id.clone());
        if let Some(&first_line) = seen.get(&key) {
            issues.push(
                ClaimIssue::new(
                    ClaimIssueCode::IdDuplicate,
                    line_no,
                    format!("`{domain}/{id}` already claimed at line {first_line}"),
                )
                .with_path(format!("{domain}/{id}")),
            );
            continue;
        }
        seen.insert(key, line_no);
        records.push(ClaimRecord { domain, id, extra: value });
    }

    records.sort_by(|a, b| (&a.domain, &a.id).cmp(&(&b.domain, &b.id)));
    CanonicalizeResult { records, issues }
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
