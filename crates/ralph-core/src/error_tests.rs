// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parse_repo_ref_splits_owner_and_name() {
    let repo = parse_repo_ref("org/demo").unwrap();
    assert_eq!(repo.owner, "org");
    assert_eq!(repo.name, "demo");
}

#[test]
fn parse_repo_ref_rejects_missing_slash() {
    assert_eq!(
        parse_repo_ref("org-demo"),
        Err(DomainParseError::InvalidRepoRef("org-demo".into()))
    );
}

#[test]
fn parse_repo_ref_rejects_empty_segments() {
    assert!(parse_repo_ref("/demo").is_err());
    assert!(parse_repo_ref("org/").is_err());
}

#[test]
fn parse_task_path_splits_repo_and_issue() {
    let path = parse_task_path("org/demo#10").unwrap();
    assert_eq!(path.repo.full_name(), "org/demo");
    assert_eq!(path.issue_number, 10);
}

#[test]
fn parse_task_path_rejects_missing_hash() {
    assert!(parse_task_path("org/demo").is_err());
}

#[test]
fn parse_task_path_rejects_non_numeric_issue() {
    assert!(parse_task_path("org/demo#abc").is_err());
}
