// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn migrate_from_current_version_is_a_no_op() {
    let registry = MigrationRegistry::new(2);
    let value = json!({"v": 2});
    assert_eq!(registry.migrate(2, value.clone()).unwrap(), value);
}

#[test]
fn migrate_applies_chain_in_order() {
    let registry = MigrationRegistry::new(3)
        .register(FnMigration::new(0, |mut v| {
            v["added_in_v1"] = json!(true);
            v
        }))
        .register(FnMigration::new(1, |mut v| {
            v["added_in_v2"] = json!(true);
            v
        }))
        .register(FnMigration::new(2, |mut v| {
            v["added_in_v3"] = json!(true);
            v
        }));

    let migrated = registry.migrate(0, json!({})).unwrap();
    assert_eq!(migrated["added_in_v1"], json!(true));
    assert_eq!(migrated["added_in_v2"], json!(true));
    assert_eq!(migrated["added_in_v3"], json!(true));
}

#[test]
fn migrate_rejects_snapshot_newer_than_binary() {
    let registry = MigrationRegistry::new(1);
    let err = registry.migrate(2, json!({})).unwrap_err();
    assert_eq!(err, MigrationError::TooNew { found: 2, current: 1 });
}

#[test]
fn migrate_rejects_gap_in_chain() {
    let registry = MigrationRegistry::new(2).register(FnMigration::new(1, |v| v));
    // missing a 0 -> 1 step
    let err = registry.migrate(0, json!({})).unwrap_err();
    assert_eq!(err, MigrationError::NoPath { from: 0, to: 1 });
}

#[test]
fn migrate_from_intermediate_version_skips_earlier_steps() {
    let registry = MigrationRegistry::new(2)
        .register(FnMigration::new(0, |mut v| {
            v["should_not_run"] = json!(true);
            v
        }))
        .register(FnMigration::new(1, |mut v| {
            v["should_run"] = json!(true);
            v
        }));

    let migrated = registry.migrate(1, json!({})).unwrap();
    assert!(migrated.get("should_not_run").is_none());
    assert_eq!(migrated["should_run"], json!(true));
}
