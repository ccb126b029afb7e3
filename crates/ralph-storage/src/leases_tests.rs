// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::migration::MigrationRegistry;
use crate::state::SCHEMA_VERSION;
use tempfile::tempdir;

fn open_store(dir: &tempfile::TempDir) -> StateStore {
    let registry = MigrationRegistry::new(SCHEMA_VERSION);
    StateStore::open(dir.path().join("wal.jsonl"), dir.path().join("snapshot.json"), &registry).unwrap()
}

#[test]
fn record_key_first_writer_wins() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    assert!(leases.record_key("pr-create:org/demo#10:bot/integration", "pr-create", None, 100).unwrap());
    assert!(!leases.record_key("pr-create:org/demo#10:bot/integration", "pr-create", None, 200).unwrap());
}

#[test]
fn has_key_and_get_payload_reflect_claim_state() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    assert!(!leases.has_key("k"));
    leases.record_key("k", "scope", Some(serde_json::json!({"a": 1})), 0).unwrap();
    assert!(leases.has_key("k"));
    assert_eq!(leases.get_payload("k").unwrap()["a"], 1);
}

#[test]
fn upsert_key_replaces_payload_after_claim() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    leases.record_key("k", "scope", None, 0).unwrap();
    leases.upsert_key("k", serde_json::json!({"done": true})).unwrap();
    assert_eq!(leases.get_payload("k").unwrap()["done"], true);
}

#[test]
fn delete_key_clears_claim() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    leases.record_key("k", "scope", None, 0).unwrap();
    leases.delete_key("k").unwrap();
    assert!(!leases.has_key("k"));
}

#[test]
fn self_heal_requires_min_age() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    leases.record_key("k", "scope", None, 1_000).unwrap();
    assert!(!leases.try_self_heal("k", 10_000, 5_000).unwrap());
    assert!(leases.try_self_heal("k", 10_000, 20_000).unwrap());
}

#[test]
fn self_heal_is_one_shot_per_process_lifetime() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    leases.record_key("k", "scope", None, 0).unwrap();
    assert!(leases.try_self_heal("k", 0, 1_000).unwrap());

    // Re-claim, then try to self-heal again within the same lifetime.
    leases.record_key("k", "scope", None, 1_000).unwrap();
    assert!(!leases.try_self_heal("k", 0, 2_000).unwrap());
}

#[test]
fn self_heal_on_absent_key_is_a_no_op() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let leases = LeaseRegistry::new(&store);

    assert!(!leases.try_self_heal("missing", 0, 0).unwrap());
}
