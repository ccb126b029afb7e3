// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idempotency & lease registry (C2): a thin wrapper over [`StateStore`]
//! so claims are durable across restarts in the same WAL. The self-heal
//! rule is a one-shot escape hatch against stuck leases after a daemon
//! crash — tracked in memory, scoped to this process's lifetime, because
//! a second self-heal attempt within the same lifetime must be refused
//! even if the age condition is met again.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde_json::Value;

use crate::store::{StateStore, StoreError};

/// Claim/release keyed tokens backed by the durable store. Used for
/// single-flight PR creation, single-post watchdog/verification
/// comments, and DX-survey write-back dedupe.
pub struct LeaseRegistry<'s> {
    store: &'s StateStore,
    self_heal_attempted: Mutex<HashSet<String>>,
}

impl<'s> LeaseRegistry<'s> {
    pub fn new(store: &'s StateStore) -> Self {
        Self { store, self_heal_attempted: Mutex::new(HashSet::new()) }
    }

    /// Inserts the key if absent. Returns `false` if another writer
    /// already claimed it — first writer wins.
    pub fn record_key(
        &self,
        key: impl Into<String>,
        scope: impl Into<String>,
        payload: Option<Value>,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let key = key.into();
        if self.store.get_idempotency_key(&key).is_some() {
            return Ok(false);
        }
        self.store.run_in_transaction(|state| {
            if state.idempotency_keys.contains_key(&key) {
                return Vec::new();
            }
            vec![ralph_core::event::Event::IdempotencyKeyRecorded {
                key: key.clone(),
                scope: scope.into(),
                payload,
                created_at_ms: now_ms,
            }]
        })?;
        Ok(self.store.get_idempotency_key(&key).is_some())
    }

    pub fn upsert_key(&self, key: impl Into<String>, payload: Value) -> Result<(), StoreError> {
        let key = key.into();
        self.store.run_in_transaction(move |_| {
            vec![ralph_core::event::Event::IdempotencyKeyUpserted { key: key.clone(), payload: payload.clone() }]
        })
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.store.get_idempotency_key(key).is_some()
    }

    pub fn get_payload(&self, key: &str) -> Option<Value> {
        self.store.get_idempotency_key(key).and_then(|k| k.payload)
    }

    pub fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        self.store.run_in_transaction(|_| {
            vec![ralph_core::event::Event::IdempotencyKeyDeleted { key: key.to_string() }]
        })
    }

    /// A caller contesting `key` may delete and re-claim it only if the
    /// existing claim is at least `min_age_ms` old AND this process has
    /// not already attempted a self-heal on this key. Returns `true` if
    /// the self-heal proceeded (the key was deleted, clearing the way
    /// for a fresh `record_key`).
    pub fn try_self_heal(&self, key: &str, min_age_ms: u64, now_ms: u64) -> Result<bool, StoreError> {
        let existing = match self.store.get_idempotency_key(key) {
            Some(k) => k,
            None => return Ok(false),
        };

        {
            let mut attempted = self.self_heal_attempted.lock();
            if attempted.contains(key) {
                return Ok(false);
            }
            if now_ms.saturating_sub(existing.created_at_ms) < min_age_ms {
                return Ok(false);
            }
            attempted.insert(key.to_string());
        }

        self.delete_key(key)?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "leases_tests.rs"]
mod tests;
