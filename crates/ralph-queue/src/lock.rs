// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A typed lock manager keyed by `(repo, issue)`, replacing a
//! module-level label-lock map: label read-modify-write and
//! blocked-comment coalescing both need to serialize per issue, not
//! just per WAL append (the store's single writer already serializes
//! the *durable* mutation, but a label plan spans a read from the forge
//! followed by a write, which the store alone cannot guard).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use ralph_core::domain::RepoRef;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type IssueKey = (RepoRef, u64);

/// Held while a caller owns the per-issue lock. Dropping it releases the
/// lock; the manager opportunistically reaps map entries with no other
/// holders so the map does not grow unbounded over a long daemon run.
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
pub struct LockManager {
    locks: SyncMutex<HashMap<IssueKey, Arc<AsyncMutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self { locks: SyncMutex::new(HashMap::new()) }
    }

    pub async fn lock(&self, repo: &RepoRef, issue_number: u64) -> LockGuard {
        let key = (repo.clone(), issue_number);
        let entry = {
            let mut locks = self.locks.lock();
            locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        let guard = entry.lock_owned().await;
        LockGuard { _guard: guard }
    }

    /// Drops map entries that nobody currently holds or is waiting on.
    /// Safe to call opportunistically; never removes a live lock because
    /// `Arc::strong_count` also counts the clone held by any waiter.
    pub fn reap(&self) {
        self.locks.lock().retain(|_, v| Arc::strong_count(v) > 1);
    }

    pub fn tracked_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
