// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, single-writer state: the write-ahead log, schema-version
//! migration, the materialized projection every component reads, and
//! the idempotency/lease registry that shares the same store.

pub mod leases;
pub mod migration;
pub mod state;
pub mod store;
pub mod wal;

pub use leases::LeaseRegistry;
pub use migration::{FnMigration, Migration, MigrationError, MigrationRegistry};
pub use state::{MaterializedState, Snapshot, SCHEMA_VERSION};
pub use store::{ListRunsFilter, RunSort, StateStore, StoreError};
pub use wal::{Wal, WalEntry, WalError};
