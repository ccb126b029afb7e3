// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upgrades an old-version snapshot's raw JSON through a chain of
//! registered migrations before it is deserialized into the current
//! `MaterializedState`. Schema-migration failures are fatal at startup —
//! the daemon does not attempt to run with a state it cannot fully
//! understand.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("snapshot version {found} is newer than the running binary's version {current}")]
    TooNew { found: u32, current: u32 },
    #[error("no migration path from version {from} to {to}")]
    NoPath { from: u32, to: u32 },
}

/// One step in the migration chain: transforms a snapshot's JSON value
/// from `from_version` to `from_version + 1`.
pub trait Migration: Send + Sync {
    fn from_version(&self) -> u32;
    fn apply(&self, value: Value) -> Value;
}

pub struct FnMigration {
    from: u32,
    f: Box<dyn Fn(Value) -> Value + Send + Sync>,
}

impl FnMigration {
    pub fn new(from: u32, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        Self { from, f: Box::new(f) }
    }
}

impl Migration for FnMigration {
    fn from_version(&self) -> u32 {
        self.from
    }

    fn apply(&self, value: Value) -> Value {
        (self.f)(value)
    }
}

/// Ordered registry of migrations, one expected per version step up to
/// `current_version`.
pub struct MigrationRegistry {
    current_version: u32,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new(current_version: u32) -> Self {
        Self { current_version, migrations: Vec::new() }
    }

    pub fn register(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Walks `value` from `from_version` to `current_version` by applying
    /// each registered single-step migration in order. A snapshot newer
    /// than the binary is `TooNew`; a gap in the chain is `NoPath`.
    pub fn migrate(&self, from_version: u32, mut value: Value) -> Result<Value, MigrationError> {
        if from_version > self.current_version {
            return Err(MigrationError::TooNew { found: from_version, current: self.current_version });
        }

        let mut version = from_version;
        while version < self.current_version {
            let step = self
                .migrations
                .iter()
                .find(|m| m.from_version() == version)
                .ok_or(MigrationError::NoPath { from: version, to: version + 1 })?;
            value = step.apply(value);
            version += 1;
        }

        Ok(value)
    }
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
