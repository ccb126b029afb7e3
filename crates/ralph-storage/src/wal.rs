// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only, newline-delimited JSON log of [`Event`]s. Every durable
//! write passes through here before `MaterializedState` ever sees it, so
//! a crash mid-write can only ever lose the last unfsynced line, never
//! corrupt the log's valid prefix.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ralph_core::event::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_BACKUPS: u32 = 3;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal entry serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// Single-writer append log backed by one file. Readers see a consistent
/// prefix at all times because writes are append-then-fsync.
pub struct Wal {
    path: PathBuf,
    file: Mutex<File>,
    next_seq: AtomicU64,
    processed_seq: AtomicU64,
}

impl Wal {
    /// Opens (creating if absent) the WAL at `path`. If the file's tail
    /// contains an unparseable line — the signature of a write that was
    /// interrupted mid-flush — the tail is rotated into a `.bak` file
    /// (keeping up to [`MAX_BACKUPS`] generations) and only the valid
    /// prefix is kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (valid_entries, had_corruption) = Self::read_valid_prefix(&path)?;

        if had_corruption {
            Self::rotate_backups(&path)?;
            Self::rewrite_with_entries(&path, &valid_entries)?;
        }

        let max_seq = valid_entries.iter().map(|e| e.seq).max().unwrap_or(0);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_seq: AtomicU64::new(max_seq + 1),
            processed_seq: AtomicU64::new(0),
        })
    }

    fn read_valid_prefix(path: &Path) -> Result<(Vec<WalEntry>, bool), WalError> {
        if !path.exists() {
            return Ok((Vec::new(), false));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut corrupted = false;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    corrupted = true;
                    break;
                }
            }
        }
        Ok((entries, corrupted))
    }

    fn rotate_backups(path: &Path) -> Result<(), WalError> {
        for gen in (1..MAX_BACKUPS).rev() {
            let from = Self::backup_path(path, gen);
            let to = Self::backup_path(path, gen + 1);
            if from.exists() {
                fs::rename(&from, &to)?;
            }
        }
        let first = Self::backup_path(path, 1);
        if path.exists() {
            fs::copy(path, &first)?;
        }
        Ok(())
    }

    fn backup_path(path: &Path, generation: u32) -> PathBuf {
        if generation == 1 {
            let mut p = path.as_os_str().to_owned();
            p.push(".bak");
            PathBuf::from(p)
        } else {
            let mut p = path.as_os_str().to_owned();
            p.push(format!(".bak.{generation}"));
            PathBuf::from(p)
        }
    }

    fn rewrite_with_entries(path: &Path, entries: &[WalEntry]) -> Result<(), WalError> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }

    /// Appends `event`, assigning it the next monotonic `seq`. Does not
    /// fsync; call [`Wal::flush`] for a durability boundary.
    pub fn append(&self, event: Event) -> Result<u64, WalError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = WalEntry { seq, event };
        let line = serde_json::to_string(&entry)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{line}")?;
        Ok(seq)
    }

    /// Appends every event in `events` as one contiguous batch, returning
    /// their assigned sequence numbers in order. Used by transactional
    /// writers so a reader never observes a partially-applied batch.
    pub fn append_batch(&self, events: Vec<Event>) -> Result<Vec<u64>, WalError> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let mut seqs = Vec::with_capacity(events.len());
        for event in events {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let entry = WalEntry { seq, event };
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
            seqs.push(seq);
        }
        Ok(seqs)
    }

    pub fn flush(&self) -> Result<(), WalError> {
        let file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.sync_all()?;
        Ok(())
    }

    /// Reads every entry with `seq > after` from disk, in order.
    pub fn entries_after(&self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        let (entries, _) = Self::read_valid_prefix(&self.path)?;
        Ok(entries.into_iter().filter(|e| e.seq > after).collect())
    }

    /// Reads every entry not yet covered by [`Wal::mark_processed`].
    pub fn next_unprocessed(&self) -> Result<Vec<WalEntry>, WalError> {
        self.entries_after(self.processed_seq.load(Ordering::SeqCst))
    }

    /// Advances the processed cursor. Replay (on restart) starts after
    /// this point once a snapshot has been taken.
    pub fn mark_processed(&self, seq: u64) {
        self.processed_seq.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq.load(Ordering::SeqCst)
    }

    pub fn current_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Compacts the log, dropping every entry with `seq < before`. Used
    /// after a snapshot has durably captured everything up to that point.
    pub fn truncate_before(&self, before: u64) -> Result<(), WalError> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let (entries, _) = Self::read_valid_prefix(&self.path)?;
        let kept: Vec<_> = entries.into_iter().filter(|e| e.seq >= before).collect();
        Self::rewrite_with_entries(&self.path, &kept)?;
        *file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
