// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ralph_core::domain::{RepoRef, TaskPath};
use std::io::Write as _;
use tempfile::tempdir;

fn event(n: u64) -> Event {
    Event::IdempotencyKeyDeleted { key: format!("k{n}") }
}

fn task_path_event() -> Event {
    Event::TaskDeleted { path: TaskPath::new(RepoRef::new("org", "demo"), 10) }
}

#[test]
fn append_assigns_monotonic_seq() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    let s1 = wal.append(event(1)).unwrap();
    let s2 = wal.append(event(2)).unwrap();
    let s3 = wal.append(event(3)).unwrap();
    assert_eq!((s1, s2, s3), (1, 2, 3));
}

#[test]
fn entries_after_returns_strictly_greater_seqs() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    wal.append(event(1)).unwrap();
    let cutoff = wal.append(event(2)).unwrap();
    wal.append(event(3)).unwrap();

    let after = wal.entries_after(cutoff).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].seq, 3);
}

#[test]
fn mark_processed_advances_next_unprocessed_cursor() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    wal.append(event(1)).unwrap();
    let s2 = wal.append(event(2)).unwrap();

    assert_eq!(wal.next_unprocessed().unwrap().len(), 2);
    wal.mark_processed(s2);
    assert_eq!(wal.next_unprocessed().unwrap().len(), 0);
}

#[test]
fn mark_processed_never_moves_backwards() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    wal.append(event(1)).unwrap();
    wal.mark_processed(5);
    wal.mark_processed(1);
    assert_eq!(wal.processed_seq(), 5);
}

#[test]
fn reopening_an_existing_wal_continues_seq_numbering() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    {
        let wal = Wal::open(&path).unwrap();
        wal.append(event(1)).unwrap();
        wal.append(event(2)).unwrap();
        wal.flush().unwrap();
    }
    let wal = Wal::open(&path).unwrap();
    let seq = wal.append(event(3)).unwrap();
    assert_eq!(seq, 3);
    assert_eq!(wal.entries_after(0).unwrap().len(), 3);
}

#[test]
fn truncate_before_drops_older_entries_and_keeps_newer() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    wal.append(event(1)).unwrap();
    wal.append(event(2)).unwrap();
    let keep_from = wal.append(event(3)).unwrap();
    wal.append(event(4)).unwrap();

    wal.truncate_before(keep_from).unwrap();
    let remaining = wal.entries_after(0).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|e| e.seq >= keep_from));
}

#[test]
fn truncated_wal_is_still_appendable_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    {
        let wal = Wal::open(&path).unwrap();
        wal.append(event(1)).unwrap();
        let keep_from = wal.append(event(2)).unwrap();
        wal.truncate_before(keep_from).unwrap();
    }
    let wal = Wal::open(&path).unwrap();
    let seq = wal.append(event(3)).unwrap();
    assert!(seq > 2);
}

#[test]
fn trailing_corruption_is_rotated_into_a_backup_and_prefix_kept() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    {
        let wal = Wal::open(&path).unwrap();
        wal.append(event(1)).unwrap();
        wal.append(event(2)).unwrap();
        wal.flush().unwrap();
    }
    // Simulate a crash mid-write: append a truncated JSON fragment.
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"seq\":3,\"event\":{{\"type\":\"Idempot").unwrap();
    }

    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.entries_after(0).unwrap().len(), 2);
    assert!(dir.path().join("wal.jsonl.bak").exists());
}

#[test]
fn backup_rotation_caps_at_three_generations() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");

    for round in 0..5u64 {
        {
            let wal = Wal::open(&path).unwrap();
            wal.append(event(round)).unwrap();
            wal.flush().unwrap();
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not valid json").unwrap();
    }

    assert!(dir.path().join("wal.jsonl.bak").exists());
    assert!(dir.path().join("wal.jsonl.bak.2").exists());
    assert!(dir.path().join("wal.jsonl.bak.3").exists());
    assert!(!dir.path().join("wal.jsonl.bak.4").exists());
}

#[test]
fn append_batch_assigns_contiguous_seqs_in_order() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("wal.jsonl")).unwrap();
    let seqs = wal.append_batch(vec![event(1), event(2), task_path_event()]).unwrap();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn open_on_fresh_path_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("wal.jsonl");
    let wal = Wal::open(&path).unwrap();
    wal.append(event(1)).unwrap();
    assert!(path.exists());
}
