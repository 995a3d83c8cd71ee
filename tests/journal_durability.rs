//! Journal durability and ordering invariant tests
//!
//! Tests for invariants:
//! - DUR-1: no acknowledged write is ever lost (fsync before acknowledgment)
//! - ORD-1: per-ledger acknowledgment order equals append order
//! - MARK-1: the durable mark only ever advances
//!
//! Per JOURNAL.md these are mandatory and must hold under all conditions
//! including crashes; the crash-shaped cases live in
//! `journal_crash_recovery.rs`.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use aerolog::config::JournalConfig;
use aerolog::journal::{
    list_journal_ids, rc, Journal, JournalResult, JournalScanner,
};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn test_config(dir: &TempDir) -> JournalConfig {
    JournalConfig {
        journal_dir: dir.path().join("journal"),
        ledger_dirs: vec![dir.path().join("ledgers")],
        max_journal_size_mb: 1,
        journal_prealloc_size_mb: 1,
        journal_max_group_wait_ms: 2,
        journal_flush_when_queue_empty: true,
        ..Default::default()
    }
}

fn entry_payload(ledger_id: u64, entry_id: u64, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + body.len());
    payload.extend_from_slice(&ledger_id.to_be_bytes());
    payload.extend_from_slice(&entry_id.to_be_bytes());
    payload.extend_from_slice(body);
    payload
}

/// Appends an entry and returns a receiver for its completion
fn append_with_ack(
    journal: &Journal,
    ledger_id: u64,
    entry_id: u64,
    body: &[u8],
) -> mpsc::Receiver<(i32, u64, u64)> {
    let (tx, rx) = mpsc::channel();
    journal.append(
        entry_payload(ledger_id, entry_id, body),
        Box::new(move |code, ledger, entry, _| {
            let _ = tx.send((code, ledger, entry));
        }),
        Some(ledger_id),
    );
    rx
}

struct CollectingScanner {
    payloads: Vec<Vec<u8>>,
}

impl CollectingScanner {
    fn new() -> Self {
        Self {
            payloads: Vec::new(),
        }
    }
}

impl JournalScanner for CollectingScanner {
    fn process(&mut self, _version: u32, _offset: u64, payload: &[u8]) -> JournalResult<()> {
        self.payloads.push(payload.to_vec());
        Ok(())
    }
}

// =============================================================================
// INVARIANT DUR-1: No Acknowledged Write Is Ever Lost
// =============================================================================

/// DUR-1: every payload whose callback reported success is reproduced
/// verbatim by replay on a fresh instance.
#[test]
fn test_dur1_acknowledged_writes_survive_replay() {
    let dir = TempDir::new().unwrap();

    let written: Vec<Vec<u8>> = (0..10)
        .map(|i| entry_payload(3, i, format!("record-{}", i).as_bytes()))
        .collect();

    {
        let journal = Journal::new(test_config(&dir)).unwrap();
        journal.start().unwrap();

        let acks: Vec<_> = written
            .iter()
            .map(|payload| {
                let (tx, rx) = mpsc::channel();
                journal.append(
                    payload.clone(),
                    Box::new(move |code, _, _, _| {
                        let _ = tx.send(code);
                    }),
                    Some(3),
                );
                rx
            })
            .collect();
        for rx in acks {
            let code = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(code, rc::OK, "append was acknowledged");
        }
        journal.shutdown();
    }

    // fresh instance, as after a crash
    let journal = Journal::new(test_config(&dir)).unwrap();
    let mut scanner = CollectingScanner::new();
    journal.replay(&mut scanner).unwrap();

    assert_eq!(
        scanner.payloads, written,
        "DUR-1 violation: acknowledged writes were lost"
    );
}

/// DUR-1: the single-append case. One record, one flush, one sync; the
/// acknowledgment arrives promptly and the durable mark lands on a sector
/// boundary past the padded record.
#[test]
fn test_dur1_single_append_single_sync() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new(test_config(&dir)).unwrap();
    journal.start().unwrap();

    let rx = append_with_ack(&journal, 7, 0, &[0xAB; 16]);
    let (code, ledger_id, entry_id) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(code, rc::OK);
    assert_eq!(ledger_id, 7);
    assert_eq!(entry_id, 0);

    let mark = journal.last_log_mark();
    assert!(mark.log_id > 0);
    // header sector + one padded record = exactly two sectors
    assert_eq!(mark.offset, 1024);
    assert!(journal.metrics().force_writes_issued() >= 1);

    journal.shutdown();
}

// =============================================================================
// INVARIANT ORD-1: Per-Ledger Acknowledgment Ordering
// =============================================================================

/// ORD-1: callbacks sharing a context key fire in append order.
#[test]
fn test_ord1_same_ctx_callbacks_fire_in_append_order() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new(test_config(&dir)).unwrap();
    journal.start().unwrap();

    let (tx, rx) = mpsc::channel();
    for entry_id in 0..200u64 {
        let tx = tx.clone();
        journal.append(
            entry_payload(11, entry_id, b"ordered"),
            Box::new(move |code, _, entry, _| {
                let _ = tx.send((code, entry));
            }),
            Some(11),
        );
    }

    let mut seen = Vec::new();
    for _ in 0..200 {
        let (code, entry) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(code, rc::OK);
        seen.push(entry);
    }
    assert_eq!(seen, (0..200).collect::<Vec<_>>(), "ORD-1 violation");

    journal.shutdown();
}

/// ORD-1 across interleaved ledgers: each ledger's stream stays ordered
/// while ledgers interleave freely.
#[test]
fn test_ord1_interleaved_ledgers_each_stay_ordered() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new(test_config(&dir)).unwrap();
    journal.start().unwrap();

    let (tx, rx) = mpsc::channel();
    for entry_id in 0..50u64 {
        for ledger_id in [1u64, 2, 3, 4] {
            let tx = tx.clone();
            journal.append(
                entry_payload(ledger_id, entry_id, b"interleaved"),
                Box::new(move |code, ledger, entry, _| {
                    let _ = tx.send((code, ledger, entry));
                }),
                Some(ledger_id),
            );
        }
    }

    let mut per_ledger: std::collections::HashMap<u64, Vec<u64>> = Default::default();
    for _ in 0..200 {
        let (code, ledger, entry) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(code, rc::OK);
        per_ledger.entry(ledger).or_default().push(entry);
    }
    for ledger_id in [1u64, 2, 3, 4] {
        assert_eq!(
            per_ledger[&ledger_id],
            (0..50).collect::<Vec<_>>(),
            "ORD-1 violation on ledger {}",
            ledger_id
        );
    }

    journal.shutdown();
}

// =============================================================================
// INVARIANT MARK-1: The Durable Mark Only Advances
// =============================================================================

/// MARK-1: marks observed while the pipeline runs form a non-decreasing
/// sequence under the (log_id, offset) order.
#[test]
fn test_mark1_durable_mark_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new(test_config(&dir)).unwrap();
    journal.start().unwrap();

    let mut observed = Vec::new();
    let mut acks = Vec::new();
    for i in 0..100u64 {
        acks.push(append_with_ack(&journal, 5, i, &[0u8; 64]));
        observed.push(journal.last_log_mark());
    }
    for rx in acks {
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().0, rc::OK);
    }
    observed.push(journal.last_log_mark());

    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "MARK-1 violation: {} > {}", pair[0], pair[1]);
    }

    journal.shutdown();
}

// =============================================================================
// Group Commit
// =============================================================================

/// Adaptive group force-writes amortize the sync cost: a burst of appends
/// completes with far fewer syncs than appends.
#[test]
fn test_group_commit_amortizes_syncs() {
    let dir = TempDir::new().unwrap();
    let config = JournalConfig {
        journal_max_group_wait_ms: 5,
        journal_flush_when_queue_empty: false,
        journal_adaptive_group_writes: true,
        ..test_config(&dir)
    };
    let journal = Journal::new(config).unwrap();
    journal.start().unwrap();

    let (tx, rx) = mpsc::channel();
    for entry_id in 0..1000u64 {
        let tx = tx.clone();
        journal.append(
            entry_payload(entry_id % 4, entry_id, &[0x5A; 112]),
            Box::new(move |code, _, _, _| {
                let _ = tx.send(code);
            }),
            Some(entry_id % 4),
        );
    }
    for _ in 0..1000 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), rc::OK);
    }

    let syncs = journal.metrics().force_writes_issued();
    assert!(
        syncs < 250,
        "expected group commit to amortize syncs, saw {} for 1000 appends",
        syncs
    );

    journal.shutdown();
}

/// The group-on-timeout latch takes two steps: an aged batch head arms it,
/// and the next young entry fires the flush. Under a steady trickle of
/// appends the latch, not the thresholds, is what flushes.
#[test]
fn test_group_on_timeout_latch_flushes_aged_batches() {
    let dir = TempDir::new().unwrap();
    let config = JournalConfig {
        journal_max_group_wait_ms: 50,
        journal_flush_when_queue_empty: false,
        // keep the byte threshold out of the way so only the latch flushes
        journal_buffered_writes_threshold: 64 * 1024 * 1024,
        ..test_config(&dir)
    };
    let journal = Journal::new(config).unwrap();
    journal.start().unwrap();

    let (tx, rx) = mpsc::channel();
    let total = 60u64;
    for entry_id in 0..total {
        let tx = tx.clone();
        journal.append(
            entry_payload(9, entry_id, b"trickle"),
            Box::new(move |code, _, entry, _| {
                let _ = tx.send((code, entry));
            }),
            Some(9),
        );
        thread::sleep(Duration::from_millis(10));
    }

    let mut seen = Vec::new();
    for _ in 0..total {
        let (code, entry) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, rc::OK);
        seen.push(entry);
    }
    assert_eq!(seen, (0..total).collect::<Vec<_>>());
    assert!(
        journal.metrics().flush_max_wait() >= 1,
        "latch never fired under a steady trickle"
    );

    journal.shutdown();
}

/// Outstanding-bytes threshold forces a flush mid-burst.
#[test]
fn test_buffered_writes_threshold_triggers_flush() {
    let dir = TempDir::new().unwrap();
    let config = JournalConfig {
        journal_max_group_wait_ms: 1000,
        journal_flush_when_queue_empty: false,
        journal_buffered_writes_threshold: 4 * 1024,
        ..test_config(&dir)
    };
    let journal = Journal::new(config).unwrap();
    journal.start().unwrap();

    let (tx, rx) = mpsc::channel();
    for entry_id in 0..64u64 {
        let tx = tx.clone();
        journal.append(
            entry_payload(2, entry_id, &[0xC3; 1008]),
            Box::new(move |code, _, _, _| {
                let _ = tx.send(code);
            }),
            Some(2),
        );
    }
    for _ in 0..64 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), rc::OK);
    }
    assert!(
        journal.metrics().flush_max_outstanding() >= 1,
        "byte threshold never tripped"
    );

    journal.shutdown();
}

// =============================================================================
// Rollover
// =============================================================================

/// A stream crossing a file boundary replays in append order, and the
/// journal directory holds files with ascending ids.
#[test]
fn test_rollover_preserves_sequence() {
    let dir = TempDir::new().unwrap();
    let total = 1500u64;

    {
        let journal = Journal::new(test_config(&dir)).unwrap();
        journal.start().unwrap();

        let (tx, rx) = mpsc::channel();
        for entry_id in 0..total {
            let tx = tx.clone();
            journal.append(
                entry_payload(1, entry_id, &[0x77; 1008]),
                Box::new(move |code, _, _, _| {
                    let _ = tx.send(code);
                }),
                Some(1),
            );
        }
        for _ in 0..total {
            assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), rc::OK);
        }
        journal.shutdown();
    }

    let config = test_config(&dir);
    let ids = list_journal_ids(&config.journal_dir, |_| true).unwrap();
    assert!(
        ids.len() >= 2,
        "1.5 MB of records over a 1 MB cap must roll at least once, saw {:?}",
        ids
    );

    let journal = Journal::new(config).unwrap();
    let mut scanner = CollectingScanner::new();
    journal.replay(&mut scanner).unwrap();

    assert_eq!(scanner.payloads.len(), total as usize);
    for (i, payload) in scanner.payloads.iter().enumerate() {
        let entry_id = u64::from_be_bytes(payload[8..16].try_into().unwrap());
        assert_eq!(entry_id, i as u64, "rollover reordered the stream");
    }
}

// =============================================================================
// Monitoring Surface
// =============================================================================

/// The queue length gauge tracks submissions and drains.
#[test]
fn test_journal_queue_length_reflects_backlog() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::new(test_config(&dir)).unwrap();

    for entry_id in 0..8u64 {
        journal.append(
            entry_payload(1, entry_id, b"queued"),
            Box::new(|_, _, _, _| {}),
            Some(1),
        );
    }
    assert_eq!(journal.journal_queue_length(), 8);

    journal.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while journal.journal_queue_length() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(journal.journal_queue_length(), 0);

    journal.shutdown();
}
