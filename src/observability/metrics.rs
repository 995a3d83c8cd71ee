//! Journal metrics registry
//!
//! Per OBSERVABILITY.md:
//! - Counters only (no gauges, no histograms)
//! - Monotonic increase, reset only on process start
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

/// Flat registry of journal pipeline counters.
///
/// Queue depths are derived as `enqueued - dequeued` so every field stays a
/// monotonic counter.
#[derive(Debug, Default)]
pub struct JournalMetrics {
    /// Entries enqueued on the write queue
    entries_enqueued: AtomicU64,
    /// Entries taken off the write queue by the writer stage
    entries_dequeued: AtomicU64,
    /// Bytes written into journal files (length prefixes included)
    bytes_written: AtomicU64,
    /// Requests enqueued on the force-write queue (markers included)
    force_write_enqueued: AtomicU64,
    /// Requests taken off the force-write queue
    force_write_dequeued: AtomicU64,
    /// Sync calls actually issued by the force-write stage
    force_writes_issued: AtomicU64,
    /// Flushes caused by the group-on-timeout latch
    flush_max_wait: AtomicU64,
    /// Flushes caused by outstanding bytes or entries
    flush_max_outstanding: AtomicU64,
    /// Flushes caused by an empty write queue
    flush_empty_queue: AtomicU64,
    /// Journal files opened
    journal_rolls: AtomicU64,
}

impl JournalMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_entries_enqueued(&self) {
        self.entries_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_entries_dequeued(&self) {
        self.entries_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_force_write_enqueued(&self) {
        self.force_write_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_force_write_dequeued(&self) {
        self.force_write_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_force_writes_issued(&self) {
        self.force_writes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_flush_max_wait(&self) {
        self.flush_max_wait.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_flush_max_outstanding(&self) {
        self.flush_max_outstanding.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_flush_empty_queue(&self) {
        self.flush_empty_queue.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_journal_rolls(&self) {
        self.journal_rolls.fetch_add(1, Ordering::Relaxed);
    }

    /// Current write-queue depth
    pub fn write_queue_depth(&self) -> u64 {
        self.entries_enqueued
            .load(Ordering::Relaxed)
            .saturating_sub(self.entries_dequeued.load(Ordering::Relaxed))
    }

    /// Current force-write-queue depth
    pub fn force_write_queue_depth(&self) -> u64 {
        self.force_write_enqueued
            .load(Ordering::Relaxed)
            .saturating_sub(self.force_write_dequeued.load(Ordering::Relaxed))
    }

    /// Sync calls issued so far
    pub fn force_writes_issued(&self) -> u64 {
        self.force_writes_issued.load(Ordering::Relaxed)
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Flushes caused by the group-on-timeout latch
    pub fn flush_max_wait(&self) -> u64 {
        self.flush_max_wait.load(Ordering::Relaxed)
    }

    /// Flushes caused by outstanding bytes or entries
    pub fn flush_max_outstanding(&self) -> u64 {
        self.flush_max_outstanding.load(Ordering::Relaxed)
    }

    /// Flushes caused by an empty write queue
    pub fn flush_empty_queue(&self) -> u64 {
        self.flush_empty_queue.load(Ordering::Relaxed)
    }

    /// Journal files opened so far
    pub fn journal_rolls(&self) -> u64 {
        self.journal_rolls.load(Ordering::Relaxed)
    }
}
