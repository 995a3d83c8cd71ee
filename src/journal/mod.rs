//! Write-ahead journal subsystem
//!
//! The durability boundary of the node. Appends flow through a three-stage
//! pipeline per JOURNAL.md §2: submit (no I/O), the single writer thread
//! (buffered record packing, flush policy, file rolling), and the single
//! force-write thread (group commit, mark advance, ordered callbacks).
//! Replay walks the journal files at startup and re-presents every record
//! past the recovered mark.
//!
//! # Invariants Enforced
//!
//! - DUR-1: fsync before acknowledgment
//! - ORD-1: per-ledger acknowledgment order equals append order
//! - MARK-1: the last log mark advances monotonically
//! - REC-1: torn tails replay cleanly
//! - REC-2: halt on corrupt records and missing recovery logs
//! - GC-1: compaction keeps the retention window below the marked journal

mod channel;
mod checkpoint;
mod errors;
mod executor;
mod force_write;
mod mark;
mod reader;
mod writer;

pub use channel::{
    journal_file_name, list_journal_ids, open_journal_for_read, write_padding_bytes,
    BufferedChannel, JournalFile, FORMAT_V5, HEADER_SIZE, PADDING_MASK, SECTOR_SIZE,
};
pub use checkpoint::Checkpoint;
pub use errors::{JournalError, JournalErrorCode, JournalResult, Severity};
pub use executor::OrderedExecutor;
pub use mark::{persist_mark, LastLogMark, LogMark, LAST_MARK_FILE, LOG_MARK_SIZE};
pub use reader::JournalScanner;
pub use writer::{rc, Journal, WriteCallback};
