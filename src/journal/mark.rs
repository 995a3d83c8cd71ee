//! Log marks
//!
//! A `LogMark` names a byte position in the journal stream as a
//! `(log_id, offset)` pair, ordered lexicographically. The `LastLogMark` is
//! the highest durable position; it is advanced only by the force-write
//! stage (MARK-1) and persisted to every writable ledger directory on
//! checkpoint per JOURNAL.md §6.
//!
//! On disk a mark is 16 bytes big-endian: log id then offset. The zero mark
//! means "nothing yet persisted" and makes replay start from the first
//! journal file.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::journal::errors::{JournalError, JournalResult};
use crate::observability::Logger;

/// Name of the mark file inside each ledger directory
pub const LAST_MARK_FILE: &str = "lastMark";

/// Serialized size of a mark
pub const LOG_MARK_SIZE: usize = 16;

/// A position in the journal stream.
///
/// The derived ordering is lexicographic on `(log_id, offset)`, which is the
/// total order every comparison in this subsystem relies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogMark {
    /// Journal file id
    pub log_id: u64,
    /// Byte offset within that file
    pub offset: u64,
}

impl LogMark {
    /// Create a mark at the given position
    pub fn new(log_id: u64, offset: u64) -> Self {
        Self { log_id, offset }
    }

    /// The zero mark: nothing persisted yet
    pub fn zero() -> Self {
        Self::default()
    }

    /// Serialize to 16 bytes big-endian
    pub fn to_bytes(&self) -> [u8; LOG_MARK_SIZE] {
        let mut buf = [0u8; LOG_MARK_SIZE];
        buf[0..8].copy_from_slice(&self.log_id.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    /// Deserialize from 16 bytes big-endian
    pub fn from_bytes(buf: &[u8; LOG_MARK_SIZE]) -> Self {
        let log_id = u64::from_be_bytes(buf[0..8].try_into().expect("8 bytes"));
        let offset = u64::from_be_bytes(buf[8..16].try_into().expect("8 bytes"));
        Self { log_id, offset }
    }
}

impl std::fmt::Display for LogMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.log_id, self.offset)
    }
}

/// The highest durable position of the journal.
///
/// Holds the live mark plus the ledger-directory list it persists to. The
/// force-write stage owns all writes; checkpointers only ever read immutable
/// snapshots taken with [`LastLogMark::mark_log`].
#[derive(Debug)]
pub struct LastLogMark {
    cur_mark: Mutex<LogMark>,
    ledger_dirs: Vec<PathBuf>,
}

impl LastLogMark {
    /// Create a zero mark persisting to the given ledger directories
    pub fn new(ledger_dirs: Vec<PathBuf>) -> Self {
        Self {
            cur_mark: Mutex::new(LogMark::zero()),
            ledger_dirs,
        }
    }

    /// Current mark value
    pub fn cur_mark(&self) -> LogMark {
        *self.cur_mark.lock().expect("mark lock poisoned")
    }

    /// Advance the live mark. Called from the force-write stage after a
    /// successful sync, and from replay as records are re-read.
    pub fn set_cur_mark(&self, log_id: u64, offset: u64) {
        let mut mark = self.cur_mark.lock().expect("mark lock poisoned");
        *mark = LogMark::new(log_id, offset);
    }

    /// Snapshot the live mark as a checkpoint candidate
    pub fn mark_log(&self) -> LogMark {
        self.cur_mark()
    }

    /// Recover the mark at startup: the maximum across all readable
    /// `lastMark` files. Absent, short or unreadable files read as the zero
    /// mark, which is expected on a first boot.
    pub fn read_log(&self) {
        let mut best = self.cur_mark();
        for dir in &self.ledger_dirs {
            let path = dir.join(LAST_MARK_FILE);
            match read_mark_file(&path) {
                Ok(mark) => {
                    if mark > best {
                        best = mark;
                    }
                }
                Err(e) => {
                    Logger::warn(
                        "LAST_MARK_READ_FAILED",
                        &[("path", &path.display().to_string()), ("error", &e.to_string())],
                    );
                }
            }
        }
        self.set_cur_mark(best.log_id, best.offset);
    }

    /// The ledger directories this mark persists to
    pub fn ledger_dirs(&self) -> &[PathBuf] {
        &self.ledger_dirs
    }
}

/// Persist a snapshot mark to every writable ledger directory.
///
/// Records before the snapshot have been persisted by their consumers, so a
/// stale mark is safe: it only widens replay. Individual directory failures
/// are therefore logged and tolerated; only an empty writable set is an
/// error.
pub fn persist_mark(ledger_dirs: &[PathBuf], snapshot: LogMark) -> JournalResult<()> {
    let buf = snapshot.to_bytes();
    Logger::debug("LAST_MARK_ROLL", &[("mark", &snapshot.to_string())]);

    let writable: Vec<&PathBuf> = ledger_dirs.iter().filter(|d| d.is_dir()).collect();
    if writable.is_empty() {
        return Err(JournalError::no_writable_ledger_dir());
    }

    for dir in writable {
        let path = dir.join(LAST_MARK_FILE);
        if let Err(e) = write_mark_file(&path, &buf) {
            Logger::error(
                "LAST_MARK_WRITE_FAILED",
                &[("path", &path.display().to_string()), ("error", &e.to_string())],
            );
        }
    }
    Ok(())
}

fn write_mark_file(path: &Path, buf: &[u8; LOG_MARK_SIZE]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(buf)?;
    // The mark must be on disk before the checkpoint is reported complete
    file.sync_all()?;
    Ok(())
}

fn read_mark_file(path: &Path) -> std::io::Result<LogMark> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; LOG_MARK_SIZE];
    file.read_exact(&mut buf)?;
    Ok(LogMark::from_bytes(&buf))
}
