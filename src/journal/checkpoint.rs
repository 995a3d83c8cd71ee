//! Checkpoints and journal garbage collection
//!
//! A checkpoint is an immutable snapshot of the durable mark plus the
//! protocol for retiring journal data below it. The external checkpointer
//! flushes its own state between `request_checkpoint` and `completed`; only
//! then is the mark persisted, because records below a persisted mark are
//! never replayed again.
//!
//! Compaction keeps `max_backup_journals` files below the marked journal
//! (GC-1); delete failures cost disk space, not correctness, and are only
//! logged.

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

use crate::journal::channel::{journal_file_name, list_journal_ids};
use crate::journal::errors::{JournalError, JournalResult};
use crate::journal::mark::{persist_mark, LogMark};
use crate::observability::Logger;

/// An immutable checkpoint candidate.
///
/// Carries the configuration it needs by value — journal directory, ledger
/// directories, retention count — so completing a checkpoint never reaches
/// back into the live pipeline.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    mark: LogMark,
    journal_dir: PathBuf,
    ledger_dirs: Vec<PathBuf>,
    max_backup_journals: usize,
}

impl Checkpoint {
    pub(crate) fn new(
        mark: LogMark,
        journal_dir: PathBuf,
        ledger_dirs: Vec<PathBuf>,
        max_backup_journals: usize,
    ) -> Self {
        Self {
            mark,
            journal_dir,
            ledger_dirs,
            max_backup_journals,
        }
    }

    /// The snapshotted mark
    pub fn mark(&self) -> LogMark {
        self.mark
    }

    /// Report the checkpoint finished: persist the mark, and with `compact`
    /// garbage-collect journal files below it beyond the retention count.
    pub fn completed(&self, compact: bool) -> JournalResult<()> {
        persist_mark(&self.ledger_dirs, self.mark)?;
        if !compact {
            return Ok(());
        }

        let logs = list_journal_ids(&self.journal_dir, |id| id < self.mark.log_id)
            .map_err(|e| JournalError::io("Failed to list journal directory", e))?;
        if logs.len() < self.max_backup_journals {
            return Ok(());
        }

        let delete_count = logs.len() - self.max_backup_journals;
        for &id in &logs[..delete_count] {
            // the filter already bounds ids by the mark; keep the guard
            // anyway, deleting a live journal is unrecoverable
            if id >= self.mark.log_id {
                continue;
            }
            let path = self.journal_dir.join(journal_file_name(id));
            match fs::remove_file(&path) {
                Ok(()) => {
                    Logger::info(
                        "JOURNAL_GC",
                        &[("log_id", &format!("{:x}", id))],
                    );
                }
                Err(e) => {
                    Logger::warn(
                        "JOURNAL_GC_DELETE_FAILED",
                        &[
                            ("path", &path.display().to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Checkpoint {
    fn eq(&self, other: &Self) -> bool {
        self.mark == other.mark
    }
}

impl Eq for Checkpoint {}

impl PartialOrd for Checkpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Checkpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mark.cmp(&other.mark)
    }
}
