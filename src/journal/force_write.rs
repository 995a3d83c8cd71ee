//! Force-write stage
//!
//! The second half of the pipeline per JOURNAL.md §2: drains flushed byte
//! ranges off the force-write queue, makes them durable, advances the last
//! log mark (the only place it advances, MARK-1), and dispatches write
//! callbacks through the ordered executor (DUR-1, ORD-1).
//!
//! With adaptive grouping a marker request is posted behind each real
//! request before its sync is issued. Everything queued ahead of the marker
//! was covered by that sync and completes without one of its own; the marker
//! (or a closing request) re-arms the sync. Under load this amortizes to one
//! fsync per device stall.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::journal::channel::JournalFile;
use crate::journal::writer::{rc, JournalShared, QueueEntry, WriterMsg};
use crate::observability::Logger;

/// Messages on the force-write queue
pub(crate) enum ForceMsg {
    Request(ForceWriteRequest),
    /// Wakes a blocked consumer so it can observe the running flag
    Wake,
}

/// A flushed byte range awaiting durability.
///
/// Owns the waiters whose callbacks fire once the range is on stable
/// storage, and shares the journal file with the writer stage. When
/// `should_close` is set this request is the file's last and the force-write
/// stage is responsible for retiring it; the descriptor closes when the last
/// owner lets go, so close is idempotent by construction.
pub(crate) struct ForceWriteRequest {
    file: Arc<JournalFile>,
    log_id: u64,
    start_flush_position: u64,
    end_flush_position: u64,
    waiters: Vec<QueueEntry>,
    should_close: bool,
    is_marker: bool,
}

impl ForceWriteRequest {
    pub(crate) fn new(
        file: Arc<JournalFile>,
        log_id: u64,
        start_flush_position: u64,
        end_flush_position: u64,
        waiters: Vec<QueueEntry>,
        should_close: bool,
    ) -> Self {
        Self {
            file,
            log_id,
            start_flush_position,
            end_flush_position,
            waiters,
            should_close,
            is_marker: false,
        }
    }

    /// A sync boundary: carries the file so the descriptor outlives every
    /// request the previous sync covered, but no range and no waiters.
    fn marker(file: Arc<JournalFile>) -> Self {
        Self {
            file,
            log_id: 0,
            start_flush_position: 0,
            end_flush_position: 0,
            waiters: Vec::new(),
            should_close: false,
            is_marker: true,
        }
    }

    /// Make this request durable and complete its waiters.
    ///
    /// Returns the number of waiters completed. A sync failure fails the
    /// waiters with an I/O result code and propagates; durability can no
    /// longer be promised, so the caller takes the pipeline down.
    fn process(self, shared: &JournalShared, should_force_write: bool) -> io::Result<usize> {
        if self.is_marker {
            return Ok(0);
        }

        if should_force_write {
            let sync_result = if shared.config.journal_adaptive_group_writes {
                self.file.force_write(false)
            } else {
                self.file.sync_range(
                    self.start_flush_position,
                    self.end_flush_position - self.start_flush_position,
                )
            };
            if let Err(e) = sync_result {
                for entry in self.waiters {
                    dispatch(shared, entry, rc::IO_ERROR);
                }
                return Err(e);
            }
            shared.metrics.increment_force_writes_issued();
            if shared.config.journal_remove_pages_from_cache {
                self.file.remove_from_page_cache(
                    self.start_flush_position,
                    self.end_flush_position - self.start_flush_position,
                );
            }
        }

        shared
            .last_log_mark
            .set_cur_mark(self.log_id, self.end_flush_position);

        let count = self.waiters.len();
        for entry in self.waiters {
            dispatch(shared, entry, rc::OK);
        }

        if self.should_close {
            Logger::info(
                "JOURNAL_FILE_RETIRED",
                &[("log_id", &format!("{:x}", self.log_id))],
            );
        }
        Ok(count)
    }
}

fn dispatch(shared: &JournalShared, entry: QueueEntry, result_code: i32) {
    let ctx = entry.ctx;
    match ctx {
        Some(key) => shared
            .cb_executor
            .submit_ordered(key, move || entry.complete(result_code)),
        None => shared.cb_executor.submit(move || entry.complete(result_code)),
    }
}

/// Force-write thread body.
pub(crate) fn force_write_loop(shared: &Arc<JournalShared>) {
    Logger::info("FORCE_WRITE_STARTED", &[]);
    let group_writes = shared.config.journal_adaptive_group_writes;
    let mut should_force_write = true;
    let mut requests_in_last_force_write: usize = 0;

    while shared.force_running.load(Ordering::Acquire) {
        let req = match shared.force_rx.recv() {
            Ok(ForceMsg::Request(req)) => req,
            Ok(ForceMsg::Wake) => continue,
            Err(_) => break,
        };
        shared.metrics.increment_force_write_dequeued();

        if !req.is_marker && should_force_write {
            if group_writes {
                // every request already queued rides on the sync below; the
                // marker bounds the free riders
                shared.metrics.increment_force_write_enqueued();
                let _ = shared
                    .force_tx
                    .send(ForceMsg::Request(ForceWriteRequest::marker(Arc::clone(
                        &req.file,
                    ))));
            }
            if requests_in_last_force_write > 0 {
                Logger::debug(
                    "FORCE_WRITE_GROUP_SIZE",
                    &[("requests", &requests_in_last_force_write.to_string())],
                );
                requests_in_last_force_write = 0;
            }
        }

        let is_marker = req.is_marker;
        let should_close = req.should_close;
        match req.process(shared, should_force_write) {
            Ok(count) => requests_in_last_force_write += count,
            Err(e) => {
                Logger::fatal("FORCE_WRITE_IO_FAILURE", &[("error", &e.to_string())]);
                shared.force_running.store(false, Ordering::Release);
                shared.running.store(false, Ordering::Release);
                break;
            }
        }

        // a marker or a closing request re-arms the sync; anything else under
        // grouping was covered and the next request can skip it
        should_force_write = !(group_writes && !is_marker && !should_close);
    }

    // whatever made this stage exit, the writer must not sit blocked waiting
    // for acknowledgments that will never come
    let _ = shared.write_tx.send(WriterMsg::Wake);
    Logger::info("FORCE_WRITE_EXITED", &[]);
}
