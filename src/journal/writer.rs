//! Journal facade and writer stage
//!
//! `Journal` is the public handle of the subsystem: `append` enqueues work
//! and returns without touching the disk; the single writer thread owns the
//! open journal file, packs records through the buffered channel, decides
//! flush points per JOURNAL.md §4, and hands flushed ranges to the
//! force-write stage. Acknowledgment always waits for the sync (DUR-1).
//!
//! The writer also rolls journal files: once the flushed position passes
//! `max_journal_size` the file travels to the force-write stage with its
//! last request and a fresh file is minted with a strictly larger id.

use std::fs;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::JournalConfig;
use crate::journal::channel::{
    list_journal_ids, write_padding_bytes, BufferedChannel,
};
use crate::journal::checkpoint::Checkpoint;
use crate::journal::errors::{JournalError, JournalResult};
use crate::journal::executor::OrderedExecutor;
use crate::journal::force_write::{force_write_loop, ForceMsg, ForceWriteRequest};
use crate::journal::mark::{LastLogMark, LogMark};
use crate::observability::{JournalMetrics, Logger};

/// Result codes delivered to write callbacks
pub mod rc {
    /// The record is on stable storage
    pub const OK: i32 = 0;
    /// The pipeline failed before the record became durable
    pub const IO_ERROR: i32 = -101;
}

/// Write completion continuation.
///
/// Invoked exactly once per `append`, from the ordered callback executor,
/// with `(result_code, ledger_id, entry_id, ctx)`.
pub type WriteCallback = Box<dyn FnOnce(i32, u64, u64, Option<u64>) + Send + 'static>;

/// One queued entry write, flowing forward through the pipeline
pub(crate) struct QueueEntry {
    pub(crate) payload: Vec<u8>,
    pub(crate) ledger_id: u64,
    pub(crate) entry_id: u64,
    callback: WriteCallback,
    pub(crate) ctx: Option<u64>,
    pub(crate) enqueue_time: Instant,
}

impl QueueEntry {
    /// Fire the completion exactly once
    pub(crate) fn complete(self, result_code: i32) {
        Logger::debug(
            "JOURNAL_ACK",
            &[
                ("ledger_id", &self.ledger_id.to_string()),
                ("entry_id", &self.entry_id.to_string()),
            ],
        );
        (self.callback)(result_code, self.ledger_id, self.entry_id, self.ctx);
    }
}

/// Messages on the write queue
pub(crate) enum WriterMsg {
    Entry(QueueEntry),
    /// Wakes a blocked consumer so it can observe the running flag
    Wake,
}

/// State shared by the submit side, the writer stage and the force-write
/// stage. The two queues are the only hand-off points; the last log mark is
/// written solely by the force-write stage.
pub(crate) struct JournalShared {
    pub(crate) config: JournalConfig,
    pub(crate) write_tx: Sender<WriterMsg>,
    pub(crate) write_rx: Receiver<WriterMsg>,
    pub(crate) force_tx: Sender<ForceMsg>,
    pub(crate) force_rx: Receiver<ForceMsg>,
    pub(crate) last_log_mark: LastLogMark,
    pub(crate) running: AtomicBool,
    pub(crate) force_running: AtomicBool,
    pub(crate) metrics: Arc<JournalMetrics>,
    pub(crate) cb_executor: OrderedExecutor,
}

/// The write-ahead journal.
pub struct Journal {
    pub(crate) shared: Arc<JournalShared>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    force_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_done: AtomicBool,
}

impl Journal {
    /// Open the journal: create missing directories and recover the last
    /// log mark. No thread runs until [`Journal::start`]; replay happens in
    /// between.
    pub fn new(config: JournalConfig) -> JournalResult<Self> {
        fs::create_dir_all(&config.journal_dir).map_err(|e| {
            JournalError::io(
                format!(
                    "Failed to create journal directory: {}",
                    config.journal_dir.display()
                ),
                e,
            )
        })?;
        for dir in &config.ledger_dirs {
            fs::create_dir_all(dir).map_err(|e| {
                JournalError::io(
                    format!("Failed to create ledger directory: {}", dir.display()),
                    e,
                )
            })?;
        }

        let (write_tx, write_rx) = channel::unbounded();
        let (force_tx, force_rx) = channel::unbounded();
        let last_log_mark = LastLogMark::new(config.ledger_dirs.clone());
        last_log_mark.read_log();
        Logger::info(
            "JOURNAL_OPENED",
            &[
                ("journal_dir", &config.journal_dir.display().to_string()),
                ("last_mark", &last_log_mark.cur_mark().to_string()),
            ],
        );

        let cb_executor =
            OrderedExecutor::new("journal-callback", config.num_journal_callback_threads);

        Ok(Self {
            shared: Arc::new(JournalShared {
                config,
                write_tx,
                write_rx,
                force_tx,
                force_rx,
                last_log_mark,
                running: AtomicBool::new(true),
                force_running: AtomicBool::new(true),
                metrics: Arc::new(JournalMetrics::new()),
                cb_executor,
            }),
            writer_handle: Mutex::new(None),
            force_handle: Mutex::new(None),
            shutdown_done: AtomicBool::new(false),
        })
    }

    /// Start the writer and force-write threads. Called once, after replay.
    pub fn start(&self) -> JournalResult<()> {
        let mut writer_handle = self.writer_handle.lock().expect("writer handle poisoned");
        if writer_handle.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let force = thread::Builder::new()
            .name("journal-force-write".to_string())
            .spawn(move || force_write_loop(&shared))
            .map_err(|e| JournalError::io("Failed to spawn force-write thread", e))?;
        *self.force_handle.lock().expect("force handle poisoned") = Some(force);

        let shared = Arc::clone(&self.shared);
        let writer = thread::Builder::new()
            .name("journal-writer".to_string())
            .spawn(move || writer_loop(&shared))
            .map_err(|e| JournalError::io("Failed to spawn writer thread", e))?;
        *writer_handle = Some(writer);
        Ok(())
    }

    /// Record an entry write.
    ///
    /// The first 16 payload bytes are the big-endian `(ledger_id, entry_id)`
    /// header; a shorter payload is a programmer error. Returns immediately;
    /// `callback` fires from the executor once the record is durable (or the
    /// pipeline failed), serialized with other callbacks sharing `ctx`.
    pub fn append(&self, payload: Vec<u8>, callback: WriteCallback, ctx: Option<u64>) {
        assert!(
            payload.len() >= 16,
            "journal payloads carry a 16-byte (ledger_id, entry_id) header"
        );
        let ledger_id = u64::from_be_bytes(payload[0..8].try_into().expect("8 bytes"));
        let entry_id = u64::from_be_bytes(payload[8..16].try_into().expect("8 bytes"));

        self.shared.metrics.increment_entries_enqueued();
        let _ = self.shared.write_tx.send(WriterMsg::Entry(QueueEntry {
            payload,
            ledger_id,
            entry_id,
            callback,
            ctx,
            enqueue_time: Instant::now(),
        }));
    }

    /// Entries waiting for the writer stage
    pub fn journal_queue_length(&self) -> usize {
        self.shared.metrics.write_queue_depth() as usize
    }

    /// Snapshot the durable mark as a checkpoint candidate
    pub fn request_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.shared.last_log_mark.mark_log(),
            self.shared.config.journal_dir.clone(),
            self.shared.config.ledger_dirs.clone(),
            self.shared.config.max_backup_journals,
        )
    }

    /// The current durable mark
    pub fn last_log_mark(&self) -> LogMark {
        self.shared.last_log_mark.cur_mark()
    }

    /// Pipeline counters
    pub fn metrics(&self) -> Arc<JournalMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Stop the pipeline: force-write stage first, then the callback
    /// executor with a bounded grace period, then the writer. Entries still
    /// queued when this is called have their callbacks dropped; callers
    /// quiesce before shutting down.
    pub fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::AcqRel) {
            return;
        }
        Logger::info("JOURNAL_SHUTDOWN", &[]);

        self.shared.force_running.store(false, Ordering::Release);
        let _ = self.shared.force_tx.send(ForceMsg::Wake);
        if let Some(handle) = self.force_handle.lock().expect("force handle poisoned").take() {
            let _ = handle.join();
        }

        self.shared.cb_executor.shutdown(Duration::from_secs(5));

        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.write_tx.send(WriterMsg::Wake);
        if let Some(handle) = self.writer_handle.lock().expect("writer handle poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Writer thread body: the single owner of the open journal file.
pub(crate) fn writer_loop(shared: &Arc<JournalShared>) {
    Logger::info("JOURNAL_WRITER_STARTED", &[]);
    let config = &shared.config;
    let max_journal_size = config.max_journal_size();
    let prealloc_size = config.journal_prealloc_size();
    let write_buffer_size = config.journal_write_buffer_size();
    let max_wait_ms = config.journal_max_group_wait_ms;
    let max_wait = config.max_group_wait();
    let entries_threshold = config.journal_buffered_entries_threshold;
    let bytes_threshold = config.journal_buffered_writes_threshold;
    let flush_when_queue_empty = config.flush_when_queue_empty();

    let existing = match list_journal_ids(&config.journal_dir, |_| true) {
        Ok(ids) => ids,
        Err(e) => {
            Logger::fatal("JOURNAL_DIR_LIST_FAILED", &[("error", &e.to_string())]);
            shared.running.store(false, Ordering::Release);
            return;
        }
    };
    // strictly monotonic ids even across backward clock jumps: the wall
    // clock only ever raises the floor
    let wall_clock_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut log_id = existing
        .last()
        .copied()
        .unwrap_or(0)
        .max(wall_clock_millis);

    let mut chan: Option<BufferedChannel> = None;
    let mut to_flush: Vec<QueueEntry> = Vec::new();
    let mut last_flush_position: u64 = 0;
    let mut group_when_timeout = false;
    let mut qe: Option<QueueEntry> = None;

    loop {
        if chan.is_none() {
            log_id += 1;
            match BufferedChannel::create(
                &config.journal_dir,
                log_id,
                prealloc_size,
                write_buffer_size,
            ) {
                Ok(bc) => {
                    Logger::info(
                        "JOURNAL_FILE_CREATED",
                        &[("log_id", &format!("{:x}", log_id))],
                    );
                    shared.metrics.increment_journal_rolls();
                    last_flush_position = bc.position();
                    chan = Some(bc);
                }
                Err(e) => {
                    Logger::fatal(
                        "JOURNAL_FILE_CREATE_FAILED",
                        &[
                            ("log_id", &format!("{:x}", log_id)),
                            ("error", &e.to_string()),
                        ],
                    );
                    shared.running.store(false, Ordering::Release);
                    break;
                }
            }
        }

        if qe.is_none() {
            if to_flush.is_empty() {
                match shared.write_rx.recv() {
                    Ok(WriterMsg::Entry(entry)) => qe = Some(entry),
                    Ok(WriterMsg::Wake) | Err(_) => {}
                }
            } else {
                let oldest_age = to_flush
                    .first()
                    .map(|e| e.enqueue_time.elapsed())
                    .unwrap_or_default();
                let poll_wait = if flush_when_queue_empty {
                    Duration::ZERO
                } else {
                    max_wait.saturating_sub(oldest_age)
                };
                qe = match shared.write_rx.recv_timeout(poll_wait) {
                    Ok(WriterMsg::Entry(entry)) => Some(entry),
                    Ok(WriterMsg::Wake)
                    | Err(RecvTimeoutError::Timeout)
                    | Err(RecvTimeoutError::Disconnected) => None,
                };

                let mut should_flush = false;
                let oldest_age = to_flush
                    .first()
                    .map(|e| e.enqueue_time.elapsed())
                    .unwrap_or_default();
                let position = chan.as_ref().map(|bc| bc.position()).unwrap_or(0);
                if max_wait_ms > 0 && !group_when_timeout && oldest_age > max_wait {
                    // the head of the batch timed out; look one poll further
                    // before flushing, a slow sync usually aged a whole run
                    // of entries that should group into one flush
                    group_when_timeout = true;
                } else if max_wait_ms > 0
                    && group_when_timeout
                    && qe
                        .as_ref()
                        .map_or(false, |e| e.enqueue_time.elapsed() < max_wait)
                {
                    group_when_timeout = false;
                    should_flush = true;
                    shared.metrics.increment_flush_max_wait();
                } else if qe.is_some()
                    && ((entries_threshold > 0 && to_flush.len() as u64 > entries_threshold)
                        || (position > last_flush_position + bytes_threshold))
                {
                    should_flush = true;
                    shared.metrics.increment_flush_max_outstanding();
                } else if qe.is_none() {
                    should_flush = true;
                    shared.metrics.increment_flush_empty_queue();
                }

                if should_flush {
                    let Some(bc) = chan.as_mut() else { continue };
                    match flush_batch(
                        shared,
                        bc,
                        log_id,
                        &mut last_flush_position,
                        &mut to_flush,
                        max_journal_size,
                    ) {
                        Ok(roll) => {
                            if roll {
                                chan = None;
                                continue;
                            }
                        }
                        Err(e) => {
                            Logger::fatal(
                                "JOURNAL_FLUSH_FAILED",
                                &[("error", &e.to_string())],
                            );
                            shared.running.store(false, Ordering::Release);
                            break;
                        }
                    }
                }
            }
        }

        if !shared.running.load(Ordering::Acquire) {
            Logger::info("JOURNAL_WRITER_STOPPING", &[]);
            break;
        }

        let Some(entry) = qe.take() else {
            continue;
        };
        shared.metrics.increment_entries_dequeued();

        let Some(bc) = chan.as_mut() else { continue };
        let record_len = 4 + entry.payload.len() as u64;
        if let Err(e) = write_entry(bc, &entry.payload) {
            Logger::fatal("JOURNAL_WRITE_FAILED", &[("error", &e.to_string())]);
            shared.running.store(false, Ordering::Release);
            break;
        }
        shared.metrics.add_bytes_written(record_len);
        to_flush.push(entry);
    }

    // exit guard: push whatever is still buffered into the page cache so a
    // graceful shutdown leaves no writes behind in user space
    if let Some(mut bc) = chan.take() {
        if let Err(e) = bc.flush() {
            Logger::error("JOURNAL_CLOSE_FLUSH_FAILED", &[("error", &e.to_string())]);
        }
    }
    Logger::info("JOURNAL_WRITER_EXITED", &[]);
}

/// Pack one length-prefixed record into the channel, growing the file
/// allocation ahead of it.
fn write_entry(bc: &mut BufferedChannel, payload: &[u8]) -> std::io::Result<()> {
    bc.pre_alloc_if_needed(4 + payload.len() as u64)?;
    bc.write_i32(payload.len() as i32)?;
    bc.write(payload)
}

/// Pad to the sector boundary, flush to the page cache, and hand the range
/// to the force-write stage. Returns whether the file must roll.
fn flush_batch(
    shared: &Arc<JournalShared>,
    bc: &mut BufferedChannel,
    log_id: u64,
    last_flush_position: &mut u64,
    to_flush: &mut Vec<QueueEntry>,
    max_journal_size: u64,
) -> std::io::Result<bool> {
    write_padding_bytes(bc)?;
    bc.flush()?;
    let start = *last_flush_position;
    *last_flush_position = bc.position();
    let should_close = *last_flush_position > max_journal_size;

    shared.metrics.increment_force_write_enqueued();
    let _ = shared
        .force_tx
        .send(ForceMsg::Request(ForceWriteRequest::new(
            Arc::clone(bc.file()),
            log_id,
            start,
            *last_flush_position,
            mem::take(to_flush),
            should_close,
        )));
    Ok(should_close)
}
