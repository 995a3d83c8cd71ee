//! Journal scanning and replay
//!
//! Replay re-presents every record at or past the recovered mark to the
//! node's recovery consumer before the journal accepts new appends. The
//! scanner never sees padding records, and a torn tail is not an error: a
//! short read or a zero length is where the crash happened and replay stops
//! cleanly there (REC-1). A padding record in a pre-v5 file is corruption
//! and halts startup (REC-2).

use std::io::{self, BufReader, Read, Seek, SeekFrom};

use crate::journal::channel::{
    list_journal_ids, open_journal_for_read, FORMAT_V5_MIN_PADDING, HEADER_SIZE, PADDING_MASK,
};
use crate::journal::errors::{JournalError, JournalResult};
use crate::journal::writer::Journal;
use crate::observability::Logger;

/// Consumer of replayed journal records.
pub trait JournalScanner {
    /// Process one non-padding record.
    ///
    /// `offset` is the file position of the record's length prefix; the
    /// payload starts with the 16-byte `(ledger_id, entry_id)` header.
    fn process(&mut self, format_version: u32, offset: u64, payload: &[u8]) -> JournalResult<()>;
}

impl Journal {
    /// Scan one journal file from `start_offset` to its logical end.
    ///
    /// The in-memory mark follows the scan so an interrupted replay resumes
    /// from the last record it saw rather than from the checkpoint mark.
    pub fn scan_journal(
        &self,
        log_id: u64,
        start_offset: u64,
        scanner: &mut dyn JournalScanner,
    ) -> JournalResult<()> {
        let journal_dir = &self.shared.config.journal_dir;
        let opened = open_journal_for_read(journal_dir, log_id).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                JournalError::corruption(e.to_string())
            } else {
                JournalError::io(format!("Failed to open journal {:x}.txn", log_id), e)
            }
        })?;
        let Some((file, format_version)) = opened else {
            // created but never flushed: the crash left nothing to replay
            Logger::warn(
                "JOURNAL_SCAN_HEADERLESS",
                &[("log_id", &format!("{:x}", log_id))],
            );
            return Ok(());
        };

        let mut reader = BufReader::new(file);
        let mut position = HEADER_SIZE;
        if start_offset > HEADER_SIZE {
            reader
                .seek(SeekFrom::Start(start_offset))
                .map_err(|e| JournalError::io("Failed to seek to scan offset", e))?;
            position = start_offset;
        }

        loop {
            let offset = position;
            let Some(mut len) = read_record_len(&mut reader, offset)? else {
                break;
            };
            position += 4;
            if len == 0 {
                // trailing pre-allocated region
                break;
            }

            let mut is_padding = false;
            if len == PADDING_MASK {
                if format_version >= FORMAT_V5_MIN_PADDING {
                    let Some(pad_len) = read_record_len(&mut reader, position)? else {
                        break;
                    };
                    position += 4;
                    if pad_len == 0 {
                        continue;
                    }
                    len = pad_len;
                    is_padding = true;
                } else {
                    return Err(JournalError::corruption_at_offset(
                        offset,
                        format!("Invalid record found with negative length: {}", len),
                    ));
                }
            }
            if len < 0 {
                return Err(JournalError::corruption_at_offset(
                    offset,
                    format!("Invalid record found with negative length: {}", len),
                ));
            }

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // torn tail: this is where we left off writing
                    break;
                }
                Err(e) => {
                    return Err(JournalError::io("Failed to read journal record", e));
                }
            }
            position += len as u64;

            if !is_padding {
                scanner.process(format_version, offset, &payload)?;
            }
            self.shared.last_log_mark.set_cur_mark(log_id, offset);
        }
        Ok(())
    }

    /// Replay every journal file at or past the recovered mark, in
    /// ascending id order, resuming mid-file on the marked journal.
    pub fn replay(&self, scanner: &mut dyn JournalScanner) -> JournalResult<()> {
        let marked = self.shared.last_log_mark.cur_mark();
        let journal_dir = &self.shared.config.journal_dir;
        let logs = list_journal_ids(journal_dir, |id| id >= marked.log_id)
            .map_err(|e| JournalError::io("Failed to list journal directory", e))?;

        // the mark is only a hint when it is zero; once it names a journal,
        // that journal must exist or recovery would silently lose records
        if marked.log_id > 0 && logs.first() != Some(&marked.log_id) {
            return Err(JournalError::missing_recovery_log(marked.log_id));
        }

        Logger::info(
            "JOURNAL_REPLAY_STARTED",
            &[
                ("files", &logs.len().to_string()),
                ("mark", &marked.to_string()),
            ],
        );
        for id in logs {
            let start_offset = if id == marked.log_id { marked.offset } else { 0 };
            self.scan_journal(id, start_offset, scanner)?;
        }
        Ok(())
    }
}

/// Read one big-endian length word. `None` means the file ended cleanly
/// under the read, which at the tail of a journal is a torn write.
fn read_record_len(reader: &mut impl Read, offset: u64) -> JournalResult<Option<i32>> {
    let mut word = [0u8; 4];
    match reader.read_exact(&mut word) {
        Ok(()) => Ok(Some(i32::from_be_bytes(word))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(JournalError::io(
            format!("Failed to read record length at offset {}", offset),
            e,
        )),
    }
}
