//! Journal files and the buffered channel
//!
//! A journal file is `<log_id hex>.txn` with a 512-byte header (magic,
//! format version, zero padding) followed by length-prefixed records per
//! JOURNAL.md §3. The buffered channel batches small record writes into one
//! write buffer; `flush` drains the buffer into the page cache and never
//! syncs. Durability is the force-write stage's job alone.
//!
//! Padding records keep every flush position on a 512-byte sector boundary
//! so the force-write stage can range-sync and direct I/O stays friendly.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(target_os = "linux")]
use crate::observability::Logger;

/// Sector size every flush position is aligned to
pub const SECTOR_SIZE: u64 = 512;

/// Fixed header size; one full sector
pub const HEADER_SIZE: u64 = SECTOR_SIZE;

/// Length value marking a padding record
pub const PADDING_MASK: i32 = -0x100;

/// Current journal format version
pub const FORMAT_V5: u32 = 5;

/// First format version carrying padding records
pub const FORMAT_V5_MIN_PADDING: u32 = 5;

const MAGIC: [u8; 4] = *b"ALOG";

const ZERO_SECTORS: [u8; 2 * SECTOR_SIZE as usize] = [0u8; 2 * SECTOR_SIZE as usize];

/// File name for a journal id
pub fn journal_file_name(log_id: u64) -> String {
    format!("{:x}.txn", log_id)
}

/// List journal ids in a directory, ascending, filtered by a predicate.
///
/// Files without the `.txn` suffix or a hex stem are not journals and are
/// ignored.
pub fn list_journal_ids<F>(journal_dir: &Path, filter: F) -> io::Result<Vec<u64>>
where
    F: Fn(u64) -> bool,
{
    let mut ids = Vec::new();
    for dir_entry in fs::read_dir(journal_dir)? {
        let path = dir_entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txn") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(id) = u64::from_str_radix(stem, 16) else {
            continue;
        };
        if filter(id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// An open journal file.
///
/// Owned by the writer stage through the buffered channel while open; the
/// force-write stage holds the same `Arc` through in-flight requests and is
/// the last owner of a rolled file. Sync operations take `&self` so both
/// stages can reach the descriptor; the write cursor is only ever moved by
/// the writer stage.
#[derive(Debug)]
pub struct JournalFile {
    file: File,
    path: PathBuf,
    log_id: u64,
    format_version: u32,
}

impl JournalFile {
    /// Journal id of this file
    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    /// Path of this file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format version from the header
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Force buffered file data to stable storage.
    ///
    /// `force_metadata` additionally syncs file metadata (size, timestamps);
    /// the steady-state path uses data-only sync because pre-allocation
    /// already persisted the size.
    pub fn force_write(&self, force_metadata: bool) -> io::Result<()> {
        if force_metadata {
            self.file.sync_all()
        } else {
            self.file.sync_data()
        }
    }

    /// Sync a byte range to stable storage.
    #[cfg(target_os = "linux")]
    pub fn sync_range(&self, offset: u64, len: u64) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let flags = libc::SYNC_FILE_RANGE_WAIT_BEFORE
            | libc::SYNC_FILE_RANGE_WRITE
            | libc::SYNC_FILE_RANGE_WAIT_AFTER;
        let rc = unsafe {
            libc::sync_file_range(
                self.file.as_raw_fd(),
                offset as libc::off64_t,
                len as libc::off64_t,
                flags,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Sync a byte range to stable storage (full data sync where range sync
    /// is unsupported).
    #[cfg(not(target_os = "linux"))]
    pub fn sync_range(&self, _offset: u64, _len: u64) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Hint the kernel to drop a synced range from the page cache.
    ///
    /// Best effort: failures only cost cache efficiency, never durability.
    #[cfg(target_os = "linux")]
    pub fn remove_from_page_cache(&self, offset: u64, len: u64) {
        use std::os::unix::io::AsRawFd;

        let rc = unsafe {
            libc::posix_fadvise(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                len as libc::off_t,
                libc::POSIX_FADV_DONTNEED,
            )
        };
        if rc != 0 {
            Logger::warn(
                "JOURNAL_FADVISE_FAILED",
                &[("path", &self.path.display().to_string()), ("rc", &rc.to_string())],
            );
        }
    }

    /// Hint the kernel to drop a synced range from the page cache (no-op
    /// where unsupported).
    #[cfg(not(target_os = "linux"))]
    pub fn remove_from_page_cache(&self, _offset: u64, _len: u64) {}

    fn write_at_cursor(&self, buf: &[u8]) -> io::Result<()> {
        // &File implements Write; the cursor belongs to the writer stage
        (&self.file).write_all(buf)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// Open a journal file for scanning.
///
/// Returns the file positioned after the header plus the format version.
/// `Ok(None)` means the file has no complete header: the crash signature of
/// a file that was created but never flushed, scanned as an empty log.
pub fn open_journal_for_read(
    journal_dir: &Path,
    log_id: u64,
) -> io::Result<Option<(File, u32)>> {
    let path = journal_dir.join(journal_file_name(log_id));
    let mut file = File::open(&path)?;

    let mut header = [0u8; 8];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if header[0..4] != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Bad journal magic in {}", path.display()),
        ));
    }
    let version = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes"));
    if version == 0 || version > FORMAT_V5 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported journal format version {}", version),
        ));
    }
    file.seek(SeekFrom::Start(HEADER_SIZE))?;
    Ok(Some((file, version)))
}

/// Write-buffered channel over an open journal file.
///
/// Tracks the logical write position (flushed bytes plus buffered bytes) and
/// the pre-allocation watermark. All writer-stage I/O goes through here.
#[derive(Debug)]
pub struct BufferedChannel {
    file: Arc<JournalFile>,
    buf: Vec<u8>,
    capacity: usize,
    flushed_position: u64,
    prealloc_watermark: u64,
    prealloc_size: u64,
}

impl BufferedChannel {
    /// Create a fresh journal file and its channel.
    ///
    /// Writes and syncs the header, pre-allocates the first chunk, and
    /// fsyncs the journal directory so the new file name survives a crash.
    pub fn create(
        journal_dir: &Path,
        log_id: u64,
        prealloc_size: u64,
        write_buffer_size: usize,
    ) -> io::Result<Self> {
        let path = journal_dir.join(journal_file_name(log_id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&FORMAT_V5.to_be_bytes());
        (&file).write_all(&header)?;
        file.sync_data()?;

        let watermark = prealloc_size.max(HEADER_SIZE);
        file.set_len(watermark)?;

        let dir = File::open(journal_dir)?;
        dir.sync_all()?;

        Ok(Self {
            file: Arc::new(JournalFile {
                file,
                path,
                log_id,
                format_version: FORMAT_V5,
            }),
            buf: Vec::with_capacity(write_buffer_size),
            capacity: write_buffer_size.max(1),
            flushed_position: HEADER_SIZE,
            prealloc_watermark: watermark,
            prealloc_size,
        })
    }

    /// The shared file handle, for force-write requests
    pub fn file(&self) -> &Arc<JournalFile> {
        &self.file
    }

    /// Logical write position: flushed bytes plus buffered bytes
    pub fn position(&self) -> u64 {
        self.flushed_position + self.buf.len() as u64
    }

    /// Grow the file ahead of the write position so steady-state appends
    /// never change file size.
    pub fn pre_alloc_if_needed(&mut self, len: u64) -> io::Result<()> {
        let needed = self.position() + len;
        if needed <= self.prealloc_watermark {
            return Ok(());
        }
        let step = self.prealloc_size.max(SECTOR_SIZE);
        let mut target = self.prealloc_watermark;
        while target < needed {
            target += step;
        }
        self.file.set_len(target)?;
        self.prealloc_watermark = target;
        Ok(())
    }

    /// Buffer bytes, draining the buffer whenever it fills
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.capacity - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() >= self.capacity {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Buffer a big-endian i32
    pub fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Drain the buffer into the page cache. Never syncs.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.file.write_at_cursor(&self.buf)?;
        self.flushed_position += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }
}

/// Emit a padding record bringing the channel position to the next sector
/// boundary.
///
/// The pad length leaves room for the 8-byte padding header; if the gap to
/// the boundary is smaller than the header, the pad runs into the following
/// sector instead.
pub fn write_padding_bytes(bc: &mut BufferedChannel) -> io::Result<()> {
    let bytes_to_align = bc.position() % SECTOR_SIZE;
    if bytes_to_align == 0 {
        return Ok(());
    }
    let mut padding_bytes = SECTOR_SIZE - bytes_to_align;
    if padding_bytes < 8 {
        padding_bytes = SECTOR_SIZE - (8 - padding_bytes);
    } else {
        padding_bytes -= 8;
    }
    bc.pre_alloc_if_needed(8 + padding_bytes)?;
    bc.write_i32(PADDING_MASK)?;
    bc.write_i32(padding_bytes as i32)?;
    bc.write(&ZERO_SECTORS[..padding_bytes as usize])?;
    Ok(())
}
