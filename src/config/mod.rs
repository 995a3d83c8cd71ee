//! Journal configuration
//!
//! All sizing options are expressed in the units their names carry (MB, KB,
//! ms) and converted to bytes/durations through the accessor methods; the
//! pipeline only ever consults the accessors.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Write-ahead journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Directory holding `<log_id hex>.txn` journal files
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,

    /// Ledger directories; each writable one receives a `lastMark` file
    #[serde(default = "default_ledger_dirs")]
    pub ledger_dirs: Vec<PathBuf>,

    /// Roll the journal file once the flushed position exceeds this (MB)
    #[serde(default = "default_max_journal_size_mb")]
    pub max_journal_size_mb: u64,

    /// Chunk size for journal file pre-allocation (MB)
    #[serde(default = "default_journal_prealloc_size_mb")]
    pub journal_prealloc_size_mb: u64,

    /// Write buffer capacity of the buffered channel (KB)
    #[serde(default = "default_journal_write_buffer_size_kb")]
    pub journal_write_buffer_size_kb: u64,

    /// Journal files kept below the marked journal on compacting checkpoints
    #[serde(default = "default_max_backup_journals")]
    pub max_backup_journals: usize,

    /// Group force-writes adaptively (marker-driven fsync elision)
    #[serde(default = "default_journal_adaptive_group_writes")]
    pub journal_adaptive_group_writes: bool,

    /// Age cap on the oldest buffered entry before the writer flushes (ms)
    #[serde(default = "default_journal_max_group_wait_ms")]
    pub journal_max_group_wait_ms: u64,

    /// Bytes buffered since the last flush that force the next flush
    #[serde(default = "default_journal_buffered_writes_threshold")]
    pub journal_buffered_writes_threshold: u64,

    /// Entries buffered that force the next flush; zero disables the cap
    #[serde(default)]
    pub journal_buffered_entries_threshold: u64,

    /// Flush whenever the write queue drains
    #[serde(default)]
    pub journal_flush_when_queue_empty: bool,

    /// Hint the kernel to drop flushed pages from the page cache after sync
    #[serde(default)]
    pub journal_remove_pages_from_cache: bool,

    /// Worker threads of the ordered callback executor
    #[serde(default = "default_num_journal_callback_threads")]
    pub num_journal_callback_threads: usize,
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_ledger_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("data/ledgers")]
}

fn default_max_journal_size_mb() -> u64 {
    2048
}

fn default_journal_prealloc_size_mb() -> u64 {
    16
}

fn default_journal_write_buffer_size_kb() -> u64 {
    64
}

fn default_max_backup_journals() -> usize {
    5
}

fn default_journal_adaptive_group_writes() -> bool {
    true
}

fn default_journal_max_group_wait_ms() -> u64 {
    2
}

fn default_journal_buffered_writes_threshold() -> u64 {
    512 * 1024
}

fn default_num_journal_callback_threads() -> usize {
    1
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journal_dir: default_journal_dir(),
            ledger_dirs: default_ledger_dirs(),
            max_journal_size_mb: default_max_journal_size_mb(),
            journal_prealloc_size_mb: default_journal_prealloc_size_mb(),
            journal_write_buffer_size_kb: default_journal_write_buffer_size_kb(),
            max_backup_journals: default_max_backup_journals(),
            journal_adaptive_group_writes: default_journal_adaptive_group_writes(),
            journal_max_group_wait_ms: default_journal_max_group_wait_ms(),
            journal_buffered_writes_threshold: default_journal_buffered_writes_threshold(),
            journal_buffered_entries_threshold: 0,
            journal_flush_when_queue_empty: false,
            journal_remove_pages_from_cache: false,
            num_journal_callback_threads: default_num_journal_callback_threads(),
        }
    }
}

impl JournalConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their defaults, so deployment configs only list
    /// what they change.
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Maximum journal file size in bytes
    pub fn max_journal_size(&self) -> u64 {
        self.max_journal_size_mb * 1024 * 1024
    }

    /// Pre-allocation chunk size in bytes
    pub fn journal_prealloc_size(&self) -> u64 {
        self.journal_prealloc_size_mb * 1024 * 1024
    }

    /// Write buffer capacity in bytes
    pub fn journal_write_buffer_size(&self) -> usize {
        (self.journal_write_buffer_size_kb * 1024) as usize
    }

    /// Age cap before a buffered batch must flush
    pub fn max_group_wait(&self) -> Duration {
        Duration::from_millis(self.journal_max_group_wait_ms)
    }

    /// Whether the writer flushes on an empty queue.
    ///
    /// Without an age cap there is nothing to bound the wait, so an absent
    /// cap forces flush-on-empty regardless of the configured flag.
    pub fn flush_when_queue_empty(&self) -> bool {
        self.journal_max_group_wait_ms == 0 || self.journal_flush_when_queue_empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = JournalConfig::default();
        assert_eq!(config.max_journal_size_mb, 2048);
        assert_eq!(config.journal_prealloc_size_mb, 16);
        assert_eq!(config.journal_write_buffer_size_kb, 64);
        assert_eq!(config.max_backup_journals, 5);
        assert!(config.journal_adaptive_group_writes);
        assert_eq!(config.journal_max_group_wait_ms, 2);
        assert_eq!(config.journal_buffered_writes_threshold, 512 * 1024);
        assert_eq!(config.journal_buffered_entries_threshold, 0);
        assert!(!config.journal_flush_when_queue_empty);
        assert!(!config.journal_remove_pages_from_cache);
        assert_eq!(config.num_journal_callback_threads, 1);
    }

    #[test]
    fn test_unit_conversions() {
        let config = JournalConfig {
            max_journal_size_mb: 1,
            journal_prealloc_size_mb: 2,
            journal_write_buffer_size_kb: 3,
            ..Default::default()
        };
        assert_eq!(config.max_journal_size(), 1024 * 1024);
        assert_eq!(config.journal_prealloc_size(), 2 * 1024 * 1024);
        assert_eq!(config.journal_write_buffer_size(), 3 * 1024);
    }

    #[test]
    fn test_flush_when_queue_empty_forced_without_wait_cap() {
        let mut config = JournalConfig::default();
        config.journal_max_group_wait_ms = 0;
        config.journal_flush_when_queue_empty = false;
        assert!(config.flush_when_queue_empty());

        config.journal_max_group_wait_ms = 5;
        assert!(!config.flush_when_queue_empty());

        config.journal_flush_when_queue_empty = true;
        assert!(config.flush_when_queue_empty());
    }

    #[test]
    fn test_from_json_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(br#"{"journal_dir": "/j", "journal_max_group_wait_ms": 10}"#)
            .unwrap();

        let config = JournalConfig::from_json_file(&path).unwrap();
        assert_eq!(config.journal_dir, PathBuf::from("/j"));
        assert_eq!(config.journal_max_group_wait_ms, 10);
        // untouched fields keep defaults
        assert_eq!(config.max_backup_journals, 5);
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = JournalConfig::from_json_file(Path::new("/nonexistent/journal.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_from_json_file_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal.json");
        fs::write(&path, "{ not json").unwrap();

        let result = JournalConfig::from_json_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
