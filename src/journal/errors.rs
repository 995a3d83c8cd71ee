//! Journal error types
//!
//! Error codes:
//! - AEROLOG_JOURNAL_IO (FATAL severity)
//! - AEROLOG_JOURNAL_CORRUPTION (FATAL severity)
//! - AEROLOG_JOURNAL_MISSING_LOG (FATAL severity)
//! - AEROLOG_NO_WRITABLE_DIR (ERROR severity)
//!
//! I/O failures in the pipeline are fatal because durability can no longer
//! be guaranteed once a write or sync has failed; the node must shut down.
//! Torn tails at the end of a journal file are not errors at all (REC-1).

use std::fmt;
use std::io;

/// Severity levels for journal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the node continues
    Error,
    /// The node must terminate
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Journal-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalErrorCode {
    /// OS failure during write, sync, file creation or directory listing
    JournalIo,
    /// Replay met a record the format forbids
    JournalCorruption,
    /// The checkpoint mark names a journal file that is absent
    JournalMissingLog,
    /// No ledger directory accepted the last-mark write
    NoWritableLedgerDir,
}

impl JournalErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            JournalErrorCode::JournalIo => "AEROLOG_JOURNAL_IO",
            JournalErrorCode::JournalCorruption => "AEROLOG_JOURNAL_CORRUPTION",
            JournalErrorCode::JournalMissingLog => "AEROLOG_JOURNAL_MISSING_LOG",
            JournalErrorCode::NoWritableLedgerDir => "AEROLOG_NO_WRITABLE_DIR",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            JournalErrorCode::JournalIo => Severity::Fatal,
            JournalErrorCode::JournalCorruption => Severity::Fatal,
            JournalErrorCode::JournalMissingLog => Severity::Fatal,
            JournalErrorCode::NoWritableLedgerDir => Severity::Error,
        }
    }

    /// Returns the invariant violated by this error, if applicable
    pub fn invariant(&self) -> Option<&'static str> {
        match self {
            JournalErrorCode::JournalIo => Some("DUR-1"),
            JournalErrorCode::JournalCorruption => Some("REC-2"),
            JournalErrorCode::JournalMissingLog => Some("REC-2"),
            JournalErrorCode::NoWritableLedgerDir => None,
        }
    }
}

impl fmt::Display for JournalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Journal error with full context
#[derive(Debug)]
pub struct JournalError {
    /// Error code
    code: JournalErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying IO error if applicable
    source: Option<io::Error>,
}

impl JournalError {
    /// Create a journal I/O error
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::JournalIo,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::JournalCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a corruption error with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::JournalCorruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Create a missing recovery log error
    pub fn missing_recovery_log(log_id: u64) -> Self {
        Self {
            code: JournalErrorCode::JournalMissingLog,
            message: format!("Recovery log {:x}.txn is missing", log_id),
            details: Some(format!("log_id: {}", log_id)),
            source: None,
        }
    }

    /// Create a no-writable-ledger-dir error
    pub fn no_writable_ledger_dir() -> Self {
        Self {
            code: JournalErrorCode::NoWritableLedgerDir,
            message: "No writable ledger directory accepts the lastMark write".to_string(),
            details: None,
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> JournalErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error requires node termination
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(invariant) = self.code.invariant() {
            write!(f, " [violates {}]", invariant)?;
        }
        Ok(())
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for JournalError {
    fn from(e: io::Error) -> Self {
        JournalError::io("Journal I/O failure", e)
    }
}

/// Result type for journal operations
pub type JournalResult<T> = Result<T, JournalError>;
