//! WAL error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use granite_common::types::Lsn;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("WAL I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// The log ran out of reservable space.
    ///
    /// Raised by the consolidation-array leader when a group's bytes do
    /// not fit in the remaining log capacity; every member of the group
    /// observes it.
    #[error("out of log space: cannot reserve {requested} bytes")]
    OutOfLogSpace {
        /// Bytes the group tried to reserve.
        requested: usize,
    },

    /// WAL directory does not exist or could not be created.
    #[error("WAL directory not usable: {path}")]
    DirectoryNotFound {
        /// The offending path.
        path: PathBuf,
    },

    /// A log record failed checksum verification.
    #[error("log record checksum mismatch at LSN {lsn}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN of the damaged record.
        lsn: Lsn,
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum computed over the record bytes.
        computed: u32,
    },

    /// A log record is structurally invalid.
    #[error("malformed log record at LSN {lsn}: {reason}")]
    MalformedRecord {
        /// LSN of the record.
        lsn: Lsn,
        /// What was wrong with it.
        reason: String,
    },

    /// A record exceeds the maximum record size.
    #[error("log record too large: {size} bytes exceeds maximum {max}")]
    RecordTooLarge {
        /// Actual encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An LSN does not fall inside any known partition.
    #[error("LSN {lsn} not found in the log")]
    LsnNotFound {
        /// The missing LSN.
        lsn: Lsn,
    },

    /// A partition file carries a bad magic number.
    #[error("invalid partition magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Magic found on disk.
        found: u32,
    },

    /// Configuration error.
    #[error("WAL configuration error: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },
}

impl WalError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a malformed-record error.
    pub fn malformed(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            lsn,
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates log corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::MalformedRecord { .. } | Self::InvalidMagic { .. }
        )
    }
}
