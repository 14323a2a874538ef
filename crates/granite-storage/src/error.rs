//! Storage-layer error types (pages, volumes, backups).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use granite_common::types::{PageId, StoreId, VolumeId};

/// Result type for page and volume operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the page and volume layers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error from the underlying file.
    #[error("storage I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// The volume superblock is missing or damaged.
    #[error("invalid volume superblock at {path}: {reason}")]
    InvalidSuperblock {
        /// Path of the volume file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// A page id beyond the allocated range was addressed.
    #[error("page {page_id} out of range for volume {vol} ({page_count} pages allocated)")]
    PageOutOfRange {
        /// The volume.
        vol: VolumeId,
        /// The offending page id.
        page_id: PageId,
        /// Pages allocated in the volume.
        page_count: u32,
    },

    /// The store does not exist in the volume.
    #[error("store {store} not found in volume {vol}")]
    StoreNotFound {
        /// The volume.
        vol: VolumeId,
        /// The missing store.
        store: StoreId,
    },

    /// No backup image is available for the page.
    #[error("no backup image for page {vol}:{page_id}")]
    BackupMissing {
        /// The volume.
        vol: VolumeId,
        /// The page.
        page_id: PageId,
    },

    /// A redo record could not be applied to a page image.
    #[error("cannot apply redo to page {page_id}: {reason}")]
    BadRedo {
        /// The target page.
        page_id: PageId,
        /// What went wrong.
        reason: String,
    },
}

impl StorageError {
    /// Creates a bad-redo error.
    pub fn bad_redo(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::BadRedo {
            page_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StorageError::PageOutOfRange {
            vol: VolumeId::new(1),
            page_id: PageId::new(99),
            page_count: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("99"));
        assert!(msg.contains("10"));
    }
}
