//! Buffer pool errors.

use thiserror::Error;

use granite_common::types::{PageId, StoreId, VolumeId};
use granite_wal::error::WalError;

use crate::error::StorageError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A conditional fix or latch acquisition found the latch contended.
    #[error("latch contended on page {vol}:{page_id}")]
    LatchContended {
        /// Volume of the page.
        vol: VolumeId,
        /// The contended page.
        page_id: PageId,
    },

    /// A Q-mode fix was attempted on a pointer that does not support it
    /// (non-swizzled or virgin), or a Q ticket failed validation.
    #[error("Q-mode fix failed; retry with a shared or exclusive latch")]
    LatchQFail,

    /// The parent was held in Q mode but the operation demands a real
    /// latch; the caller must re-descend with SH or EX.
    #[error("parent held in Q mode; re-descend with a stronger latch")]
    ParentLatchQFail,

    /// `fix_direct` was called with a swizzled page id, which cannot be
    /// resolved safely without the parent latched.
    #[error("fix_direct called with swizzled pointer {pointer:#010x}")]
    DirectFixSwizzled {
        /// The raw pointer value.
        pointer: u32,
    },

    /// Eviction exhausted every round without freeing a frame.
    #[error("out of buffer frames: eviction produced nothing")]
    OutOfBuffer,

    /// The page image is corrupt and single-page recovery could not
    /// repair it.
    #[error("page {vol}:{page_id} is corrupt and unrecoverable")]
    CorruptPage {
        /// Volume of the page.
        vol: VolumeId,
        /// The corrupt page.
        page_id: PageId,
    },

    /// Registering the write-order dependency would create a cycle.
    #[error("write-order dependency would form a cycle")]
    WodCycle,

    /// The page already carries a live outgoing write-order dependency.
    #[error("page already has a live write-order dependency")]
    WodConflict,

    /// The volume is not mounted in this pool.
    #[error("volume {vol} is not mounted")]
    VolumeNotMounted {
        /// The missing volume.
        vol: VolumeId,
    },

    /// The store has no pre-loaded root in the volume descriptor.
    #[error("store {store} has no root in volume {vol}")]
    StoreNotLoaded {
        /// Volume.
        vol: VolumeId,
        /// Store.
        store: StoreId,
    },

    /// Configuration error.
    #[error("buffer pool configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// A frame index was invalid or the frame is not in the expected
    /// state.
    #[error("invalid frame {frame}: {reason}")]
    InvalidFrame {
        /// The frame index.
        frame: u32,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Error from the volume/page layer.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Error from the log manager.
    #[error(transparent)]
    Wal(#[from] WalError),
}

impl BufferError {
    /// True for transient conditions the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LatchContended { .. } | Self::LatchQFail | Self::OutOfBuffer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(BufferError::OutOfBuffer.is_retryable());
        assert!(BufferError::LatchQFail.is_retryable());
        assert!(!BufferError::WodCycle.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = BufferError::DirectFixSwizzled {
            pointer: 0x8000_0001,
        };
        assert!(err.to_string().contains("0x80000001"));
    }
}
