//! System-wide constants for GraniteDB.

// =============================================================================
// Page Constants
// =============================================================================

/// Page size in bytes (8 KB). Fixed for the whole engine.
pub const PAGE_SIZE: usize = 8 * 1024;

/// Page header size in bytes.
///
/// The header contains: checksum (4), vol (4), page_id (4), store (4),
/// page_lsn (8), kind (1), level (1), flags (2), reserved (4) = 32 bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Offset of the checksum field within the page header.
pub const PAGE_CHECKSUM_OFFSET: usize = 0;

/// Magic number for the volume superblock.
pub const VOLUME_MAGIC: u32 = 0x4752_4456; // "GRDV" in ASCII

// =============================================================================
// Pointer Swizzling
// =============================================================================

/// A swizzled child pointer (frame index instead of page id) has this bit on.
pub const SWIZZLED_PID_BIT: u32 = 0x8000_0000;

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Minimum number of frames in a buffer pool.
pub const MIN_POOL_FRAMES: usize = 8;

/// Maximum value of the per-frame refcount.
///
/// The refcount is capped to avoid coherence traffic on the control
/// block's cache line when many sockets read-access the same hot frame.
/// The cap only needs enough granularity to separate cold from hot pages.
pub const MAX_REFCOUNT: u16 = 16;

/// When eviction is triggered, about this fraction of the pool is
/// targeted per batch.
pub const EVICT_BATCH_RATIO: f64 = 0.01;

/// Cap on clock-sweep rounds per eviction request.
pub const EVICT_MAX_ROUNDS: u16 = 20;

/// When unswizzling is triggered, about this number of pointers is
/// unswizzled before leaf eviction resumes.
pub const UNSWIZZLE_BATCH_SIZE: u32 = 1000;

/// An inner frame is considered a good unswizzle candidate when its
/// swizzled-pointer hint is at least this large.
pub const UNSWIZZLE_HINT_THRESHOLD: u16 = 2;

// =============================================================================
// WAL Constants
// =============================================================================

/// Default WAL partition (segment) size (16 MB).
pub const DEFAULT_WAL_PARTITION_SIZE: usize = 16 * 1024 * 1024;

/// Maximum WAL record size (1 MB).
pub const MAX_WAL_RECORD_SIZE: usize = 1024 * 1024;

/// WAL record header size.
///
/// Contains: lsn (8), total_len (4), kind (1), flags (1), vol (4),
/// page_id (4), page2_id (4), page_prev_lsn (8), checksum (4) = 38 bytes,
/// rounded to 40.
pub const WAL_RECORD_HEADER_SIZE: usize = 40;

/// Magic number for WAL partition files.
pub const WAL_MAGIC: u32 = 0x4752_4457; // "GRDW" in ASCII

// =============================================================================
// Consolidation Array Constants
// =============================================================================

/// Total number of pre-allocated C-Array slots.
pub const CARRAY_ALL_SLOT_COUNT: usize = 256;

/// Number of C-Array slots active (joinable) at any one time.
pub const CARRAY_ACTIVE_SLOT_COUNT: usize = 5;
