//! Core identifier types for GraniteDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types. Page identifiers
//! are 32 bits wide because the high bit of an in-page child pointer is
//! reserved as the swizzle discriminator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log Sequence Number - a position in the write-ahead log.
///
/// LSNs are monotonically increasing and are used to:
/// - Order log records
/// - Track per-page recovery progress (`rec_lsn`, `page_lsn`)
/// - Bound single-page recovery replay (EMLSN)
///
/// # Example
///
/// ```rust
/// use granite_common::types::Lsn;
///
/// let lsn = Lsn::new(1000);
/// assert!(lsn > Lsn::INVALID);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Invalid LSN, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid LSN.
    pub const FIRST: Self = Self(1);

    /// Maximum LSN value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new `Lsn` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the LSN offset by the given amount.
    #[inline]
    #[must_use]
    pub const fn offset(self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Checks if this is a valid LSN.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Returns the difference between two LSNs.
    #[inline]
    #[must_use]
    pub const fn diff(self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }

    /// Creates an Lsn from bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Converts to bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Lsn(INVALID)")
        } else {
            write!(f, "Lsn({})", self.0)
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lsn {
    #[inline]
    fn from(lsn: u64) -> Self {
        Self::new(lsn)
    }
}

impl From<Lsn> for u64 {
    #[inline]
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

/// Page identifier - the on-disk page number within a volume.
///
/// Page ids are 32 bits so that a child pointer stored inside a page fits
/// in one word with bit 31 left over as the swizzle marker. A valid disk
/// page id therefore never has the high bit set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Invalid page ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `PageId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next page ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid page ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<PageId> for u32 {
    #[inline]
    fn from(id: PageId) -> Self {
        id.0
    }
}

/// Volume identifier.
///
/// Each mounted volume owns an independent page-id space; the buffer
/// pool addresses pages by `(VolumeId, PageId)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VolumeId(u32);

impl VolumeId {
    /// Invalid volume ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `VolumeId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid volume ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "VolumeId(INVALID)")
        } else {
            write!(f, "VolumeId({})", self.0)
        }
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VolumeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Store identifier - one B-tree (index) within a volume.
///
/// The first page of a store is its root. Store 0 is reserved for the
/// volume's own metadata.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StoreId(u32);

impl StoreId {
    /// Invalid store ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `StoreId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid store ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StoreId(INVALID)")
        } else {
            write!(f, "StoreId({})", self.0)
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StoreId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Frame identifier - index into the buffer pool's frame array.
///
/// Index 0 is reserved as the NULL frame: it is never handed out and a
/// zero `FrameId` means "no frame" (free-list terminator, absent parent
/// hint, and so on).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FrameId(u32);

impl FrameId {
    /// The NULL frame (index 0 is reserved and never used for a page).
    pub const NULL: Self = Self(0);

    /// Creates a new `FrameId` from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(idx: u32) -> Self {
        Self(idx)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a usable (non-NULL) frame ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NULL {
            write!(f, "FrameId(NULL)")
        } else {
            write!(f, "FrameId({})", self.0)
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FrameId {
    #[inline]
    fn from(idx: u32) -> Self {
        Self::new(idx)
    }
}

/// The packed hash key for a page: `(volume << 32) | page`.
///
/// This is the single 64-bit key the buffer pool's hash index is
/// addressed by.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageKey(u64);

impl PageKey {
    /// Packs a volume and page id into one key.
    #[inline]
    #[must_use]
    pub const fn new(vol: VolumeId, page: PageId) -> Self {
        Self(((vol.as_u32() as u64) << 32) | page.as_u32() as u64)
    }

    /// Returns the raw packed value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Extracts the volume id.
    #[inline]
    #[must_use]
    pub const fn volume(self) -> VolumeId {
        VolumeId::new((self.0 >> 32) as u32)
    }

    /// Extracts the page id.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PageId {
        PageId::new(self.0 as u32)
    }
}

impl fmt::Debug for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageKey({}:{})", self.volume(), self.page())
    }
}
