//! The child-pointer encoding.
//!
//! A child pointer inside an inner page is one 32-bit word: either a
//! disk page id, or, with bit 31 set, the index of the buffer frame the
//! child currently occupies. The high bit is the sole discriminator;
//! pages on disk never carry it.

use granite_common::constants::SWIZZLED_PID_BIT;
use granite_common::types::{FrameId, PageId};

/// A 32-bit child pointer that is either a disk page id or a swizzled
/// frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer(u32);

impl ChildPointer {
    /// Wraps a raw in-page pointer word.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// A pointer in disk form.
    #[inline]
    pub const fn disk(page_id: PageId) -> Self {
        Self(page_id.as_u32())
    }

    /// A pointer in swizzled form.
    #[inline]
    pub const fn swizzled(frame: FrameId) -> Self {
        Self(frame.as_u32() | SWIZZLED_PID_BIT)
    }

    /// The raw word as stored in the page.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether the swizzle bit is set.
    #[inline]
    pub const fn is_swizzled(self) -> bool {
        self.0 & SWIZZLED_PID_BIT != 0
    }

    /// The frame index; only meaningful when swizzled.
    #[inline]
    pub const fn frame(self) -> FrameId {
        FrameId::new(self.0 & !SWIZZLED_PID_BIT)
    }

    /// The disk page id; only meaningful when not swizzled.
    #[inline]
    pub const fn page(self) -> PageId {
        PageId::new(self.0)
    }
}
