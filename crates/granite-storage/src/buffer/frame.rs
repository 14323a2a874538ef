//! Buffer frames: one page image plus its control block.
//!
//! All control-block state is atomic; the page image lives in an
//! `UnsafeCell` and is only touched through latch-checked guards, the
//! aligned atomic word accessors (swizzle and EMLSN updates), or the
//! racy Q-mode copy that a ticket validates after the fact.

use std::cell::UnsafeCell;
use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicU16, AtomicU32, AtomicU64, Ordering,
};

use parking_lot::Mutex;

use granite_common::constants::{MAX_REFCOUNT, PAGE_SIZE};
use granite_common::types::{FrameId, Lsn, PageId, PageKey, StoreId, VolumeId};

use crate::buffer::latch::PageLatch;

/// Pin-count sentinel meaning "this frame is being evicted"; it blocks
/// further fixes without a separate flag.
const PIN_EVICTING: i32 = -1;

/// The page image, 8-byte aligned so that slot words (4-aligned) and
/// EMLSN words (8-aligned) can be accessed atomically in place.
#[repr(C, align(8))]
struct PageBuf {
    bytes: [u8; PAGE_SIZE],
}

/// An outgoing write-order dependency: this frame's page must not reach
/// disk before the dependency page's on-disk LSN covers `lsn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOrderDep {
    /// Frame the dependency page occupied at registration.
    pub frame: FrameId,
    /// The dependency page's id (revalidates the frame).
    pub page_id: PageId,
    /// The dependency page's `page_lsn` at registration time.
    pub lsn: Lsn,
}

/// One buffer frame: control block plus page image.
///
/// Aligned to 128 bytes so a control block never shares a 128-byte
/// sector with a neighboring frame's latch.
#[repr(align(128))]
pub struct Frame {
    // Disk identity.
    pid_vol: AtomicU32,
    pid_page: AtomicU32,
    store: AtomicU32,

    // State flags.
    used: AtomicBool,
    dirty: AtomicBool,
    in_doubt: AtomicBool,
    recovery_access: AtomicBool,
    swizzled: AtomicBool,

    /// Pin count; `-1` while being evicted (reached only by CAS from 0).
    pin_cnt: AtomicI32,
    /// Capped hotness counter.
    refcount: AtomicU16,
    /// Conservative count of swizzled pointers inside this page. Never
    /// decremented on merges; a pruning hint only.
    swizzled_ptr_hint: AtomicU16,
    /// Last known parent frame. A hint; revalidated under the parent
    /// latch before use.
    parent: AtomicU32,

    /// Oldest LSN whose effect this page may still lack on disk.
    rec_lsn: AtomicU64,
    /// LSN of the most recent update applied (mirror of the header).
    page_lsn: AtomicU64,

    /// Outgoing write-order dependency, at most one.
    wod: Mutex<Option<WriteOrderDep>>,

    /// The latch.
    latch: PageLatch,

    /// The page image.
    data: UnsafeCell<Box<PageBuf>>,
}

// Safety: every access to `data` is mediated by the latch (guards), by
// the aligned atomic word accessors, or by the Q-mode racy copy whose
// result is discarded unless the ticket validates.
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

impl Frame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self {
            pid_vol: AtomicU32::new(0),
            pid_page: AtomicU32::new(0),
            store: AtomicU32::new(0),
            used: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            in_doubt: AtomicBool::new(false),
            recovery_access: AtomicBool::new(false),
            swizzled: AtomicBool::new(false),
            pin_cnt: AtomicI32::new(0),
            refcount: AtomicU16::new(0),
            swizzled_ptr_hint: AtomicU16::new(0),
            parent: AtomicU32::new(0),
            rec_lsn: AtomicU64::new(0),
            page_lsn: AtomicU64::new(0),
            wod: Mutex::new(None),
            latch: PageLatch::new(),
            data: UnsafeCell::new(Box::new(PageBuf {
                bytes: [0; PAGE_SIZE],
            })),
        }
    }

    // ---------------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------------

    /// Sets the disk identity of the page this frame holds.
    pub fn set_identity(&self, vol: VolumeId, page_id: PageId, store: StoreId) {
        self.pid_vol.store(vol.as_u32(), Ordering::Release);
        self.pid_page.store(page_id.as_u32(), Ordering::Release);
        self.store.store(store.as_u32(), Ordering::Release);
    }

    /// Volume of the held page.
    #[inline]
    pub fn vol(&self) -> VolumeId {
        VolumeId::new(self.pid_vol.load(Ordering::Acquire))
    }

    /// Page id of the held page.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.pid_page.load(Ordering::Acquire))
    }

    /// Store of the held page.
    #[inline]
    pub fn store(&self) -> StoreId {
        StoreId::new(self.store.load(Ordering::Acquire))
    }

    /// Packed hash key of the held page.
    #[inline]
    pub fn page_key(&self) -> PageKey {
        PageKey::new(self.vol(), self.page_id())
    }

    // ---------------------------------------------------------------------
    // Flags
    // ---------------------------------------------------------------------

    /// Whether this frame represents a live page.
    #[inline]
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Sets the used flag.
    #[inline]
    pub fn set_used(&self, used: bool) {
        self.used.store(used, Ordering::Release);
    }

    /// Whether the page has unflushed updates.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty_flag(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Whether the page is in-doubt (control block without image).
    #[inline]
    pub fn is_in_doubt(&self) -> bool {
        self.in_doubt.load(Ordering::Acquire)
    }

    /// Sets the in-doubt flag.
    #[inline]
    pub fn set_in_doubt_flag(&self, in_doubt: bool) {
        self.in_doubt.store(in_doubt, Ordering::Release);
    }

    /// Whether recovery currently owns this frame.
    #[inline]
    pub fn is_recovery_access(&self) -> bool {
        self.recovery_access.load(Ordering::Acquire)
    }

    /// Sets the recovery-access flag.
    #[inline]
    pub fn set_recovery_access(&self, on: bool) {
        self.recovery_access.store(on, Ordering::Release);
    }

    /// Whether some parent holds a swizzled pointer to this frame.
    #[inline]
    pub fn is_swizzled(&self) -> bool {
        self.swizzled.load(Ordering::Acquire)
    }

    /// Sets the swizzled flag.
    #[inline]
    pub fn set_swizzled(&self, swizzled: bool) {
        self.swizzled.store(swizzled, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Pinning
    // ---------------------------------------------------------------------

    /// Current pin count (`-1` while evicting).
    #[inline]
    pub fn pin_count(&self) -> i32 {
        self.pin_cnt.load(Ordering::Acquire)
    }

    /// Takes a pin unless the frame is being evicted.
    pub fn try_pin(&self) -> bool {
        self.pin_cnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count >= 0 {
                    Some(count + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Releases a pin.
    pub fn unpin(&self) {
        let old = self.pin_cnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpin without a pin");
    }

    /// Publishes eviction-in-progress: CAS the pin count from 0 to -1.
    /// Failure means the frame is in use and must be skipped.
    pub fn try_start_evict(&self) -> bool {
        self.pin_cnt
            .compare_exchange(0, PIN_EVICTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Rolls back a failed eviction attempt.
    pub fn cancel_evict(&self) {
        let old = self.pin_cnt.swap(0, Ordering::AcqRel);
        debug_assert_eq!(old, PIN_EVICTING);
    }

    // ---------------------------------------------------------------------
    // Hotness and hints
    // ---------------------------------------------------------------------

    /// Bumps the refcount, saturating at the cap.
    pub fn bump_refcount(&self) {
        let _ = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count < MAX_REFCOUNT {
                    Some(count + 1)
                } else {
                    None
                }
            });
    }

    /// Current refcount.
    #[inline]
    pub fn refcount(&self) -> u16 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Ages the refcount by one; returns the value before aging.
    pub fn decay_refcount(&self) -> u16 {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count > 0 {
                    Some(count - 1)
                } else {
                    None
                }
            })
            .unwrap_or(0)
    }

    /// Conservative swizzled-pointer count for this page.
    #[inline]
    pub fn swizzled_ptr_hint(&self) -> u16 {
        self.swizzled_ptr_hint.load(Ordering::Acquire)
    }

    /// Bumps the swizzled-pointer hint.
    pub fn bump_swizzled_ptr_hint(&self) {
        self.swizzled_ptr_hint.fetch_add(1, Ordering::AcqRel);
    }

    /// Last known parent frame.
    #[inline]
    pub fn parent(&self) -> FrameId {
        FrameId::new(self.parent.load(Ordering::Acquire))
    }

    /// Records the parent hint.
    #[inline]
    pub fn set_parent(&self, parent: FrameId) {
        self.parent.store(parent.as_u32(), Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // LSNs
    // ---------------------------------------------------------------------

    /// The recovery LSN: oldest update possibly missing from disk.
    #[inline]
    pub fn rec_lsn(&self) -> Lsn {
        Lsn::new(self.rec_lsn.load(Ordering::Acquire))
    }

    /// Sets the recovery LSN.
    #[inline]
    pub fn set_rec_lsn(&self, lsn: Lsn) {
        self.rec_lsn.store(lsn.as_u64(), Ordering::Release);
    }

    /// The page LSN mirror.
    #[inline]
    pub fn page_lsn(&self) -> Lsn {
        Lsn::new(self.page_lsn.load(Ordering::Acquire))
    }

    /// Sets the page LSN mirror.
    #[inline]
    pub fn set_page_lsn(&self, lsn: Lsn) {
        self.page_lsn.store(lsn.as_u64(), Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Write-order dependency
    // ---------------------------------------------------------------------

    /// The outgoing write-order dependency, if any.
    pub fn wod(&self) -> Option<WriteOrderDep> {
        *self.wod.lock()
    }

    /// Installs an outgoing dependency if none is present. Returns false
    /// if one already exists.
    pub fn try_set_wod(&self, dep: WriteOrderDep) -> bool {
        let mut wod = self.wod.lock();
        if wod.is_some() {
            return false;
        }
        *wod = Some(dep);
        true
    }

    /// Clears the outgoing dependency.
    pub fn clear_wod(&self) {
        *self.wod.lock() = None;
    }

    // ---------------------------------------------------------------------
    // Latch and page image
    // ---------------------------------------------------------------------

    /// The frame's latch.
    #[inline]
    pub fn latch(&self) -> &PageLatch {
        &self.latch
    }

    /// Read access to the page image.
    ///
    /// # Safety
    ///
    /// The caller must hold the latch (SH or EX), or otherwise guarantee
    /// no concurrent writer (e.g. pin-published eviction).
    pub(crate) unsafe fn image(&self) -> &[u8] {
        &(*self.data.get()).bytes
    }

    /// Write access to the page image.
    ///
    /// # Safety
    ///
    /// The caller must hold the latch in EX mode, or own the frame
    /// exclusively (load path before publication, eviction after the
    /// pin CAS).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn image_mut(&self) -> &mut [u8] {
        &mut (*self.data.get()).bytes
    }

    /// Copies the page image out under the caller's latch.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::image`].
    pub(crate) unsafe fn copy_image(&self) -> Vec<u8> {
        self.image().to_vec()
    }

    /// Racy copy of a byte range for Q-mode readers. The bytes may be
    /// torn; the caller must validate its Q ticket before trusting them.
    pub(crate) fn copy_racy(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= PAGE_SIZE);
        unsafe {
            let src = (*self.data.get()).bytes.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }
    }

    /// Atomically loads a 32-bit word of the page image. `offset` must
    /// be 4-byte aligned.
    pub fn load_u32(&self, offset: usize) -> u32 {
        debug_assert_eq!(offset % 4, 0);
        debug_assert!(offset + 4 <= PAGE_SIZE);
        unsafe {
            let ptr = (*self.data.get()).bytes.as_ptr().add(offset) as *const AtomicU32;
            u32::from_be((*ptr).load(Ordering::Acquire))
        }
    }

    /// Atomically stores a 32-bit word into the page image. `offset`
    /// must be 4-byte aligned. This is the swizzle/unswizzle write: a
    /// single aligned store, no latch upgrade required.
    pub fn store_u32(&self, offset: usize, value: u32) {
        debug_assert_eq!(offset % 4, 0);
        debug_assert!(offset + 4 <= PAGE_SIZE);
        unsafe {
            let ptr = (*self.data.get()).bytes.as_ptr().add(offset) as *const AtomicU32;
            (*ptr).store(value.to_be(), Ordering::Release);
        }
    }

    /// Atomically loads a 64-bit word of the page image. `offset` must
    /// be 8-byte aligned.
    pub fn load_u64(&self, offset: usize) -> u64 {
        debug_assert_eq!(offset % 8, 0);
        debug_assert!(offset + 8 <= PAGE_SIZE);
        unsafe {
            let ptr = (*self.data.get()).bytes.as_ptr().add(offset) as *const AtomicU64;
            u64::from_be((*ptr).load(Ordering::Acquire))
        }
    }

    /// Atomically stores a 64-bit word into the page image. `offset`
    /// must be 8-byte aligned. EMLSN updates go through here under a
    /// shared parent latch.
    pub fn store_u64(&self, offset: usize, value: u64) {
        debug_assert_eq!(offset % 8, 0);
        debug_assert!(offset + 8 <= PAGE_SIZE);
        unsafe {
            let ptr = (*self.data.get()).bytes.as_ptr().add(offset) as *const AtomicU64;
            (*ptr).store(value.to_be(), Ordering::Release);
        }
    }

    /// Wipes the control block for reuse. The caller owns the frame
    /// exclusively (eviction after the pin CAS, or pool teardown).
    pub fn reset(&self) {
        self.pid_vol.store(0, Ordering::Release);
        self.pid_page.store(0, Ordering::Release);
        self.store.store(0, Ordering::Release);
        self.used.store(false, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.in_doubt.store(false, Ordering::Release);
        self.recovery_access.store(false, Ordering::Release);
        self.swizzled.store(false, Ordering::Release);
        self.refcount.store(0, Ordering::Release);
        self.swizzled_ptr_hint.store(0, Ordering::Release);
        self.parent.store(0, Ordering::Release);
        self.rec_lsn.store(0, Ordering::Release);
        self.page_lsn.store(0, Ordering::Release);
        *self.wod.lock() = None;
        self.pin_cnt.store(0, Ordering::Release);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("vol", &self.vol())
            .field("page_id", &self.page_id())
            .field("used", &self.is_used())
            .field("dirty", &self.is_dirty())
            .field("in_doubt", &self.is_in_doubt())
            .field("pin_cnt", &self.pin_count())
            .field("rec_lsn", &self.rec_lsn())
            .field("page_lsn", &self.page_lsn())
            .finish()
    }
}
