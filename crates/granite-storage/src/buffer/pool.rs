//! The buffer pool manager.
//!
//! Pages are fixed through their already-latched parents: a swizzled
//! pointer short-circuits straight to a frame, otherwise the hash index
//! is consulted and, on a miss, a free frame is claimed (eviction runs
//! if the free list is dry), the image is read and validated (repaired
//! by single-page recovery when stale or corrupt), and the page is
//! installed and latched.
//!
//! Every successful fix is matched by exactly one unfix, enforced by the
//! RAII [`PageGuard`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use granite_common::types::{FrameId, Lsn, PageId, PageKey, StoreId, VolumeId};
use granite_wal::log::LogManager;

use crate::buffer::cleaner::CleanerShared;
use crate::buffer::config::BufferPoolConfig;
use crate::buffer::error::{BufferError, BufferResult};
use crate::buffer::eviction::EvictionState;
use crate::buffer::frame::{Frame, WriteOrderDep};
use crate::buffer::freelist::FreeList;
use crate::buffer::hashtable::{FramePair, PageTable};
use crate::buffer::latch::{LatchMode, QTicket};
use crate::buffer::swizzle::ChildPointer;
use crate::buffer::BufferPoolStats;
use crate::page::{
    stamp_checksum, verify_page_checksum, ChildSlot, PageCodec, PageHeader, PageFlags,
};
use crate::recovery;
use crate::vol::{BackupStore, DiskVolume};

/// Per-volume state: the disk handle and the pre-fixed root frame of
/// every store, so `fix_root` is O(1) and swizzling can start at the
/// root.
pub(crate) struct VolumeDescriptor {
    pub(crate) volume: Arc<DiskVolume>,
    pub(crate) roots: RwLock<HashMap<StoreId, FrameId>>,
}

/// The buffer pool.
pub struct BufferPool {
    pub(crate) config: BufferPoolConfig,
    /// Frame array; index 0 is reserved as NULL.
    pub(crate) frames: Box<[Frame]>,
    pub(crate) table: PageTable,
    pub(crate) freelist: FreeList,
    pub(crate) volumes: RwLock<HashMap<VolumeId, Arc<VolumeDescriptor>>>,
    pub(crate) log: Arc<LogManager>,
    pub(crate) codec: Arc<dyn PageCodec>,
    pub(crate) backup: Option<Arc<dyn BackupStore>>,
    /// Single-threaded eviction: one round at a time, pool-wide.
    pub(crate) evict_state: Mutex<EvictionState>,
    pub(crate) cleaner: Mutex<Option<Arc<CleanerShared>>>,

    // Statistics.
    pub(crate) stat_fixes: AtomicU64,
    pub(crate) stat_hits: AtomicU64,
    pub(crate) stat_misses: AtomicU64,
    pub(crate) stat_evictions: AtomicU64,
    pub(crate) stat_unswizzles: AtomicU64,
    pub(crate) stat_flushes: AtomicU64,
    pub(crate) stat_repairs: AtomicU64,
}

impl BufferPool {
    /// Creates a pool with the given configuration and collaborators.
    pub fn new(
        config: BufferPoolConfig,
        log: Arc<LogManager>,
        codec: Arc<dyn PageCodec>,
    ) -> BufferResult<Self> {
        config
            .validate()
            .map_err(|message| BufferError::Config { message })?;

        let frames: Box<[Frame]> = (0..=config.num_frames).map(|_| Frame::new()).collect();
        Ok(Self {
            freelist: FreeList::new(config.num_frames),
            table: PageTable::new(config.num_frames),
            frames,
            volumes: RwLock::new(HashMap::new()),
            log,
            codec,
            backup: None,
            evict_state: Mutex::new(EvictionState::new()),
            cleaner: Mutex::new(None),
            stat_fixes: AtomicU64::new(0),
            stat_hits: AtomicU64::new(0),
            stat_misses: AtomicU64::new(0),
            stat_evictions: AtomicU64::new(0),
            stat_unswizzles: AtomicU64::new(0),
            stat_flushes: AtomicU64::new(0),
            stat_repairs: AtomicU64::new(0),
            config,
        })
    }

    /// Attaches a backup store for single-page recovery of corrupt
    /// images.
    #[must_use]
    pub fn with_backup(mut self, backup: Arc<dyn BackupStore>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Whether pointer swizzling is enabled.
    pub fn is_swizzling_enabled(&self) -> bool {
        self.config.enable_swizzling
    }

    /// The log manager this pool logs through.
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub(crate) fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.index()]
    }

    // =========================================================================
    // Fix family
    // =========================================================================

    /// Fixes a non-root page through its latched parent.
    ///
    /// `pointer` is the raw child-pointer word from the parent page: a
    /// swizzled value goes straight to the frame; a disk page id goes
    /// through the hash index and, on a miss, disk. With swizzling
    /// enabled, a successful miss/hit rewrites the parent's pointer in
    /// place to the swizzled form.
    pub fn fix_nonroot<'p>(
        &'p self,
        parent: &PageGuard<'_>,
        vol: VolumeId,
        pointer: u32,
        mode: LatchMode,
        conditional: bool,
        virgin: bool,
    ) -> BufferResult<PageGuard<'p>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let cp = ChildPointer::from_raw(pointer);
        if cp.is_swizzled() {
            let frame_id = cp.frame();
            let frame = self.checked_frame(frame_id)?;
            // A swizzled pointer under a latched parent pins the child
            // in place; the pin can only fail if the invariant broke.
            if !frame.try_pin() {
                return Err(BufferError::InvalidFrame {
                    frame: frame_id.as_u32(),
                    reason: "swizzled pointer to evicting frame",
                });
            }
            self.stat_hits.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.latch_frame(frame, mode, conditional) {
                frame.unpin();
                return Err(err);
            }
            frame.bump_refcount();
            frame.set_parent(parent.frame_id());
            self.table.update_parent(frame.page_key(), parent.frame_id());
            return Ok(PageGuard::new(self, frame_id, mode));
        }
        self.fix_nonswizzled(Some(parent), vol, cp.page(), mode, conditional, virgin)
    }

    /// Fixes a page without a parent.
    ///
    /// Rejects swizzled pointers: without the parent latched the frame
    /// behind a swizzled pointer may be re-used at any moment.
    pub fn fix_direct(
        &self,
        vol: VolumeId,
        pointer: u32,
        mode: LatchMode,
        conditional: bool,
        virgin: bool,
    ) -> BufferResult<PageGuard<'_>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let cp = ChildPointer::from_raw(pointer);
        if cp.is_swizzled() {
            return Err(BufferError::DirectFixSwizzled { pointer });
        }
        self.fix_nonswizzled(None, vol, cp.page(), mode, conditional, virgin)
    }

    /// Fixes the root page of a store. The root is pre-fixed at volume
    /// install, so this is a table lookup plus a latch.
    pub fn fix_root(
        &self,
        vol: VolumeId,
        store: StoreId,
        mode: LatchMode,
        conditional: bool,
    ) -> BufferResult<PageGuard<'_>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let desc = self.volume(vol)?;
        let frame_id = desc
            .roots
            .read()
            .get(&store)
            .copied()
            .ok_or(BufferError::StoreNotLoaded { vol, store })?;
        let frame = self.frame(frame_id);
        if !frame.try_pin() {
            return Err(BufferError::InvalidFrame {
                frame: frame_id.as_u32(),
                reason: "root frame unavailable",
            });
        }
        self.stat_hits.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.latch_frame(frame, mode, conditional) {
            frame.unpin();
            return Err(err);
        }
        frame.bump_refcount();
        Ok(PageGuard::new(self, frame_id, mode))
    }

    /// Allocates and installs a brand-new root page for `store` under an
    /// EX latch. The root stays pinned until the volume is uninstalled.
    pub fn fix_virgin_root(
        &self,
        vol: VolumeId,
        store: StoreId,
        page_id: PageId,
    ) -> BufferResult<PageGuard<'_>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let desc = self.volume(vol)?;
        let frame_id = self.grab_free_frame()?;
        let frame = self.frame(frame_id);

        frame.set_identity(vol, page_id, store);
        frame.set_used(true);
        let pinned = frame.try_pin(); // the root's persistent pin
        debug_assert!(pinned);
        let pinned = frame.try_pin(); // the guard's pin
        debug_assert!(pinned);
        frame.latch().lock_exclusive();

        // Safety: EX latch held, frame not yet published.
        unsafe { frame.image_mut().fill(0) };
        let key = PageKey::new(vol, page_id);
        if let Err(existing) = self.table.insert_if_absent(
            key,
            FramePair {
                frame: frame_id,
                parent: FrameId::NULL,
            },
        ) {
            frame.latch().unlock_exclusive();
            frame.reset();
            self.freelist.push(frame_id);
            warn!(?existing, %vol, %page_id, "virgin root already present");
            return Err(BufferError::InvalidFrame {
                frame: existing.frame.as_u32(),
                reason: "virgin root already installed",
            });
        }
        desc.roots.write().insert(store, frame_id);
        Ok(PageGuard::new(self, frame_id, LatchMode::Exclusive))
    }

    /// Optimistically fixes a page through a swizzled pointer in Q mode.
    ///
    /// Takes no pin and no latch; the caller must validate the returned
    /// ticket after consuming whatever it read.
    pub fn fix_unsafely_nonroot(&self, pointer: u32) -> BufferResult<QFix<'_>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let cp = ChildPointer::from_raw(pointer);
        if !cp.is_swizzled() {
            return Err(BufferError::LatchQFail);
        }
        let frame_id = cp.frame();
        let frame = self.checked_frame(frame_id)?;
        let ticket = frame.latch().acquire_q().ok_or(BufferError::LatchQFail)?;
        self.stat_hits.fetch_add(1, Ordering::Relaxed);
        Ok(QFix {
            pool: self,
            frame_id,
            ticket,
        })
    }

    /// Crabbing from a Q-latched parent into a real child latch demands
    /// a re-descent: the parent's ticket cannot be promoted.
    ///
    /// Validates the parent ticket first so the caller can distinguish
    /// "parent moved" ([`BufferError::LatchQFail`]) from "upgrade not
    /// supported" ([`BufferError::ParentLatchQFail`]).
    pub fn fix_from_q_parent(
        &self,
        parent: &QFix<'_>,
        _pointer: u32,
        _mode: LatchMode,
    ) -> BufferResult<PageGuard<'_>> {
        if !parent.validate() {
            return Err(BufferError::LatchQFail);
        }
        Err(BufferError::ParentLatchQFail)
    }

    /// Takes an extra pin that survives unfix, so the page can be
    /// re-fixed later without its parent. Must be balanced by dropping
    /// the returned handle.
    pub fn pin_for_refix(&self, guard: &PageGuard<'_>) -> RefixPin<'_> {
        let frame = self.frame(guard.frame_id());
        let pinned = frame.try_pin();
        debug_assert!(pinned, "latched frame cannot be evicting");
        RefixPin {
            pool: self,
            frame_id: guard.frame_id(),
        }
    }

    /// Re-fixes a frame previously pinned with [`Self::pin_for_refix`].
    pub fn refix_direct(
        &self,
        pin: &RefixPin<'_>,
        mode: LatchMode,
        conditional: bool,
    ) -> BufferResult<PageGuard<'_>> {
        self.stat_fixes.fetch_add(1, Ordering::Relaxed);
        let frame = self.frame(pin.frame_id);
        debug_assert!(frame.pin_count() > 0, "refix without its pin");
        if !frame.try_pin() {
            return Err(BufferError::InvalidFrame {
                frame: pin.frame_id.as_u32(),
                reason: "refix on evicting frame",
            });
        }
        self.stat_hits.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.latch_frame(frame, mode, conditional) {
            frame.unpin();
            return Err(err);
        }
        frame.bump_refcount();
        Ok(PageGuard::new(self, pin.frame_id, mode))
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// Marks the page dirty. The first dirtying establishes `rec_lsn`
    /// from `current_lsn` (the log position supplied by the transaction
    /// layer).
    pub fn set_dirty(&self, guard: &PageGuard<'_>, current_lsn: Lsn) {
        let frame = self.frame(guard.frame_id());
        frame.set_dirty_flag(true);
        if !frame.rec_lsn().is_valid() {
            frame.set_rec_lsn(current_lsn);
        }
    }

    /// Whether the page is marked dirty.
    pub fn is_dirty(&self, guard: &PageGuard<'_>) -> bool {
        self.frame(guard.frame_id()).is_dirty()
    }

    /// Lowers `rec_lsn` toward `lsn` if needed, so the earliest dirty
    /// point is correctly reflected (used around recovery).
    pub fn update_initial_dirty_lsn(&self, guard: &PageGuard<'_>, lsn: Lsn) {
        let frame = self.frame(guard.frame_id());
        let current = frame.rec_lsn();
        if !current.is_valid() || current > lsn {
            frame.set_rec_lsn(lsn);
        }
    }

    /// Bounds `rec_lsn` to `page_lsn` after unlogged updates. If the
    /// page was never really dirtied, the dirty mark is dropped instead.
    pub fn repair_rec_lsn(&self, guard: &PageGuard<'_>, was_dirty: bool, new_rlsn: Lsn) {
        let frame = self.frame(guard.frame_id());
        if frame.rec_lsn() > frame.page_lsn() {
            if was_dirty {
                frame.set_rec_lsn(new_rlsn);
            } else {
                frame.set_dirty_flag(false);
                frame.set_rec_lsn(Lsn::INVALID);
            }
        }
    }

    /// Marks the page as accessed by recovery (excluded from eviction).
    pub fn set_recovery_access(&self, guard: &PageGuard<'_>) {
        self.frame(guard.frame_id()).set_recovery_access(true);
    }

    /// Clears the recovery-access mark.
    pub fn clear_recovery_access(&self, guard: &PageGuard<'_>) {
        self.frame(guard.frame_id()).set_recovery_access(false);
    }

    /// Flags the page for deletion; the cleaner will drop it instead of
    /// writing it back.
    pub fn set_to_be_deleted(&self, guard: &mut PageGuard<'_>, current_lsn: Lsn) {
        let mut header = guard.header();
        header.flags = PageFlags::from_bits(header.flags.bits() | PageFlags::TO_BE_DELETED);
        header.write(guard.data_mut());
        self.set_dirty(guard, current_lsn);
    }

    // =========================================================================
    // Write-order dependencies
    // =========================================================================

    /// Registers "`page` must not be flushed before `dependency`". Both
    /// pages must be latched (they are, by their guards). At most one
    /// outgoing edge per page; a registration that would overwrite a
    /// live edge or form a cycle is rejected, and the caller must fall
    /// back to a non-optimized logging path.
    pub fn register_write_order_dependency(
        &self,
        page: &PageGuard<'_>,
        dependency: &PageGuard<'_>,
    ) -> BufferResult<()> {
        let frame = self.frame(page.frame_id());

        if let Some(existing) = frame.wod() {
            if self.wod_live(&existing) {
                return Err(BufferError::WodConflict);
            }
            frame.clear_wod();
        }

        // Bounded walk over the single outgoing edge per frame.
        let mut cursor = dependency.frame_id();
        let mut steps = 0usize;
        loop {
            if cursor == page.frame_id() {
                return Err(BufferError::WodCycle);
            }
            match self.frame(cursor).wod() {
                Some(edge) if self.wod_live(&edge) => {
                    cursor = edge.frame;
                    steps += 1;
                    if steps > self.config.num_frames {
                        return Err(BufferError::WodCycle);
                    }
                }
                _ => break,
            }
        }

        let dep_frame = self.frame(dependency.frame_id());
        let installed = frame.try_set_wod(WriteOrderDep {
            frame: dependency.frame_id(),
            page_id: dep_frame.page_id(),
            lsn: dep_frame.page_lsn(),
        });
        debug_assert!(installed);
        Ok(())
    }

    /// Whether a recorded dependency edge still constrains flushing.
    pub(crate) fn wod_live(&self, dep: &WriteOrderDep) -> bool {
        let frame = self.frame(dep.frame);
        frame.is_used()
            && frame.page_id() == dep.page_id
            && frame.is_dirty()
            && frame.rec_lsn().is_valid()
            && frame.rec_lsn() <= dep.lsn
    }

    /// Whether the frame may be flushed as far as write-order
    /// dependencies are concerned. Clears edges found dead.
    pub(crate) fn wod_clear_or_blocked(&self, frame: &Frame) -> bool {
        match frame.wod() {
            Some(dep) if self.wod_live(&dep) => false,
            Some(_) => {
                frame.clear_wod();
                true
            }
            None => true,
        }
    }

    // =========================================================================
    // Swizzling helpers
    // =========================================================================

    /// Swizzles the child pointer in `slot` of the parent, if the child
    /// is resident. Ignores children that are not loaded yet. SH on the
    /// parent is enough: the rewrite is one aligned 32-bit store.
    pub fn swizzle_child(&self, parent: &PageGuard<'_>, slot: ChildSlot) -> bool {
        if !self.config.enable_swizzling {
            return false;
        }
        let parent_frame = self.frame(parent.frame_id());
        let Some(offset) = self.codec.child_slot_offset(parent.data(), slot) else {
            return false;
        };
        let cp = ChildPointer::from_raw(parent_frame.load_u32(offset));
        if cp.is_swizzled() {
            return false;
        }
        let key = PageKey::new(parent.vol(), cp.page());
        let Some(pair) = self.table.lookup(key) else {
            return false;
        };
        let child = self.frame(pair.frame);
        if !child.is_used() || child.is_in_doubt() {
            return false;
        }
        parent_frame.store_u32(offset, ChildPointer::swizzled(pair.frame).raw());
        child.set_swizzled(true);
        child.set_parent(parent.frame_id());
        parent_frame.bump_swizzled_ptr_hint();
        true
    }

    /// Normalizes a pointer word to the disk page id: resolves swizzled
    /// values through the frame's control block. The caller must hold
    /// some latch preventing eviction of the pointed-to page.
    pub fn normalize_pid(&self, pointer: u32) -> PageId {
        let cp = ChildPointer::from_raw(pointer);
        if cp.is_swizzled() {
            self.frame(cp.frame()).page_id()
        } else {
            cp.page()
        }
    }

    /// Whether the page held by this guard is swizzled in its parent.
    pub fn is_swizzled(&self, guard: &PageGuard<'_>) -> bool {
        self.frame(guard.frame_id()).is_swizzled()
    }

    /// Scans a latched parent for the slot whose pointer leads to
    /// `page_id`, accounting for swizzling. Returns
    /// [`ChildSlot::NOT_FOUND`] if no slot matches.
    pub fn find_page_id_slot(&self, parent: &PageGuard<'_>, page_id: PageId) -> ChildSlot {
        let frame = self.frame(parent.frame_id());
        let image = parent.data();
        for slot in self.codec.slots(image) {
            let Some(offset) = self.codec.child_slot_offset(image, slot) else {
                continue;
            };
            let raw = frame.load_u32(offset);
            if raw == 0 {
                continue;
            }
            if self.normalize_pid(raw) == page_id {
                return slot;
            }
        }
        ChildSlot::NOT_FOUND
    }

    /// Accurate scan: does this latched page hold any swizzled child
    /// pointer? (The per-frame hint is a conservative over-estimate;
    /// this is the exact check.)
    pub fn has_swizzled_child(&self, guard: &PageGuard<'_>) -> bool {
        let frame = self.frame(guard.frame_id());
        let image = guard.data();
        self.codec.slots(image).into_iter().any(|slot| {
            self.codec
                .child_slot_offset(image, slot)
                .is_some_and(|off| ChildPointer::from_raw(frame.load_u32(off)).is_swizzled())
        })
    }

    /// Records a parent change (adoption / de-adoption) for a resident
    /// page. The caller must keep the page and both parents latched.
    pub fn switch_parent(&self, vol: VolumeId, page_id: PageId, new_parent: &PageGuard<'_>) {
        let key = PageKey::new(vol, page_id);
        if let Some(pair) = self.table.lookup(key) {
            self.table.update_parent(key, new_parent.frame_id());
            self.frame(pair.frame).set_parent(new_parent.frame_id());
        }
    }

    // =========================================================================
    // Volume install / uninstall
    // =========================================================================

    /// Mounts a volume: allocates its descriptor and pre-fixes every
    /// store's root page. Externally serialized with other mounts.
    pub fn install_volume(&self, volume: Arc<DiskVolume>) -> BufferResult<()> {
        let vol = volume.vol();
        let desc = Arc::new(VolumeDescriptor {
            volume: Arc::clone(&volume),
            roots: RwLock::new(HashMap::new()),
        });
        self.volumes.write().insert(vol, Arc::clone(&desc));

        for (store, root_pid) in volume.stores() {
            let frame_id = self.preload_root(&desc, vol, store, root_pid)?;
            desc.roots.write().insert(store, frame_id);
        }
        debug!(%vol, stores = desc.roots.read().len(), "installed volume");
        Ok(())
    }

    /// Unmounts a volume: flushes its dirty pages and releases every
    /// frame it occupies.
    pub fn uninstall_volume(&self, vol: VolumeId) -> BufferResult<()> {
        self.force_volume(vol)?;
        let desc = self
            .volumes
            .write()
            .remove(&vol)
            .ok_or(BufferError::VolumeNotMounted { vol })?;

        let roots: Vec<FrameId> = desc.roots.read().values().copied().collect();
        for frame_id in roots {
            self.frame(frame_id).unpin();
        }

        for idx in 1..=self.config.num_frames {
            let frame = &self.frames[idx];
            if !frame.is_used() || frame.vol() != vol {
                continue;
            }
            if frame.pin_count() != 0 {
                warn!(frame = idx, "pinned page survives volume uninstall");
                continue;
            }
            self.table.remove(frame.page_key());
            frame.reset();
            self.freelist.push(FrameId::new(idx as u32));
        }
        desc.volume.sync()?;
        debug!(%vol, "uninstalled volume");
        Ok(())
    }

    pub(crate) fn volume(&self, vol: VolumeId) -> BufferResult<Arc<VolumeDescriptor>> {
        self.volumes
            .read()
            .get(&vol)
            .cloned()
            .ok_or(BufferError::VolumeNotMounted { vol })
    }

    // =========================================================================
    // Flushing / force
    // =========================================================================

    /// Writes out every dirty page.
    pub fn force_all(&self) -> BufferResult<()> {
        self.force_until_lsn(Lsn::MAX)
    }

    /// Writes out every dirty page of one volume.
    pub fn force_volume(&self, vol: VolumeId) -> BufferResult<()> {
        self.force_filtered(Lsn::MAX, Some(vol))
    }

    /// Writes out every dirty page whose `rec_lsn` is at or below `lsn`.
    pub fn force_until_lsn(&self, lsn: Lsn) -> BufferResult<()> {
        self.force_filtered(lsn, None)
    }

    fn force_filtered(&self, lsn: Lsn, vol: Option<VolumeId>) -> BufferResult<()> {
        // Multiple passes: flushing a dependency page un-blocks its
        // dependents on the next pass.
        for _pass in 0..self.config.num_frames.max(2) {
            let mut remaining = false;
            let mut progress = false;
            for idx in 1..=self.config.num_frames {
                let frame = &self.frames[idx];
                if !frame.is_used() || !frame.is_dirty() || frame.is_in_doubt() {
                    continue;
                }
                if vol.is_some_and(|v| frame.vol() != v) {
                    continue;
                }
                if frame.rec_lsn().is_valid() && frame.rec_lsn() > lsn {
                    continue;
                }
                if self.flush_frame(FrameId::new(idx as u32), false)? {
                    progress = true;
                } else {
                    remaining = true;
                }
            }
            if !remaining {
                return Ok(());
            }
            if !progress {
                warn!("force made no progress; write-order dependencies unresolved");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Wakes the background cleaner, if one is attached.
    pub fn wakeup_cleaners(&self) {
        if let Some(shared) = self.cleaner.lock().as_ref() {
            shared.wake();
        }
    }

    pub(crate) fn attach_cleaner(&self, shared: Arc<CleanerShared>) {
        *self.cleaner.lock() = Some(shared);
    }

    /// Flushes one frame if it is dirty and unconstrained. Returns
    /// whether a write happened.
    pub(crate) fn flush_frame(&self, frame_id: FrameId, conditional: bool) -> BufferResult<bool> {
        let frame = self.frame(frame_id);
        if !frame.is_used() || !frame.is_dirty() || frame.is_in_doubt() {
            return Ok(false);
        }
        if !self.wod_clear_or_blocked(frame) {
            return Ok(false);
        }
        if conditional {
            if !frame.latch().try_lock_shared() {
                return Ok(false);
            }
        } else {
            frame.latch().lock_shared();
        }
        let result = self.flush_latched(frame);
        frame.latch().unlock_shared();
        result
    }

    fn flush_latched(&self, frame: &Frame) -> BufferResult<bool> {
        if !frame.is_used() || !frame.is_dirty() || frame.is_in_doubt() {
            return Ok(false);
        }
        // Safety: SH latch held.
        let mut image = unsafe { frame.copy_image() };
        if PageHeader::read(&image).flags.to_be_deleted() {
            // The cleaner reclaims these without writing.
            return Ok(false);
        }

        // Write-ahead rule: the log must cover the page before the page
        // reaches disk.
        self.log.flush_until(frame.page_lsn())?;

        self.convert_to_disk_page(frame, &mut image);
        stamp_checksum(&mut image);

        let desc = self.volume(frame.vol())?;
        desc.volume.write_page(frame.page_id(), &image)?;
        frame.set_dirty_flag(false);
        frame.set_rec_lsn(Lsn::INVALID);
        frame.clear_wod();
        self.stat_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Rewrites swizzled child pointers in a copied image back to disk
    /// page ids. Pages on disk never carry the swizzle bit.
    pub(crate) fn convert_to_disk_page(&self, frame: &Frame, image: &mut [u8]) {
        for slot in self.codec.slots(image) {
            let Some(offset) = self.codec.child_slot_offset(image, slot) else {
                continue;
            };
            let raw = u32::from_be_bytes(image[offset..offset + 4].try_into().unwrap());
            let cp = ChildPointer::from_raw(raw);
            if !cp.is_swizzled() {
                continue;
            }
            let disk_pid = self.resolve_for_disk(frame, offset, cp);
            image[offset..offset + 4].copy_from_slice(&disk_pid.as_u32().to_be_bytes());
        }
    }

    /// Resolves a swizzled slot to its disk pid, tolerating a racing
    /// unswizzle: if the child's control block has already been wiped,
    /// the live slot word has necessarily been rewritten to the disk id
    /// first, so re-reading it settles the value.
    fn resolve_for_disk(&self, frame: &Frame, offset: usize, cp: ChildPointer) -> PageId {
        let child_pid = self.frame(cp.frame()).page_id();
        if child_pid.is_valid() {
            return child_pid;
        }
        let live = ChildPointer::from_raw(frame.load_u32(offset));
        debug_assert!(!live.is_swizzled());
        live.page()
    }

    // =========================================================================
    // Recovery surface (in-doubt pages)
    // =========================================================================

    /// Marks a frame in-doubt: the control block is live but the page
    /// image has not been loaded.
    pub fn set_in_doubt(&self, frame_id: FrameId, first_lsn: Lsn, last_lsn: Lsn) {
        let frame = self.frame(frame_id);
        frame.set_used(true);
        frame.set_in_doubt_flag(true);
        frame.set_dirty_flag(false);
        frame.set_rec_lsn(first_lsn);
        frame.set_page_lsn(last_lsn);
    }

    /// Clears the in-doubt flag. With `still_used == false` the frame is
    /// released back to the free list (the page turned out not to be
    /// needed).
    pub fn clear_in_doubt(&self, frame_id: FrameId, still_used: bool, key: PageKey) {
        let frame = self.frame(frame_id);
        if still_used {
            frame.set_in_doubt_flag(false);
        } else {
            self.table.remove(key);
            frame.reset();
            self.freelist.push(frame_id);
        }
    }

    /// Transitions in-doubt → dirty once the image is loaded.
    pub fn in_doubt_to_dirty(&self, frame_id: FrameId) {
        let frame = self.frame(frame_id);
        debug_assert!(frame.is_in_doubt());
        frame.set_in_doubt_flag(false);
        frame.set_dirty_flag(true);
    }

    /// Whether a frame is marked in-doubt.
    pub fn is_in_doubt(&self, frame_id: FrameId) -> bool {
        self.frame(frame_id).is_in_doubt()
    }

    /// Finds the frame registered for `key` during recovery, if any.
    pub fn lookup_in_doubt(&self, key: PageKey) -> Option<FrameId> {
        self.table.lookup(key).map(|pair| pair.frame)
    }

    /// Log-analysis entry: ensures a control block exists for the page,
    /// marked in-doubt, without loading or evicting anything. Fails with
    /// [`BufferError::OutOfBuffer`] if the free list is empty.
    pub fn register_and_mark(
        &self,
        key: PageKey,
        store: StoreId,
        first_lsn: Lsn,
        last_lsn: Lsn,
    ) -> BufferResult<FrameId> {
        if let Some(pair) = self.table.lookup(key) {
            let frame = self.frame(pair.frame);
            frame.set_used(true);
            frame.set_in_doubt_flag(true);
            if !frame.rec_lsn().is_valid() || frame.rec_lsn() > first_lsn {
                frame.set_rec_lsn(first_lsn);
            }
            if frame.page_lsn() < last_lsn {
                frame.set_page_lsn(last_lsn);
            }
            return Ok(pair.frame);
        }

        let frame_id = self.freelist.pop().ok_or(BufferError::OutOfBuffer)?;
        let frame = self.frame(frame_id);
        frame.set_identity(key.volume(), key.page(), store);
        self.set_in_doubt(frame_id, first_lsn, last_lsn);
        let installed = self.table.insert_if_absent(
            key,
            FramePair {
                frame: frame_id,
                parent: FrameId::NULL,
            },
        );
        debug_assert!(installed.is_ok(), "recovery is single-threaded");
        Ok(frame_id)
    }

    /// REDO entry: loads the image for an in-doubt frame and flips it to
    /// dirty.
    pub fn load_for_redo(&self, frame_id: FrameId, vol: VolumeId, page_id: PageId) -> BufferResult<()> {
        let frame = self.frame(frame_id);
        debug_assert!(frame.is_in_doubt());
        let desc = self.volume(vol)?;

        frame.latch().lock_exclusive();
        // Safety: EX latch held.
        let image = unsafe { frame.image_mut() };
        let result = desc.volume.read_page(page_id, image);
        if let Err(err) = result {
            frame.latch().unlock_exclusive();
            return Err(err.into());
        }
        let header = PageHeader::read(image);
        if header.page_lsn.is_valid() && !verify_page_checksum(image) {
            frame.latch().unlock_exclusive();
            return Err(BufferError::CorruptPage { vol, page_id });
        }
        frame.set_identity(vol, page_id, header.store);
        // Keep the analysis-provided rec_lsn; the image tells us what
        // actually reached disk.
        let analysis_last = frame.page_lsn();
        frame.set_page_lsn(header.page_lsn.max(Lsn::INVALID));
        if analysis_last > header.page_lsn {
            // Updates are missing from the image; REDO will re-apply.
            debug!(%vol, %page_id, "page image behind analysis LSN");
        }
        self.in_doubt_to_dirty(frame_id);
        frame.latch().unlock_exclusive();
        Ok(())
    }

    /// Checkpoint support: scans `count` frames starting at `start` and
    /// reports the dirty / in-doubt ones. Returns the entries, the index
    /// to resume from, and the minimum `rec_lsn` seen.
    pub fn get_rec_lsn(&self, start: usize, count: usize) -> (Vec<RecLsnEntry>, usize, Lsn) {
        let mut entries = Vec::new();
        let mut min_rec_lsn = Lsn::MAX;
        let begin = start.clamp(1, self.config.num_frames + 1);
        let end = (begin + count).min(self.config.num_frames + 1);
        for idx in begin..end {
            let frame = &self.frames[idx];
            if !frame.is_used() || (!frame.is_dirty() && !frame.is_in_doubt()) {
                continue;
            }
            let rec_lsn = frame.rec_lsn();
            if rec_lsn.is_valid() && rec_lsn < min_rec_lsn {
                min_rec_lsn = rec_lsn;
            }
            entries.push(RecLsnEntry {
                vol: frame.vol(),
                page_id: frame.page_id(),
                store: frame.store(),
                rec_lsn,
                page_lsn: frame.page_lsn(),
                in_doubt: frame.is_in_doubt(),
            });
        }
        (entries, end, min_rec_lsn)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes a frame whose page is being deleted: no latch holders, no
    /// pins, not swizzled. Used by the cleaner on to-be-deleted pages.
    pub fn delete_block(&self, frame_id: FrameId) -> BufferResult<()> {
        let frame = self.frame(frame_id);
        if !frame.is_used() || !frame.is_dirty() {
            return Err(BufferError::InvalidFrame {
                frame: frame_id.as_u32(),
                reason: "delete of non-dirty frame",
            });
        }
        if frame.is_swizzled() || frame.latch().is_latched() || !frame.try_start_evict() {
            return Err(BufferError::InvalidFrame {
                frame: frame_id.as_u32(),
                reason: "delete of busy frame",
            });
        }
        self.table.remove(frame.page_key());
        frame.reset();
        self.freelist.push(frame_id);
        Ok(())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Snapshot of pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        let mut dirty = 0;
        let mut swizzled = 0;
        for idx in 1..=self.config.num_frames {
            let frame = &self.frames[idx];
            if frame.is_used() && frame.is_dirty() {
                dirty += 1;
            }
            if frame.is_used() && frame.is_swizzled() {
                swizzled += 1;
            }
        }
        BufferPoolStats {
            fixes: self.stat_fixes.load(Ordering::Relaxed),
            hits: self.stat_hits.load(Ordering::Relaxed),
            misses: self.stat_misses.load(Ordering::Relaxed),
            evictions: self.stat_evictions.load(Ordering::Relaxed),
            unswizzles: self.stat_unswizzles.load(Ordering::Relaxed),
            flushes: self.stat_flushes.load(Ordering::Relaxed),
            page_repairs: self.stat_repairs.load(Ordering::Relaxed),
            dirty_frames: dirty,
            swizzled_frames: swizzled,
            free_frames: self.freelist.len(),
        }
    }

    // =========================================================================
    // Private fix plumbing
    // =========================================================================

    fn checked_frame(&self, frame_id: FrameId) -> BufferResult<&Frame> {
        if !frame_id.is_valid() || frame_id.index() > self.config.num_frames {
            return Err(BufferError::InvalidFrame {
                frame: frame_id.as_u32(),
                reason: "frame index out of range",
            });
        }
        Ok(self.frame(frame_id))
    }

    fn latch_frame(&self, frame: &Frame, mode: LatchMode, conditional: bool) -> BufferResult<()> {
        let acquired = match (mode, conditional) {
            (LatchMode::Shared, true) => frame.latch().try_lock_shared(),
            (LatchMode::Exclusive, true) => frame.latch().try_lock_exclusive(),
            (LatchMode::Shared, false) => {
                frame.latch().lock_shared();
                true
            }
            (LatchMode::Exclusive, false) => {
                frame.latch().lock_exclusive();
                true
            }
        };
        if acquired {
            Ok(())
        } else {
            Err(BufferError::LatchContended {
                vol: frame.vol(),
                page_id: frame.page_id(),
            })
        }
    }

    fn fix_nonswizzled<'p>(
        &'p self,
        parent: Option<&PageGuard<'_>>,
        vol: VolumeId,
        page_id: PageId,
        mode: LatchMode,
        conditional: bool,
        virgin: bool,
    ) -> BufferResult<PageGuard<'p>> {
        let key = PageKey::new(vol, page_id);
        loop {
            if let Some(pair) = self.table.lookup(key) {
                let frame = self.frame(pair.frame);
                if !frame.try_pin() {
                    // Eviction in progress; it will detach the entry.
                    std::thread::yield_now();
                    continue;
                }
                if !frame.is_used() || frame.page_key() != key {
                    // The frame was recycled between lookup and pin.
                    frame.unpin();
                    continue;
                }
                if frame.is_in_doubt() {
                    frame.unpin();
                    return Err(BufferError::InvalidFrame {
                        frame: pair.frame.as_u32(),
                        reason: "fix of in-doubt page",
                    });
                }
                self.stat_hits.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = self.latch_frame(frame, mode, conditional) {
                    frame.unpin();
                    return Err(err);
                }
                frame.bump_refcount();
                if let Some(p) = parent {
                    frame.set_parent(p.frame_id());
                    self.table.update_parent(key, p.frame_id());
                    if self.config.enable_swizzling && !virgin {
                        self.swizzle_pointer_to(p, page_id);
                    }
                }
                return Ok(PageGuard::new(self, pair.frame, mode));
            }

            // Miss: claim a frame, publish, then load.
            self.stat_misses.fetch_add(1, Ordering::Relaxed);
            let frame_id = self.grab_free_frame()?;
            let frame = self.frame(frame_id);
            frame.set_identity(vol, page_id, StoreId::INVALID);
            frame.set_used(true);
            let pinned = frame.try_pin();
            debug_assert!(pinned);
            frame.latch().lock_exclusive();

            let pair = FramePair {
                frame: frame_id,
                parent: parent.map_or(FrameId::NULL, |p| p.frame_id()),
            };
            if self.table.insert_if_absent(key, pair).is_err() {
                // Another thread is loading the same page; retry on its
                // entry.
                frame.latch().unlock_exclusive();
                frame.reset();
                self.freelist.push(frame_id);
                continue;
            }

            if let Err(err) = self.load_frame(parent, frame, vol, page_id, virgin) {
                self.table.remove(key);
                frame.latch().unlock_exclusive();
                frame.reset();
                self.freelist.push(frame_id);
                return Err(err);
            }

            frame.bump_refcount();
            if let Some(p) = parent {
                frame.set_parent(p.frame_id());
                if self.config.enable_swizzling && !virgin {
                    self.swizzle_pointer_to(p, page_id);
                }
            }
            if mode == LatchMode::Shared {
                frame.latch().downgrade();
            }
            return Ok(PageGuard::new(self, frame_id, mode));
        }
    }

    /// Reads and validates the page image for a freshly claimed frame.
    /// The caller holds the EX latch and the only pin.
    fn load_frame(
        &self,
        parent: Option<&PageGuard<'_>>,
        frame: &Frame,
        vol: VolumeId,
        page_id: PageId,
        virgin: bool,
    ) -> BufferResult<()> {
        let desc = self.volume(vol)?;
        // Safety: EX latch held; the frame is unpublished to writers.
        let image = unsafe { frame.image_mut() };

        if virgin {
            image.fill(0);
            frame.set_page_lsn(Lsn::INVALID);
            frame.set_rec_lsn(Lsn::INVALID);
            frame.set_dirty_flag(false);
            frame.set_in_doubt_flag(false);
            return Ok(());
        }

        desc.volume.read_page(page_id, image)?;
        let expected_emlsn = parent.and_then(|p| self.child_emlsn_of(p, page_id));
        recovery::check_read_page(self, frame, vol, page_id, expected_emlsn)?;

        let header = PageHeader::read(unsafe { frame.image() });
        frame.set_identity(vol, page_id, header.store);
        frame.set_page_lsn(header.page_lsn);
        frame.set_rec_lsn(Lsn::INVALID);
        frame.set_dirty_flag(false);
        frame.set_in_doubt_flag(false);
        Ok(())
    }

    /// Reads the EMLSN the parent stores for `page_id`, if a slot is
    /// found.
    pub(crate) fn child_emlsn_of(&self, parent: &PageGuard<'_>, page_id: PageId) -> Option<Lsn> {
        let slot = self.find_page_id_slot(parent, page_id);
        if !slot.is_found() {
            return None;
        }
        let offset = self.codec.child_emlsn_offset(parent.data(), slot)?;
        let value = self.frame(parent.frame_id()).load_u64(offset);
        (value != 0).then(|| Lsn::new(value))
    }

    fn swizzle_pointer_to(&self, parent: &PageGuard<'_>, page_id: PageId) {
        let slot = self.find_page_id_slot(parent, page_id);
        if slot.is_found() {
            self.swizzle_child(parent, slot);
        }
    }

    /// Claims a free frame, driving eviction when the free list is dry.
    pub(crate) fn grab_free_frame(&self) -> BufferResult<FrameId> {
        if let Some(frame_id) = self.freelist.pop() {
            return Ok(frame_id);
        }
        for _ in 0..3 {
            self.evict_blocks(crate::buffer::EvictUrgency::Eager, self.config.evict_batch())?;
            if let Some(frame_id) = self.freelist.pop() {
                return Ok(frame_id);
            }
        }
        Err(BufferError::OutOfBuffer)
    }

    fn preload_root(
        &self,
        desc: &VolumeDescriptor,
        vol: VolumeId,
        store: StoreId,
        root_pid: PageId,
    ) -> BufferResult<FrameId> {
        let frame_id = self.freelist.pop().ok_or(BufferError::OutOfBuffer)?;
        let frame = self.frame(frame_id);
        frame.set_identity(vol, root_pid, store);
        frame.set_used(true);
        let pinned = frame.try_pin(); // persistent root pin
        debug_assert!(pinned);

        // Safety: frame not yet published.
        let image = unsafe { frame.image_mut() };
        desc.volume.read_page(root_pid, image)?;
        if image.iter().all(|&b| b == 0) {
            // A root that was created but never flushed: format it.
            crate::page::FanoutCodec::format_leaf(image, vol, root_pid, store);
            stamp_checksum(image);
        } else {
            recovery::check_read_page(self, frame, vol, root_pid, None)?;
        }
        let header = PageHeader::read(unsafe { frame.image() });
        frame.set_page_lsn(header.page_lsn);

        let key = PageKey::new(vol, root_pid);
        let installed = self.table.insert_if_absent(
            key,
            FramePair {
                frame: frame_id,
                parent: FrameId::NULL,
            },
        );
        debug_assert!(installed.is_ok(), "mounts are serialized");
        Ok(frame_id)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("num_frames", &self.config.num_frames)
            .field("resident", &self.table.len())
            .field("free", &self.freelist.len())
            .finish()
    }
}

/// One row of the checkpoint `get_rec_lsn` scan.
#[derive(Debug, Clone, Copy)]
pub struct RecLsnEntry {
    /// Volume of the page.
    pub vol: VolumeId,
    /// The page.
    pub page_id: PageId,
    /// The page's store.
    pub store: StoreId,
    /// Oldest possibly-unflushed LSN.
    pub rec_lsn: Lsn,
    /// Newest applied LSN.
    pub page_lsn: Lsn,
    /// Whether the page is in-doubt (image not loaded).
    pub in_doubt: bool,
}

/// A latched, pinned page. Dropping it releases the latch and the pin
/// (the one-unfix-per-fix contract).
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
    mode: LatchMode,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, frame_id: FrameId, mode: LatchMode) -> Self {
        Self {
            pool,
            frame_id,
            mode,
        }
    }

    fn frame(&self) -> &Frame {
        self.pool.frame(self.frame_id)
    }

    /// The frame this guard latches.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Current latch mode.
    #[inline]
    pub fn mode(&self) -> LatchMode {
        self.mode
    }

    /// Volume of the page.
    #[inline]
    pub fn vol(&self) -> VolumeId {
        self.frame().vol()
    }

    /// Page id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.frame().page_id()
    }

    /// Store id.
    #[inline]
    pub fn store(&self) -> StoreId {
        self.frame().store()
    }

    /// The page's LSN (control-block mirror).
    #[inline]
    pub fn page_lsn(&self) -> Lsn {
        self.frame().page_lsn()
    }

    /// Read access to the page image.
    pub fn data(&self) -> &[u8] {
        // Safety: the guard holds the latch.
        unsafe { self.frame().image() }
    }

    /// Write access to the page image. Requires the EX latch.
    pub fn data_mut(&mut self) -> &mut [u8] {
        assert_eq!(self.mode, LatchMode::Exclusive, "write access needs EX");
        // Safety: the guard holds the EX latch.
        unsafe { self.frame().image_mut() }
    }

    /// Decoded page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::read(self.data())
    }

    /// Stamps a new `page_lsn` into the image and the control block.
    /// Requires the EX latch.
    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        crate::page::write_page_lsn(self.data_mut(), lsn);
        self.frame().set_page_lsn(lsn);
    }

    /// Conditionally upgrades SH → EX. Returns false when contended.
    pub fn try_upgrade(&mut self) -> bool {
        debug_assert_eq!(self.mode, LatchMode::Shared);
        if self.frame().latch().try_upgrade() {
            self.mode = LatchMode::Exclusive;
            true
        } else {
            false
        }
    }

    /// Unconditionally downgrades EX → SH.
    pub fn downgrade(&mut self) {
        debug_assert_eq!(self.mode, LatchMode::Exclusive);
        self.frame().latch().downgrade();
        self.mode = LatchMode::Shared;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        let frame = self.pool.frame(self.frame_id);
        match self.mode {
            LatchMode::Shared => frame.latch().unlock_shared(),
            LatchMode::Exclusive => frame.latch().unlock_exclusive(),
        }
        frame.unpin();
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("mode", &self.mode)
            .finish()
    }
}

/// An optimistic Q-mode fix: no pin, no latch, conflict detection after
/// the fact via the ticket.
pub struct QFix<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
    ticket: QTicket,
}

impl QFix<'_> {
    /// The frame behind the (possibly stale) swizzled pointer.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Copies bytes out of the page. The copy may be torn; it is only
    /// trustworthy because the ticket is validated after the copy, and
    /// an error here means the caller must restart with a real latch.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> BufferResult<()> {
        self.pool.frame(self.frame_id).copy_racy(offset, dst);
        if self.validate() {
            Ok(())
        } else {
            Err(BufferError::LatchQFail)
        }
    }

    /// Whether the ticket is still valid (no writer intervened).
    pub fn validate(&self) -> bool {
        self.pool
            .frame(self.frame_id)
            .latch()
            .validate_q(self.ticket)
    }
}

impl std::fmt::Debug for QFix<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QFix").field("frame", &self.frame_id).finish()
    }
}

/// The extra pin taken by [`BufferPool::pin_for_refix`]; dropping it
/// releases the pin (`unpin_for_refix`).
pub struct RefixPin<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
}

impl RefixPin<'_> {
    /// The pinned frame.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Drop for RefixPin<'_> {
    fn drop(&mut self) {
        self.pool.frame(self.frame_id).unpin();
    }
}

impl std::fmt::Debug for RefixPin<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefixPin")
            .field("frame", &self.frame_id)
            .finish()
    }
}
