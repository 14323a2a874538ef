//! The eviction engine.
//!
//! Eviction is single-threaded: one mutex serializes whole rounds,
//! whether driven by a background thread or by a foreground fix that ran
//! out of free frames. The algorithm is a clock sweep over the frame
//! array; a frame is evicted only when every acceptance rule holds, and
//! any failure just skips it.
//!
//! Evicting a child updates the EMLSN its parent stores for it (through
//! a logged system update), so single-page recovery always knows how far
//! to replay.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use tracing::{debug, trace};

use granite_common::constants::UNSWIZZLE_HINT_THRESHOLD;
use granite_common::types::{FrameId, Lsn};
use granite_wal::record::{LogRecord, RecordKind};

use crate::buffer::error::BufferResult;
use crate::buffer::frame::Frame;
use crate::buffer::pool::BufferPool;
use crate::buffer::swizzle::ChildPointer;
use crate::page::{stamp_checksum, ChildSlot, PageHeader, PAGE_LSN_OFFSET};

/// How urgently frames are needed.
///
/// Order matters: higher urgency unlocks more aggressive measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvictUrgency {
    /// One pass over the target batch; give up easily.
    Normal,
    /// Keep sweeping for multiple rounds until the batch is met.
    Eager,
    /// Also unswizzle inner pages to expose more evictable leaves.
    Urgent,
    /// Evict everything possible. Mainly for tests and shutdown.
    Complete,
}

/// What one `evict_blocks` call accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Frames freed.
    pub evicted: u32,
    /// Pointers unswizzled to expose eviction candidates.
    pub unswizzled: u32,
}

/// Clock state, protected by the pool's eviction mutex.
#[derive(Debug)]
pub(crate) struct EvictionState {
    clockhand: usize,
}

impl EvictionState {
    pub(crate) fn new() -> Self {
        Self { clockhand: 0 }
    }

    fn advance(&mut self, num_frames: usize) -> FrameId {
        self.clockhand = self.clockhand % num_frames + 1;
        FrameId::new(self.clockhand as u32)
    }
}

impl BufferPool {
    /// Sweeps the pool evicting up to `preferred_count` frames (at least
    /// the configured batch). Returns how many frames were freed and how
    /// many pointers were unswizzled along the way.
    pub fn evict_blocks(
        &self,
        urgency: EvictUrgency,
        preferred_count: u32,
    ) -> BufferResult<EvictionOutcome> {
        let mut state = self.evict_state.lock();
        let target = if urgency == EvictUrgency::Complete {
            self.config.num_frames as u32
        } else {
            preferred_count.max(self.config.evict_batch())
        };
        let rounds = match urgency {
            EvictUrgency::Normal => 1,
            _ => self.config.evict_max_rounds,
        };

        let mut outcome = EvictionOutcome::default();
        'rounds: for round in 0..rounds {
            for _ in 0..self.config.num_frames {
                if outcome.evicted >= target {
                    break 'rounds;
                }
                let victim = state.advance(self.config.num_frames);
                match self.try_evict_frame(victim, urgency) {
                    Ok(true) => outcome.evicted += 1,
                    Ok(false) => {}
                    Err(err) => {
                        drop(state);
                        return Err(err);
                    }
                }
            }
            if outcome.evicted < target && urgency >= EvictUrgency::Urgent {
                outcome.unswizzled += self.unswizzle_pass()?;
            }
            trace!(round, evicted = outcome.evicted, "eviction round done");
        }

        self.stat_evictions
            .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
        self.stat_unswizzles
            .fetch_add(outcome.unswizzled as u64, Ordering::Relaxed);
        if outcome.evicted > 0 {
            debug!(
                evicted = outcome.evicted,
                unswizzled = outcome.unswizzled,
                ?urgency,
                "evicted frames"
            );
        }
        Ok(outcome)
    }

    /// Applies the acceptance rules to one frame; any failure skips it.
    fn try_evict_frame(&self, frame_id: FrameId, urgency: EvictUrgency) -> BufferResult<bool> {
        let frame = self.frame(frame_id);

        // Rule 1: live, loaded, not owned by recovery.
        if !frame.is_used() || frame.is_in_doubt() || frame.is_recovery_access() {
            return Ok(false);
        }
        if frame.pin_count() != 0 {
            return Ok(false);
        }
        // Clock aging: hot frames get a second chance.
        if urgency != EvictUrgency::Complete && frame.decay_refcount() > 0 {
            return Ok(false);
        }

        // The victim's EX latch, conditionally. Also invalidates any
        // outstanding Q tickets on this frame.
        if !frame.latch().try_lock_exclusive() {
            return Ok(false);
        }
        if !frame.is_used() || frame.is_in_doubt() || frame.is_recovery_access() {
            frame.latch().unlock_exclusive();
            return Ok(false);
        }

        // Safety: EX latch held.
        let header = PageHeader::read(unsafe { frame.image() });
        if header.flags.to_be_deleted() {
            // The cleaner reclaims these.
            frame.latch().unlock_exclusive();
            return Ok(false);
        }
        // Rule 5: leaves only, unless urgency allows inner pages; inner
        // pages with swizzled children are never evictable.
        if !header.is_leaf() {
            let blocked = urgency < EvictUrgency::Urgent || self.frame_has_swizzled_child(frame);
            if blocked {
                frame.latch().unlock_exclusive();
                return Ok(false);
            }
        }

        // Rule 2: publish eviction-in-progress (pin 0 → -1).
        if !frame.try_start_evict() {
            frame.latch().unlock_exclusive();
            return Ok(false);
        }

        // Rule 6: no unresolved outgoing write-order dependency.
        if !self.wod_clear_or_blocked(frame) {
            frame.cancel_evict();
            frame.latch().unlock_exclusive();
            return Ok(false);
        }

        // Rules 3+4: a recorded parent that still points here, SH-latched
        // conditionally. The control block's hint is tried first, then
        // the hash index's parent entry; both are hints and the slot
        // scan below revalidates under the parent latch. (Roots are
        // permanently pinned and never reach this point.)
        let mut parent_id = frame.parent();
        if !parent_id.is_valid() {
            parent_id = self
                .table
                .lookup(frame.page_key())
                .map_or(FrameId::NULL, |pair| pair.parent);
        }
        if !parent_id.is_valid() {
            frame.cancel_evict();
            frame.latch().unlock_exclusive();
            return Ok(false);
        }
        let parent = self.frame(parent_id);
        if !parent.is_used() || !parent.latch().try_lock_shared() {
            frame.cancel_evict();
            frame.latch().unlock_exclusive();
            return Ok(false);
        }
        let Some((slot, slot_offset)) = self.find_child_in_parent(parent, frame, frame_id) else {
            // Stale parent hint.
            parent.latch().unlock_shared();
            frame.cancel_evict();
            frame.latch().unlock_exclusive();
            return Ok(false);
        };

        // Dirty victims are written out first (log first, then page).
        if frame.is_dirty() {
            if let Err(err) = self.write_victim(frame) {
                parent.latch().unlock_shared();
                frame.cancel_evict();
                frame.latch().unlock_exclusive();
                return Err(err);
            }
        }

        // Update the parent's EMLSN for this child, then revert the
        // pointer to disk form.
        if let Err(err) = self.update_child_emlsn(parent, parent_id, slot, frame.page_lsn()) {
            parent.latch().unlock_shared();
            frame.cancel_evict();
            frame.latch().unlock_exclusive();
            return Err(err);
        }
        let raw = parent.load_u32(slot_offset);
        if ChildPointer::from_raw(raw).is_swizzled() {
            parent.store_u32(slot_offset, ChildPointer::disk(frame.page_id()).raw());
        }

        // Detach and free.
        self.table.remove(frame.page_key());
        frame.reset();
        self.freelist.push(frame_id);
        parent.latch().unlock_shared();
        frame.latch().unlock_exclusive();
        Ok(true)
    }

    /// Writes a dirty victim out. EX latch held, pin published as -1.
    fn write_victim(&self, frame: &Frame) -> BufferResult<()> {
        self.log.flush_until(frame.page_lsn())?;
        // Safety: EX latch held.
        let mut image = unsafe { frame.copy_image() };
        self.convert_to_disk_page(frame, &mut image);
        stamp_checksum(&mut image);
        let desc = self.volume(frame.vol())?;
        desc.volume.write_page(frame.page_id(), &image)?;
        frame.set_dirty_flag(false);
        frame.set_rec_lsn(Lsn::INVALID);
        self.stat_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Raises the EMLSN the parent stores for `slot` to `child_lsn`, as
    /// a logged system update. SH on the parent is enough: EMLSN writers
    /// are serialized by the eviction mutex, and the store is one
    /// aligned 64-bit write.
    fn update_child_emlsn(
        &self,
        parent: &Frame,
        _parent_id: FrameId,
        slot: ChildSlot,
        child_lsn: Lsn,
    ) -> BufferResult<()> {
        // Safety: parent SH latch held; EMLSN reads race only with this
        // serialized writer.
        let Some(emlsn_offset) =
            (unsafe { self.codec.child_emlsn_offset(parent.image(), slot) })
        else {
            return Ok(());
        };
        let current = Lsn::new(parent.load_u64(emlsn_offset));
        if current >= child_lsn || !child_lsn.is_valid() {
            return Ok(());
        }

        let record = LogRecord::new(
            RecordKind::SystemEmlsn,
            parent.vol(),
            parent.page_id(),
            parent.page_lsn(),
            Bytes::from(self.codec.emlsn_update_payload(slot, child_lsn)),
        );
        let lsn = self.log.insert(&record)?;

        parent.store_u64(emlsn_offset, child_lsn.as_u64());
        parent.store_u64(PAGE_LSN_OFFSET, lsn.as_u64());
        parent.set_page_lsn(lsn);
        parent.set_dirty_flag(true);
        if !parent.rec_lsn().is_valid() {
            parent.set_rec_lsn(lsn);
        }
        Ok(())
    }

    /// Locates the slot in `parent` pointing at the victim, either as a
    /// swizzled pointer to its frame or as its disk page id.
    fn find_child_in_parent(
        &self,
        parent: &Frame,
        child: &Frame,
        child_frame: FrameId,
    ) -> Option<(ChildSlot, usize)> {
        // Safety: parent SH latch held.
        let image = unsafe { parent.image() };
        let child_pid = child.page_id();
        for slot in self.codec.slots(image) {
            let Some(offset) = self.codec.child_slot_offset(image, slot) else {
                continue;
            };
            let cp = ChildPointer::from_raw(parent.load_u32(offset));
            let matches = if cp.is_swizzled() {
                cp.frame() == child_frame
            } else {
                cp.page() == child_pid
            };
            if matches {
                return Some((slot, offset));
            }
        }
        None
    }

    /// Accurate swizzled-children scan for an EX-latched frame.
    fn frame_has_swizzled_child(&self, frame: &Frame) -> bool {
        // Safety: EX latch held by the caller.
        let image = unsafe { frame.image() };
        self.codec.slots(image).into_iter().any(|slot| {
            self.codec
                .child_slot_offset(image, slot)
                .is_some_and(|off| ChildPointer::from_raw(frame.load_u32(off)).is_swizzled())
        })
    }

    /// Unswizzles a bounded batch of pointers from inner frames whose
    /// conservative hint suggests many swizzled children, exposing their
    /// leaves to the sweep.
    fn unswizzle_pass(&self) -> BufferResult<u32> {
        let mut unswizzled = 0u32;
        for idx in 1..=self.config.num_frames {
            if unswizzled >= self.config.unswizzle_batch {
                break;
            }
            let parent = &self.frames[idx];
            if !parent.is_used() || parent.swizzled_ptr_hint() < UNSWIZZLE_HINT_THRESHOLD {
                continue;
            }
            if !parent.latch().try_lock_exclusive() {
                continue;
            }
            // Safety: parent EX latch held.
            let image = unsafe { parent.image() };
            for slot in self.codec.slots(image) {
                let Some(offset) = self.codec.child_slot_offset(image, slot) else {
                    continue;
                };
                let cp = ChildPointer::from_raw(parent.load_u32(offset));
                if !cp.is_swizzled() {
                    continue;
                }
                let child = self.frame(cp.frame());
                // Unswizzling needs the child unlatched and unpinned.
                if child.pin_count() != 0 || !child.latch().try_lock_exclusive() {
                    continue;
                }
                parent.store_u32(offset, ChildPointer::disk(child.page_id()).raw());
                child.set_swizzled(false);
                child.latch().unlock_exclusive();
                unswizzled += 1;
            }
            parent.latch().unlock_exclusive();
        }
        Ok(unswizzled)
    }
}
