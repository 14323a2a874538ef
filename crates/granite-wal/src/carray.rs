//! Consolidation array for log insertion.
//!
//! Arriving log writers are funneled into a small set of active slots.
//! The first thread to join an empty slot becomes the group's leader: it
//! serializes through the primary insert queue, reserves log-buffer
//! space for the whole group at once, and publishes the result on the
//! slot. Every member then copies its record into its share of the
//! reserved region in parallel, and the group's range is exposed (made
//! readable/flushable) in group order, with lagging groups delegating
//! their exposure to a not-yet-finished predecessor.
//!
//! Slot status is one 64-bit atomic packing `(thread_count << 32) |
//! total_bytes`, so joining a group is a single CAS. Negative values are
//! sentinels; see the constants below.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use granite_common::constants::{CARRAY_ACTIVE_SLOT_COUNT, CARRAY_ALL_SLOT_COUNT};

/// Status of a slot that is active and has no members yet.
pub const SLOT_AVAILABLE: i64 = 0;
/// Status of a slot that sits in the pool, outside the active set.
pub const SLOT_UNUSED: i64 = -1;
/// Stored by the leader to close the slot to new joiners while it
/// reserves buffer space.
pub const SLOT_PENDING: i64 = -2;
/// Published by the leader as `SLOT_FINISHED - total_bytes`; each member
/// adds its own size back on the way out, and the thread that lands
/// exactly on `SLOT_FINISHED` is the last one out.
pub const SLOT_FINISHED: i64 = -4;

/// Added to the status for each joining thread.
const THREAD_INCREMENT: i64 = 1 << 32;
/// Mask extracting the accumulated byte count from a status.
const BYTES_MASK: i64 = 0xFFFF_FFFF;

/// Computes the status after a thread of `size` bytes joins.
#[inline]
fn join_status(current: i64, size: usize) -> i64 {
    debug_assert!(current >= 0);
    current + size as i64 + THREAD_INCREMENT
}

/// Extracts the accumulated byte count from a non-negative status.
#[inline]
fn status_bytes(status: i64) -> u32 {
    debug_assert!(status >= 0);
    (status & BYTES_MASK) as u32
}

/// One slot of the consolidation array.
///
/// All fields are atomics: members read the reservation results after
/// observing the published (`<= SLOT_FINISHED`) status, and the status
/// word itself carries the acquire/release edges.
#[derive(Debug)]
pub struct CArraySlot {
    /// Packed `(thread_count << 32) | bytes`, or a negative sentinel.
    status: AtomicI64,
    /// Group start LSN (the first member's record begins here).
    start_pos: AtomicU64,
    /// Raw log end before this group's reservation. The group exposes
    /// `[expose_start, new_end)`, which also covers any partition
    /// padding the reservation skipped.
    expose_start: AtomicU64,
    /// Raw log end after this group's reservation.
    new_end: AtomicU64,
    /// Set by the leader when reservation failed with out-of-log-space.
    error: AtomicBool,
}

impl CArraySlot {
    fn new(status: i64) -> Self {
        Self {
            status: AtomicI64::new(status),
            start_pos: AtomicU64::new(0),
            expose_start: AtomicU64::new(0),
            new_end: AtomicU64::new(0),
            error: AtomicBool::new(false),
        }
    }

    /// Group start LSN. Valid once the leader has published.
    #[inline]
    pub fn start_pos(&self) -> u64 {
        self.start_pos.load(Ordering::Acquire)
    }

    /// Exposed range start. Valid once the leader has published.
    #[inline]
    pub fn expose_start(&self) -> u64 {
        self.expose_start.load(Ordering::Acquire)
    }

    /// Exposed range end. Valid once the leader has published.
    #[inline]
    pub fn new_end(&self) -> u64 {
        self.new_end.load(Ordering::Acquire)
    }

    /// Whether the leader recorded an out-of-space failure.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }
}

/// Membership in a slot, returned by [`ConsolidationArray::join_slot`].
#[derive(Debug, Clone, Copy)]
pub struct SlotJoin {
    /// Index of the joined slot in the full slot pool.
    pub slot: usize,
    /// Index in the active set the slot was reached through.
    pub active_index: usize,
    /// This thread's byte offset within the group's reservation.
    pub offset: u32,
    /// Whether this thread is the group leader (first joiner).
    pub leader: bool,
}

/// The consolidation array.
pub struct ConsolidationArray {
    /// All slots, including available, in-flight, and pooled ones.
    all_slots: Box<[CArraySlot]>,
    /// Indices (into `all_slots`) of the currently active slots.
    active_slots: [AtomicUsize; CARRAY_ACTIVE_SLOT_COUNT],
    /// Clockhand over the active set. Not precise by design; the slot
    /// itself is obtained atomically.
    clockhand: AtomicUsize,
}

impl ConsolidationArray {
    /// Creates the array with the first `CARRAY_ACTIVE_SLOT_COUNT` slots
    /// active and the rest pooled.
    pub fn new() -> Self {
        let all_slots: Box<[CArraySlot]> = (0..CARRAY_ALL_SLOT_COUNT)
            .map(|i| {
                if i < CARRAY_ACTIVE_SLOT_COUNT {
                    CArraySlot::new(SLOT_AVAILABLE)
                } else {
                    CArraySlot::new(SLOT_UNUSED)
                }
            })
            .collect();
        let active_slots = std::array::from_fn(|i| AtomicUsize::new(i));
        Self {
            all_slots,
            active_slots,
            clockhand: AtomicUsize::new(0),
        }
    }

    /// Returns a slot by pool index.
    #[inline]
    pub fn slot(&self, idx: usize) -> &CArraySlot {
        &self.all_slots[idx]
    }

    /// Atomically joins some active slot with `size` bytes of log.
    ///
    /// Spins over the active set until a CAS on an open (`status >= 0`)
    /// slot succeeds. The first joiner of a slot becomes the leader.
    pub fn join_slot(&self, size: usize) -> SlotJoin {
        debug_assert!(size > 0 && size <= BYTES_MASK as usize);
        loop {
            let hand = self.clockhand.load(Ordering::Relaxed);
            let active_index = hand % CARRAY_ACTIVE_SLOT_COUNT;
            let slot_idx = self.active_slots[active_index].load(Ordering::Acquire);
            let slot = &self.all_slots[slot_idx];

            let current = slot.status.load(Ordering::Acquire);
            if current >= 0 {
                let newval = join_status(current, size);
                if slot
                    .status
                    .compare_exchange(current, newval, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return SlotJoin {
                        slot: slot_idx,
                        active_index,
                        offset: status_bytes(current),
                        leader: current == SLOT_AVAILABLE,
                    };
                }
            }
            // Contended or closed; move the clockhand along and retry.
            self.clockhand.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Leader only: closes the slot to new joiners and returns the
    /// accumulated total byte count of the group.
    ///
    /// Must be called while holding the primary insert queue lock.
    pub fn close_slot(&self, join: SlotJoin) -> u32 {
        debug_assert!(join.leader);
        let slot = &self.all_slots[join.slot];
        let old = slot.status.swap(SLOT_PENDING, Ordering::AcqRel);
        debug_assert!(old >= 0, "slot closed twice");
        status_bytes(old)
    }

    /// Leader only: publishes the reservation results and opens the
    /// leave phase (`status = SLOT_FINISHED - total_bytes`).
    pub fn publish_slot(
        &self,
        join: SlotJoin,
        expose_start: u64,
        start_pos: u64,
        new_end: u64,
        total_bytes: u32,
        error: bool,
    ) {
        debug_assert!(join.leader);
        let slot = &self.all_slots[join.slot];
        slot.expose_start.store(expose_start, Ordering::Release);
        slot.start_pos.store(start_pos, Ordering::Release);
        slot.new_end.store(new_end, Ordering::Release);
        slot.error.store(error, Ordering::Release);
        slot.status
            .store(SLOT_FINISHED - total_bytes as i64, Ordering::Release);
    }

    /// Member only: spins until the leader has published the group's
    /// reservation.
    pub fn wait_for_leader(&self, join: SlotJoin) {
        debug_assert!(!join.leader);
        let slot = &self.all_slots[join.slot];
        let mut spins = 0u32;
        while slot.status.load(Ordering::Acquire) > SLOT_FINISHED {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Leaves the slot after copying. Returns true if this thread was
    /// the last member out; the caller must then retire the slot with
    /// [`Self::recycle_slot`].
    pub fn leave_slot(&self, join: SlotJoin, size: usize) -> bool {
        let slot = &self.all_slots[join.slot];
        let new = slot.status.fetch_add(size as i64, Ordering::AcqRel) + size as i64;
        debug_assert!(new <= SLOT_FINISHED);
        new == SLOT_FINISHED
    }

    /// Returns a fully-drained slot to the pool.
    pub fn recycle_slot(&self, join: SlotJoin) {
        let slot = &self.all_slots[join.slot];
        debug_assert_eq!(slot.status.load(Ordering::Acquire), SLOT_FINISHED);
        slot.status.store(SLOT_UNUSED, Ordering::Release);
    }

    /// Leader only: swaps a fresh slot from the pool into the active
    /// position the group was reached through.
    ///
    /// The retiring slot must already be closed (`SLOT_PENDING` or
    /// later), so late joiners that still see the old pointer fail their
    /// CAS and retry against the replacement.
    pub fn replace_active_slot(&self, join: SlotJoin) {
        debug_assert!(join.leader);
        // Claim an unused slot from the pool.
        let fresh = loop {
            let mut found = None;
            for (i, slot) in self.all_slots.iter().enumerate() {
                if slot
                    .status
                    .compare_exchange(
                        SLOT_UNUSED,
                        SLOT_AVAILABLE,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    found = Some(i);
                    break;
                }
            }
            match found {
                Some(i) => break i,
                // The pool is large relative to the active set, so this
                // only happens when every slot is mid-drain; wait.
                None => std::thread::yield_now(),
            }
        };
        self.active_slots[join.active_index].store(fresh, Ordering::Release);
    }
}

impl Default for ConsolidationArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsolidationArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active: Vec<usize> = self
            .active_slots
            .iter()
            .map(|a| a.load(Ordering::Relaxed))
            .collect();
        f.debug_struct("ConsolidationArray")
            .field("active_slots", &active)
            .field("clockhand", &self.clockhand.load(Ordering::Relaxed))
            .finish()
    }
}

/// FIFO queue lock serializing group leaders.
///
/// The order in which leaders pass through this lock is the total order
/// of log groups, and therefore of LSNs across groups.
#[derive(Debug, Default)]
pub struct QueueLock {
    next: AtomicU64,
    serving: AtomicU64,
}

/// Guard for [`QueueLock`]; releases on drop.
#[derive(Debug)]
pub struct QueueLockGuard<'a> {
    lock: &'a QueueLock,
}

impl QueueLock {
    /// Creates an unlocked queue lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, queueing in FIFO order.
    pub fn acquire(&self) -> QueueLockGuard<'_> {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let mut spins = 0u32;
        while self.serving.load(Ordering::Acquire) != ticket {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        QueueLockGuard { lock: self }
    }
}

impl Drop for QueueLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.serving.fetch_add(1, Ordering::Release);
    }
}

/// The expose (buffer release) side of the consolidation array.
///
/// A group may only advance the exposed frontier when the frontier has
/// reached its own range start; a group that arrives early delegates its
/// range to the still-running predecessor, which exposes it on its own
/// release.
#[derive(Debug, Default)]
pub struct ExposeQueue {
    /// Delegated ranges, keyed by range start.
    pending: Mutex<BTreeMap<u64, u64>>,
}

impl ExposeQueue {
    /// Creates an empty expose queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes `[start, new_end)`, advancing `frontier`.
    ///
    /// Returns true if the range was delegated to a predecessor instead
    /// of being exposed by the calling thread. After exposing its own
    /// range, the caller drains any ranges that successors delegated to
    /// it.
    pub fn expose(&self, frontier: &AtomicU64, start: u64, new_end: u64) -> bool {
        let mut pending = self.pending.lock();
        if frontier.load(Ordering::Acquire) != start {
            // Predecessor still holds the frontier; it will expose us.
            pending.insert(start, new_end);
            return true;
        }
        frontier.store(new_end, Ordering::Release);
        let mut cur = new_end;
        while let Some(end) = pending.remove(&cur) {
            frontier.store(end, Ordering::Release);
            cur = end;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_status_packing() {
        let joined = join_status(SLOT_AVAILABLE, 100);
        assert_eq!(status_bytes(joined), 100);

        let joined2 = join_status(joined, 50);
        assert_eq!(status_bytes(joined2), 150);
        assert_eq!(joined2 >> 32, 2); // two threads
    }

    #[test]
    fn test_sentinels_distinguishable() {
        assert!(SLOT_UNUSED < SLOT_AVAILABLE);
        assert!(SLOT_PENDING < SLOT_UNUSED);
        assert!(SLOT_FINISHED < SLOT_PENDING);
        // A published status is always strictly below SLOT_FINISHED for
        // a non-empty group.
        assert!(SLOT_FINISHED - 1 < SLOT_FINISHED);
    }

    #[test]
    fn test_single_thread_group() {
        let carray = ConsolidationArray::new();
        let join = carray.join_slot(64);
        assert!(join.leader);
        assert_eq!(join.offset, 0);

        let total = carray.close_slot(join);
        assert_eq!(total, 64);

        carray.publish_slot(join, 8, 8, 72, total, false);
        carray.replace_active_slot(join);

        assert!(carray.leave_slot(join, 64));
        carray.recycle_slot(join);
    }

    #[test]
    fn test_second_joiner_gets_offset() {
        let carray = ConsolidationArray::new();
        let first = carray.join_slot(100);
        assert!(first.leader);

        let second = carray.join_slot(40);
        assert_eq!(second.slot, first.slot);
        assert!(!second.leader);
        assert_eq!(second.offset, 100);

        let total = carray.close_slot(first);
        assert_eq!(total, 140);
        carray.publish_slot(first, 0, 0, 140, total, false);
        carray.replace_active_slot(first);

        assert!(!carray.leave_slot(first, 100));
        assert!(carray.leave_slot(second, 40));
        carray.recycle_slot(second);
    }

    #[test]
    fn test_closed_slot_rejects_joiners() {
        let carray = ConsolidationArray::new();
        let leader = carray.join_slot(10);
        carray.close_slot(leader);

        // The next join must land on a different slot (the clockhand
        // advances past the pending one).
        let other = carray.join_slot(10);
        assert_ne!(other.slot, leader.slot);
        assert!(other.leader);
    }

    #[test]
    fn test_concurrent_joins_unique_lsns() {
        const THREADS: usize = 8;
        const SIZE: usize = 16;

        let carray = Arc::new(ConsolidationArray::new());
        let insert_lock = Arc::new(QueueLock::new());
        // Stand-in for the log's reservation cursor.
        let cursor = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let carray = Arc::clone(&carray);
            let insert_lock = Arc::clone(&insert_lock);
            let cursor = Arc::clone(&cursor);
            handles.push(std::thread::spawn(move || {
                let join = carray.join_slot(SIZE);
                if join.leader {
                    let _guard = insert_lock.acquire();
                    let total = carray.close_slot(join);
                    let start = cursor.fetch_add(total as u64, Ordering::AcqRel);
                    carray.publish_slot(join, start, start, start + total as u64, total, false);
                    carray.replace_active_slot(join);
                } else {
                    carray.wait_for_leader(join);
                }
                let lsn = carray.slot(join.slot).start_pos() + join.offset as u64;
                if carray.leave_slot(join, SIZE) {
                    carray.recycle_slot(join);
                }
                lsn
            }));
        }

        let mut lsns: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        lsns.sort_unstable();
        lsns.dedup();
        // Every thread got a distinct LSN, across groups and within them.
        assert_eq!(lsns.len(), THREADS);
    }

    #[test]
    fn test_queue_lock_is_fifo_exclusive() {
        let lock = Arc::new(QueueLock::new());
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = lock.acquire();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }

    #[test]
    fn test_expose_in_order() {
        let queue = ExposeQueue::new();
        let frontier = AtomicU64::new(0);

        assert!(!queue.expose(&frontier, 0, 10));
        assert_eq!(frontier.load(Ordering::Relaxed), 10);
        assert!(!queue.expose(&frontier, 10, 25));
        assert_eq!(frontier.load(Ordering::Relaxed), 25);
    }

    #[test]
    fn test_expose_delegation() {
        let queue = ExposeQueue::new();
        let frontier = AtomicU64::new(0);

        // Successors arrive before the predecessor: both delegate.
        assert!(queue.expose(&frontier, 10, 20));
        assert!(queue.expose(&frontier, 20, 35));
        assert_eq!(frontier.load(Ordering::Relaxed), 0);

        // The predecessor exposes itself plus both delegated ranges.
        assert!(!queue.expose(&frontier, 0, 10));
        assert_eq!(frontier.load(Ordering::Relaxed), 35);
    }

    #[test]
    fn test_concurrent_expose_reaches_total() {
        const GROUPS: u64 = 64;
        let queue = Arc::new(ExposeQueue::new());
        let frontier = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for g in 0..GROUPS {
            let queue = Arc::clone(&queue);
            let frontier = Arc::clone(&frontier);
            handles.push(std::thread::spawn(move || {
                queue.expose(&frontier, g * 10, (g + 1) * 10);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(frontier.load(Ordering::Relaxed), GROUPS * 10);
    }
}
