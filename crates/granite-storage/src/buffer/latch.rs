//! The per-frame latch.
//!
//! Three modes: any number of shared (SH) holders, one exclusive (EX)
//! holder, and Q — an optimistic read that takes nothing and detects
//! conflicts after the fact through a version ticket.
//!
//! The version word follows seqlock discipline: it is bumped when an EX
//! holder arrives (making it odd) and again when the EX holder leaves or
//! downgrades (even again). A Q ticket is the version observed at
//! acquire; it validates only if the version is unchanged and even, so
//! any intervening EX acquisition invalidates every outstanding ticket.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

/// Latch acquisition mode for fix operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    /// Shared: concurrent readers.
    Shared,
    /// Exclusive: single writer.
    Exclusive,
}

/// A Q-mode ticket: the latch version observed at acquire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QTicket(u64);

#[derive(Debug, Default)]
struct State {
    readers: u32,
    writer: bool,
    waiting_writers: u32,
}

/// Multi-mode reader/writer latch with optimistic Q tickets.
#[derive(Debug, Default)]
pub struct PageLatch {
    state: Mutex<State>,
    cond: Condvar,
    version: AtomicU64,
}

impl PageLatch {
    /// Creates an unlatched latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires in shared mode, blocking.
    pub fn lock_shared(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.cond.wait(&mut state);
        }
        state.readers += 1;
    }

    /// Tries to acquire in shared mode without blocking.
    pub fn try_lock_shared(&self) -> bool {
        let mut state = self.state.lock();
        if state.writer || state.waiting_writers > 0 {
            return false;
        }
        state.readers += 1;
        true
    }

    /// Acquires in exclusive mode, blocking. Bumps the version (odd =
    /// writer active), invalidating outstanding Q tickets.
    pub fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.cond.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Tries to acquire in exclusive mode without blocking.
    pub fn try_lock_exclusive(&self) -> bool {
        let mut state = self.state.lock();
        if state.writer || state.readers > 0 {
            return false;
        }
        state.writer = true;
        self.version.fetch_add(1, Ordering::Release);
        true
    }

    /// Releases a shared hold.
    pub fn unlock_shared(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0);
        state.readers -= 1;
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    /// Releases the exclusive hold. Bumps the version back to even.
    pub fn unlock_exclusive(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer);
        state.writer = false;
        self.version.fetch_add(1, Ordering::Release);
        self.cond.notify_all();
    }

    /// Conditionally upgrades the caller's (sole) shared hold to
    /// exclusive. Fails if any other reader or a writer is present.
    pub fn try_upgrade(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0);
        if state.readers != 1 || state.writer {
            return false;
        }
        state.readers = 0;
        state.writer = true;
        self.version.fetch_add(1, Ordering::Release);
        true
    }

    /// Unconditionally downgrades the exclusive hold to shared. The
    /// version returns to even: the write is complete and readers may
    /// proceed, but old Q tickets stay invalid.
    pub fn downgrade(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer);
        state.writer = false;
        state.readers = 1;
        self.version.fetch_add(1, Ordering::Release);
        self.cond.notify_all();
    }

    /// Starts a Q-mode (optimistic) read. Fails if a writer is active.
    pub fn acquire_q(&self) -> Option<QTicket> {
        let version = self.version.load(Ordering::Acquire);
        if version % 2 == 1 {
            return None;
        }
        Some(QTicket(version))
    }

    /// Validates a Q ticket: no EX holder arrived since acquire.
    pub fn validate_q(&self, ticket: QTicket) -> bool {
        std::sync::atomic::fence(Ordering::Acquire);
        self.version.load(Ordering::Acquire) == ticket.0
    }

    /// Whether any thread holds the latch (SH or EX). Diagnostic only.
    pub fn is_latched(&self) -> bool {
        let state = self.state.lock();
        state.writer || state.readers > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_shared_is_concurrent() {
        let latch = PageLatch::new();
        latch.lock_shared();
        assert!(latch.try_lock_shared());
        latch.unlock_shared();
        latch.unlock_shared();
        assert!(!latch.is_latched());
    }

    #[test]
    fn test_exclusive_excludes() {
        let latch = PageLatch::new();
        latch.lock_exclusive();
        assert!(!latch.try_lock_shared());
        assert!(!latch.try_lock_exclusive());
        latch.unlock_exclusive();
        assert!(latch.try_lock_exclusive());
        latch.unlock_exclusive();
    }

    #[test]
    fn test_upgrade_conditional() {
        let latch = PageLatch::new();
        latch.lock_shared();
        assert!(latch.try_upgrade());
        assert!(!latch.try_lock_shared());
        latch.unlock_exclusive();

        // With a second reader, upgrade must fail.
        latch.lock_shared();
        latch.lock_shared();
        assert!(!latch.try_upgrade());
        latch.unlock_shared();
        assert!(latch.try_upgrade());
        latch.unlock_exclusive();
    }

    #[test]
    fn test_downgrade() {
        let latch = PageLatch::new();
        latch.lock_exclusive();
        latch.downgrade();
        // Other readers may now join.
        assert!(latch.try_lock_shared());
        latch.unlock_shared();
        latch.unlock_shared();
    }

    #[test]
    fn test_q_ticket_invalidated_by_writer() {
        let latch = PageLatch::new();
        let ticket = latch.acquire_q().unwrap();
        assert!(latch.validate_q(ticket));

        latch.lock_exclusive();
        // Writer active: ticket invalid, and new tickets unavailable.
        assert!(!latch.validate_q(ticket));
        assert!(latch.acquire_q().is_none());
        latch.unlock_exclusive();

        // Writer gone, but the intervening EX still invalidates.
        assert!(!latch.validate_q(ticket));
        let fresh = latch.acquire_q().unwrap();
        assert!(latch.validate_q(fresh));
    }

    #[test]
    fn test_q_ticket_survives_readers() {
        let latch = PageLatch::new();
        let ticket = latch.acquire_q().unwrap();
        latch.lock_shared();
        latch.unlock_shared();
        assert!(latch.validate_q(ticket));
    }

    #[test]
    fn test_exclusive_blocks_until_readers_leave() {
        let latch = Arc::new(PageLatch::new());
        latch.lock_shared();

        let latch2 = Arc::clone(&latch);
        let handle = std::thread::spawn(move || {
            latch2.lock_exclusive();
            latch2.unlock_exclusive();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        latch.unlock_shared();
        handle.join().unwrap();
        assert!(!latch.is_latched());
    }
}
