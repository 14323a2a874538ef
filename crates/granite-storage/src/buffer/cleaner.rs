//! The background dirty-page cleaner.
//!
//! One thread sweeps the pool writing dirty pages back, honoring
//! write-order dependencies (a constrained page is skipped until its
//! dependency is durable) and reclaiming pages flagged to-be-deleted
//! without writing them. The force family and volume unmount drive the
//! same flush paths synchronously; the cleaner just keeps the dirty set
//! small in the background.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use granite_common::types::FrameId;

use crate::buffer::pool::BufferPool;

#[derive(Debug, Default)]
struct CleanerFlags {
    wake: bool,
    stop: bool,
}

/// Shared wakeup state between the pool and the cleaner thread.
#[derive(Debug, Default)]
pub(crate) struct CleanerShared {
    flags: Mutex<CleanerFlags>,
    cond: Condvar,
}

impl CleanerShared {
    pub(crate) fn wake(&self) {
        let mut flags = self.flags.lock();
        flags.wake = true;
        self.cond.notify_one();
    }

    fn stop(&self) {
        let mut flags = self.flags.lock();
        flags.stop = true;
        self.cond.notify_one();
    }
}

/// Handle to the background cleaner thread. Stops (and joins) on drop.
pub struct Cleaner {
    shared: Arc<CleanerShared>,
    handle: Option<JoinHandle<()>>,
}

impl Cleaner {
    /// Spawns a cleaner for `pool`, sweeping at least every `interval`.
    pub fn spawn(pool: Arc<BufferPool>, interval: Duration) -> Self {
        let shared = Arc::new(CleanerShared::default());
        pool.attach_cleaner(Arc::clone(&shared));

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("granite-cleaner".to_string())
            .spawn(move || cleaner_loop(pool, thread_shared, interval))
            .expect("spawn cleaner thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Wakes the cleaner for an immediate pass.
    pub fn wakeup(&self) {
        self.shared.wake();
    }

    /// Stops the cleaner and waits for it to exit.
    pub fn stop(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Cleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn cleaner_loop(pool: Arc<BufferPool>, shared: Arc<CleanerShared>, interval: Duration) {
    debug!("cleaner started");
    loop {
        {
            let mut flags = shared.flags.lock();
            if !flags.wake && !flags.stop {
                shared.cond.wait_for(&mut flags, interval);
            }
            if flags.stop {
                break;
            }
            flags.wake = false;
        }
        clean_pass(&pool);
    }
    // Final drain so a clean shutdown leaves nothing dirty behind.
    clean_pass(&pool);
    debug!("cleaner stopped");
}

fn clean_pass(pool: &BufferPool) {
    let mut written = 0u32;
    let mut deleted = 0u32;
    for idx in 1..=pool.num_frames() {
        let frame_id = FrameId::new(idx as u32);
        let frame = pool.frame(frame_id);
        if !frame.is_used() || !frame.is_dirty() || frame.is_in_doubt() {
            continue;
        }

        if page_flagged_for_deletion(pool, frame_id) {
            match pool.delete_block(frame_id) {
                Ok(()) => deleted += 1,
                // Someone re-fixed it; the next pass gets another shot.
                Err(err) => trace!(frame = idx, %err, "deferred page deletion"),
            }
            continue;
        }

        match pool.flush_frame(frame_id, true) {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(err) => warn!(frame = idx, %err, "cleaner write failed"),
        }
    }
    if written > 0 || deleted > 0 {
        debug!(written, deleted, "cleaner pass");
    }
}

/// Peeks at the to-be-deleted header flag under a conditional SH latch.
fn page_flagged_for_deletion(pool: &BufferPool, frame_id: FrameId) -> bool {
    let frame = pool.frame(frame_id);
    if !frame.latch().try_lock_shared() {
        return false;
    }
    // Safety: SH latch held.
    let flagged = crate::page::PageHeader::read(unsafe { frame.image() })
        .flags
        .to_be_deleted();
    frame.latch().unlock_shared();
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_wake_and_stop_flags() {
        let shared = CleanerShared::default();
        shared.wake();
        assert!(shared.flags.lock().wake);
        shared.stop();
        assert!(shared.flags.lock().stop);
    }
}
