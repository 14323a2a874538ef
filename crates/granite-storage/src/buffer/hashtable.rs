//! The hash index from `(volume, page-id)` to frames.
//!
//! Reads are concurrent and never block on writers of other buckets;
//! installs and removals synchronize per shard. Each entry remembers the
//! frame holding the page and a parent-frame hint used by eviction.

use dashmap::DashMap;

use granite_common::types::{FrameId, PageKey};

/// A hash-index entry: the frame holding the page plus the last known
/// parent frame (a hint; revalidated under the parent latch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePair {
    /// The frame the page occupies.
    pub frame: FrameId,
    /// Last known parent frame, `NULL` if unknown (e.g. roots).
    pub parent: FrameId,
}

/// Concurrent page table.
#[derive(Debug)]
pub struct PageTable {
    map: DashMap<u64, FramePair>,
}

impl PageTable {
    /// Creates a table sized for `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity(capacity),
        }
    }

    /// Looks up a page without blocking on other buckets.
    pub fn lookup(&self, key: PageKey) -> Option<FramePair> {
        self.map.get(&key.as_u64()).map(|entry| *entry)
    }

    /// Installs an entry if absent. Returns `Err` with the existing
    /// entry when another thread won the race.
    pub fn insert_if_absent(&self, key: PageKey, pair: FramePair) -> Result<(), FramePair> {
        match self.map.entry(key.as_u64()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Err(*occupied.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(pair);
                Ok(())
            }
        }
    }

    /// Updates the parent hint of an existing entry.
    pub fn update_parent(&self, key: PageKey, parent: FrameId) {
        if let Some(mut entry) = self.map.get_mut(&key.as_u64()) {
            entry.parent = parent;
        }
    }

    /// Removes an entry, returning it if present.
    pub fn remove(&self, key: PageKey) -> Option<FramePair> {
        self.map.remove(&key.as_u64()).map(|(_, pair)| pair)
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
