//! End-to-end buffer pool scenarios: mount/unmount hygiene, fixing
//! through parents, swizzling transparency, eviction under load, pin
//! discipline, and write-order dependencies.

use std::sync::Arc;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tempfile::TempDir;

use granite_common::types::{Lsn, PageId, StoreId, VolumeId};
use granite_storage::buffer::{
    BufferError, BufferPool, BufferPoolConfig, ChildPointer, EvictUrgency, LatchMode, PageGuard,
};
use granite_storage::page::{ChildSlot, FanoutCodec, PageCodec};
use granite_storage::vol::DiskVolume;
use granite_wal::record::{LogRecord, RecordKind};
use granite_wal::{LogManager, WalConfig};

const VOL: VolumeId = VolumeId::new(1);

struct Harness {
    _tmp: TempDir,
    pool: Arc<BufferPool>,
    volume: Arc<DiskVolume>,
    store: StoreId,
}

fn harness(num_frames: usize) -> Harness {
    let tmp = TempDir::new().unwrap();
    let log = Arc::new(
        LogManager::create(
            WalConfig::new(tmp.path().join("wal"))
                .with_partition_size(64 * 1024)
                .with_max_partitions(64)
                .with_max_record_size(8 * 1024),
        )
        .unwrap(),
    );
    let volume = Arc::new(DiskVolume::create(tmp.path().join("vol1.db"), VOL).unwrap());
    let (store, _root) = volume.create_store().unwrap();

    let pool = Arc::new(
        BufferPool::new(
            BufferPoolConfig::new(num_frames),
            log,
            Arc::new(FanoutCodec),
        )
        .unwrap(),
    );
    pool.install_volume(Arc::clone(&volume)).unwrap();

    Harness {
        _tmp: tmp,
        pool,
        volume,
        store,
    }
}

/// Turns the (pre-loaded, leaf-formatted) root into an inner node with
/// `children` freshly allocated leaf pages, and creates each leaf as a
/// virgin page. Returns the child page ids.
fn build_tree(h: &Harness, children: usize) -> Vec<PageId> {
    let mut pids = Vec::with_capacity(children);
    let mut root = h
        .pool
        .fix_root(VOL, h.store, LatchMode::Exclusive, false)
        .unwrap();
    let root_pid = root.page_id();
    FanoutCodec::format_inner(root.data_mut(), VOL, root_pid, h.store, 2);
    for _ in 0..children {
        let pid = h.volume.alloc_page().unwrap();
        FanoutCodec::add_child(root.data_mut(), pid);
        pids.push(pid);
    }
    log_format_and_dirty(h, &mut root, 2);
    // Keep only SH on the root while creating leaves, so eviction can
    // take its conditional SH latch if the pool runs tight.
    root.downgrade();

    for &pid in &pids {
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pid.as_u32(), LatchMode::Exclusive, false, true)
            .unwrap();
        FanoutCodec::format_leaf(leaf.data_mut(), VOL, pid, h.store);
        log_format_and_dirty(h, &mut leaf, 1);
    }
    pids
}

/// Logs a format record for the page and stamps its LSN, so recovery
/// can always rebuild it from the chain.
fn log_format_and_dirty(h: &Harness, guard: &mut PageGuard<'_>, level: u8) {
    let record = LogRecord::new(
        RecordKind::PageFormat,
        VOL,
        guard.page_id(),
        guard.page_lsn(),
        Bytes::from(FanoutCodec::format_payload(h.store, level)),
    );
    let lsn = h.pool.log().insert(&record).unwrap();
    guard.set_page_lsn(lsn);
    h.pool.set_dirty(guard, lsn);
}

/// Inserts a key into a latched leaf, logging it first.
fn insert_key(h: &Harness, guard: &mut PageGuard<'_>, key: &[u8]) {
    let record = LogRecord::new(
        RecordKind::Insert,
        VOL,
        guard.page_id(),
        guard.page_lsn(),
        Bytes::copy_from_slice(key),
    );
    let lsn = h.pool.log().insert(&record).unwrap();
    FanoutCodec::leaf_insert(guard.data_mut(), key);
    guard.set_page_lsn(lsn);
    h.pool.set_dirty(guard, lsn);
}

#[test]
fn test_mount_unmount_leaves_pool_empty() {
    let h = harness(64);
    // The store root occupies one frame while mounted.
    assert_eq!(h.pool.stats().free_frames, 63);

    h.pool.uninstall_volume(VOL).unwrap();
    let stats = h.pool.stats();
    assert_eq!(stats.free_frames, 64);
    assert_eq!(stats.dirty_frames, 0);
    // The untouched root was never dirtied, so nothing was written.
    assert_eq!(stats.flushes, 0);
}

#[test]
fn test_fix_through_parent_and_read_back() {
    let h = harness(64);
    let pids = build_tree(&h, 3);

    {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        insert_key(&h, &mut leaf, b"aa1");
        insert_key(&h, &mut leaf, b"aa2");
    }

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert!(FanoutCodec::leaf_contains(leaf.data(), b"aa1"));
    assert!(FanoutCodec::leaf_contains(leaf.data(), b"aa2"));
    assert!(!FanoutCodec::leaf_contains(leaf.data(), b"aa3"));
}

#[test]
fn test_swizzle_transparency() {
    let h = harness(64);
    let pids = build_tree(&h, 2);
    let codec = FanoutCodec;

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    // First fix goes through the disk pid and swizzles the slot.
    {
        let leaf = h
            .pool
            .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
            .unwrap();
        assert_eq!(leaf.page_id(), pids[0]);
        assert!(h.pool.is_swizzled(&leaf));
    }

    let offset = codec
        .child_slot_offset(root.data(), ChildSlot::ordinary(1))
        .unwrap();
    let raw = u32::from_be_bytes(root.data()[offset..offset + 4].try_into().unwrap());
    let pointer = ChildPointer::from_raw(raw);
    assert!(pointer.is_swizzled());
    // The swizzled form and the original pid resolve to the same page.
    assert_eq!(h.pool.normalize_pid(raw), pids[0]);

    // Fixing through the swizzled pointer returns the same child.
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, raw, LatchMode::Shared, false, false)
        .unwrap();
    assert_eq!(leaf.page_id(), pids[0]);

    // find_page_id_slot sees through the swizzling.
    assert_eq!(
        h.pool.find_page_id_slot(&root, pids[0]),
        ChildSlot::ordinary(1)
    );
    assert_eq!(
        h.pool.find_page_id_slot(&root, PageId::new(9999)),
        ChildSlot::NOT_FOUND
    );
}

#[test]
fn test_fix_direct_rejects_swizzled_pointer() {
    let h = harness(64);
    let pids = build_tree(&h, 1);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    let swizzled = ChildPointer::swizzled(leaf.frame_id()).raw();
    drop(leaf);
    drop(root);

    let err = h
        .pool
        .fix_direct(VOL, swizzled, LatchMode::Shared, false, false)
        .unwrap_err();
    assert!(matches!(err, BufferError::DirectFixSwizzled { .. }));

    // The plain pid works.
    let leaf = h
        .pool
        .fix_direct(VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert_eq!(leaf.page_id(), pids[0]);
}

#[test]
fn test_conditional_fix_returns_contended() {
    let h = harness(64);
    let pids = build_tree(&h, 1);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let _leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
        .unwrap();

    let err = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, true, false)
        .unwrap_err();
    assert!(matches!(err, BufferError::LatchContended { .. }));
}

#[test]
fn test_q_mode_fix_and_invalidation() {
    let h = harness(64);
    let pids = build_tree(&h, 1);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    {
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        insert_key(&h, &mut leaf, b"qq1");
    }

    // Q mode requires a swizzled pointer.
    let err = h.pool.fix_unsafely_nonroot(pids[0].as_u32()).unwrap_err();
    assert!(matches!(err, BufferError::LatchQFail));

    let codec = FanoutCodec;
    let offset = codec
        .child_slot_offset(root.data(), ChildSlot::ordinary(1))
        .unwrap();
    let raw = u32::from_be_bytes(root.data()[offset..offset + 4].try_into().unwrap());
    assert!(ChildPointer::from_raw(raw).is_swizzled());

    let qfix = h.pool.fix_unsafely_nonroot(raw).unwrap();
    let mut header = [0u8; 32];
    qfix.read(0, &mut header).unwrap();
    assert!(qfix.validate());

    // A writer invalidates the ticket; crabbing from Q demands re-descent.
    {
        let _writer = h
            .pool
            .fix_nonroot(&root, VOL, raw, LatchMode::Exclusive, false, false)
            .unwrap();
    }
    assert!(!qfix.validate());
    let mut buf = [0u8; 8];
    assert!(matches!(qfix.read(0, &mut buf), Err(BufferError::LatchQFail)));
    assert!(matches!(
        h.pool.fix_from_q_parent(&qfix, raw, LatchMode::Shared),
        Err(BufferError::LatchQFail)
    ));
}

#[test]
fn test_pin_for_refix_survives_unfix() {
    let h = harness(64);
    let pids = build_tree(&h, 1);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    let pin = h.pool.pin_for_refix(&leaf);
    drop(leaf);
    drop(root);

    // Even a full-urgency sweep cannot evict the pinned page.
    h.pool.evict_blocks(EvictUrgency::Complete, 64).unwrap();

    let again = h.pool.refix_direct(&pin, LatchMode::Shared, false).unwrap();
    assert_eq!(again.page_id(), pids[0]);
    drop(again);
    drop(pin);
}

#[test]
fn test_eviction_under_load() {
    let h = harness(32);
    // More leaves than the pool can hold.
    let pids = build_tree(&h, 100);
    h.pool.force_all().unwrap();

    // Touch every leaf in random order; misses must drive eviction
    // instead of failing.
    let mut order: Vec<(usize, PageId)> = pids.iter().copied().enumerate().collect();
    order.shuffle(&mut rand::thread_rng());
    for (i, pid) in order {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pid.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        insert_key(&h, &mut leaf, format!("key{i:04}").as_bytes());
    }
    let stats = h.pool.stats();
    assert!(stats.evictions > 0, "eviction must have run");

    // After unmount, the on-disk root must carry no swizzled pointers.
    h.pool.uninstall_volume(VOL).unwrap();
    let root_pid = h.volume.root_of(h.store).unwrap();
    let mut image = vec![0u8; granite_common::constants::PAGE_SIZE];
    h.volume.read_page(root_pid, &mut image).unwrap();
    let codec = FanoutCodec;
    for slot in codec.slots(&image) {
        if let Some(off) = codec.child_slot_offset(&image, slot) {
            let raw = u32::from_be_bytes(image[off..off + 4].try_into().unwrap());
            assert!(
                !ChildPointer::from_raw(raw).is_swizzled(),
                "swizzled pointer escaped to disk"
            );
        }
    }
}

#[test]
fn test_evicted_clean_page_round_trips() {
    let h = harness(64);
    let pids = build_tree(&h, 2);

    {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        insert_key(&h, &mut leaf, b"stable");
    }
    h.pool.force_all().unwrap();
    let before = h.pool.stats().free_frames;
    h.pool.evict_blocks(EvictUrgency::Complete, 64).unwrap();
    assert!(h.pool.stats().free_frames > before);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert!(FanoutCodec::leaf_contains(leaf.data(), b"stable"));
}

#[test]
fn test_write_order_dependency_rules() {
    let h = harness(64);
    let pids = build_tree(&h, 3);

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let mut a = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
        .unwrap();
    let mut b = h
        .pool
        .fix_nonroot(&root, VOL, pids[1].as_u32(), LatchMode::Exclusive, false, false)
        .unwrap();
    insert_key(&h, &mut a, b"a");
    insert_key(&h, &mut b, b"b");

    // A must be written after B.
    h.pool.register_write_order_dependency(&a, &b).unwrap();

    // A second live outgoing edge is rejected.
    let mut c = h
        .pool
        .fix_nonroot(&root, VOL, pids[2].as_u32(), LatchMode::Exclusive, false, false)
        .unwrap();
    insert_key(&h, &mut c, b"c");
    assert!(matches!(
        h.pool.register_write_order_dependency(&a, &c),
        Err(BufferError::WodConflict)
    ));

    // The reverse edge would form a cycle.
    assert!(matches!(
        h.pool.register_write_order_dependency(&b, &a),
        Err(BufferError::WodCycle)
    ));

    drop(a);
    drop(b);
    drop(c);
    // Force resolves the order across passes and drains everything.
    h.pool.force_all().unwrap();
    assert_eq!(h.pool.stats().dirty_frames, 0);
}

#[test]
fn test_rec_lsn_tracking_and_checkpoint_scan() {
    let h = harness(64);
    let pids = build_tree(&h, 2);
    h.pool.force_all().unwrap();

    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let mut leaf = h
        .pool
        .fix_nonroot(&root, VOL, pids[0].as_u32(), LatchMode::Exclusive, false, false)
        .unwrap();
    insert_key(&h, &mut leaf, b"k1");
    let first_dirty = leaf.page_lsn();
    insert_key(&h, &mut leaf, b"k2");

    // rec_lsn pins the first dirtying; page_lsn moves on.
    let (entries, _, min_rec) = h.pool.get_rec_lsn(0, h.pool.num_frames() + 1);
    let entry = entries
        .iter()
        .find(|e| e.page_id == leaf.page_id())
        .expect("dirty page in scan");
    assert_eq!(entry.rec_lsn, first_dirty);
    assert!(entry.page_lsn > entry.rec_lsn || entry.page_lsn == entry.rec_lsn);
    assert!(entry.rec_lsn <= entry.page_lsn);
    assert!(min_rec <= first_dirty);

    // repair_rec_lsn drops a bogus mark on a page that was never dirty.
    h.pool.update_initial_dirty_lsn(&leaf, Lsn::new(1));
    assert_eq!(h.pool.get_rec_lsn(0, 999).0[0].rec_lsn, Lsn::new(1));
}

#[test]
fn test_out_of_buffer_when_everything_pinned() {
    let h = harness(8);
    let pids = build_tree(&h, 7);

    // Pin every leaf (and the root is pinned by the pool itself).
    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let guards: Vec<_> = pids
        .iter()
        .map(|pid| {
            h.pool
                .fix_nonroot(&root, VOL, pid.as_u32(), LatchMode::Shared, false, false)
                .unwrap()
        })
        .collect();

    let extra = h.volume.alloc_page().unwrap();
    let err = h
        .pool
        .fix_direct(VOL, extra.as_u32(), LatchMode::Exclusive, false, true)
        .unwrap_err();
    assert!(matches!(err, BufferError::OutOfBuffer));
    drop(guards);
}
