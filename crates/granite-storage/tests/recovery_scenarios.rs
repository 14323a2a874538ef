//! Recovery scenarios: single-page recovery of corrupt images, split
//! records recovered across two pages, and the in-doubt → dirty → clean
//! lifecycle across a simulated restart.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use granite_common::constants::PAGE_SIZE;
use granite_common::types::{Lsn, PageId, PageKey, StoreId, VolumeId};
use granite_storage::buffer::{BufferPool, BufferPoolConfig, LatchMode, PageGuard};
use granite_storage::page::{ChildSlot, FanoutCodec, PageCodec};
use granite_storage::vol::{DiskVolume, FileBackup};
use granite_wal::record::{LogRecord, RecordKind};
use granite_wal::{LogManager, WalConfig};

const VOL: VolumeId = VolumeId::new(1);

struct Harness {
    tmp: TempDir,
    log: Arc<LogManager>,
    pool: Arc<BufferPool>,
    volume: Arc<DiskVolume>,
    store: StoreId,
}

fn wal_config(tmp: &TempDir) -> WalConfig {
    WalConfig::new(tmp.path().join("wal"))
        .with_partition_size(8 * 1024)
        .with_max_partitions(64)
        .with_max_record_size(4 * 1024)
}

fn harness(num_frames: usize, with_backup: bool) -> Harness {
    let tmp = TempDir::new().unwrap();
    let log = Arc::new(LogManager::create(wal_config(&tmp)).unwrap());
    let volume = Arc::new(DiskVolume::create(tmp.path().join("vol1.db"), VOL).unwrap());
    let (store, _root) = volume.create_store().unwrap();

    let mut pool = BufferPool::new(
        BufferPoolConfig::new(num_frames),
        Arc::clone(&log),
        Arc::new(FanoutCodec),
    )
    .unwrap();
    if with_backup {
        pool = pool.with_backup(Arc::new(FileBackup::new(tmp.path().join("backup"))));
    }
    let pool = Arc::new(pool);
    pool.install_volume(Arc::clone(&volume)).unwrap();

    Harness {
        tmp,
        log,
        pool,
        volume,
        store,
    }
}

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
    log_record(
        h,
        &mut root,
        RecordKind::PageFormat,
        FanoutCodec::format_payload(h.store, 2),
    );
    root.downgrade();

    for &pid in &pids {
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, pid.as_u32(), LatchMode::Exclusive, false, true)
            .unwrap();
        FanoutCodec::format_leaf(leaf.data_mut(), VOL, pid, h.store);
        log_record(
            h,
            &mut leaf,
            RecordKind::PageFormat,
            FanoutCodec::format_payload(h.store, 1),
        );
    }
    pids
}

fn log_record(h: &Harness, guard: &mut PageGuard<'_>, kind: RecordKind, payload: Vec<u8>) -> Lsn {
    let record = LogRecord::new(kind, VOL, guard.page_id(), guard.page_lsn(), Bytes::from(payload));
    let lsn = h.log.insert(&record).unwrap();
    FanoutCodec
        .apply_redo(&record, guard.data_mut())
        .expect("redo applies");
    guard.set_page_lsn(lsn);
    h.pool.set_dirty(guard, lsn);
    lsn
}

/// Damages `len` bytes of the page at byte `offset` directly on disk.
fn corrupt_on_disk(h: &Harness, pid: PageId, offset: usize, len: usize) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(h.volume.path())
        .unwrap();
    file.seek(SeekFrom::Start(
        pid.as_u32() as u64 * PAGE_SIZE as u64 + offset as u64,
    ))
    .unwrap();
    file.write_all(&vec![0xC7u8; len]).unwrap();
    file.sync_data().unwrap();
}

#[test]
fn test_spr_recovers_corrupt_page() {
    let h = harness(16, true);
    let pids = build_tree(&h, 2);
    let target = pids[0];

    // Populate and persist, then take the backup.
    {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, target.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        for key in [b"aa1".as_ref(), b"aa2", b"aa3"] {
            log_record(&h, &mut leaf, RecordKind::Insert, key.to_vec());
        }
    }
    h.pool.force_all().unwrap();
    h.volume.sync().unwrap();
    let backup = FileBackup::new(h.tmp.path().join("backup"));
    backup.backup_volume(&h.volume).unwrap();

    // Delete a key, then append enough unrelated log to cross several
    // partitions.
    {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, target.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        log_record(&h, &mut leaf, RecordKind::Delete, b"aa2".to_vec());

        let mut other = h
            .pool
            .fix_nonroot(&root, VOL, pids[1].as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        for i in 0..200 {
            log_record(
                &h,
                &mut other,
                RecordKind::Insert,
                format!("filler{i:03}").into_bytes(),
            );
        }
    }
    assert!(h.log.partition_count() > 1, "log should have wrapped");

    // Flush and evict everything, then damage the target on disk.
    h.pool.force_all().unwrap();
    h.pool
        .evict_blocks(granite_storage::buffer::EvictUrgency::Complete, 16)
        .unwrap();
    corrupt_on_disk(&h, target, 1234, 987);

    // The next fix detects the damage and repairs through backup + log.
    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let leaf = h
        .pool
        .fix_nonroot(&root, VOL, target.as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert!(!FanoutCodec::leaf_contains(leaf.data(), b"aa2"), "deleted key returned");
    assert!(FanoutCodec::leaf_contains(leaf.data(), b"aa1"));
    assert!(FanoutCodec::leaf_contains(leaf.data(), b"aa3"));
    assert!(h.pool.stats().page_repairs >= 1);
}

#[test]
fn test_spr_multi_page_split() {
    let h = harness(16, true);
    let pids = build_tree(&h, 1);
    let source = pids[0];

    // Fill the source leaf and persist; back up this state.
    {
        let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
        let mut leaf = h
            .pool
            .fix_nonroot(&root, VOL, source.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        for key in [b"a".as_ref(), b"b", b"c", b"d"] {
            log_record(&h, &mut leaf, RecordKind::Insert, key.to_vec());
        }
    }
    h.pool.force_all().unwrap();
    h.volume.sync().unwrap();
    FileBackup::new(h.tmp.path().join("backup"))
        .backup_volume(&h.volume)
        .unwrap();

    // Split: keys c, d move to a fresh sibling. The sibling page is
    // registered in the root, but its image never reaches disk (the
    // crash window).
    let sibling = h.volume.alloc_page().unwrap();
    let moved = vec![b"c".to_vec(), b"d".to_vec()];
    let split_lsn;
    {
        let mut root = h
            .pool
            .fix_root(VOL, h.store, LatchMode::Exclusive, false)
            .unwrap();
        FanoutCodec::add_child(root.data_mut(), sibling);

        let mut src = h
            .pool
            .fix_nonroot(&root, VOL, source.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        let record = LogRecord::new_multi_page(
            RecordKind::PageSplit,
            VOL,
            source,
            sibling,
            src.page_lsn(),
            Bytes::from(FanoutCodec::split_payload(h.store, &moved)),
        );
        split_lsn = h.log.insert(&record).unwrap();
        FanoutCodec.apply_redo(&record, src.data_mut()).unwrap();
        src.set_page_lsn(split_lsn);
        h.pool.set_dirty(&src, split_lsn);
        drop(src);

        // Record the sibling's EMLSN in the root so recovery knows how
        // far to replay it.
        let slot = h.pool.find_page_id_slot(&root, sibling);
        assert_ne!(slot, ChildSlot::NOT_FOUND);
        let emlsn_off = FanoutCodec
            .child_emlsn_offset(root.data(), slot)
            .expect("sibling slot has an EMLSN word");
        root.data_mut()[emlsn_off..emlsn_off + 8].copy_from_slice(&split_lsn.to_be_bytes());
        root.set_page_lsn(split_lsn);
        h.pool.set_dirty(&root, split_lsn);
    }
    h.log.sync().unwrap();

    // Persist the source side only; the sibling stays unwritten.
    h.pool.force_all().unwrap();
    h.pool
        .evict_blocks(granite_storage::buffer::EvictUrgency::Complete, 16)
        .unwrap();

    // Fixing the never-written sibling triggers SPR, which rebuilds it
    // from the split record (recovering across both pages).
    let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
    let dest = h
        .pool
        .fix_nonroot(&root, VOL, sibling.as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert!(FanoutCodec::leaf_contains(dest.data(), b"c"));
    assert!(FanoutCodec::leaf_contains(dest.data(), b"d"));
    assert_eq!(dest.page_lsn(), split_lsn);
    drop(dest);

    // The source side kept its remaining keys.
    let src = h
        .pool
        .fix_nonroot(&root, VOL, source.as_u32(), LatchMode::Shared, false, false)
        .unwrap();
    assert!(FanoutCodec::leaf_contains(src.data(), b"a"));
    assert!(FanoutCodec::leaf_contains(src.data(), b"b"));
    assert!(!FanoutCodec::leaf_contains(src.data(), b"c"));
}

#[test]
fn test_in_doubt_lifecycle_across_restart() {
    let tmp_holder;
    let committed_lsn;
    let target;
    // Phase 1: run, commit work, crash without flushing pages.
    {
        let h = harness(16, false);
        let pids = build_tree(&h, 1);
        target = pids[0];
        {
            let root = h.pool.fix_root(VOL, h.store, LatchMode::Shared, false).unwrap();
            let mut leaf = h
                .pool
                .fix_nonroot(&root, VOL, target.as_u32(), LatchMode::Exclusive, false, false)
                .unwrap();
            log_record(&h, &mut leaf, RecordKind::Insert, b"aa1".to_vec());
            log_record(&h, &mut leaf, RecordKind::Insert, b"aa2".to_vec());
            committed_lsn = log_record(&h, &mut leaf, RecordKind::Insert, b"aa3".to_vec());
        }
        // The log is durable; the pages are not.
        h.log.sync().unwrap();
        h.volume.sync().unwrap();
        tmp_holder = h.tmp;
        // Pool and volume drop here: the crash.
    }

    // Phase 2: restart. Log analysis would find `target` in the log;
    // drive the in-doubt machinery by hand.
    let log = Arc::new(LogManager::open(wal_config(&tmp_holder)).unwrap());
    let volume = Arc::new(DiskVolume::open(tmp_holder.path().join("vol1.db")).unwrap());
    let store = StoreId::new(1);
    let pool = Arc::new(
        BufferPool::new(
            BufferPoolConfig::new(16).with_swizzling(false),
            Arc::clone(&log),
            Arc::new(FanoutCodec),
        )
        .unwrap(),
    );
    pool.install_volume(Arc::clone(&volume)).unwrap();

    let key = PageKey::new(VOL, target);
    let chain = log
        .redo_chain(VOL, target, Lsn::INVALID, Lsn::MAX)
        .unwrap();
    assert!(!chain.is_empty());
    let first = chain.first().unwrap().lsn;
    let last = chain.last().unwrap().lsn;
    assert_eq!(last, committed_lsn);

    // Analysis: register the page in-doubt.
    let frame_id = pool.register_and_mark(key, store, first, last).unwrap();
    assert!(pool.is_in_doubt(frame_id));
    assert_eq!(pool.lookup_in_doubt(key), Some(frame_id));

    // REDO: load the (never flushed, hence zeroed) image and replay.
    pool.load_for_redo(frame_id, VOL, target).unwrap();
    assert!(!pool.is_in_doubt(frame_id));
    {
        let mut guard = pool
            .fix_direct(VOL, target.as_u32(), LatchMode::Exclusive, false, false)
            .unwrap();
        for record in &chain {
            if record.lsn > guard.page_lsn() {
                FanoutCodec.apply_redo(record, guard.data_mut()).unwrap();
                guard.set_page_lsn(record.lsn);
            }
        }
        pool.set_dirty(&guard, first);
        pool.update_initial_dirty_lsn(&guard, first);
        assert!(pool.is_dirty(&guard));
        // The committed keys are all back.
        for key in [b"aa1".as_ref(), b"aa2", b"aa3"] {
            assert!(FanoutCodec::leaf_contains(guard.data(), key));
        }
    }

    // Clean: force everything and verify the page settles clean.
    pool.force_all().unwrap();
    assert_eq!(pool.stats().dirty_frames, 0);
}
