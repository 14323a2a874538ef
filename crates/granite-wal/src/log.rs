//! The log manager.
//!
//! The log is a contiguous byte address space: an LSN is a byte offset.
//! The space is cut into fixed-size partitions, each backed by one file;
//! a record never spans a partition boundary (a group that does not fit
//! in the current partition starts the next one, leaving zeroed padding
//! that readers skip).
//!
//! Insertion goes through the consolidation array: reservation is
//! serialized per group leader, the copy into the reserved region is
//! parallel, and the exposed frontier advances in group order. Bytes at
//! or above the frontier are never read.

use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use granite_common::constants::{WAL_MAGIC, WAL_RECORD_HEADER_SIZE};
use granite_common::types::{Lsn, PageId, VolumeId};

use crate::carray::{ConsolidationArray, ExposeQueue, QueueLock};
use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::record::LogRecord;

/// Bytes reserved at the head of partition 0: magic, version. Keeps
/// LSN 0 invalid.
const LOG_GENESIS: u64 = 8;

/// Log format version.
const LOG_VERSION: u32 = 1;

/// One partition's worth of log bytes.
///
/// Group members copy into disjoint reserved ranges concurrently, so the
/// bytes live in an `UnsafeCell`; disjointness is guaranteed by the
/// consolidation-array reservation, and reads stay below the exposed
/// frontier.
struct PartitionBuf {
    data: UnsafeCell<Box<[u8]>>,
}

// Safety: all concurrent access goes through `write`/`copy_out`, whose
// ranges are disjoint by the reservation/expose protocol.
unsafe impl Sync for PartitionBuf {}
unsafe impl Send for PartitionBuf {}

impl PartitionBuf {
    fn new(size: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    /// Copies `src` into the partition at `off`.
    ///
    /// The caller must hold a reservation covering `off..off + src.len()`.
    fn write(&self, off: usize, src: &[u8]) {
        unsafe {
            let buf = &mut *self.data.get();
            debug_assert!(off + src.len() <= buf.len());
            std::ptr::copy_nonoverlapping(src.as_ptr(), buf.as_mut_ptr().add(off), src.len());
        }
    }

    /// Copies `dst.len()` bytes out of the partition at `off`.
    ///
    /// The range must lie below the exposed frontier.
    fn copy_out(&self, off: usize, dst: &mut [u8]) {
        unsafe {
            let buf = &*self.data.get();
            debug_assert!(off + dst.len() <= buf.len());
            std::ptr::copy_nonoverlapping(buf.as_ptr().add(off), dst.as_mut_ptr(), dst.len());
        }
    }
}

/// The write-ahead log manager.
pub struct LogManager {
    config: WalConfig,
    carray: ConsolidationArray,
    /// Primary queue: serializes group leaders; establishes the total
    /// order of log groups.
    insert_lock: QueueLock,
    /// Secondary queue: serializes exposure of group ranges.
    expose_queue: ExposeQueue,
    /// Reservation cursor (raw end). Only advanced under `insert_lock`.
    reserve_end: AtomicU64,
    /// Exposed frontier: bytes below this are fully copied.
    exposed_end: AtomicU64,
    /// Bytes below this have been written and fsynced to partition files.
    durable_end: AtomicU64,
    /// In-memory partition buffers, index == partition number.
    partitions: RwLock<Vec<Arc<PartitionBuf>>>,
    /// Serializes flushing to partition files.
    flush_lock: Mutex<()>,
}

impl LogManager {
    /// Creates a fresh, empty log in `config.dir`.
    pub fn create(config: WalConfig) -> WalResult<Self> {
        config.validate().map_err(WalError::config)?;
        std::fs::create_dir_all(&config.dir)?;

        let first = PartitionBuf::new(config.partition_size);
        first.write(0, &WAL_MAGIC.to_be_bytes());
        first.write(4, &LOG_VERSION.to_be_bytes());

        Ok(Self {
            config,
            carray: ConsolidationArray::new(),
            insert_lock: QueueLock::new(),
            expose_queue: ExposeQueue::new(),
            reserve_end: AtomicU64::new(LOG_GENESIS),
            exposed_end: AtomicU64::new(LOG_GENESIS),
            // Starts at zero so the first flush also writes the magic
            // header preceding the genesis mark.
            durable_end: AtomicU64::new(0),
            partitions: RwLock::new(vec![Arc::new(first)]),
            flush_lock: Mutex::new(()),
        })
    }

    /// Opens an existing log, scanning partition files to find the end
    /// of the valid record chain.
    pub fn open(config: WalConfig) -> WalResult<Self> {
        config.validate().map_err(WalError::config)?;
        if !config.dir.is_dir() {
            return Err(WalError::DirectoryNotFound {
                path: config.dir.clone(),
            });
        }

        let mut partitions = Vec::new();
        for index in 0..config.max_partitions as u64 {
            let path = config.partition_path(index);
            if !path.exists() {
                break;
            }
            let buf = PartitionBuf::new(config.partition_size);
            let mut file = OpenOptions::new().read(true).open(&path)?;
            let mut bytes = vec![0u8; config.partition_size];
            let n = file.read(&mut bytes)?;
            buf.write(0, &bytes[..n]);
            partitions.push(Arc::new(buf));
        }
        if partitions.is_empty() {
            return Self::create(config);
        }

        let mut magic = [0u8; 4];
        partitions[0].copy_out(0, &mut magic);
        let found = u32::from_be_bytes(magic);
        if found != WAL_MAGIC {
            return Err(WalError::InvalidMagic {
                expected: WAL_MAGIC,
                found,
            });
        }

        let manager = Self {
            config,
            carray: ConsolidationArray::new(),
            insert_lock: QueueLock::new(),
            expose_queue: ExposeQueue::new(),
            reserve_end: AtomicU64::new(LOG_GENESIS),
            exposed_end: AtomicU64::new(LOG_GENESIS),
            durable_end: AtomicU64::new(LOG_GENESIS),
            partitions: RwLock::new(partitions),
            flush_lock: Mutex::new(()),
        };
        let end = manager.scan_end()?;
        manager.reserve_end.store(end, Ordering::Release);
        manager.exposed_end.store(end, Ordering::Release);
        manager.durable_end.store(end, Ordering::Release);
        debug!(end, "opened log");
        Ok(manager)
    }

    /// The configuration this log runs with.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Current end of the log: every record below this LSN is fully
    /// inserted and readable.
    pub fn curr_lsn(&self) -> Lsn {
        Lsn::new(self.exposed_end.load(Ordering::Acquire))
    }

    /// End of the durable (fsynced) prefix of the log.
    pub fn durable_lsn(&self) -> Lsn {
        Lsn::new(self.durable_end.load(Ordering::Acquire))
    }

    /// Inserts a record, returning its LSN.
    ///
    /// The record's header LSN is stamped during the copy; the caller's
    /// record is not mutated.
    pub fn insert(&self, record: &LogRecord) -> WalResult<Lsn> {
        let size = record.encoded_len();
        if size > self.config.max_record_size {
            return Err(WalError::RecordTooLarge {
                size,
                max: self.config.max_record_size,
            });
        }

        let join = self.carray.join_slot(size);
        if join.leader {
            let guard = self.insert_lock.acquire();
            let total = self.carray.close_slot(join) as u64;
            let old_end = self.reserve_end.load(Ordering::Relaxed);
            match self.reserve(old_end, total) {
                Ok((start, new_end)) => {
                    self.reserve_end.store(new_end, Ordering::Release);
                    self.carray
                        .publish_slot(join, old_end, start, new_end, total as u32, false);
                }
                Err(_) => {
                    self.carray
                        .publish_slot(join, old_end, old_end, old_end, total as u32, true);
                }
            }
            self.carray.replace_active_slot(join);
            drop(guard);
        } else {
            self.carray.wait_for_leader(join);
        }

        let slot = self.carray.slot(join.slot);
        let failed = slot.has_error();
        let lsn = Lsn::new(slot.start_pos() + join.offset as u64);
        let expose_start = slot.expose_start();
        let new_end = slot.new_end();

        if !failed {
            let encoded = record.encode(lsn);
            self.copy_into(lsn.as_u64(), &encoded);
        }

        if self.carray.leave_slot(join, size) {
            // Last member out exposes the whole group's range (a failed
            // group reserved nothing, so there is nothing to expose).
            if !failed {
                self.expose_queue
                    .expose(&self.exposed_end, expose_start, new_end);
            }
            self.carray.recycle_slot(join);
        }

        if failed {
            Err(WalError::OutOfLogSpace { requested: size })
        } else {
            Ok(lsn)
        }
    }

    /// Flushes the log to disk at least up to `lsn` (capped at the
    /// exposed frontier) and fsyncs the touched partition files.
    pub fn flush_until(&self, lsn: Lsn) -> WalResult<()> {
        let target = lsn.as_u64().min(self.exposed_end.load(Ordering::Acquire));
        if self.durable_end.load(Ordering::Acquire) >= target {
            return Ok(());
        }

        let _guard = self.flush_lock.lock();
        let mut durable = self.durable_end.load(Ordering::Acquire);
        let psize = self.config.partition_size as u64;
        let mut touched = Vec::new();

        while durable < target {
            let part = durable / psize;
            let part_end = ((part + 1) * psize).min(target);
            let off = (durable % psize) as usize;
            let len = (part_end - durable) as usize;

            let buf = {
                let partitions = self.partitions.read();
                Arc::clone(&partitions[part as usize])
            };
            let mut bytes = vec![0u8; len];
            buf.copy_out(off, &mut bytes);

            let path = self.config.partition_path(part);
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)?;
            file.seek(SeekFrom::Start(off as u64))?;
            file.write_all(&bytes)?;
            touched.push(file);

            durable = part_end;
        }

        for file in &touched {
            file.sync_data()?;
        }
        self.durable_end.store(durable, Ordering::Release);
        Ok(())
    }

    /// Flushes everything inserted so far.
    pub fn sync(&self) -> WalResult<()> {
        self.flush_until(self.curr_lsn())
    }

    /// Reads the record at `lsn`.
    pub fn read_record(&self, lsn: Lsn) -> WalResult<LogRecord> {
        let end = self.exposed_end.load(Ordering::Acquire);
        if !lsn.is_valid() || lsn.as_u64() < LOG_GENESIS || lsn.as_u64() >= end {
            return Err(WalError::LsnNotFound { lsn });
        }

        let psize = self.config.partition_size as u64;
        let part = lsn.as_u64() / psize;
        let off = (lsn.as_u64() % psize) as usize;

        let buf = {
            let partitions = self.partitions.read();
            match partitions.get(part as usize) {
                Some(buf) => Arc::clone(buf),
                None => return Err(WalError::LsnNotFound { lsn }),
            }
        };

        let mut header = [0u8; WAL_RECORD_HEADER_SIZE];
        if off + WAL_RECORD_HEADER_SIZE > self.config.partition_size {
            return Err(WalError::LsnNotFound { lsn });
        }
        buf.copy_out(off, &mut header);
        let total = LogRecord::peek_len(&header).ok_or(WalError::LsnNotFound { lsn })?;
        if off + total > self.config.partition_size {
            return Err(WalError::malformed(lsn, "record overruns partition"));
        }

        let mut bytes = vec![0u8; total];
        buf.copy_out(off, &mut bytes);
        LogRecord::decode(&bytes, self.config.verify_checksums)
    }

    /// Returns, in ascending LSN order, every record with LSN in
    /// `(lo, hi]` that touches `(vol, page)` — the input to single-page
    /// recovery.
    ///
    /// `lo` must be a record boundary (a page's `page_lsn`) or invalid,
    /// in which case the scan starts at the head of the log.
    pub fn redo_chain(
        &self,
        vol: VolumeId,
        page: PageId,
        lo: Lsn,
        hi: Lsn,
    ) -> WalResult<Vec<LogRecord>> {
        let mut out = Vec::new();
        let end = self.exposed_end.load(Ordering::Acquire);
        let mut pos = if lo.is_valid() && lo.as_u64() >= LOG_GENESIS {
            lo.as_u64()
        } else {
            LOG_GENESIS
        };

        let psize = self.config.partition_size as u64;
        while pos < end && pos <= hi.as_u64() {
            let off = (pos % psize) as usize;
            if self.config.partition_size - off < WAL_RECORD_HEADER_SIZE {
                pos = (pos / psize + 1) * psize;
                continue;
            }
            let record = match self.read_record(Lsn::new(pos)) {
                Ok(record) => record,
                // Zeroed padding at the tail of a partition.
                Err(WalError::LsnNotFound { .. }) => {
                    pos = (pos / psize + 1) * psize;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let len = record.encoded_len() as u64;
            if record.touches(vol, page) && pos > lo.as_u64() && pos <= hi.as_u64() {
                out.push(record);
            }
            pos += len;
        }
        Ok(out)
    }

    /// Number of partitions with any content.
    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Reserves `total` bytes starting at or after `old_end`, starting a
    /// new partition if the group would cross a boundary.
    fn reserve(&self, old_end: u64, total: u64) -> WalResult<(u64, u64)> {
        let psize = self.config.partition_size as u64;
        if total > psize {
            return Err(WalError::OutOfLogSpace {
                requested: total as usize,
            });
        }

        let mut start = old_end;
        let part = start / psize;
        let remaining = (part + 1) * psize - start;
        if total > remaining {
            start = (part + 1) * psize;
        }

        let new_end = start + total;
        if new_end > self.config.capacity() {
            return Err(WalError::OutOfLogSpace {
                requested: total as usize,
            });
        }

        let last_part = (new_end - 1) / psize;
        let mut partitions = self.partitions.write();
        while (partitions.len() as u64) <= last_part {
            partitions.push(Arc::new(PartitionBuf::new(self.config.partition_size)));
            debug!(partition = partitions.len() - 1, "opened log partition");
        }
        Ok((start, new_end))
    }

    /// Copies an encoded record into its reserved region.
    fn copy_into(&self, lsn: u64, bytes: &[u8]) {
        let psize = self.config.partition_size as u64;
        let part = lsn / psize;
        let off = (lsn % psize) as usize;
        let buf = {
            let partitions = self.partitions.read();
            Arc::clone(&partitions[part as usize])
        };
        buf.write(off, bytes);
    }

    /// Walks the record chain from the head to find the end of the last
    /// valid record. Used on open.
    fn scan_end(&self) -> WalResult<u64> {
        let psize = self.config.partition_size as u64;
        let partitions = self.partitions.read();
        let mut pos = LOG_GENESIS;
        loop {
            let part = pos / psize;
            if part as usize >= partitions.len() {
                break;
            }
            let off = (pos % psize) as usize;
            if self.config.partition_size - off < WAL_RECORD_HEADER_SIZE {
                pos = (part + 1) * psize;
                continue;
            }
            let mut header = [0u8; WAL_RECORD_HEADER_SIZE];
            partitions[part as usize].copy_out(off, &mut header);
            match LogRecord::peek_len(&header) {
                Some(total) if off + total <= self.config.partition_size => {
                    pos += total as u64;
                }
                // Padding: either the partition tail, or the true end.
                _ => {
                    let next_part = part + 1;
                    if next_part as usize >= partitions.len() {
                        break;
                    }
                    // Only skip ahead if the next partition has content.
                    let mut probe = [0u8; WAL_RECORD_HEADER_SIZE];
                    partitions[next_part as usize].copy_out(0, &mut probe);
                    if LogRecord::peek_len(&probe).is_none() {
                        break;
                    }
                    pos = next_part * psize;
                }
            }
        }
        Ok(pos)
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("curr_lsn", &self.curr_lsn())
            .field("durable_lsn", &self.durable_lsn())
            .field("partitions", &self.partition_count())
            .finish()
    }
}
