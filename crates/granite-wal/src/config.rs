//! WAL configuration.

use std::path::PathBuf;

use granite_common::constants::{DEFAULT_WAL_PARTITION_SIZE, MAX_WAL_RECORD_SIZE};

/// Configuration for the write-ahead log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory where log partition files are stored.
    pub dir: PathBuf,

    /// Size of each log partition in bytes. A record never spans a
    /// partition boundary; a group that does not fit in the current
    /// partition starts the next one.
    pub partition_size: usize,

    /// Maximum number of partitions. Reservations past the last
    /// partition fail with `OutOfLogSpace`.
    pub max_partitions: usize,

    /// Maximum encoded size of a single record.
    pub max_record_size: usize,

    /// Whether to verify record checksums on read.
    pub verify_checksums: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            partition_size: DEFAULT_WAL_PARTITION_SIZE,
            max_partitions: 64,
            max_record_size: MAX_WAL_RECORD_SIZE,
            verify_checksums: true,
        }
    }
}

impl WalConfig {
    /// Creates a new WAL configuration with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the partition size.
    #[must_use]
    pub fn with_partition_size(mut self, size: usize) -> Self {
        self.partition_size = size;
        self
    }

    /// Sets the maximum number of partitions.
    #[must_use]
    pub fn with_max_partitions(mut self, count: usize) -> Self {
        self.max_partitions = count;
        self
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets whether to verify checksums on read.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.partition_size < 4096 {
            return Err("partition size must be at least 4 KB".to_string());
        }
        if self.max_record_size > self.partition_size / 2 {
            return Err("max record size must be at most half the partition size".to_string());
        }
        if self.max_partitions == 0 {
            return Err("max partitions must be positive".to_string());
        }
        Ok(())
    }

    /// Returns the file path for a given partition index.
    pub fn partition_path(&self, partition: u64) -> PathBuf {
        self.dir.join(format!("log_{:016x}.wal", partition))
    }

    /// The partition index a given LSN falls into.
    pub fn partition_for_lsn(&self, lsn: u64) -> u64 {
        lsn / self.partition_size as u64
    }

    /// The byte offset of an LSN within its partition.
    pub fn offset_in_partition(&self, lsn: u64) -> usize {
        (lsn % self.partition_size as u64) as usize
    }

    /// Total reservable capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.partition_size as u64 * self.max_partitions as u64
    }
}
