//! The volume layer: one page file per volume, with a superblock that
//! carries the allocation cursor and the store directory (each store's
//! root page id), plus the backup store that single-page recovery pulls
//! full page images from.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use granite_common::constants::{PAGE_SIZE, VOLUME_MAGIC};
use granite_common::types::{PageId, StoreId, VolumeId};

use crate::error::{StorageError, StorageResult};

/// Superblock layout, stored in page 0:
/// magic (4), version (4), vol (4), page_count (4), store_count (4),
/// then one root page id (4) per store, 1-based (store 0 is reserved).
const VOLUME_VERSION: u32 = 1;
const SUPERBLOCK_FIXED: usize = 20;

/// Maximum stores per volume (bounded by the superblock page).
pub const MAX_STORES: usize = (PAGE_SIZE - SUPERBLOCK_FIXED) / 4;

#[derive(Debug, Clone)]
struct Superblock {
    page_count: u32,
    /// roots[i] is the root page of store i+1; 0 if unused.
    roots: Vec<u32>,
}

impl Superblock {
    fn encode(&self, vol: VolumeId) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&VOLUME_MAGIC.to_be_bytes());
        page[4..8].copy_from_slice(&VOLUME_VERSION.to_be_bytes());
        page[8..12].copy_from_slice(&vol.as_u32().to_be_bytes());
        page[12..16].copy_from_slice(&self.page_count.to_be_bytes());
        page[16..20].copy_from_slice(&(self.roots.len() as u32).to_be_bytes());
        for (i, root) in self.roots.iter().enumerate() {
            let off = SUPERBLOCK_FIXED + i * 4;
            page[off..off + 4].copy_from_slice(&root.to_be_bytes());
        }
        page
    }

    fn decode(page: &[u8], path: &Path) -> StorageResult<(VolumeId, Self)> {
        let magic = u32::from_be_bytes(page[0..4].try_into().unwrap());
        if magic != VOLUME_MAGIC {
            return Err(StorageError::InvalidSuperblock {
                path: path.to_path_buf(),
                reason: format!("bad magic {magic:#010x}"),
            });
        }
        let version = u32::from_be_bytes(page[4..8].try_into().unwrap());
        if version != VOLUME_VERSION {
            return Err(StorageError::InvalidSuperblock {
                path: path.to_path_buf(),
                reason: format!("unsupported version {version}"),
            });
        }
        let vol = VolumeId::new(u32::from_be_bytes(page[8..12].try_into().unwrap()));
        let page_count = u32::from_be_bytes(page[12..16].try_into().unwrap());
        let store_count = u32::from_be_bytes(page[16..20].try_into().unwrap()) as usize;
        if store_count > MAX_STORES {
            return Err(StorageError::InvalidSuperblock {
                path: path.to_path_buf(),
                reason: format!("store count {store_count} too large"),
            });
        }
        let mut roots = Vec::with_capacity(store_count);
        for i in 0..store_count {
            let off = SUPERBLOCK_FIXED + i * 4;
            roots.push(u32::from_be_bytes(page[off..off + 4].try_into().unwrap()));
        }
        Ok((vol, Superblock { page_count, roots }))
    }
}

/// A single volume: a page file addressed by 32-bit page ids.
///
/// Page 0 is the superblock; data pages start at 1. All file access is
/// synchronous and serialized through one handle.
pub struct DiskVolume {
    vol: VolumeId,
    path: PathBuf,
    file: Mutex<File>,
    meta: Mutex<Superblock>,
}

impl DiskVolume {
    /// Creates a fresh volume file.
    pub fn create(path: impl Into<PathBuf>, vol: VolumeId) -> StorageResult<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let meta = Superblock {
            page_count: 1,
            roots: Vec::new(),
        };
        file.write_all(&meta.encode(vol))?;
        file.sync_data()?;
        debug!(%vol, ?path, "created volume");
        Ok(Self {
            vol,
            path,
            file: Mutex::new(file),
            meta: Mutex::new(meta),
        })
    }

    /// Opens an existing volume file.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut page = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut page)?;
        let (vol, meta) = Superblock::decode(&page, &path)?;
        debug!(%vol, ?path, pages = meta.page_count, "opened volume");
        Ok(Self {
            vol,
            path,
            file: Mutex::new(file),
            meta: Mutex::new(meta),
        })
    }

    /// This volume's id.
    #[inline]
    pub fn vol(&self) -> VolumeId {
        self.vol
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of allocated pages (including the superblock).
    pub fn page_count(&self) -> u32 {
        self.meta.lock().page_count
    }

    /// Reads a page image into `buf`.
    ///
    /// Allocated-but-never-written pages read back as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.check_range(page_id)?;
        let mut file = self.file.lock();
        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let readable = ((file_len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..readable])?;
        buf[readable..].fill(0);
        Ok(())
    }

    /// Writes a page image.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> StorageResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.check_range(page_id)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.as_u32() as u64 * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> StorageResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Allocates a fresh page id.
    pub fn alloc_page(&self) -> StorageResult<PageId> {
        let mut meta = self.meta.lock();
        let pid = PageId::new(meta.page_count);
        meta.page_count += 1;
        self.persist_meta(&meta)?;
        Ok(pid)
    }

    /// Creates a new store with a freshly allocated root page.
    pub fn create_store(&self) -> StorageResult<(StoreId, PageId)> {
        let mut meta = self.meta.lock();
        let root = PageId::new(meta.page_count);
        meta.page_count += 1;
        meta.roots.push(root.as_u32());
        let store = StoreId::new(meta.roots.len() as u32);
        self.persist_meta(&meta)?;
        debug!(vol = %self.vol, %store, %root, "created store");
        Ok((store, root))
    }

    /// Root page of a store.
    pub fn root_of(&self, store: StoreId) -> StorageResult<PageId> {
        let meta = self.meta.lock();
        let idx = store.as_u32() as usize;
        match meta.roots.get(idx.wrapping_sub(1)) {
            Some(&root) if root != 0 => Ok(PageId::new(root)),
            _ => Err(StorageError::StoreNotFound {
                vol: self.vol,
                store,
            }),
        }
    }

    /// Every live store and its root page.
    pub fn stores(&self) -> Vec<(StoreId, PageId)> {
        let meta = self.meta.lock();
        meta.roots
            .iter()
            .enumerate()
            .filter(|(_, &root)| root != 0)
            .map(|(i, &root)| (StoreId::new(i as u32 + 1), PageId::new(root)))
            .collect()
    }

    fn check_range(&self, page_id: PageId) -> StorageResult<()> {
        let page_count = self.meta.lock().page_count;
        if page_id.as_u32() >= page_count {
            return Err(StorageError::PageOutOfRange {
                vol: self.vol,
                page_id,
                page_count,
            });
        }
        Ok(())
    }

    fn persist_meta(&self, meta: &Superblock) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&meta.encode(self.vol))?;
        Ok(())
    }
}

impl std::fmt::Debug for DiskVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskVolume")
            .field("vol", &self.vol)
            .field("path", &self.path)
            .field("page_count", &self.page_count())
            .finish()
    }
}

/// Source of known-good page images for single-page recovery.
pub trait BackupStore: Send + Sync {
    /// Fetches the backup image of a page.
    fn fetch_page(&self, vol: VolumeId, page_id: PageId) -> StorageResult<Vec<u8>>;
}

/// A backup that reads from file copies of volume page files, one per
/// volume, named `vol_<id>.bak` inside a directory.
#[derive(Debug)]
pub struct FileBackup {
    dir: PathBuf,
}

impl FileBackup {
    /// Opens a backup directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a volume's backup file.
    pub fn backup_path(&self, vol: VolumeId) -> PathBuf {
        self.dir.join(format!("vol_{}.bak", vol.as_u32()))
    }

    /// Takes a backup of `volume` by copying its page file.
    ///
    /// The volume should be quiesced (dirty pages forced) first.
    pub fn backup_volume(&self, volume: &DiskVolume) -> StorageResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::copy(volume.path(), self.backup_path(volume.vol()))?;
        Ok(())
    }
}

impl BackupStore for FileBackup {
    fn fetch_page(&self, vol: VolumeId, page_id: PageId) -> StorageResult<Vec<u8>> {
        let path = self.backup_path(vol);
        if !path.exists() {
            return Err(StorageError::BackupMissing { vol, page_id });
        }
        let mut file = File::open(&path)?;
        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        if offset + PAGE_SIZE as u64 > file.metadata()?.len() {
            return Err(StorageError::BackupMissing { vol, page_id });
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_open_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vol1.db");

        let (store, root) = {
            let volume = DiskVolume::create(&path, VolumeId::new(1)).unwrap();
            let (store, root) = volume.create_store().unwrap();
            assert_eq!(volume.root_of(store).unwrap(), root);
            (store, root)
        };

        let volume = DiskVolume::open(&path).unwrap();
        assert_eq!(volume.vol(), VolumeId::new(1));
        assert_eq!(volume.root_of(store).unwrap(), root);
        assert_eq!(volume.stores(), vec![(store, root)]);
    }

    #[test]
    fn test_page_io() {
        let tmp = TempDir::new().unwrap();
        let volume = DiskVolume::create(tmp.path().join("v.db"), VolumeId::new(1)).unwrap();

        let pid = volume.alloc_page().unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&[1, 2, 3, 4]);
        volume.write_page(pid, &page).unwrap();

        let mut read = vec![0u8; PAGE_SIZE];
        volume.read_page(pid, &mut read).unwrap();
        assert_eq!(read, page);
    }

    #[test]
    fn test_unwritten_page_reads_zero() {
        let tmp = TempDir::new().unwrap();
        let volume = DiskVolume::create(tmp.path().join("v.db"), VolumeId::new(1)).unwrap();

        let pid = volume.alloc_page().unwrap();
        let mut read = vec![0xFFu8; PAGE_SIZE];
        volume.read_page(pid, &mut read).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_out_of_range() {
        let tmp = TempDir::new().unwrap();
        let volume = DiskVolume::create(tmp.path().join("v.db"), VolumeId::new(1)).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        let err = volume.read_page(PageId::new(99), &mut buf).unwrap_err();
        assert!(matches!(err, StorageError::PageOutOfRange { .. }));
    }

    #[test]
    fn test_backup_fetch() {
        let tmp = TempDir::new().unwrap();
        let volume = DiskVolume::create(tmp.path().join("v.db"), VolumeId::new(1)).unwrap();
        let pid = volume.alloc_page().unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        page[100] = 0x42;
        volume.write_page(pid, &page).unwrap();
        volume.sync().unwrap();

        let backup = FileBackup::new(tmp.path().join("backup"));
        backup.backup_volume(&volume).unwrap();

        let fetched = backup.fetch_page(VolumeId::new(1), pid).unwrap();
        assert_eq!(fetched, page);

        let err = backup
            .fetch_page(VolumeId::new(2), PageId::new(1))
            .unwrap_err();
        assert!(matches!(err, StorageError::BackupMissing { .. }));
    }
}
