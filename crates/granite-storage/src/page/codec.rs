//! The child-pointer codec: how the buffer pool finds child slots and
//! EMLSNs inside a page, and how redo records are applied to an image.
//!
//! The codec hands out byte *offsets* rather than references so that the
//! pool can read and write slot words atomically in place (a swizzle is
//! a single aligned 32-bit store; an EMLSN update is a single aligned
//! 64-bit store).

use granite_common::constants::{PAGE_HEADER_SIZE, PAGE_SIZE};
use granite_common::types::{PageId, StoreId, VolumeId};
use granite_wal::record::{LogRecord, RecordKind};

use crate::error::{StorageError, StorageResult};
use crate::page::header::{PageHeader, PageKind};

/// Identifies one child-pointer slot in an inner page.
///
/// Positive values are ordinary slots, `0` is the leftmost child, `-1`
/// the foster sibling, and `-2` means "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSlot(pub i32);

impl ChildSlot {
    /// The leftmost (before-first-key) child.
    pub const LEFTMOST: Self = Self(0);
    /// The foster (sibling) pointer.
    pub const FOSTER: Self = Self(-1);
    /// Sentinel returned when no slot points at the requested page.
    pub const NOT_FOUND: Self = Self(-2);

    /// An ordinary slot (1-based).
    #[inline]
    pub const fn ordinary(n: i32) -> Self {
        Self(n)
    }

    /// Whether this is a real slot (not the sentinel).
    #[inline]
    pub const fn is_found(self) -> bool {
        self.0 != Self::NOT_FOUND.0
    }
}

/// How the buffer pool interrogates page contents it does not own.
///
/// Implemented by the B-tree layer; [`FanoutCodec`] is the built-in
/// fixed-layout implementation.
pub trait PageCodec: Send + Sync {
    /// Highest ordinary child slot of `page` (0 if none). Leaves have
    /// no child slots at all.
    fn max_child_slot(&self, page: &[u8]) -> i32;

    /// Byte offset of the 32-bit child pointer for `slot`, if the slot
    /// exists in `page`. The offset is 4-byte aligned.
    fn child_slot_offset(&self, page: &[u8], slot: ChildSlot) -> Option<usize>;

    /// Byte offset of the 64-bit EMLSN recorded for `slot`'s child, if
    /// the slot exists. The offset is 8-byte aligned.
    fn child_emlsn_offset(&self, page: &[u8], slot: ChildSlot) -> Option<usize>;

    /// Applies one redo record to `page`. The record is guaranteed to
    /// touch this page (its id matches `page_id` or `page2_id`); the
    /// implementation decides the effect from the record kind and which
    /// side of a multi-page record this page is.
    fn apply_redo(&self, record: &LogRecord, page: &mut [u8]) -> StorageResult<()>;

    /// Builds the payload of a `SystemEmlsn` record updating `slot`'s
    /// EMLSN, in whatever encoding `apply_redo` expects back.
    fn emlsn_update_payload(&self, slot: ChildSlot, emlsn: granite_common::types::Lsn) -> Vec<u8>;

    /// Iterates every slot of `page` that can hold a child pointer, in
    /// canonical order: foster, leftmost, then ordinary slots.
    fn slots(&self, page: &[u8]) -> Vec<ChildSlot> {
        let max = self.max_child_slot(page);
        let mut out = Vec::with_capacity(max as usize + 2);
        out.push(ChildSlot::FOSTER);
        out.push(ChildSlot::LEFTMOST);
        for n in 1..=max {
            out.push(ChildSlot::ordinary(n));
        }
        out
    }
}

// Fixed layout after the 32-byte header.
//
// Inner page (level > 1):
//   32: child_count (u32)
//   40: foster entry, 56: leftmost entry, 72 + 16*(n-1): ordinary slot n
//   entry = { ptr: u32, _pad: u32, emlsn: u64 }
//
// Leaf page (level == 1):
//   32: key_count (u32)
//   36: packed keys, each [len: u16][bytes]
const CHILD_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRY_BASE: usize = 40;
const ENTRY_SIZE: usize = 16;
const LEAF_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const LEAF_KEYS_OFFSET: usize = PAGE_HEADER_SIZE + 4;

/// The built-in fixed-layout page codec.
///
/// Inner pages carry a slot-indexed array of `(pointer, emlsn)` entries;
/// leaf pages carry a packed key set. Enough to drive the buffer pool,
/// eviction, and single-page recovery end to end.
#[derive(Debug, Default, Clone, Copy)]
pub struct FanoutCodec;

impl FanoutCodec {
    /// Maximum ordinary slots an inner page can hold.
    pub const MAX_FANOUT: usize = (PAGE_SIZE - ENTRY_BASE) / ENTRY_SIZE - 2;

    fn entry_offset(slot: ChildSlot) -> Option<usize> {
        match slot.0 {
            -1 => Some(ENTRY_BASE),
            0 => Some(ENTRY_BASE + ENTRY_SIZE),
            n if n >= 1 => Some(ENTRY_BASE + ENTRY_SIZE * (n as usize + 1)),
            _ => None,
        }
    }

    fn is_leaf(page: &[u8]) -> bool {
        PageHeader::read(page).is_leaf()
    }

    // ---------------------------------------------------------------------
    // Inner-page construction
    // ---------------------------------------------------------------------

    /// Formats `page` as an empty inner node at `level`.
    pub fn format_inner(
        page: &mut [u8],
        vol: VolumeId,
        page_id: PageId,
        store: StoreId,
        level: u8,
    ) {
        debug_assert!(level > 1);
        page.fill(0);
        PageHeader::format(vol, page_id, store, PageKind::Node, level).write(page);
    }

    /// Appends a child pointer, returning its slot.
    pub fn add_child(page: &mut [u8], child: PageId) -> ChildSlot {
        let count = u32::from_be_bytes(
            page[CHILD_COUNT_OFFSET..CHILD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        assert!((count as usize) < Self::MAX_FANOUT, "inner page full");
        let slot = ChildSlot::ordinary(count as i32 + 1);
        let off = Self::entry_offset(slot).unwrap();
        page[off..off + 4].copy_from_slice(&child.as_u32().to_be_bytes());
        page[CHILD_COUNT_OFFSET..CHILD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count + 1).to_be_bytes());
        slot
    }

    /// Sets the leftmost child pointer.
    pub fn set_leftmost(page: &mut [u8], child: PageId) {
        let off = Self::entry_offset(ChildSlot::LEFTMOST).unwrap();
        page[off..off + 4].copy_from_slice(&child.as_u32().to_be_bytes());
    }

    /// Sets the foster sibling pointer.
    pub fn set_foster(page: &mut [u8], child: PageId) {
        let off = Self::entry_offset(ChildSlot::FOSTER).unwrap();
        page[off..off + 4].copy_from_slice(&child.as_u32().to_be_bytes());
    }

    // ---------------------------------------------------------------------
    // Leaf-page construction
    // ---------------------------------------------------------------------

    /// Formats `page` as an empty leaf.
    pub fn format_leaf(page: &mut [u8], vol: VolumeId, page_id: PageId, store: StoreId) {
        page.fill(0);
        PageHeader::format(vol, page_id, store, PageKind::Node, 1).write(page);
    }

    /// Number of keys in a leaf.
    pub fn leaf_key_count(page: &[u8]) -> u32 {
        u32::from_be_bytes(
            page[LEAF_COUNT_OFFSET..LEAF_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// All keys in a leaf.
    pub fn leaf_keys(page: &[u8]) -> Vec<Vec<u8>> {
        let count = Self::leaf_key_count(page);
        let mut out = Vec::with_capacity(count as usize);
        let mut pos = LEAF_KEYS_OFFSET;
        for _ in 0..count {
            let len = u16::from_be_bytes(page[pos..pos + 2].try_into().unwrap()) as usize;
            out.push(page[pos + 2..pos + 2 + len].to_vec());
            pos += 2 + len;
        }
        out
    }

    /// Whether a leaf contains `key`.
    pub fn leaf_contains(page: &[u8], key: &[u8]) -> bool {
        Self::leaf_keys(page).iter().any(|k| k == key)
    }

    /// Inserts `key` into a leaf (no-op if present).
    pub fn leaf_insert(page: &mut [u8], key: &[u8]) {
        if Self::leaf_contains(page, key) {
            return;
        }
        let count = Self::leaf_key_count(page);
        let mut pos = LEAF_KEYS_OFFSET;
        for _ in 0..count {
            let len = u16::from_be_bytes(page[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2 + len;
        }
        assert!(pos + 2 + key.len() <= PAGE_SIZE, "leaf page full");
        page[pos..pos + 2].copy_from_slice(&(key.len() as u16).to_be_bytes());
        page[pos + 2..pos + 2 + key.len()].copy_from_slice(key);
        page[LEAF_COUNT_OFFSET..LEAF_COUNT_OFFSET + 4].copy_from_slice(&(count + 1).to_be_bytes());
    }

    /// Removes `key` from a leaf; returns whether it was present.
    pub fn leaf_delete(page: &mut [u8], key: &[u8]) -> bool {
        let keys = Self::leaf_keys(page);
        if !keys.iter().any(|k| k == key) {
            return false;
        }
        let remaining: Vec<Vec<u8>> = keys.into_iter().filter(|k| k != key).collect();
        Self::leaf_rewrite(page, &remaining);
        true
    }

    fn leaf_rewrite(page: &mut [u8], keys: &[Vec<u8>]) {
        page[LEAF_KEYS_OFFSET..].fill(0);
        page[LEAF_COUNT_OFFSET..LEAF_COUNT_OFFSET + 4].fill(0);
        for key in keys {
            Self::leaf_insert(page, key);
        }
    }

    // ---------------------------------------------------------------------
    // Redo payload builders (mirrored by `apply_redo`)
    // ---------------------------------------------------------------------

    /// Payload for a `PageFormat` record.
    pub fn format_payload(store: StoreId, level: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        out.extend_from_slice(&store.as_u32().to_be_bytes());
        out.push(level);
        out
    }

    /// Payload for a `PageSplit` record: the keys moved to the sibling.
    pub fn split_payload(store: StoreId, moved: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&store.as_u32().to_be_bytes());
        out.extend_from_slice(&(moved.len() as u32).to_be_bytes());
        for key in moved {
            out.extend_from_slice(&(key.len() as u16).to_be_bytes());
            out.extend_from_slice(key);
        }
        out
    }

    /// Payload for a `SystemEmlsn` record.
    pub fn emlsn_payload(slot: ChildSlot, emlsn: granite_common::types::Lsn) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&slot.0.to_be_bytes());
        out.extend_from_slice(&emlsn.as_u64().to_be_bytes());
        out
    }

    fn split_keys(payload: &[u8]) -> StorageResult<(StoreId, Vec<Vec<u8>>)> {
        if payload.len() < 8 {
            return Err(StorageError::bad_redo(PageId::INVALID, "short split payload"));
        }
        let store = StoreId::new(u32::from_be_bytes(payload[0..4].try_into().unwrap()));
        let count = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        let mut keys = Vec::with_capacity(count as usize);
        let mut pos = 8;
        for _ in 0..count {
            if pos + 2 > payload.len() {
                return Err(StorageError::bad_redo(PageId::INVALID, "short split key"));
            }
            let len = u16::from_be_bytes(payload[pos..pos + 2].try_into().unwrap()) as usize;
            keys.push(payload[pos + 2..pos + 2 + len].to_vec());
            pos += 2 + len;
        }
        Ok((store, keys))
    }
}

impl PageCodec for FanoutCodec {
    fn max_child_slot(&self, page: &[u8]) -> i32 {
        if Self::is_leaf(page) {
            return 0;
        }
        u32::from_be_bytes(
            page[CHILD_COUNT_OFFSET..CHILD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as i32
    }

    fn child_slot_offset(&self, page: &[u8], slot: ChildSlot) -> Option<usize> {
        if Self::is_leaf(page) {
            return None;
        }
        if slot.0 > self.max_child_slot(page) {
            return None;
        }
        Self::entry_offset(slot)
    }

    fn child_emlsn_offset(&self, page: &[u8], slot: ChildSlot) -> Option<usize> {
        self.child_slot_offset(page, slot).map(|off| off + 8)
    }

    fn emlsn_update_payload(&self, slot: ChildSlot, emlsn: granite_common::types::Lsn) -> Vec<u8> {
        Self::emlsn_payload(slot, emlsn)
    }

    fn apply_redo(&self, record: &LogRecord, page: &mut [u8]) -> StorageResult<()> {
        let header = PageHeader::read(page);
        match record.kind {
            RecordKind::PageFormat => {
                if record.payload.len() < 5 {
                    return Err(StorageError::bad_redo(record.page_id, "short format payload"));
                }
                let store =
                    StoreId::new(u32::from_be_bytes(record.payload[0..4].try_into().unwrap()));
                let level = record.payload[4];
                if level == 1 {
                    Self::format_leaf(page, record.vol, record.page_id, store);
                } else {
                    Self::format_inner(page, record.vol, record.page_id, store, level);
                }
                Ok(())
            }
            RecordKind::Insert | RecordKind::Update => {
                Self::leaf_insert(page, &record.payload);
                Ok(())
            }
            RecordKind::Delete => {
                Self::leaf_delete(page, &record.payload);
                Ok(())
            }
            RecordKind::PageSplit => {
                let (store, moved) = Self::split_keys(&record.payload)?;
                if header.page_id == record.page2_id {
                    // This page is the new sibling: rebuild it from the
                    // moved keys. Idempotent because format resets.
                    Self::format_leaf(page, record.vol, record.page2_id, store);
                    for key in &moved {
                        Self::leaf_insert(page, key);
                    }
                } else {
                    // Source side: the moved keys leave.
                    for key in &moved {
                        Self::leaf_delete(page, key);
                    }
                }
                Ok(())
            }
            RecordKind::SystemEmlsn => {
                if record.payload.len() < 12 {
                    return Err(StorageError::bad_redo(record.page_id, "short emlsn payload"));
                }
                let slot = ChildSlot(i32::from_be_bytes(record.payload[0..4].try_into().unwrap()));
                let off = self
                    .child_emlsn_offset(page, slot)
                    .ok_or_else(|| StorageError::bad_redo(record.page_id, "emlsn slot missing"))?;
                page[off..off + 8].copy_from_slice(&record.payload[4..12]);
                Ok(())
            }
            RecordKind::Commit | RecordKind::Abort => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use granite_common::types::Lsn;

    fn leaf() -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        FanoutCodec::format_leaf(&mut page, VolumeId::new(1), PageId::new(9), StoreId::new(1));
        page
    }

    fn inner() -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        FanoutCodec::format_inner(
            &mut page,
            VolumeId::new(1),
            PageId::new(2),
            StoreId::new(1),
            2,
        );
        page
    }

    #[test]
    fn test_leaf_insert_delete() {
        let mut page = leaf();
        FanoutCodec::leaf_insert(&mut page, b"aa1");
        FanoutCodec::leaf_insert(&mut page, b"aa2");
        FanoutCodec::leaf_insert(&mut page, b"aa1"); // duplicate, no-op
        assert_eq!(FanoutCodec::leaf_key_count(&page), 2);
        assert!(FanoutCodec::leaf_contains(&page, b"aa1"));

        assert!(FanoutCodec::leaf_delete(&mut page, b"aa1"));
        assert!(!FanoutCodec::leaf_delete(&mut page, b"aa1"));
        assert_eq!(FanoutCodec::leaf_keys(&page), vec![b"aa2".to_vec()]);
    }

    #[test]
    fn test_inner_slots() {
        let codec = FanoutCodec;
        let mut page = inner();
        FanoutCodec::set_leftmost(&mut page, PageId::new(10));
        let s1 = FanoutCodec::add_child(&mut page, PageId::new(11));
        let s2 = FanoutCodec::add_child(&mut page, PageId::new(12));
        assert_eq!(s1, ChildSlot::ordinary(1));
        assert_eq!(s2, ChildSlot::ordinary(2));
        assert_eq!(codec.max_child_slot(&page), 2);

        let off = codec.child_slot_offset(&page, s2).unwrap();
        assert_eq!(off % 4, 0);
        let ptr = u32::from_be_bytes(page[off..off + 4].try_into().unwrap());
        assert_eq!(ptr, 12);

        let emlsn_off = codec.child_emlsn_offset(&page, s2).unwrap();
        assert_eq!(emlsn_off % 8, 0);

        // A slot past the count does not exist.
        assert!(codec.child_slot_offset(&page, ChildSlot::ordinary(3)).is_none());
        // Leaves expose no slots at all.
        assert!(codec.child_slot_offset(&leaf(), ChildSlot::LEFTMOST).is_none());
    }

    #[test]
    fn test_apply_redo_insert_delete() {
        let codec = FanoutCodec;
        let mut page = leaf();

        let ins = LogRecord::new(
            RecordKind::Insert,
            VolumeId::new(1),
            PageId::new(9),
            Lsn::INVALID,
            Bytes::from_static(b"k1"),
        );
        codec.apply_redo(&ins, &mut page).unwrap();
        // Applying the same record twice leaves the same image.
        let after_once = page.clone();
        codec.apply_redo(&ins, &mut page).unwrap();
        assert_eq!(page, after_once);
        assert!(FanoutCodec::leaf_contains(&page, b"k1"));

        let del = LogRecord::new(
            RecordKind::Delete,
            VolumeId::new(1),
            PageId::new(9),
            Lsn::INVALID,
            Bytes::from_static(b"k1"),
        );
        codec.apply_redo(&del, &mut page).unwrap();
        assert!(!FanoutCodec::leaf_contains(&page, b"k1"));
    }

    #[test]
    fn test_apply_redo_split_both_sides() {
        let codec = FanoutCodec;
        let mut source = leaf();
        for key in [b"a".as_ref(), b"b", b"c", b"d"] {
            FanoutCodec::leaf_insert(&mut source, key);
        }
        let moved = vec![b"c".to_vec(), b"d".to_vec()];
        let split = LogRecord::new_multi_page(
            RecordKind::PageSplit,
            VolumeId::new(1),
            PageId::new(9),
            PageId::new(20),
            Lsn::INVALID,
            Bytes::from(FanoutCodec::split_payload(StoreId::new(1), &moved)),
        );

        codec.apply_redo(&split, &mut source).unwrap();
        assert_eq!(
            FanoutCodec::leaf_keys(&source),
            vec![b"a".to_vec(), b"b".to_vec()]
        );

        // Destination page: build it purely from the redo record.
        let mut dest = vec![0u8; PAGE_SIZE];
        // Mark the header so the codec sees the destination id.
        PageHeader::format(
            VolumeId::new(1),
            PageId::new(20),
            StoreId::new(1),
            PageKind::Node,
            1,
        )
        .write(&mut dest);
        codec.apply_redo(&split, &mut dest).unwrap();
        assert_eq!(FanoutCodec::leaf_keys(&dest), moved);
    }

    #[test]
    fn test_apply_redo_emlsn() {
        let codec = FanoutCodec;
        let mut page = inner();
        let slot = FanoutCodec::add_child(&mut page, PageId::new(11));

        let rec = LogRecord::new(
            RecordKind::SystemEmlsn,
            VolumeId::new(1),
            PageId::new(2),
            Lsn::INVALID,
            Bytes::from(FanoutCodec::emlsn_payload(slot, Lsn::new(4242))),
        );
        codec.apply_redo(&rec, &mut page).unwrap();

        let off = codec.child_emlsn_offset(&page, slot).unwrap();
        let emlsn = u64::from_be_bytes(page[off..off + 8].try_into().unwrap());
        assert_eq!(emlsn, 4242);
    }
}
