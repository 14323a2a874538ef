//! Log record layout.
//!
//! Every record starts with a fixed 40-byte header followed by a
//! kind-specific payload. The checksum covers the header (with the
//! checksum field zeroed) and the payload.

use bytes::{BufMut, Bytes, BytesMut};

use granite_common::constants::WAL_RECORD_HEADER_SIZE;
use granite_common::types::{Lsn, PageId, VolumeId};

use crate::error::{WalError, WalResult};

/// The kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Format a fresh page (first record of any page's history).
    PageFormat = 1,
    /// Insert a record into a page.
    Insert = 2,
    /// Delete a record from a page.
    Delete = 3,
    /// Update a record in place.
    Update = 4,
    /// Split a page; touches the source page and the new sibling
    /// (`page2`). The only multi-page kind.
    PageSplit = 5,
    /// System update of a child EMLSN stored in a parent page.
    SystemEmlsn = 6,
    /// Transaction commit.
    Commit = 7,
    /// Transaction abort.
    Abort = 8,
}

impl RecordKind {
    /// Decodes a kind byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::PageFormat),
            2 => Some(Self::Insert),
            3 => Some(Self::Delete),
            4 => Some(Self::Update),
            5 => Some(Self::PageSplit),
            6 => Some(Self::SystemEmlsn),
            7 => Some(Self::Commit),
            8 => Some(Self::Abort),
            _ => None,
        }
    }

    /// Whether records of this kind touch a second page.
    #[inline]
    pub fn is_multi_page(self) -> bool {
        matches!(self, Self::PageSplit)
    }

    /// Whether records of this kind carry page REDO content.
    #[inline]
    pub fn is_redo(self) -> bool {
        !matches!(self, Self::Commit | Self::Abort)
    }
}

/// A single log record.
///
/// The `lsn` field is assigned by the log at insert time; records built
/// by callers carry `Lsn::INVALID` until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// LSN of this record (byte position in the log).
    pub lsn: Lsn,
    /// Record kind.
    pub kind: RecordKind,
    /// Volume of the page this record touches.
    pub vol: VolumeId,
    /// Primary page this record touches.
    pub page_id: PageId,
    /// Second page for multi-page records, `INVALID` otherwise.
    pub page2_id: PageId,
    /// The primary page's `page_lsn` before this update. Forms the
    /// per-page chain that bounds single-page recovery replay.
    pub page_prev_lsn: Lsn,
    /// Kind-specific payload.
    pub payload: Bytes,
}

impl LogRecord {
    /// Creates a single-page record.
    pub fn new(
        kind: RecordKind,
        vol: VolumeId,
        page_id: PageId,
        page_prev_lsn: Lsn,
        payload: Bytes,
    ) -> Self {
        Self {
            lsn: Lsn::INVALID,
            kind,
            vol,
            page_id,
            page2_id: PageId::INVALID,
            page_prev_lsn,
            payload,
        }
    }

    /// Creates a multi-page record (page split).
    pub fn new_multi_page(
        kind: RecordKind,
        vol: VolumeId,
        page_id: PageId,
        page2_id: PageId,
        page_prev_lsn: Lsn,
        payload: Bytes,
    ) -> Self {
        debug_assert!(kind.is_multi_page());
        Self {
            lsn: Lsn::INVALID,
            kind,
            vol,
            page_id,
            page2_id,
            page_prev_lsn,
            payload,
        }
    }

    /// Whether this record touches the given page.
    pub fn touches(&self, vol: VolumeId, page: PageId) -> bool {
        self.vol == vol && (self.page_id == page || self.page2_id == page)
    }

    /// Total encoded size in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        WAL_RECORD_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the record with the given LSN stamped into the header.
    pub fn encode(&self, lsn: Lsn) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u64(lsn.as_u64());
        buf.put_u32(self.encoded_len() as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u8(0); // flags
        buf.put_u16(0); // reserved
        buf.put_u32(self.vol.as_u32());
        buf.put_u32(self.page_id.as_u32());
        buf.put_u32(self.page2_id.as_u32());
        buf.put_u64(self.page_prev_lsn.as_u64());
        buf.put_u32(0); // checksum placeholder
        buf.extend_from_slice(&self.payload);

        let checksum = checksum_record(&buf);
        buf[36..40].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Decodes a record from bytes, verifying the checksum if asked.
    ///
    /// `bytes` must start at a record boundary and contain at least the
    /// whole record.
    pub fn decode(bytes: &[u8], verify: bool) -> WalResult<Self> {
        if bytes.len() < WAL_RECORD_HEADER_SIZE {
            return Err(WalError::malformed(Lsn::INVALID, "truncated header"));
        }
        let lsn = Lsn::new(be_u64(&bytes[0..8]));
        let total_len = be_u32(&bytes[8..12]) as usize;
        if total_len < WAL_RECORD_HEADER_SIZE || total_len > bytes.len() {
            return Err(WalError::malformed(lsn, "bad record length"));
        }
        let kind = RecordKind::from_u8(bytes[12])
            .ok_or_else(|| WalError::malformed(lsn, "unknown record kind"))?;
        let vol = VolumeId::new(be_u32(&bytes[16..20]));
        let page_id = PageId::new(be_u32(&bytes[20..24]));
        let page2_id = PageId::new(be_u32(&bytes[24..28]));
        let page_prev_lsn = Lsn::new(be_u64(&bytes[28..36]));
        let expected = be_u32(&bytes[36..40]);

        if verify {
            let computed = checksum_record(&bytes[..total_len]);
            if computed != expected {
                return Err(WalError::ChecksumMismatch {
                    lsn,
                    expected,
                    computed,
                });
            }
        }

        Ok(Self {
            lsn,
            kind,
            vol,
            page_id,
            page2_id,
            page_prev_lsn,
            payload: Bytes::copy_from_slice(&bytes[WAL_RECORD_HEADER_SIZE..total_len]),
        })
    }

    /// Reads the total encoded length from a header prefix, or `None`
    /// if the bytes do not start a record (zeroed padding).
    pub fn peek_len(bytes: &[u8]) -> Option<usize> {
        if bytes.len() < WAL_RECORD_HEADER_SIZE {
            return None;
        }
        let total_len = be_u32(&bytes[8..12]) as usize;
        if total_len < WAL_RECORD_HEADER_SIZE {
            return None;
        }
        Some(total_len)
    }
}

fn checksum_record(encoded: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&encoded[..36]);
    hasher.update(&[0, 0, 0, 0]);
    hasher.update(&encoded[40..]);
    hasher.finalize()
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().expect("slice of length 4"))
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().expect("slice of length 8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        LogRecord::new(
            RecordKind::Insert,
            VolumeId::new(1),
            PageId::new(42),
            Lsn::new(100),
            Bytes::from_static(b"key=value"),
        )
    }

    #[test]
    fn test_encode_decode() {
        let rec = sample();
        let encoded = rec.encode(Lsn::new(512));
        assert_eq!(encoded.len(), rec.encoded_len());

        let decoded = LogRecord::decode(&encoded, true).unwrap();
        assert_eq!(decoded.lsn, Lsn::new(512));
        assert_eq!(decoded.kind, RecordKind::Insert);
        assert_eq!(decoded.page_id, PageId::new(42));
        assert_eq!(decoded.page_prev_lsn, Lsn::new(100));
        assert_eq!(decoded.payload, rec.payload);
    }

    #[test]
    fn test_checksum_detects_damage() {
        let rec = sample();
        let mut encoded = rec.encode(Lsn::new(512)).to_vec();
        encoded[45] ^= 0xFF;
        let err = LogRecord::decode(&encoded, true).unwrap_err();
        assert!(matches!(err, WalError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_multi_page() {
        let rec = LogRecord::new_multi_page(
            RecordKind::PageSplit,
            VolumeId::new(1),
            PageId::new(7),
            PageId::new(8),
            Lsn::new(10),
            Bytes::new(),
        );
        assert!(rec.kind.is_multi_page());
        assert!(rec.touches(VolumeId::new(1), PageId::new(7)));
        assert!(rec.touches(VolumeId::new(1), PageId::new(8)));
        assert!(!rec.touches(VolumeId::new(2), PageId::new(7)));
    }

    #[test]
    fn test_peek_len_rejects_padding() {
        let zeros = [0u8; 64];
        assert_eq!(LogRecord::peek_len(&zeros), None);

        let rec = sample();
        let encoded = rec.encode(Lsn::new(8));
        assert_eq!(LogRecord::peek_len(&encoded), Some(rec.encoded_len()));
    }

    #[test]
    fn test_kind_round_trip() {
        for k in 1..=8u8 {
            let kind = RecordKind::from_u8(k).unwrap();
            assert_eq!(kind as u8, k);
        }
        assert!(RecordKind::from_u8(0).is_none());
        assert!(RecordKind::from_u8(99).is_none());
    }
}
