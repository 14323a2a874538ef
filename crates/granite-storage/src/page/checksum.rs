//! Page checksums.
//!
//! CRC32 over the whole page image minus the 4-byte checksum field
//! itself, so the stored checksum does not feed its own computation.

use granite_common::constants::PAGE_CHECKSUM_OFFSET;

/// Computes the checksum of a page image, skipping the checksum field.
pub fn compute_page_checksum(page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    if PAGE_CHECKSUM_OFFSET > 0 {
        hasher.update(&page[..PAGE_CHECKSUM_OFFSET]);
    }
    hasher.update(&page[PAGE_CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

/// Verifies the checksum stored in the page header against the image.
pub fn verify_page_checksum(page: &[u8]) -> bool {
    let stored = u32::from_be_bytes(
        page[PAGE_CHECKSUM_OFFSET..PAGE_CHECKSUM_OFFSET + 4]
            .try_into()
            .expect("checksum field"),
    );
    stored == compute_page_checksum(page)
}

/// Recomputes and writes the checksum into the page header.
pub fn stamp_checksum(page: &mut [u8]) {
    let checksum = compute_page_checksum(page);
    page[PAGE_CHECKSUM_OFFSET..PAGE_CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
}
