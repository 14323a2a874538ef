//! Single-page recovery (SPR).
//!
//! A page image read from disk is suspect when its checksum fails or
//! when its `page_lsn` is older than the EMLSN its parent recorded for
//! it. SPR repairs exactly that page: start from the current image (or a
//! backup image when corrupt, or a zeroed base when the log chain
//! rebuilds the page from scratch), fetch the log records that touch
//! this page id in `(page_lsn, EMLSN]`, apply their redo functions in
//! ascending order, and assert the image lands exactly on the EMLSN.
//!
//! Multi-page records (page splits) recover the sibling image first,
//! recursively, bounded in depth.

use tracing::{debug, warn};

use granite_common::types::{Lsn, PageId, PageKey, VolumeId};

use crate::buffer::{BufferError, BufferResult, BufferPool, Frame};
use crate::page::{read_page_lsn, stamp_checksum, verify_page_checksum, write_page_lsn, PageHeader};

/// Recursion bound for multi-page recovery chains.
const MAX_SPR_DEPTH: u32 = 8;

/// Validates a page image that was just read from disk, repairing it in
/// place via SPR when it is corrupt or older than `expected_emlsn`.
///
/// The caller owns the frame exclusively (EX latch or pre-publication).
pub(crate) fn check_read_page(
    pool: &BufferPool,
    frame: &Frame,
    vol: VolumeId,
    page_id: PageId,
    expected_emlsn: Option<Lsn>,
) -> BufferResult<()> {
    // Safety: exclusive ownership per the caller contract.
    let image = unsafe { frame.image_mut() };

    let intact = image_intact(image, vol, page_id);
    let image_lsn = if intact {
        read_page_lsn(image)
    } else {
        Lsn::INVALID
    };
    let stale = expected_emlsn.is_some_and(|emlsn| image_lsn < emlsn);
    if intact && !stale {
        return Ok(());
    }

    debug!(%vol, %page_id, corrupt = !intact, ?expected_emlsn, %image_lsn, "single-page recovery");
    recover_image(pool, vol, page_id, image, expected_emlsn, 0, None)?;
    pool.stat_repairs
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    Ok(())
}

/// Whether the image passes checksum and carries the expected identity.
fn image_intact(image: &[u8], vol: VolumeId, page_id: PageId) -> bool {
    if !verify_page_checksum(image) {
        return false;
    }
    let header = PageHeader::read(image);
    header.vol == vol && header.page_id == page_id
}

/// Recovers one page image in place up to `emlsn` (or the end of the
/// log when the bound is unknown, e.g. parent-less fixes).
///
/// `skip_sibling_of` suppresses recursion for the one record that
/// triggered this recovery, breaking mutual recursion between the two
/// sides of a split.
fn recover_image(
    pool: &BufferPool,
    vol: VolumeId,
    page_id: PageId,
    image: &mut [u8],
    emlsn: Option<Lsn>,
    depth: u32,
    skip_sibling_of: Option<Lsn>,
) -> BufferResult<()> {
    if depth > MAX_SPR_DEPTH {
        warn!(%vol, %page_id, depth, "recovery recursion too deep");
        return Err(BufferError::CorruptPage { vol, page_id });
    }

    // Choose the replay base: the image itself, a backup image, or a
    // zeroed page that the chain's format record rebuilds.
    let base_lsn = if image_intact(image, vol, page_id) {
        read_page_lsn(image)
    } else {
        match pool.backup.as_ref().map(|b| b.fetch_page(vol, page_id)) {
            Some(Ok(fetched)) => {
                if !image_intact(&fetched, vol, page_id) {
                    warn!(%vol, %page_id, "backup image is also damaged");
                    return Err(BufferError::CorruptPage { vol, page_id });
                }
                let lsn = read_page_lsn(&fetched);
                image.copy_from_slice(&fetched);
                lsn
            }
            // A page born after the backup (or no backup at all): the
            // log chain must rebuild it from scratch.
            Some(Err(crate::error::StorageError::BackupMissing { .. })) | None => {
                image.fill(0);
                Lsn::INVALID
            }
            Some(Err(err)) => return Err(err.into()),
        }
    };

    let hi = emlsn.unwrap_or_else(|| pool.log.curr_lsn());
    let chain = pool.log.redo_chain(vol, page_id, base_lsn, hi)?;

    for record in &chain {
        if record.kind.is_multi_page() && skip_sibling_of != Some(record.lsn) {
            let sibling = if record.page_id == page_id {
                record.page2_id
            } else {
                record.page_id
            };
            // A resident sibling is already at least this current; only
            // on-disk-only siblings need recovering first.
            if pool.table.lookup(PageKey::new(vol, sibling)).is_none() {
                recover_sibling(pool, vol, sibling, record.lsn, depth + 1)?;
            }
        }
        pool.codec.apply_redo(record, image)?;
        write_page_lsn(image, record.lsn);
    }

    if let Some(expected) = emlsn {
        let reached = read_page_lsn(image);
        if reached != expected {
            warn!(%vol, %page_id, %reached, %expected, "recovery fell short of the EMLSN");
            return Err(BufferError::CorruptPage { vol, page_id });
        }
    }
    stamp_checksum(image);
    Ok(())
}

/// Recovers a split sibling's on-disk image up to (and including) the
/// multi-page record at `up_to`, writing the repaired image back.
fn recover_sibling(
    pool: &BufferPool,
    vol: VolumeId,
    page_id: PageId,
    up_to: Lsn,
    depth: u32,
) -> BufferResult<()> {
    let desc = pool.volume(vol)?;
    let mut image = vec![0u8; granite_common::constants::PAGE_SIZE];
    desc.volume.read_page(page_id, &mut image)?;

    // Already current (or newer): nothing to do.
    if image_intact(&image, vol, page_id) && read_page_lsn(&image) >= up_to {
        return Ok(());
    }

    debug!(%vol, %page_id, %up_to, depth, "recovering split sibling");
    recover_image(
        pool,
        vol,
        page_id,
        &mut image,
        Some(up_to),
        depth,
        Some(up_to),
    )?;
    desc.volume.write_page(page_id, &image)?;
    Ok(())
}
