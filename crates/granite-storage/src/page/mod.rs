//! Page layout: the fixed header, checksums, and the child-pointer
//! codec that the B-tree layer plugs into the buffer pool.

mod checksum;
mod codec;
mod header;

pub use checksum::{compute_page_checksum, stamp_checksum, verify_page_checksum};
pub use codec::{ChildSlot, FanoutCodec, PageCodec};
pub use header::{
    read_page_lsn, write_page_lsn, PageFlags, PageHeader, PageKind, PAGE_LSN_OFFSET,
};
