//! # granite-storage
//!
//! The storage core of GraniteDB: a fixed-size buffer pool for 8 KiB
//! pages addressed by `(volume, page-id)`, built for tree-structured
//! stores.
//!
//! The pool fixes pages through their already-latched parents, swizzles
//! hot child pointers in place (a frame index with the high bit set
//! replaces the disk page id), evicts leaves with a single-threaded
//! clock sweep that maintains each child's EMLSN in its parent, and
//! repairs stale or corrupt page images with single-page recovery
//! driven by the write-ahead log.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod page;
pub mod recovery;
pub mod vol;

pub use error::{StorageError, StorageResult};
