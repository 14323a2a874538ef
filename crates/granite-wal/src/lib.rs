//! # granite-wal
//!
//! Write-ahead logging for GraniteDB.
//!
//! Log inserts go through a [Consolidation Array](carray::ConsolidationArray):
//! concurrent writers are funneled into a small set of active slots, one
//! leader reserves buffer space for the whole group, and every member
//! copies its record into the reserved region in parallel. The durable
//! end of the log advances in group order, with lagging groups able to
//! delegate their release to a predecessor.
//!
//! The log also serves per-page redo chains, which single-page recovery
//! uses to replay one page id from a backup image up to a known EMLSN.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod carray;
pub mod config;
pub mod error;
pub mod log;
pub mod record;

pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use log::LogManager;
pub use record::{LogRecord, RecordKind};
