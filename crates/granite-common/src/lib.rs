//! # granite-common
//!
//! Shared identifier types and system-wide constants for GraniteDB.
//!
//! Everything in this crate is dependency-light on purpose: the buffer
//! pool and the log manager both build on these definitions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;
