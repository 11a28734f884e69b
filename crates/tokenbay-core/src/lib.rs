//! Shared vocabulary for the tokenbay slot manager.
//!
//! This crate holds the pieces every other tokenbay crate agrees on: reader
//! and slot identifiers, the presentation metadata surfaced to clients for a
//! virtual slot, compile-time limits and the startup configuration.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::SlotConfig;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
