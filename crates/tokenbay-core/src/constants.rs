//! Limits and defaults for the slot manager.
//!
//! The virtual slot pool and the per-card slot budget are fixed for the
//! lifetime of a manager. The values here are the built-in defaults used when
//! the startup configuration does not override them.
//!
//! # Usage
//!
//! ```
//! use tokenbay_core::constants::*;
//!
//! assert!(DEFAULT_SLOTS_PER_CARD <= MAX_VIRTUAL_SLOTS);
//! assert_eq!(SLOT_DESCRIPTION_LEN, 64);
//! ```

// ============================================================================
// Slot Pool
// ============================================================================

/// Default number of virtual slots in the pool, shared across all readers.
pub const MAX_VIRTUAL_SLOTS: usize = 8;

/// Upper bound accepted for a configured pool size.
///
/// The pool is scanned linearly on every allocation, so it is kept small.
pub const MAX_SUPPORTED_VIRTUAL_SLOTS: usize = 256;

/// Number of virtual slots a single card may claim when the configuration
/// leaves `slots_per_card` at zero.
pub const DEFAULT_SLOTS_PER_CARD: usize = 4;

/// How many times a single detection may re-check presence after the
/// transport reported a card change.
pub const MAX_CARD_CHANGE_RETRIES: usize = 1;

// ============================================================================
// Presentation Metadata
// ============================================================================

/// Width of the blank-padded slot description field.
pub const SLOT_DESCRIPTION_LEN: usize = 64;

/// Width of the blank-padded manufacturer field.
pub const MANUFACTURER_ID_LEN: usize = 32;

/// Description shown for a slot with no token.
pub const DEFAULT_SLOT_DESCRIPTION: &str = "Virtual slot";

/// Manufacturer shown for every virtual slot.
pub const DEFAULT_MANUFACTURER_ID: &str = "Tokenbay project";

// ============================================================================
// Background Detection
// ============================================================================

/// Default delay between two detection sweeps, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Minimum delay between two detection sweeps, in milliseconds.
///
/// Keeps a misconfigured monitor from busy-polling the readers.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Capacity of the channel carrying slot events out of the monitor.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
