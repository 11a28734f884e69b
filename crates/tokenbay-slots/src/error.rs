//! Error types for slot management.
//!
//! Every operation of the slot manager reports one of these kinds. Transport
//! failures pass through unchanged inside [`SlotError::Backend`].

use std::fmt;
use tokenbay_core::{ReaderId, SlotId};
use tokenbay_hardware::ReaderError;

/// Result type alias for slot operations.
pub type Result<T> = std::result::Result<T, SlotError>;

/// Which limit an allocation ran into.
///
/// Both causes reach clients as [`SlotError::ResourceExhausted`]; the
/// distinction is kept for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// The card already holds as many slots as its budget allows.
    CardBudget { reader: ReaderId, max_slots: usize },

    /// Every slot in the pool is allocated.
    PoolFull { capacity: usize },
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CardBudget { reader, max_slots } => {
                write!(f, "card in reader {reader} already holds {max_slots} slot(s)")
            }
            Self::PoolFull { capacity } => write!(f, "all {capacity} virtual slots allocated"),
        }
    }
}

/// Errors that can occur during slot management.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The manager was finalized.
    #[error("Slot manager not initialized")]
    NotInitialized,

    /// Slot id is outside the slot pool.
    #[error("Invalid slot id: {id}")]
    InvalidSlotId { id: SlotId },

    /// Reader ordinal is outside the card table.
    #[error("Invalid reader: {reader}")]
    InvalidReader { reader: ReaderId },

    /// No card, or no token bound to the slot.
    #[error("Token not present")]
    TokenNotPresent,

    /// No framework recognized the card.
    #[error("Token not recognized")]
    TokenNotRecognized,

    /// Per-card slot budget or slot pool exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(Exhaustion),

    /// A framework reported a failure.
    #[error("Framework {framework} failed: {message}")]
    Framework { framework: String, message: String },

    /// Reader or card failure.
    #[error("Backend error: {0}")]
    Backend(#[from] ReaderError),

    /// Invalid startup configuration.
    #[error(transparent)]
    Config(#[from] tokenbay_core::Error),
}

impl SlotError {
    /// Create a new framework error.
    pub fn framework(framework: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Framework {
            framework: framework.into(),
            message: message.into(),
        }
    }

    /// Check if the error means "no usable token right now".
    ///
    /// Such errors are expected during normal operation and do not indicate
    /// a fault.
    pub fn is_token_absence(&self) -> bool {
        matches!(self, Self::TokenNotPresent | Self::TokenNotRecognized)
    }
}
