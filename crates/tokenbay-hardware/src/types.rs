//! Common types shared across transport implementations.

use serde::{Deserialize, Serialize};
use tokenbay_core::ReaderId;

/// Reader information.
///
/// Describes one physical reader as enumerated by a transport at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Reader ordinal.
    pub id: ReaderId,

    /// Reader name (e.g., "ACS ACR38U 00 00").
    pub name: String,
}

impl ReaderInfo {
    /// Create a new ReaderInfo.
    pub fn new(id: ReaderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Result of polling a reader for a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardPresence {
    /// No card in the reader.
    Absent,

    /// A card is present and is the same card seen on the previous poll.
    Present,

    /// A card is present but it is not the card seen on the previous poll.
    Changed,
}

impl CardPresence {
    /// Check if a card is in the reader, changed or not.
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}
