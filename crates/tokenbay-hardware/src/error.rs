//! Error types for reader transport operations.
//!
//! These errors come from the layer that talks to physical readers. The slot
//! manager never interprets them beyond passing them through to its caller.

/// Result type alias for reader transport operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Errors that can occur while talking to a reader or the card in it.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Reader is not connected or has been unplugged.
    #[error("Reader disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Reader ordinal does not name a known reader.
    #[error("No such reader: {reader}")]
    NoSuchReader { reader: usize },

    /// No card in the reader.
    #[error("No card in reader {reader}")]
    NoCard { reader: usize },

    /// Reader communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Error reported by the PC/SC resource manager.
    #[cfg(feature = "hardware-pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
}

impl ReaderError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unknown reader error.
    pub fn no_such_reader(reader: usize) -> Self {
        Self::NoSuchReader { reader }
    }

    /// Create a new missing card error.
    pub fn no_card(reader: usize) -> Self {
        Self::NoCard { reader }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }
}
