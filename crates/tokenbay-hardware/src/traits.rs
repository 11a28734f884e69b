//! Transport trait for smart card readers.
//!
//! The slot manager drives readers through [`ReaderTransport`]. Calls are
//! blocking: a presence poll or a connect occupies the calling thread until
//! the reader answers, and the transport is expected to return in bounded
//! time.

use crate::Result;
use crate::types::{CardPresence, ReaderInfo};
use tokenbay_core::ReaderId;

/// Connected card.
///
/// A handle is produced by [`ReaderTransport::connect`] and handed back to
/// [`ReaderTransport::disconnect`], which consumes it. It is deliberately not
/// `Clone`: exactly one owner holds the connection.
#[derive(Debug)]
pub struct CardHandle {
    reader: ReaderId,
    reader_name: String,
    atr: Vec<u8>,
    connected_at: chrono::DateTime<chrono::Utc>,
}

impl CardHandle {
    /// Create a handle for a card that was just connected.
    pub fn new(reader: ReaderId, reader_name: impl Into<String>, atr: Vec<u8>) -> Self {
        Self {
            reader,
            reader_name: reader_name.into(),
            atr,
            connected_at: chrono::Utc::now(),
        }
    }

    /// Reader the card sits in.
    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    /// Name of the reader the card sits in.
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Answer-to-reset bytes of the card.
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Time the connection was established.
    pub fn connected_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.connected_at
    }

    /// Get the ATR as a hexadecimal string.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokenbay_core::ReaderId;
    /// use tokenbay_hardware::CardHandle;
    ///
    /// let card = CardHandle::new(ReaderId::new(0), "Reader", vec![0x3B, 0x02, 0x14, 0x50]);
    /// assert_eq!(card.atr_hex(), "3B021450");
    /// ```
    pub fn atr_hex(&self) -> String {
        self.atr.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// Trait for reader transports.
///
/// A transport owns the connection to every physical reader it enumerated.
/// Reader ordinals are assigned once by [`readers`](ReaderTransport::readers)
/// and never change.
///
/// # Thread Safety
///
/// Transports must be `Send` so the slot manager can move them behind its
/// lock and drive them from a blocking worker thread.
pub trait ReaderTransport: Send {
    /// Enumerate the readers managed by this transport.
    fn readers(&self) -> Vec<ReaderInfo>;

    /// Poll a reader for a card.
    ///
    /// Returns [`CardPresence::Changed`] when the card in the reader is not
    /// the one present at the previous poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is unknown or cannot be queried.
    fn presence(&mut self, reader: ReaderId) -> Result<CardPresence>;

    /// Connect to the card in a reader.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The reader is unknown
    /// - No card is present
    /// - The card does not answer
    fn connect(&mut self, reader: ReaderId) -> Result<CardHandle>;

    /// Release a connection obtained from [`connect`](ReaderTransport::connect).
    ///
    /// # Errors
    ///
    /// Returns an error if the reader reports a failure while releasing the
    /// card. The handle is consumed either way.
    fn disconnect(&mut self, card: CardHandle) -> Result<()>;
}

impl<T: ReaderTransport + ?Sized> ReaderTransport for Box<T> {
    fn readers(&self) -> Vec<ReaderInfo> {
        (**self).readers()
    }

    fn presence(&mut self, reader: ReaderId) -> Result<CardPresence> {
        (**self).presence(reader)
    }

    fn connect(&mut self, reader: ReaderId) -> Result<CardHandle> {
        (**self).connect(reader)
    }

    fn disconnect(&mut self, card: CardHandle) -> Result<()> {
        (**self).disconnect(card)
    }
}
