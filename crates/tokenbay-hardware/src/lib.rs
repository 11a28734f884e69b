//! Reader transport layer for the tokenbay slot manager.
//!
//! This crate defines how the slot manager talks to physical smart card
//! readers. The [`ReaderTransport`] trait covers the three things the manager
//! needs from a reader: poll for a card, connect to it, and let it go.
//!
//! # Design Philosophy
//!
//! - **Blocking**: every call runs to completion on the calling thread; the
//!   transport is responsible for returning in bounded time.
//! - **Object-safe**: the manager holds its transport as
//!   `Box<dyn ReaderTransport>`.
//! - **Owned connections**: a [`CardHandle`] has exactly one owner and is
//!   consumed by [`ReaderTransport::disconnect`].
//!
//! # Example
//!
//! ```
//! use tokenbay_core::ReaderId;
//! use tokenbay_hardware::mock::MockReaders;
//! use tokenbay_hardware::{CardPresence, ReaderTransport, Result};
//!
//! fn atr_of<T: ReaderTransport>(transport: &mut T, reader: ReaderId) -> Result<Option<String>> {
//!     if transport.presence(reader)? == CardPresence::Absent {
//!         return Ok(None);
//!     }
//!     let card = transport.connect(reader)?;
//!     let atr = card.atr_hex();
//!     transport.disconnect(card)?;
//!     Ok(Some(atr))
//! }
//!
//! let (mut readers, handle) = MockReaders::new(1);
//! handle.insert_card(ReaderId::new(0), vec![0x3B, 0x00]);
//! assert_eq!(atr_of(&mut readers, ReaderId::new(0)).unwrap().as_deref(), Some("3B00"));
//! ```
//!
//! # Transports
//!
//! - [`mock::MockReaders`]: scriptable readers for tests and development.
//! - `pcsc_transport::PcscTransport`: the system PC/SC resource manager,
//!   behind the `hardware-pcsc` feature.

pub mod error;
pub mod mock;
#[cfg(feature = "hardware-pcsc")]
pub mod pcsc_transport;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{ReaderError, Result};
#[cfg(feature = "hardware-pcsc")]
pub use pcsc_transport::PcscTransport;
pub use traits::{CardHandle, ReaderTransport};
pub use types::{CardPresence, ReaderInfo};
