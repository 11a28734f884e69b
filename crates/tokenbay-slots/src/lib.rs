//! Slot and card lifecycle management for the tokenbay token layer.
//!
//! Every smart card reader gets an entry in a card table. When a card shows
//! up, the manager connects to it, offers it to the registered frameworks in
//! priority order and lets the framework that recognizes it populate virtual
//! slots from a fixed pool. When the card goes away (or is swapped) the
//! slots are torn down, the framework is unbound and the card disconnected,
//! in that order.
//!
//! # Modules
//!
//! - [`manager`]: [`SlotManager`], detection and removal
//! - [`card`]: the per-reader card table
//! - [`slot`]: virtual slots and the slot pool
//! - [`framework`]: the [`Framework`] trait and its registry
//! - [`pool`]: per-slot object pools
//! - [`session`]: the session layer seam
//! - [`monitor`]: background detection with [`SlotEvent`]s
//!
//! # Example
//!
//! ```
//! use tokenbay_core::ReaderId;
//! use tokenbay_hardware::mock::MockReaders;
//! use tokenbay_slots::card::{CardSlotEntry, CardState};
//! use tokenbay_slots::framework::{Framework, FwContext};
//! use tokenbay_slots::slot::SlotPool;
//! use tokenbay_slots::{Result, SlotError, SlotManager};
//!
//! struct Pkcs15;
//!
//! impl Framework for Pkcs15 {
//!     fn name(&self) -> &str {
//!         "pkcs15"
//!     }
//!
//!     fn bind(&self, card: &CardSlotEntry) -> Result<Option<FwContext>> {
//!         match card.card() {
//!             Some(handle) if handle.atr().starts_with(&[0x3B]) => Ok(None),
//!             _ => Err(SlotError::framework("pkcs15", "unknown ATR")),
//!         }
//!     }
//!
//!     fn create_tokens(&self, card: &mut CardSlotEntry, slots: &mut SlotPool) -> Result<()> {
//!         let slot = slots.allocate(card)?;
//!         slot.info_mut().flags.token_present = true;
//!         Ok(())
//!     }
//! }
//!
//! let (readers, handle) = MockReaders::new(1);
//! let manager = SlotManager::builder(readers).framework(Pkcs15).build()?;
//!
//! handle.insert_card(ReaderId::new(0), vec![0x3B, 0x8F]);
//! manager.detect_all()?;
//! assert_eq!(manager.card_state(ReaderId::new(0))?, CardState::Ready);
//! assert_eq!(manager.slot_list(true)?.len(), 1);
//!
//! manager.card_removed(ReaderId::new(0))?;
//! assert!(manager.slot_list(true)?.is_empty());
//! # Ok::<(), SlotError>(())
//! ```

pub mod card;
pub mod error;
pub mod framework;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod session;
pub mod slot;

pub use card::{CardSlotEntry, CardState};
pub use error::{Exhaustion, Result, SlotError};
pub use framework::{Framework, FrameworkId, FrameworkRegistry, FwContext};
pub use manager::{Detection, SlotManager, SlotManagerBuilder, SlotSnapshot};
pub use monitor::{MonitorHandle, SlotEvent, SlotMonitor};
pub use pool::{ObjectHandle, ObjectPool};
pub use session::{NoSessions, SessionManager};
pub use slot::{SlotObject, SlotPool, VirtualSlot};
