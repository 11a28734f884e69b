//! Framework registry.
//!
//! A framework knows how to read one family of on-card data formats and
//! expose a card as one or more tokens. The registry holds the frameworks in
//! priority order: detection offers a new card to each framework in turn and
//! the first one that recognizes it is bound.
//!
//! Order is part of the contract. A framework that accepts any card (for
//! example one that initializes blank cards) must be registered last, so it
//! only sees cards nobody else recognized.
//!
//! # Examples
//!
//! ```
//! use tokenbay_slots::card::CardSlotEntry;
//! use tokenbay_slots::framework::{Framework, FrameworkRegistry, FwContext};
//! use tokenbay_slots::slot::SlotPool;
//! use tokenbay_slots::Result;
//!
//! struct Blank;
//!
//! impl Framework for Blank {
//!     fn name(&self) -> &str {
//!         "blank"
//!     }
//!
//!     fn bind(&self, _card: &CardSlotEntry) -> Result<Option<FwContext>> {
//!         Ok(None)
//!     }
//!
//!     fn create_tokens(&self, card: &mut CardSlotEntry, slots: &mut SlotPool) -> Result<()> {
//!         let slot = slots.allocate(card)?;
//!         slot.info_mut().flags.token_present = true;
//!         Ok(())
//!     }
//! }
//!
//! let registry = FrameworkRegistry::builder().register(Blank).build();
//! assert_eq!(registry.names(), vec!["blank"]);
//! ```

use crate::card::CardSlotEntry;
use crate::error::Result;
use crate::slot::SlotPool;
use std::any::Any;
use std::fmt;

/// Framework-private data attached to a card or to a token.
///
/// The slot manager never looks inside; it only hands the value back to the
/// framework that produced it.
pub type FwContext = Box<dyn Any + Send>;

/// Position of a framework in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameworkId(usize);

impl FrameworkId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability provider that turns a recognized card into tokens.
///
/// Calls are made with the slot manager's lock held and may block on card
/// I/O; the card stays connected for the whole bind..unbind lifetime.
pub trait Framework: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Inspect a connected card and claim it.
    ///
    /// Returns the per-card context to keep while the framework is bound.
    /// The entry is borrowed immutably, so a failed bind cannot leave state
    /// behind.
    ///
    /// # Errors
    ///
    /// Any error means "not my card"; detection moves on to the next
    /// framework.
    fn bind(&self, card: &CardSlotEntry) -> Result<Option<FwContext>>;

    /// Allocate and populate the virtual slots for a bound card.
    ///
    /// Slots are claimed with [`SlotPool::allocate`]. On error every slot
    /// allocated for the card is torn down again and the card stays bound.
    ///
    /// # Errors
    ///
    /// Errors are reported to the caller of detection.
    fn create_tokens(&self, card: &mut CardSlotEntry, slots: &mut SlotPool) -> Result<()>;

    /// Release the per-token context of a slot being torn down.
    ///
    /// # Errors
    ///
    /// Errors are logged; teardown continues regardless.
    fn release_token(&self, _card: &CardSlotEntry, _token: FwContext) -> Result<()> {
        Ok(())
    }

    /// Release the per-card context before the card is disconnected.
    ///
    /// # Errors
    ///
    /// Errors are logged; removal continues regardless.
    fn unbind(&self, _card: &CardSlotEntry, _context: Option<FwContext>) -> Result<()> {
        Ok(())
    }
}

/// Ordered, immutable list of frameworks.
#[derive(Default)]
pub struct FrameworkRegistry {
    frameworks: Vec<Box<dyn Framework>>,
}

impl fmt::Debug for FrameworkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FrameworkRegistry {
    pub fn builder() -> FrameworkRegistryBuilder {
        FrameworkRegistryBuilder::default()
    }

    pub fn get(&self, id: FrameworkId) -> Option<&dyn Framework> {
        self.frameworks.get(id.index()).map(Box::as_ref)
    }

    /// Frameworks in priority order.
    pub fn iter(&self) -> impl Iterator<Item = (FrameworkId, &dyn Framework)> {
        self.frameworks
            .iter()
            .enumerate()
            .map(|(i, framework)| (FrameworkId::new(i), framework.as_ref()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.frameworks.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.frameworks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty()
    }
}

/// Builder for [`FrameworkRegistry`].
///
/// Frameworks are tried in the order they are registered.
#[derive(Default)]
pub struct FrameworkRegistryBuilder {
    frameworks: Vec<Box<dyn Framework>>,
}

impl FrameworkRegistryBuilder {
    /// Append a framework at the lowest priority so far.
    pub fn register(mut self, framework: impl Framework + 'static) -> Self {
        self.frameworks.push(Box::new(framework));
        self
    }

    /// Append an already boxed framework.
    pub fn register_boxed(mut self, framework: Box<dyn Framework>) -> Self {
        self.frameworks.push(framework);
        self
    }

    pub fn build(self) -> FrameworkRegistry {
        FrameworkRegistry {
            frameworks: self.frameworks,
        }
    }
}
