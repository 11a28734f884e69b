//! Per-reader card table.
//!
//! The table has one [`CardSlotEntry`] per reader, created empty when the
//! manager starts. Entries are never destroyed: detection fills them in and
//! removal resets them.

use crate::error::{Result, SlotError};
use crate::framework::{FrameworkId, FwContext};
use std::fmt;
use tokenbay_core::ReaderId;
use tokenbay_hardware::{CardHandle, ReaderInfo};

/// Lifecycle state of a card table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardState {
    /// No card connected.
    Empty,

    /// Card connected, no framework recognized it yet.
    Connected,

    /// Framework bound, tokens not created.
    ///
    /// Reached when token creation failed; the next detection retries it
    /// without binding again.
    Bound,

    /// Framework bound and tokens created.
    Ready,
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Empty => "Empty",
            Self::Connected => "Connected",
            Self::Bound => "Bound",
            Self::Ready => "Ready",
        };
        write!(f, "{state}")
    }
}

/// Card table entry for one reader.
pub struct CardSlotEntry {
    reader: ReaderId,
    reader_name: String,
    pub(crate) card: Option<CardHandle>,
    pub(crate) framework: Option<FrameworkId>,
    pub(crate) fw_context: Option<FwContext>,
    pub(crate) max_slots: usize,
    pub(crate) num_slots: usize,
    pub(crate) tokens_created: bool,
}

impl fmt::Debug for CardSlotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSlotEntry")
            .field("reader", &self.reader)
            .field("reader_name", &self.reader_name)
            .field("card", &self.card)
            .field("framework", &self.framework)
            .field("has_fw_context", &self.fw_context.is_some())
            .field("max_slots", &self.max_slots)
            .field("num_slots", &self.num_slots)
            .field("state", &self.state())
            .finish()
    }
}

impl CardSlotEntry {
    pub(crate) fn new(reader: ReaderId, reader_name: impl Into<String>) -> Self {
        Self {
            reader,
            reader_name: reader_name.into(),
            card: None,
            framework: None,
            fw_context: None,
            max_slots: 0,
            num_slots: 0,
            tokens_created: false,
        }
    }

    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Connected card, if any.
    pub fn card(&self) -> Option<&CardHandle> {
        self.card.as_ref()
    }

    /// Framework bound to the card, if any.
    pub fn framework(&self) -> Option<FrameworkId> {
        self.framework
    }

    /// Per-card framework data, downcast to the framework's own type.
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.fw_context.as_deref()?.downcast_ref()
    }

    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.fw_context.as_deref_mut()?.downcast_mut()
    }

    pub fn has_context(&self) -> bool {
        self.fw_context.is_some()
    }

    /// Slot budget granted when the framework was bound.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Slots currently allocated to this card.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn state(&self) -> CardState {
        match (&self.card, self.framework) {
            (None, _) => CardState::Empty,
            (Some(_), None) => CardState::Connected,
            (Some(_), Some(_)) if !self.tokens_created => CardState::Bound,
            (Some(_), Some(_)) => CardState::Ready,
        }
    }
}

/// Fixed-size table of card entries indexed by reader ordinal.
#[derive(Debug)]
pub struct CardTable {
    entries: Vec<CardSlotEntry>,
}

impl CardTable {
    /// Create one empty entry per reader.
    pub fn new(readers: &[ReaderInfo]) -> Self {
        let entries = readers
            .iter()
            .enumerate()
            .map(|(i, info)| CardSlotEntry::new(ReaderId::new(i), info.name.clone()))
            .collect();
        Self { entries }
    }

    /// # Errors
    ///
    /// Returns `SlotError::InvalidReader` if the reader is outside the table.
    pub fn get(&self, reader: ReaderId) -> Result<&CardSlotEntry> {
        self.entries
            .get(reader.index())
            .ok_or(SlotError::InvalidReader { reader })
    }

    /// # Errors
    ///
    /// Returns `SlotError::InvalidReader` if the reader is outside the table.
    pub fn get_mut(&mut self, reader: ReaderId) -> Result<&mut CardSlotEntry> {
        self.entries
            .get_mut(reader.index())
            .ok_or(SlotError::InvalidReader { reader })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn readers(&self) -> impl Iterator<Item = ReaderId> + '_ {
        self.entries.iter().map(CardSlotEntry::reader)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardSlotEntry> {
        self.entries.iter()
    }
}
