//! Mock reader transport for testing and development.
//!
//! This module provides a simulated bank of card readers that can be
//! controlled programmatically, without a PC/SC daemon or physical hardware.

use crate::{
    ReaderError, Result,
    traits::{CardHandle, ReaderTransport},
    types::{CardPresence, ReaderInfo},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokenbay_core::ReaderId;

/// Mock reader transport.
///
/// Every reader holds at most one card, identified by its ATR. Cards are
/// inserted, removed and swapped through the paired [`MockReadersHandle`],
/// which can also inject transport failures.
///
/// # Examples
///
/// ```
/// use tokenbay_core::ReaderId;
/// use tokenbay_hardware::mock::MockReaders;
/// use tokenbay_hardware::{CardPresence, ReaderTransport};
///
/// let (mut readers, handle) = MockReaders::new(1);
/// let reader = ReaderId::new(0);
///
/// assert_eq!(readers.presence(reader).unwrap(), CardPresence::Absent);
///
/// handle.insert_card(reader, vec![0x3B, 0x02, 0x14, 0x50]);
/// assert_eq!(readers.presence(reader).unwrap(), CardPresence::Present);
///
/// let card = readers.connect(reader).unwrap();
/// assert_eq!(card.atr_hex(), "3B021450");
/// readers.disconnect(card).unwrap();
/// ```
#[derive(Debug)]
pub struct MockReaders {
    shared: Arc<Mutex<MockState>>,
}

impl MockReaders {
    /// Create `count` mock readers named "Mock Reader N".
    ///
    /// Returns a tuple of (MockReaders, MockReadersHandle) where the handle
    /// can be used to simulate card movements.
    pub fn new(count: usize) -> (Self, MockReadersHandle) {
        Self::with_names((0..count).map(|i| format!("Mock Reader {i}")).collect())
    }

    /// Create one mock reader per name.
    pub fn with_names(names: Vec<String>) -> (Self, MockReadersHandle) {
        let state = MockState {
            readers: names.into_iter().map(MockReader::new).collect(),
            always_changed: false,
        };
        let shared = Arc::new(Mutex::new(state));

        let readers = Self {
            shared: Arc::clone(&shared),
        };
        let handle = MockReadersHandle { shared };

        (readers, handle)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReaderTransport for MockReaders {
    fn readers(&self) -> Vec<ReaderInfo> {
        self.state()
            .readers
            .iter()
            .enumerate()
            .map(|(i, reader)| ReaderInfo::new(ReaderId::new(i), reader.name.clone()))
            .collect()
    }

    fn presence(&mut self, reader: ReaderId) -> Result<CardPresence> {
        let mut state = self.state();
        let always_changed = state.always_changed;
        let slot = state.reader_mut(reader)?;
        slot.presence_calls += 1;

        if let Some(message) = slot.fail_presence.take() {
            return Err(ReaderError::communication(message));
        }

        if slot.atr.is_none() {
            slot.observed = false;
            slot.changed = false;
            return Ok(CardPresence::Absent);
        }

        let changed = always_changed || std::mem::take(&mut slot.changed);
        slot.observed = true;
        if changed {
            Ok(CardPresence::Changed)
        } else {
            Ok(CardPresence::Present)
        }
    }

    fn connect(&mut self, reader: ReaderId) -> Result<CardHandle> {
        let mut state = self.state();
        let slot = state.reader_mut(reader)?;
        slot.connect_calls += 1;

        if let Some(message) = slot.fail_connect.take() {
            return Err(ReaderError::communication(message));
        }

        let atr = slot
            .atr
            .clone()
            .ok_or_else(|| ReaderError::no_card(reader.index()))?;
        slot.connected = true;

        Ok(CardHandle::new(reader, slot.name.clone(), atr))
    }

    fn disconnect(&mut self, card: CardHandle) -> Result<()> {
        let mut state = self.state();
        let slot = state.reader_mut(card.reader())?;
        slot.disconnect_calls += 1;
        // The handle is gone either way, so is the connection
        slot.connected = false;

        if let Some(message) = slot.fail_disconnect.take() {
            return Err(ReaderError::communication(message));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockState {
    readers: Vec<MockReader>,

    /// Report every present card as changed.
    always_changed: bool,
}

impl MockState {
    fn reader(&self, reader: ReaderId) -> Result<&MockReader> {
        self.readers
            .get(reader.index())
            .ok_or_else(|| ReaderError::no_such_reader(reader.index()))
    }

    fn reader_mut(&mut self, reader: ReaderId) -> Result<&mut MockReader> {
        self.readers
            .get_mut(reader.index())
            .ok_or_else(|| ReaderError::no_such_reader(reader.index()))
    }
}

#[derive(Debug, Default)]
struct MockReader {
    name: String,

    /// ATR of the card in the reader.
    atr: Option<Vec<u8>>,

    /// A card was seen present at the last poll.
    observed: bool,

    /// Card was replaced since the last poll.
    changed: bool,

    connected: bool,
    fail_presence: Option<String>,
    fail_connect: Option<String>,
    fail_disconnect: Option<String>,
    presence_calls: usize,
    connect_calls: usize,
    disconnect_calls: usize,
}

impl MockReader {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// Call counters of one mock reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockReaderStats {
    pub presence_calls: usize,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    /// A connection is currently open.
    pub connected: bool,
}

/// Handle for controlling mock readers.
///
/// Cloning the handle shares the same readers.
#[derive(Debug, Clone)]
pub struct MockReadersHandle {
    shared: Arc<Mutex<MockState>>,
}

impl MockReadersHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_reader<R>(&self, reader: ReaderId, f: impl FnOnce(&mut MockReader) -> R) -> Option<R> {
        self.state().readers.get_mut(reader.index()).map(f)
    }

    /// Put a card in a reader.
    ///
    /// If the reader already held a card that the transport reported on its
    /// last poll, the next poll reports [`CardPresence::Changed`].
    pub fn insert_card(&self, reader: ReaderId, atr: Vec<u8>) {
        self.with_reader(reader, |slot| {
            if slot.observed {
                slot.changed = true;
            }
            slot.atr = Some(atr);
        });
    }

    /// Take the card out of a reader.
    pub fn remove_card(&self, reader: ReaderId) {
        self.with_reader(reader, |slot| {
            slot.atr = None;
        });
    }

    /// Replace the card in a reader between two polls.
    pub fn swap_card(&self, reader: ReaderId, atr: Vec<u8>) {
        self.with_reader(reader, |slot| {
            slot.atr = Some(atr);
            slot.changed = true;
        });
    }

    /// Make every poll of a present card report a change.
    pub fn set_always_changed(&self, enabled: bool) {
        self.state().always_changed = enabled;
    }

    /// Fail the next presence poll of a reader.
    pub fn fail_next_presence(&self, reader: ReaderId, message: impl Into<String>) {
        let message = message.into();
        self.with_reader(reader, |slot| slot.fail_presence = Some(message));
    }

    /// Fail the next connect on a reader.
    pub fn fail_next_connect(&self, reader: ReaderId, message: impl Into<String>) {
        let message = message.into();
        self.with_reader(reader, |slot| slot.fail_connect = Some(message));
    }

    /// Fail the next disconnect on a reader.
    pub fn fail_next_disconnect(&self, reader: ReaderId, message: impl Into<String>) {
        let message = message.into();
        self.with_reader(reader, |slot| slot.fail_disconnect = Some(message));
    }

    /// Check if a card is in a reader.
    pub fn is_card_inserted(&self, reader: ReaderId) -> bool {
        self.state()
            .reader(reader)
            .is_ok_and(|slot| slot.atr.is_some())
    }

    /// Call counters of a reader, or defaults for an unknown reader.
    pub fn stats(&self, reader: ReaderId) -> MockReaderStats {
        self.state()
            .reader(reader)
            .map(|slot| MockReaderStats {
                presence_calls: slot.presence_calls,
                connect_calls: slot.connect_calls,
                disconnect_calls: slot.disconnect_calls,
                connected: slot.connected,
            })
            .unwrap_or_default()
    }

    /// Number of readers.
    pub fn reader_count(&self) -> usize {
        self.state().readers.len()
    }
}
