//! PC/SC reader transport.
//!
//! Talks to the system smart card resource manager through the `pcsc` crate.
//! Readers are enumerated once when the transport is opened; their ordinals
//! follow the order reported by the resource manager.
//!
//! Presence is polled with a zero timeout, so [`ReaderTransport::presence`]
//! never blocks waiting for a card. A card swap is recognised through the
//! reader's event counter: when a card is present, a card was also present at
//! the previous poll, and the counter moved in between, the card was removed
//! and reinserted and the poll reports [`CardPresence::Changed`].

use crate::{
    ReaderError, Result,
    traits::{CardHandle, ReaderTransport},
    types::{CardPresence, ReaderInfo},
};
use pcsc::{Attribute, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use std::collections::HashMap;
use std::time::Duration;
use tokenbay_core::ReaderId;
use tracing::{debug, warn};

struct PcscReader {
    name: String,
    state: ReaderState,

    /// Event counter at the previous poll, if a card was present then.
    last_present_count: Option<u32>,
}

/// Reader transport backed by the PC/SC resource manager.
pub struct PcscTransport {
    context: Context,
    readers: Vec<PcscReader>,
    cards: HashMap<ReaderId, pcsc::Card>,
}

impl std::fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcscTransport")
            .field(
                "readers",
                &self.readers.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            )
            .field("connected", &self.cards.len())
            .finish()
    }
}

impl PcscTransport {
    /// Establish a user-scope context and enumerate the attached readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource manager is not running or the reader
    /// list cannot be read. No attached readers is not an error.
    pub fn open() -> Result<Self> {
        let context = Context::establish(Scope::User)?;

        let names = match context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let readers = names
            .into_iter()
            .map(|name| PcscReader {
                name: name.to_string_lossy().into_owned(),
                state: ReaderState::new(name, State::UNAWARE),
                last_present_count: None,
            })
            .collect::<Vec<_>>();

        debug!("Opened PC/SC context with {} reader(s)", readers.len());

        Ok(Self {
            context,
            readers,
            cards: HashMap::new(),
        })
    }

    fn reader_mut(&mut self, reader: ReaderId) -> Result<&mut PcscReader> {
        self.readers
            .get_mut(reader.index())
            .ok_or_else(|| ReaderError::no_such_reader(reader.index()))
    }
}

impl ReaderTransport for PcscTransport {
    fn readers(&self) -> Vec<ReaderInfo> {
        self.readers
            .iter()
            .enumerate()
            .map(|(i, reader)| ReaderInfo::new(ReaderId::new(i), reader.name.clone()))
            .collect()
    }

    fn presence(&mut self, reader: ReaderId) -> Result<CardPresence> {
        let context = self.context.clone();
        let slot = self.reader_mut(reader)?;

        match context.get_status_change(Duration::ZERO, std::slice::from_mut(&mut slot.state)) {
            Ok(()) | Err(pcsc::Error::Timeout) => {}
            Err(e) => return Err(e.into()),
        }
        slot.state.sync_current_state();

        let event_state = slot.state.event_state();
        if event_state.intersects(State::UNKNOWN | State::UNAVAILABLE) {
            return Err(ReaderError::disconnected(slot.name.clone()));
        }

        if !event_state.contains(State::PRESENT) {
            slot.last_present_count = None;
            return Ok(CardPresence::Absent);
        }

        let count = slot.state.event_count();
        let previous = slot.last_present_count.replace(count);
        match previous {
            Some(before) if before != count => Ok(CardPresence::Changed),
            _ => Ok(CardPresence::Present),
        }
    }

    fn connect(&mut self, reader: ReaderId) -> Result<CardHandle> {
        let index = reader.index();
        let slot = self
            .readers
            .get(index)
            .ok_or_else(|| ReaderError::no_such_reader(index))?;

        let card = match self
            .context
            .connect(slot.state.name(), ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => card,
            Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => {
                return Err(ReaderError::no_card(index));
            }
            Err(e) => return Err(e.into()),
        };
        let atr = card.get_attribute_owned(Attribute::AtrString)?;
        let handle = CardHandle::new(reader, slot.name.clone(), atr);

        if let Some(stale) = self.cards.insert(reader, card) {
            warn!(reader = %reader, "Replacing an open PC/SC connection");
            if let Err((_, e)) = stale.disconnect(Disposition::LeaveCard) {
                warn!(reader = %reader, "Releasing the stale connection failed: {}", e);
            }
        }

        Ok(handle)
    }

    fn disconnect(&mut self, card: CardHandle) -> Result<()> {
        let Some(connection) = self.cards.remove(&card.reader()) else {
            return Ok(());
        };

        connection
            .disconnect(Disposition::ResetCard)
            .map_err(|(_, e)| ReaderError::from(e))
    }
}
