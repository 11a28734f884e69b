//! Slot manager.
//!
//! This module provides [`SlotManager`], which owns the card table and the
//! virtual slot pool and runs card detection and removal against them.
//!
//! # Architecture
//!
//! ```text
//!                ┌────────────────────── SlotManager (one lock) ─────────────────────┐
//!                │                                                                   │
//! detect_one ───►│  presence ─► connect ─► bind (registry order) ─► create_tokens    │
//!                │                                                      │            │
//!                │                                   SlotPool::allocate ◄┘            │
//!                │                                                                   │
//! card_removed ─►│  slot teardown* ─► unbind ─► disconnect                           │
//!                │  (*sessions, object pool, release_token, reset)                   │
//!                └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation takes the same lock, so a caller never sees a card half
//! way through detection or removal. Calls block on reader I/O.
//!
//! # Examples
//!
//! ```
//! use tokenbay_core::ReaderId;
//! use tokenbay_hardware::mock::MockReaders;
//! use tokenbay_slots::{SlotError, SlotManager};
//!
//! let (readers, _handle) = MockReaders::new(1);
//! let manager = SlotManager::builder(readers).build().unwrap();
//!
//! // Nothing in the reader yet
//! let result = manager.detect_one(ReaderId::new(0));
//! assert!(matches!(result, Err(SlotError::TokenNotPresent)));
//!
//! // The sweep never fails as a whole
//! manager.detect_all().unwrap();
//! ```

use crate::card::{CardSlotEntry, CardState, CardTable};
use crate::error::{Result, SlotError};
use crate::framework::{Framework, FrameworkRegistry, FrameworkRegistryBuilder};
use crate::session::{NoSessions, SessionManager};
use crate::slot::{SlotPool, VirtualSlot};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokenbay_core::constants::MAX_CARD_CHANGE_RETRIES;
use tokenbay_core::{ReaderId, SlotConfig, SlotId, SlotInfo, UserType};
use tokenbay_hardware::{CardPresence, ReaderInfo, ReaderTransport};
use tracing::{debug, info, trace, warn};

/// Owned copy of a slot's client-visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub id: SlotId,

    /// Reader whose card owns the slot, `None` for a free slot.
    pub reader: Option<ReaderId>,

    pub info: SlotInfo,
    pub login_user: Option<UserType>,

    /// Objects currently in the slot's object pool.
    pub object_count: usize,
}

impl SlotSnapshot {
    fn of(slot: &VirtualSlot) -> Self {
        Self {
            id: slot.id(),
            reader: slot.reader(),
            info: slot.info().clone(),
            login_user: slot.login_user(),
            object_count: slot.objects().len(),
        }
    }
}

/// Result of one detection together with the reader's state right after it.
///
/// Everything here is read under the same lock as the detection itself.
#[derive(Debug)]
pub struct Detection {
    /// What [`SlotManager::detect_one`] would have returned.
    pub result: Result<()>,

    pub state: CardState,

    /// Slots allocated to the reader's card.
    pub slots: Vec<SlotId>,

    /// When the current card was connected, if one is.
    pub connected_at: Option<DateTime<Utc>>,
}

/// Card table, slot pool and collaborators, guarded by the manager's lock.
struct Engine {
    transport: Box<dyn ReaderTransport>,
    sessions: Box<dyn SessionManager>,
    frameworks: FrameworkRegistry,
    cards: CardTable,
    slots: SlotPool,
    slots_per_card: usize,
}

impl Engine {
    fn detect(&mut self, reader: ReaderId) -> Result<()> {
        self.cards.get(reader)?;
        debug!(reader = %reader, "Detecting smart card");

        let mut retries = MAX_CARD_CHANGE_RETRIES;
        loop {
            let presence = self.transport.presence(reader).map_err(|e| {
                debug!(reader = %reader, "Card detection failed: {}", e);
                SlotError::Backend(e)
            })?;

            match presence {
                CardPresence::Present => break,
                CardPresence::Absent => {
                    debug!(reader = %reader, "Card absent");
                    self.remove_card(reader)?;
                    return Err(SlotError::TokenNotPresent);
                }
                CardPresence::Changed => {
                    debug!(reader = %reader, "Card changed");
                    // A transport that keeps reporting a change would
                    // otherwise keep us here forever.
                    if retries == 0 {
                        warn!(reader = %reader, "Card still changing after removal, giving up");
                        return Err(SlotError::TokenNotPresent);
                    }
                    retries -= 1;
                    self.remove_card(reader)?;
                }
            }
        }

        let entry = self.cards.get_mut(reader)?;

        if entry.card.is_none() {
            debug!(reader = %reader, "Connecting to smart card");
            let card = self.transport.connect(reader)?;
            info!(reader = %reader, atr = %card.atr_hex(), "Card connected");
            entry.card = Some(card);
        }

        let framework_id = match entry.framework {
            Some(id) => id,
            None => {
                debug!(reader = %reader, "Detecting framework");
                entry.max_slots = self.slots_per_card;

                let mut bound = None;
                for (id, framework) in self.frameworks.iter() {
                    match framework.bind(entry) {
                        Ok(context) => {
                            bound = Some((id, framework.name(), context));
                            break;
                        }
                        Err(e) => {
                            trace!(reader = %reader, framework = framework.name(), "Bind declined: {}", e);
                        }
                    }
                }

                let Some((id, name, context)) = bound else {
                    info!(reader = %reader, "No framework recognized the card");
                    return Err(SlotError::TokenNotRecognized);
                };

                info!(reader = %reader, framework = name, "Framework bound");
                entry.framework = Some(id);
                entry.fw_context = context;
                entry.tokens_created = false;
                id
            }
        };

        if entry.tokens_created {
            debug!(reader = %reader, "Detection ended");
            return Ok(());
        }

        let framework = self.frameworks.get(framework_id).ok_or_else(|| {
            SlotError::framework(framework_id.to_string(), "not in registry")
        })?;

        debug!(reader = %reader, framework = framework.name(), "Creating tokens");
        match framework.create_tokens(entry, &mut self.slots) {
            Ok(()) => {
                entry.tokens_created = true;
                debug!(reader = %reader, slots = entry.num_slots, "Detection ended");
                Ok(())
            }
            Err(e) => {
                warn!(
                    reader = %reader,
                    framework = framework.name(),
                    "Token creation failed: {}",
                    e
                );
                for id in self.slots.slots_for_reader(reader) {
                    if let Err(teardown) = self.teardown_slot(id) {
                        warn!(slot = %id, "Rolling back slot failed: {}", teardown);
                    }
                }
                Err(e)
            }
        }
    }

    fn remove_card(&mut self, reader: ReaderId) -> Result<()> {
        self.cards.get(reader)?;
        debug!(reader = %reader, "Smart card removed");

        for id in self.slots.slots_for_reader(reader) {
            if let Err(e) = self.teardown_slot(id) {
                warn!(slot = %id, "Slot teardown failed: {}", e);
            }
        }

        let entry = self.cards.get_mut(reader)?;

        if let Some(id) = entry.framework {
            let context = entry.fw_context.take();
            if let Some(framework) = self.frameworks.get(id)
                && let Err(e) = framework.unbind(entry, context)
            {
                warn!(reader = %reader, framework = framework.name(), "Unbind failed: {}", e);
            }
        }
        entry.framework = None;
        entry.fw_context = None;
        entry.tokens_created = false;

        if let Some(card) = entry.card.take() {
            match self.transport.disconnect(card) {
                Ok(()) => info!(reader = %reader, "Card disconnected"),
                Err(e) => warn!(reader = %reader, "Disconnect failed: {}", e),
            }
        }

        Ok(())
    }

    fn teardown_slot(&mut self, id: SlotId) -> Result<()> {
        let slot = self.slots.lookup_mut(id)?;
        debug!(slot = %id, "Tearing down slot");

        if let Err(e) = self.sessions.close_all_sessions(id) {
            warn!(slot = %id, "Closing sessions failed: {}", e);
        }

        let drained = slot.objects.drain_with(|handle, mut object| {
            if let Err(e) = object.release() {
                warn!(slot = %id, object = %handle, "Object release failed: {}", e);
            }
        });
        trace!(slot = %id, "Released {} object(s)", drained);

        if let (Some(reader), Some(token)) = (slot.card, slot.fw_context.take()) {
            let entry = self.cards.get(reader)?;
            match entry.framework.and_then(|fw| self.frameworks.get(fw)) {
                Some(framework) => {
                    if let Err(e) = framework.release_token(entry, token) {
                        warn!(slot = %id, framework = framework.name(), "Token release failed: {}", e);
                    }
                }
                None => debug!(slot = %id, "No framework bound, dropping token context"),
            }
        }

        slot.reset();
        // Cleared last: everything above needs to know which card owned the slot.
        if let Some(reader) = slot.card.take() {
            let entry = self.cards.get_mut(reader)?;
            entry.num_slots = entry.num_slots.saturating_sub(1);
        }

        Ok(())
    }
}

/// Manages card detection and the virtual slots of every reader.
///
/// # Lifecycle
///
/// 1. Build with [`SlotManager::builder`], registering frameworks in
///    priority order
/// 2. Call [`detect_all`](SlotManager::detect_all) or
///    [`detect_one`](SlotManager::detect_one) to pick up cards
/// 3. Use slot lookups to reach tokens
/// 4. Call [`finalize`](SlotManager::finalize) to release every card; all
///    later calls fail with [`SlotError::NotInitialized`]
pub struct SlotManager {
    engine: Mutex<Option<Engine>>,
    readers: Vec<ReaderInfo>,
    config: SlotConfig,
}

impl std::fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotManager")
            .field("readers", &self.readers)
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl SlotManager {
    /// Start building a manager on top of a reader transport.
    pub fn builder(transport: impl ReaderTransport + 'static) -> SlotManagerBuilder {
        SlotManagerBuilder::new(Box::new(transport))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Engine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> Result<R>) -> Result<R> {
        let mut guard = self.lock();
        let engine = guard.as_mut().ok_or(SlotError::NotInitialized)?;
        f(engine)
    }

    /// Detect the card in one reader and create its tokens.
    ///
    /// # Errors
    ///
    /// - `TokenNotPresent` if the reader is empty or the card keeps changing
    /// - `TokenNotRecognized` if no framework claimed the card; the card
    ///   stays connected
    /// - `Backend` if the reader fails; nothing is changed
    /// - whatever the bound framework's token creation returns
    pub fn detect_one(&self, reader: ReaderId) -> Result<()> {
        self.with_engine(|engine| engine.detect(reader))
    }

    /// Detect the card in one reader and report the resulting state.
    ///
    /// Detection failures land in [`Detection::result`]; a failing reader
    /// keeps whatever state it had, which [`Detection::state`] shows.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after [`finalize`](SlotManager::finalize) and
    /// `InvalidReader` for an unknown reader.
    pub fn detect_observed(&self, reader: ReaderId) -> Result<Detection> {
        self.with_engine(|engine| {
            engine.cards.get(reader)?;
            let result = engine.detect(reader);

            let entry = engine.cards.get(reader)?;
            Ok(Detection {
                result,
                state: entry.state(),
                slots: engine.slots.slots_for_reader(reader),
                connected_at: entry.card().map(|card| card.connected_at()),
            })
        })
    }

    /// Detect cards in every reader.
    ///
    /// Failures of individual readers are logged and do not stop the sweep;
    /// query a reader with [`detect_one`](SlotManager::detect_one) or
    /// [`card_state`](SlotManager::card_state) to see its outcome.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after [`finalize`](SlotManager::finalize).
    pub fn detect_all(&self) -> Result<()> {
        self.with_engine(|engine| {
            let readers = engine.cards.readers().collect::<Vec<_>>();
            for reader in readers {
                match engine.detect(reader) {
                    Ok(()) => {}
                    Err(e) if e.is_token_absence() => {
                        trace!(reader = %reader, "No token: {}", e);
                    }
                    Err(e) => debug!(reader = %reader, "Detection failed: {}", e),
                }
            }
            Ok(())
        })
    }

    /// Release every slot of a reader's card, unbind its framework and
    /// disconnect it.
    ///
    /// Calling this for an empty reader is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReader` for an unknown reader. Failures of the
    /// framework, session layer or transport are logged, never returned.
    pub fn card_removed(&self, reader: ReaderId) -> Result<()> {
        self.with_engine(|engine| engine.remove_card(reader))
    }

    /// Tear down one slot: close its sessions, drain its objects, release
    /// its token and return it to the pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool.
    pub fn slot_removed(&self, id: SlotId) -> Result<()> {
        self.with_engine(|engine| engine.teardown_slot(id))
    }

    /// Snapshot of any slot, allocated or not.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool.
    pub fn get_slot(&self, id: SlotId) -> Result<SlotSnapshot> {
        self.with_engine(|engine| engine.slots.lookup(id).map(SlotSnapshot::of))
    }

    /// Snapshot of a slot that holds a token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool and
    /// `TokenNotPresent` if the slot has no token.
    pub fn get_token(&self, id: SlotId) -> Result<SlotSnapshot> {
        self.with_engine(|engine| engine.slots.lookup_present(id).map(SlotSnapshot::of))
    }

    /// Presentation metadata of a slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool.
    pub fn slot_info(&self, id: SlotId) -> Result<SlotInfo> {
        self.with_engine(|engine| Ok(engine.slots.lookup(id)?.info().clone()))
    }

    /// Run `f` on a slot with the manager's lock held.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool.
    pub fn with_slot<R>(&self, id: SlotId, f: impl FnOnce(&mut VirtualSlot) -> R) -> Result<R> {
        self.with_engine(|engine| Ok(f(engine.slots.lookup_mut(id)?)))
    }

    /// Run `f` on a slot holding a token with the manager's lock held.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSlotId` for an id outside the pool and
    /// `TokenNotPresent` if the slot has no token.
    pub fn with_token<R>(&self, id: SlotId, f: impl FnOnce(&mut VirtualSlot) -> R) -> Result<R> {
        self.with_engine(|engine| Ok(f(engine.slots.lookup_present_mut(id)?)))
    }

    /// Run `f` on a reader's card table entry with the manager's lock held.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReader` for an unknown reader.
    pub fn with_card<R>(&self, reader: ReaderId, f: impl FnOnce(&CardSlotEntry) -> R) -> Result<R> {
        self.with_engine(|engine| Ok(f(engine.cards.get(reader)?)))
    }

    /// Lifecycle state of a reader's card.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReader` for an unknown reader.
    pub fn card_state(&self, reader: ReaderId) -> Result<CardState> {
        self.with_card(reader, CardSlotEntry::state)
    }

    /// Ids of the slots allocated to a reader's card.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReader` for an unknown reader.
    pub fn reader_slots(&self, reader: ReaderId) -> Result<Vec<SlotId>> {
        self.with_engine(|engine| {
            engine.cards.get(reader)?;
            Ok(engine.slots.slots_for_reader(reader))
        })
    }

    /// Ids of every slot, or only of the slots holding a token.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after [`finalize`](SlotManager::finalize).
    pub fn slot_list(&self, token_present_only: bool) -> Result<Vec<SlotId>> {
        self.with_engine(|engine| {
            Ok(engine
                .slots
                .iter()
                .filter(|slot| !token_present_only || slot.is_token_present())
                .map(VirtualSlot::id)
                .collect())
        })
    }

    /// Remove every card and shut the manager down.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the manager was already finalized.
    pub fn finalize(&self) -> Result<()> {
        let mut guard = self.lock();
        let mut engine = guard.take().ok_or(SlotError::NotInitialized)?;

        let readers = engine.cards.readers().collect::<Vec<_>>();
        for reader in readers {
            if let Err(e) = engine.remove_card(reader) {
                warn!(reader = %reader, "Removal during finalize failed: {}", e);
            }
        }

        info!("Slot manager finalized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Readers enumerated when the manager was built.
    pub fn readers(&self) -> &[ReaderInfo] {
        &self.readers
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }
}

/// Builder for [`SlotManager`].
pub struct SlotManagerBuilder {
    transport: Box<dyn ReaderTransport>,
    sessions: Box<dyn SessionManager>,
    frameworks: FrameworkRegistryBuilder,
    config: SlotConfig,
}

impl SlotManagerBuilder {
    fn new(transport: Box<dyn ReaderTransport>) -> Self {
        Self {
            transport,
            sessions: Box::new(NoSessions),
            frameworks: FrameworkRegistry::builder(),
            config: SlotConfig::default(),
        }
    }

    pub fn config(mut self, config: SlotConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the session layer notified when slots are torn down.
    pub fn sessions(mut self, sessions: impl SessionManager + 'static) -> Self {
        self.sessions = Box::new(sessions);
        self
    }

    /// Register a framework after the ones registered so far.
    pub fn framework(mut self, framework: impl Framework + 'static) -> Self {
        self.frameworks = self.frameworks.register(framework);
        self
    }

    /// Register an already boxed framework.
    pub fn framework_boxed(mut self, framework: Box<dyn Framework>) -> Self {
        self.frameworks = self.frameworks.register_boxed(framework);
        self
    }

    /// Enumerate the readers and create the card table and slot pool.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<SlotManager> {
        self.config.validate()?;

        let readers = self.transport.readers();
        let frameworks = self.frameworks.build();
        let engine = Engine {
            cards: CardTable::new(&readers),
            slots: SlotPool::new(self.config.max_virtual_slots),
            slots_per_card: self.config.effective_slots_per_card(),
            transport: self.transport,
            sessions: self.sessions,
            frameworks,
        };

        info!(
            readers = readers.len(),
            slots = self.config.max_virtual_slots,
            "Slot manager initialized with frameworks {:?}",
            engine.frameworks.names()
        );

        Ok(SlotManager {
            engine: Mutex::new(Some(engine)),
            readers,
            config: self.config,
        })
    }
}
