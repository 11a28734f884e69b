//! Virtual slot pool.
//!
//! The pool is a fixed array of [`VirtualSlot`]s shared by every reader. A
//! slot is allocated by pointing it at a card table entry and freed by
//! clearing that link; the array itself never grows or shrinks, so a slot id
//! stays valid for the lifetime of the pool.

use crate::card::CardSlotEntry;
use crate::error::{Exhaustion, Result, SlotError};
use crate::framework::FwContext;
use crate::pool::{ObjectHandle, ObjectPool};
use std::fmt;
use tokenbay_core::{ReaderId, SlotId, SlotInfo, UserType};
use tracing::{debug, warn};

/// Object stored in a slot's object pool.
pub trait SlotObject: Send {
    /// Release hook called when the slot's token is torn down.
    ///
    /// # Errors
    ///
    /// Errors are logged; the object is dropped either way.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One logical slot.
pub struct VirtualSlot {
    id: SlotId,
    pub(crate) card: Option<ReaderId>,
    info: SlotInfo,
    pub(crate) objects: ObjectPool<Box<dyn SlotObject>>,
    login_user: Option<UserType>,
    pub(crate) fw_context: Option<FwContext>,
}

impl fmt::Debug for VirtualSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualSlot")
            .field("id", &self.id)
            .field("card", &self.card)
            .field("info", &self.info)
            .field("objects", &self.objects.len())
            .field("login_user", &self.login_user)
            .field("has_fw_context", &self.fw_context.is_some())
            .finish()
    }
}

impl VirtualSlot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            card: None,
            info: SlotInfo::default(),
            objects: ObjectPool::new(),
            login_user: None,
            fw_context: None,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Reader whose card owns this slot, or `None` if the slot is free.
    pub fn reader(&self) -> Option<ReaderId> {
        self.card
    }

    pub fn is_allocated(&self) -> bool {
        self.card.is_some()
    }

    pub fn info(&self) -> &SlotInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut SlotInfo {
        &mut self.info
    }

    pub fn is_token_present(&self) -> bool {
        self.info.is_token_present()
    }

    pub fn login_user(&self) -> Option<UserType> {
        self.login_user
    }

    pub fn set_login_user(&mut self, user: Option<UserType>) {
        self.login_user = user;
    }

    /// Add an object to the slot's object pool.
    pub fn add_object(&mut self, object: impl SlotObject + 'static) -> ObjectHandle {
        self.objects.insert(Box::new(object))
    }

    pub fn objects(&self) -> &ObjectPool<Box<dyn SlotObject>> {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectPool<Box<dyn SlotObject>> {
        &mut self.objects
    }

    /// Attach per-token framework data, returned to the framework on teardown.
    pub fn set_context(&mut self, context: FwContext) {
        self.fw_context = Some(context);
    }

    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.fw_context.as_deref()?.downcast_ref()
    }

    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.fw_context.as_deref_mut()?.downcast_mut()
    }

    /// Return everything except the card link to the "no token" state.
    ///
    /// The card link is cleared separately, as the last teardown step.
    pub(crate) fn reset(&mut self) {
        self.info = SlotInfo::default();
        self.login_user = None;
        self.fw_context = None;
    }
}

/// Fixed-capacity pool of virtual slots.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<VirtualSlot>,
}

impl SlotPool {
    /// Create a pool of `capacity` free slots with ids `0..capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|i| VirtualSlot::new(SlotId::new(i))).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot for a card.
    ///
    /// The slot's description is set to the reader name and the card's slot
    /// count goes up by one.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::ResourceExhausted` if the card already holds its
    /// full budget or if no slot is free. Neither case changes any state.
    pub fn allocate(&mut self, card: &mut CardSlotEntry) -> Result<&mut VirtualSlot> {
        let reader = card.reader();

        if card.num_slots >= card.max_slots {
            warn!(
                reader = %reader,
                "Slot budget of {} exhausted for card",
                card.max_slots
            );
            return Err(SlotError::ResourceExhausted(Exhaustion::CardBudget {
                reader,
                max_slots: card.max_slots,
            }));
        }

        let capacity = self.capacity();
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.card.is_none()) else {
            warn!(reader = %reader, "Virtual slot pool exhausted ({} slots)", capacity);
            return Err(SlotError::ResourceExhausted(Exhaustion::PoolFull { capacity }));
        };

        slot.card = Some(reader);
        slot.info.set_description(card.reader_name());
        card.num_slots += 1;

        debug!(reader = %reader, "Allocated slot {}", slot.id);
        Ok(slot)
    }

    /// # Errors
    ///
    /// Returns `SlotError::InvalidSlotId` if `id` is outside the pool.
    pub fn lookup(&self, id: SlotId) -> Result<&VirtualSlot> {
        self.slots
            .get(id.index())
            .ok_or(SlotError::InvalidSlotId { id })
    }

    /// # Errors
    ///
    /// Returns `SlotError::InvalidSlotId` if `id` is outside the pool.
    pub fn lookup_mut(&mut self, id: SlotId) -> Result<&mut VirtualSlot> {
        self.slots
            .get_mut(id.index())
            .ok_or(SlotError::InvalidSlotId { id })
    }

    /// Look up a slot that has a token.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::InvalidSlotId` if `id` is outside the pool and
    /// `SlotError::TokenNotPresent` if the slot has no token.
    pub fn lookup_present(&self, id: SlotId) -> Result<&VirtualSlot> {
        let slot = self.lookup(id)?;
        if !slot.is_token_present() {
            return Err(SlotError::TokenNotPresent);
        }
        Ok(slot)
    }

    /// Mutable form of [`SlotPool::lookup_present`].
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::lookup_present`].
    pub fn lookup_present_mut(&mut self, id: SlotId) -> Result<&mut VirtualSlot> {
        let slot = self.lookup_mut(id)?;
        if !slot.is_token_present() {
            return Err(SlotError::TokenNotPresent);
        }
        Ok(slot)
    }

    /// Ids of the slots allocated to a reader's card.
    pub fn slots_for_reader(&self, reader: ReaderId) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|slot| slot.card == Some(reader))
            .map(VirtualSlot::id)
            .collect()
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_allocated()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualSlot> {
        self.slots.iter()
    }
}
