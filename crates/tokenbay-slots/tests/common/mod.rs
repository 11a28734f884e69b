//! Common test utilities for slot manager integration tests.
//!
//! The helpers here record every callback the manager makes into a shared
//! [`CallLog`], so tests can assert on the exact teardown order.
//!
//! - [`AtrFramework`]: recognizes cards by ATR prefix and creates a fixed
//!   number of tokens, each holding one [`RecordingObject`]
//! - [`FlakyFramework`]: fails token creation a set number of times
//! - [`RecordingSessions`]: session layer that logs every close
//!
//! Every recording hook has a switch that makes it fail after logging, for
//! checking that teardown carries on past errors.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokenbay_core::{SlotConfig, SlotId};
use tokenbay_hardware::mock::{MockReaders, MockReadersHandle};
use tokenbay_slots::card::CardSlotEntry;
use tokenbay_slots::framework::{Framework, FwContext};
use tokenbay_slots::slot::{SlotObject, SlotPool};
use tokenbay_slots::{Result, SessionManager, SlotError, SlotManager, SlotManagerBuilder};

/// ATR prefix shared by the "recognized" test cards.
pub const KNOWN_ATR: [u8; 4] = [0x3B, 0x8F, 0x80, 0x01];

/// ATR no test framework recognizes.
pub const UNKNOWN_ATR: [u8; 2] = [0xFF, 0x00];

/// Shared, ordered record of callbacks.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Install a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tokenbay_slots=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Object whose release hook is recorded.
pub struct RecordingObject {
    pub name: String,
    pub log: CallLog,
    pub fail: bool,
}

impl SlotObject for RecordingObject {
    fn release(&mut self) -> Result<()> {
        self.log.push(format!("release_object:{}", self.name));
        if self.fail {
            return Err(SlotError::framework("object", "release refused"));
        }
        Ok(())
    }
}

/// Framework that claims cards whose ATR starts with `prefix`.
pub struct AtrFramework {
    pub name: String,
    pub prefix: Vec<u8>,
    pub tokens: usize,
    pub log: CallLog,
    pub failing_objects: bool,
    pub failing_release: bool,
    pub failing_unbind: bool,
}

impl AtrFramework {
    pub fn new(name: &str, prefix: &[u8], tokens: usize, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_vec(),
            tokens,
            log: log.clone(),
            failing_objects: false,
            failing_release: false,
            failing_unbind: false,
        }
    }
}

impl Framework for AtrFramework {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, card: &CardSlotEntry) -> Result<Option<FwContext>> {
        let atr = card.card().map(|c| c.atr().to_vec()).unwrap_or_default();
        if !atr.starts_with(&self.prefix) {
            return Err(SlotError::framework(&self.name, "ATR not recognized"));
        }
        self.log.push(format!("bind:{}", self.name));
        Ok(Some(Box::new(format!("{}-card", self.name))))
    }

    fn create_tokens(&self, card: &mut CardSlotEntry, slots: &mut SlotPool) -> Result<()> {
        self.log.push(format!("create_tokens:{}", self.name));
        for i in 0..self.tokens {
            let slot = slots.allocate(card)?;
            slot.info_mut().flags.token_present = true;
            slot.set_context(Box::new(i));
            let name = slot.id().to_string();
            slot.add_object(RecordingObject {
                name,
                log: self.log.clone(),
                fail: self.failing_objects,
            });
        }
        Ok(())
    }

    fn release_token(&self, _card: &CardSlotEntry, token: FwContext) -> Result<()> {
        let index = token.downcast::<usize>().map(|i| *i).unwrap_or(usize::MAX);
        self.log.push(format!("release_token:{}:{}", self.name, index));
        if self.failing_release {
            return Err(SlotError::framework(&self.name, "token release refused"));
        }
        Ok(())
    }

    fn unbind(&self, card: &CardSlotEntry, context: Option<FwContext>) -> Result<()> {
        let context = context
            .and_then(|c| c.downcast::<String>().ok())
            .map(|c| *c)
            .unwrap_or_default();
        self.log.push(format!(
            "unbind:{}:{}:slots={}",
            self.name,
            context,
            card.num_slots()
        ));
        if self.failing_unbind {
            return Err(SlotError::framework(&self.name, "unbind refused"));
        }
        Ok(())
    }
}

/// Framework that recognizes every card but fails token creation the first
/// `failures` times, after allocating one slot.
pub struct FlakyFramework {
    pub failures: AtomicUsize,
    pub log: CallLog,
}

impl FlakyFramework {
    pub fn new(failures: usize, log: &CallLog) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            log: log.clone(),
        }
    }
}

impl Framework for FlakyFramework {
    fn name(&self) -> &str {
        "flaky"
    }

    fn bind(&self, _card: &CardSlotEntry) -> Result<Option<FwContext>> {
        self.log.push("bind:flaky");
        Ok(None)
    }

    fn create_tokens(&self, card: &mut CardSlotEntry, slots: &mut SlotPool) -> Result<()> {
        self.log.push("create_tokens:flaky");
        let slot = slots.allocate(card)?;
        slot.info_mut().flags.token_present = true;

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SlotError::framework("flaky", "card read failed"));
        }
        Ok(())
    }
}

/// Session layer that records which slots were closed, optionally failing
/// every close after recording it.
#[derive(Debug, Clone, Default)]
pub struct RecordingSessions {
    pub log: CallLog,
    pub fail: bool,
}

impl RecordingSessions {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail: true,
        }
    }
}

impl SessionManager for RecordingSessions {
    fn close_all_sessions(&self, slot: SlotId) -> Result<()> {
        self.log.push(format!("close_sessions:{slot}"));
        if self.fail {
            return Err(SlotError::framework("sessions", "close refused"));
        }
        Ok(())
    }
}

/// Builder over `count` mock readers with recording sessions attached.
pub fn builder(count: usize, log: &CallLog) -> (SlotManagerBuilder, MockReadersHandle) {
    init_tracing();
    let (readers, handle) = MockReaders::new(count);
    let builder = SlotManager::builder(readers).sessions(RecordingSessions::new(log));
    (builder, handle)
}

pub fn config(slots_per_card: usize, max_virtual_slots: usize) -> SlotConfig {
    SlotConfig {
        slots_per_card,
        max_virtual_slots,
        ..SlotConfig::default()
    }
}
