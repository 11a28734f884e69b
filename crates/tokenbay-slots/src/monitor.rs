//! Background card monitor.
//!
//! [`SlotMonitor`] runs detection sweeps on a timer and turns what it sees
//! into [`SlotEvent`]s.
//!
//! ```text
//! ┌──────────────┐  spawn_blocking   ┌─────────────┐
//! │ monitor task │ ────────────────► │ SlotManager │  detect_one per reader
//! └──────┬───────┘                   └─────────────┘
//!        │ mpsc (bounded)
//!        ▼
//! ┌──────────────┐
//! │MonitorHandle │  recv() / shutdown()
//! └──────────────┘
//! ```
//!
//! The manager's calls block on reader I/O, so every sweep runs on the
//! blocking thread pool. The task stops by itself once the manager is
//! finalized.

use crate::card::CardState;
use crate::error::{Result, SlotError};
use crate::manager::{Detection, SlotManager};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokenbay_core::constants::{EVENT_CHANNEL_CAPACITY, MIN_POLL_INTERVAL_MS};
use tokenbay_core::{ReaderId, SlotId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Change observed by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    /// A card was recognized and its tokens created.
    TokenInserted { reader: ReaderId, slots: Vec<SlotId> },

    /// A card whose tokens were exposed went away.
    TokenRemoved { reader: ReaderId },

    /// A card is present but no framework recognized it.
    CardUnrecognized { reader: ReaderId },

    /// Detection failed for another reason.
    DetectionFailed { reader: ReaderId, error: String },
}

impl SlotEvent {
    pub fn reader(&self) -> ReaderId {
        match self {
            Self::TokenInserted { reader, .. }
            | Self::TokenRemoved { reader }
            | Self::CardUnrecognized { reader }
            | Self::DetectionFailed { reader, .. } => *reader,
        }
    }
}

/// Token state of a reader, derived from its card entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReaderStatus {
    Empty,
    Ready(DateTime<Utc>),
    Unrecognized,
}

impl ReaderStatus {
    fn of(detection: &Detection) -> Self {
        match (detection.state, detection.connected_at) {
            (CardState::Ready, Some(at)) => Self::Ready(at),
            (CardState::Connected, _) => Self::Unrecognized,
            _ => Self::Empty,
        }
    }
}

/// Last view of a reader: its token state and the last detection error.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReaderView {
    status: ReaderStatus,
    error: Option<String>,
}

impl ReaderView {
    const EMPTY: Self = Self {
        status: ReaderStatus::Empty,
        error: None,
    };

    fn of(detection: &Detection) -> Self {
        let error = match &detection.result {
            Err(e) if !e.is_token_absence() => Some(e.to_string()),
            _ => None,
        };
        Self {
            status: ReaderStatus::of(detection),
            error,
        }
    }
}

/// Events implied by a reader moving from `old` to `new`.
///
/// Token events follow the card entry only, so a failed poll of a reader
/// whose card is still bound reports the failure and nothing else.
fn transition(
    reader: ReaderId,
    old: &ReaderView,
    new: &ReaderView,
    slots: &[SlotId],
) -> Vec<SlotEvent> {
    let mut events = Vec::new();

    if old.status != new.status {
        if matches!(old.status, ReaderStatus::Ready(_)) {
            events.push(SlotEvent::TokenRemoved { reader });
        }
        match new.status {
            ReaderStatus::Empty => {}
            ReaderStatus::Ready(_) => events.push(SlotEvent::TokenInserted {
                reader,
                slots: slots.to_vec(),
            }),
            ReaderStatus::Unrecognized => events.push(SlotEvent::CardUnrecognized { reader }),
        }
    }

    if let Some(error) = &new.error {
        if old.error.as_ref() != Some(error) {
            events.push(SlotEvent::DetectionFailed {
                reader,
                error: error.clone(),
            });
        }
    }
    events
}

/// Detect every reader once, updating `last` and returning the changes.
///
/// Fails only with `NotInitialized`.
fn sweep(manager: &SlotManager, last: &mut [ReaderView]) -> Result<Vec<SlotEvent>> {
    let mut events = Vec::new();

    for (index, old) in last.iter_mut().enumerate() {
        let reader = ReaderId::new(index);
        let detection = manager.detect_observed(reader)?;
        let new = ReaderView::of(&detection);

        events.extend(transition(reader, old, &new, &detection.slots));
        *old = new;
    }

    Ok(events)
}

/// Handle to a running [`SlotMonitor`].
pub struct MonitorHandle {
    event_rx: mpsc::Receiver<SlotEvent>,
    tasks: JoinSet<Result<()>>,
}

impl MonitorHandle {
    /// Receive the next event.
    ///
    /// Returns `None` once the monitor task has stopped, for example after
    /// the manager was finalized.
    pub async fn recv(&mut self) -> Option<SlotEvent> {
        self.event_rx.recv().await
    }

    /// Stop the monitor and wait for its task to end.
    ///
    /// A sweep already running on the blocking pool finishes first.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();

        let mut failed = 0usize;
        let mut panicked = 0usize;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Monitor task failed: {}", e);
                    failed += 1;
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    warn!("Monitor task panicked: {}", e);
                    panicked += 1;
                }
            }
        }

        info!(failed, panicked, "Slot monitor stopped");
    }
}

/// Periodically sweeps all readers of a [`SlotManager`].
#[derive(Debug)]
pub struct SlotMonitor {
    manager: Arc<SlotManager>,
    interval: Duration,
}

impl SlotMonitor {
    /// Create a monitor polling at the manager's configured interval.
    pub fn new(manager: Arc<SlotManager>) -> Self {
        let interval = manager.config().poll_interval();
        Self { manager, interval }
    }

    /// Override the poll interval.
    ///
    /// Intervals below the built-in minimum are raised to it.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS))
    }

    /// Spawn the monitor task on the current tokio runtime.
    pub fn start(self) -> MonitorHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();

        let interval = self.interval();
        info!(interval_ms = interval.as_millis() as u64, "Starting slot monitor");
        tasks.spawn(Self::run(self.manager, interval, event_tx));

        MonitorHandle { event_rx, tasks }
    }

    async fn run(
        manager: Arc<SlotManager>,
        interval: Duration,
        tx: mpsc::Sender<SlotEvent>,
    ) -> Result<()> {
        let mut last = vec![ReaderView::EMPTY; manager.reader_count()];

        loop {
            let start = tokio::time::Instant::now();

            let sweeper = Arc::clone(&manager);
            let joined = tokio::task::spawn_blocking(move || {
                let events = sweep(&sweeper, &mut last);
                (last, events)
            })
            .await;

            let events = match joined {
                Ok((status, Ok(events))) => {
                    last = status;
                    events
                }
                Ok((_, Err(SlotError::NotInitialized))) => {
                    debug!("Slot manager finalized, monitor exiting");
                    return Ok(());
                }
                Ok((_, Err(e))) => return Err(e),
                Err(e) => {
                    warn!("Detection sweep aborted: {}", e);
                    return Ok(());
                }
            };

            for event in events {
                debug!(reader = %event.reader(), "Slot event: {:?}", event);
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        // Receiver is behind; wait once, then block on the send
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(TrySendError::Closed(_)) => return Ok(()),
                }
            }

            let elapsed = start.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
    }
}
