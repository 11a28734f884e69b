//! Session layer seam.
//!
//! Sessions live in the client-facing layer. The slot manager only needs to
//! tell that layer to drop every session on a slot before the slot's token is
//! torn down.

use crate::error::Result;
use tokenbay_core::SlotId;

/// Client session collaborator.
pub trait SessionManager: Send {
    /// Close every session opened on `slot`.
    ///
    /// # Errors
    ///
    /// Errors are logged by the slot manager; teardown continues regardless.
    fn close_all_sessions(&self, slot: SlotId) -> Result<()>;
}

/// Session manager for deployments without a session layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

impl SessionManager for NoSessions {
    fn close_all_sessions(&self, _slot: SlotId) -> Result<()> {
        Ok(())
    }
}
