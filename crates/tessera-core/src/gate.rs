//! Single-slot, timeout-bounded mutual exclusion.
//!
//! A [`BinaryGate`] holds at most one outstanding acquisition. Unlike a mutex
//! guard, the acquisition is not tied to a scope: the holder calls
//! [`BinaryGate::release`] explicitly, which lets the key lock registry hand a
//! gate across `await` points and between tasks.

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Default bound on gate waits.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// A single-slot gate with bounded waits.
#[derive(Debug)]
pub struct BinaryGate {
    slot: Semaphore,
}

impl Default for BinaryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Semaphore::new(1),
        }
    }

    /// Waits until the slot is free or `timeout` elapses.
    ///
    /// Waiters are served first-come-first-served.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockTimeout` carrying `timeout` if the slot stayed taken.
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.slot.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(())
            }
            Ok(Err(_)) => Err(Error::Internal {
                message: "gate semaphore closed".into(),
            }),
            Err(_) => Err(Error::LockTimeout { timeout }),
        }
    }

    /// Takes the slot if it is free, without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        match self.slot.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Frees the slot.
    ///
    /// Must only be called by the current holder. Releasing an open gate is
    /// logged and ignored so the slot count never exceeds one.
    pub fn release(&self) {
        if self.slot.available_permits() > 0 {
            tracing::warn!("release called on an open gate");
            return;
        }
        self.slot.add_permits(1);
    }

    /// Returns true while the slot is taken.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }
}
