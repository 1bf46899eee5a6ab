//! Device link
//!
//! A [`Link`] owns one open connection to the device and yields its
//! newline-delimited records. A [`Connector`] opens links; the supervisor
//! holds one and asks it for a fresh link on every (re)connect.
//!
//! Any I/O failure on a link is terminal: it surfaces as
//! [`BridgeError::Disconnected`] and the session is torn down.

pub mod serial;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BridgeError;

pub use serial::{SerialConnector, SerialLink, DEFAULT_BAUD_RATE, READ_TIMEOUT};

/// Shared liveness flag of a link
///
/// Cloned out of the link so the session heartbeat can check liveness while
/// the ingestion worker owns the link itself.
#[derive(Debug, Clone)]
pub struct LinkHealth {
    alive: Arc<AtomicBool>,
}

impl LinkHealth {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Non-blocking liveness check
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// One open device connection
#[async_trait]
pub trait Link: Send {
    /// Human-readable endpoint (device path)
    fn endpoint(&self) -> &str;

    /// Wait for the next record, without its newline
    ///
    /// Must be cancel-safe: dropping the future loses no data.
    async fn read_line(&mut self) -> Result<Vec<u8>, BridgeError>;

    /// Write one record, appending the newline
    async fn write_line(&mut self, line: &[u8]) -> Result<(), BridgeError>;

    /// Liveness handle for the heartbeat
    fn health(&self) -> LinkHealth;

    /// Release the device
    fn close(&mut self);
}

/// Opens links to an already-resolved device path
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, path: &str, baud: u32) -> Result<Box<dyn Link>, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_is_shared() {
        let health = LinkHealth::new();
        let observer = health.clone();
        assert!(observer.is_alive());
        health.mark_dead();
        assert!(!observer.is_alive());
    }
}
