//! Error taxonomy for the bridge
//!
//! Only connection-level failures ([`BridgeError::Connection`] and
//! [`BridgeError::Disconnected`]) cross worker boundaries. Per-record and
//! per-action failures ([`DecodeError`], [`ActionError`]) are logged where they
//! happen and never end a session.

use std::time::Duration;
use thiserror::Error;

/// Failures that affect session lifecycle or startup
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The device could not be opened
    #[error("failed to open serial device {path}: {reason}")]
    Connection { path: String, reason: String },

    /// I/O failure or EOF on an established link
    #[error("link disconnected: {0}")]
    Disconnected(String),

    /// Invalid or missing configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The supervisor gave up reconnecting
    #[error("no usable device for {elapsed:?}, giving up")]
    RetryExhausted { elapsed: Duration },
}

impl BridgeError {
    /// True for failures that should trigger a reconnect cycle
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Disconnected(_))
    }
}

/// A device record that could not be parsed
///
/// Never propagated: the decoder converts it into an unrecognized event.
#[derive(Debug, Error)]
#[error("malformed record {raw:?}: {reason}")]
pub struct DecodeError {
    pub raw: String,
    pub reason: String,
}

/// An action invocation failed on the host side
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action '{action}' failed: {reason}")]
    Failed { action: String, reason: String },

    #[error("action '{0}' is not supported by this sink")]
    Unsupported(String),

    #[error("I/O error while running action: {0}")]
    Io(#[from] std::io::Error),
}
