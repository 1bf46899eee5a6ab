//! Configuration management for the keypad bridge
//!
//! Handles loading, defaulting and validation of the YAML configuration
//! file. YAML is a JSON superset, so a JSON profile with a `commands` list
//! loads as well.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::classifier::DEFAULT_SAMPLE_CAPACITY;
use crate::commands::{BindingConfig, CommandTable};
use crate::dispatch::DEFAULT_MAX_IN_FLIGHT;
use crate::error::BridgeError;
use crate::link::{DEFAULT_BAUD_RATE, READ_TIMEOUT};
use crate::session::SessionConfig;
use crate::sinks::ShellActions;
use crate::supervisor::{DeviceTarget, ReconnectPolicy};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub actions: ShellActions,
    /// Ordered command table; absent means the built-in transport bindings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<BindingConfig>>,
}

/// Serial device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Delay after opening the port before first use
    #[serde(default = "default_device_settle_ms")]
    pub settle_ms: u64,
}

/// Event pipeline tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_line_queue")]
    pub line_queue: usize,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_escalated_delay_ms")]
    pub escalated_delay_ms: u64,
    #[serde(default = "default_escalate_after_ms")]
    pub escalate_after_ms: u64,
    #[serde(default = "default_session_backoff_ms")]
    pub session_backoff_ms: u64,
    /// Exit instead of retrying forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub give_up_after_ms: Option<u64>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await.map_err(|e| {
            BridgeError::Configuration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::parse(&contents).map_err(|e| match e {
            BridgeError::Configuration(reason) => {
                BridgeError::Configuration(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self, BridgeError> {
        let config: AppConfig = serde_yaml::from_str(contents)
            .map_err(|e| BridgeError::Configuration(format!("invalid YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    ///
    /// The device path is checked separately in [`AppConfig::device_target`]
    /// since it may come from the command line.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let invalid = |msg: String| Err(BridgeError::Configuration(msg));

        if self.device.baud == 0 {
            return invalid("device.baud must be greater than 0".to_string());
        }

        let bridge = &self.bridge;
        for (name, value) in [
            ("bridge.sample_capacity", bridge.sample_capacity),
            ("bridge.max_in_flight", bridge.max_in_flight),
            ("bridge.line_queue", bridge.line_queue),
        ] {
            if value == 0 {
                return invalid(format!("{} must be greater than 0", name));
            }
        }
        if bridge.poll_interval_ms == 0 {
            return invalid("bridge.poll_interval_ms must be greater than 0".to_string());
        }
        if bridge.heartbeat_ms == 0 {
            return invalid("bridge.heartbeat_ms must be greater than 0".to_string());
        }

        // The old reader thread still holds the port until its read times out
        let min_backoff = READ_TIMEOUT.as_millis() as u64;
        if self.reconnect.session_backoff_ms < min_backoff {
            return invalid(format!(
                "reconnect.session_backoff_ms must be at least {}",
                min_backoff
            ));
        }

        if let Some(commands) = &self.commands {
            for (idx, binding) in commands.iter().enumerate() {
                if let Err(reason) = binding.to_binding() {
                    return invalid(format!(
                        "command {} ('{}'): {}",
                        idx, binding.description, reason
                    ));
                }
            }
        }

        Ok(())
    }

    /// Command table from config, or the built-in bindings
    pub fn command_table(&self) -> Result<CommandTable, BridgeError> {
        match &self.commands {
            None => Ok(CommandTable::defaults()),
            Some(commands) => commands
                .iter()
                .enumerate()
                .map(|(idx, binding)| {
                    binding.to_binding().map_err(|reason| {
                        BridgeError::Configuration(format!("command {}: {}", idx, reason))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(CommandTable::new),
        }
    }

    /// Device to connect to, with an optional command-line override
    pub fn device_target(&self, path_override: Option<&str>) -> Result<DeviceTarget, BridgeError> {
        let path = path_override.unwrap_or(&self.device.path).trim();
        if path.is_empty() {
            return Err(BridgeError::Configuration(
                "device.path cannot be empty (set it in the config or pass --device)".to_string(),
            ));
        }

        Ok(DeviceTarget {
            path: path.to_string(),
            baud: self.device.baud,
        })
    }

    pub fn device_settle(&self) -> Duration {
        Duration::from_millis(self.device.settle_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        let bridge = &self.bridge;
        SessionConfig {
            settle_delay: Duration::from_millis(bridge.settle_delay_ms),
            poll_interval: Duration::from_millis(bridge.poll_interval_ms),
            sample_capacity: bridge.sample_capacity,
            max_in_flight: bridge.max_in_flight,
            line_queue: bridge.line_queue,
            heartbeat: Duration::from_millis(bridge.heartbeat_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        ReconnectPolicy {
            delay: Duration::from_millis(r.delay_ms),
            escalated_delay: Duration::from_millis(r.escalated_delay_ms),
            escalate_after: Duration::from_millis(r.escalate_after_ms),
            session_backoff: Duration::from_millis(r.session_backoff_ms),
            give_up_after: r.give_up_after_ms.map(Duration::from_millis),
        }
    }

    /// Shared, read-only command table for sessions
    pub fn shared_command_table(&self) -> Result<Arc<CommandTable>, BridgeError> {
        self.command_table().map(Arc::new)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud: default_baud(),
            settle_ms: default_device_settle_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sample_capacity: default_sample_capacity(),
            max_in_flight: default_max_in_flight(),
            line_queue: default_line_queue(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            escalated_delay_ms: default_escalated_delay_ms(),
            escalate_after_ms: default_escalate_after_ms(),
            session_backoff_ms: default_session_backoff_ms(),
            give_up_after_ms: None,
        }
    }
}

// Default value functions
fn default_baud() -> u32 { DEFAULT_BAUD_RATE }
fn default_device_settle_ms() -> u64 { 2000 }
fn default_settle_delay_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_sample_capacity() -> usize { DEFAULT_SAMPLE_CAPACITY }
fn default_max_in_flight() -> usize { DEFAULT_MAX_IN_FLIGHT }
fn default_line_queue() -> usize { 256 }
fn default_heartbeat_ms() -> u64 { 1000 }
fn default_reconnect_delay_ms() -> u64 { 1000 }
fn default_escalated_delay_ms() -> u64 { 5000 }
fn default_escalate_after_ms() -> u64 { 10_000 }
fn default_session_backoff_ms() -> u64 { 5000 }
