//! Keypad bridge - turns a serial macro keypad into host media controls
//!
//! The device streams newline-delimited JSON records (`{"ks":4,"kd":2}` for
//! keys, `{"p":57}` for the rotary pot). The bridge decodes them, resolves
//! key edges through a command table, debounces the pot into volume changes,
//! and pushes host volume/mute back to the device on every connect.
//!
//! Data flow per session:
//!
//! ```text
//! Link → codec → Classifier ─┬→ KeyDispatcher ──→ ActionSink
//!                            └→ SampleBuffer → AnalogDebouncer ─┘
//! ```
//!
//! The [`supervisor::Supervisor`] owns the reconnect cycle around sessions.

pub mod action;
pub mod cancel;
pub mod classifier;
pub mod codec;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod link;
pub mod monitor;
pub mod session;
pub mod sinks;
pub mod supervisor;

pub use action::{Action, ActionSink, HostStatus};
pub use config::AppConfig;
pub use error::{ActionError, BridgeError, DecodeError};
pub use event::{AnalogSample, Edge, Event, KeyEvent};
pub use supervisor::{DeviceTarget, ReconnectPolicy, Supervisor};
