//! Action sink boundary
//!
//! The bridge decides *that* an action fires and with what argument; an
//! [`ActionSink`] decides *how* it is carried out on the host. Sinks are
//! injected into a session as `Arc<dyn ActionSink>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ActionError;

/// Host action requested by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    PreviousTrack,
    PlayPause,
    NextTrack,
    ToggleMute,
    /// Output volume, 0-100
    SetVolume(u8),
    /// User-defined command payload from the command table
    Command(String),
}

impl Action {
    /// Stable identifier used in logs and sink configuration
    pub fn id(&self) -> &'static str {
        match self {
            Action::PreviousTrack => "previous_track",
            Action::PlayPause => "play_pause",
            Action::NextTrack => "next_track",
            Action::ToggleMute => "toggle_mute",
            Action::SetVolume(_) => "set_volume",
            Action::Command(_) => "command",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetVolume(value) => write!(f, "set_volume({})", value),
            Action::Command(cmd) => write!(f, "command({})", cmd),
            other => f.write_str(other.id()),
        }
    }
}

/// Host output state, pushed to the device on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub volume: u8,
    pub mute: bool,
}

/// Capability that performs host-visible effects
///
/// Implementations must be cheap to share (`Send + Sync`) since key
/// dispatches invoke them concurrently.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Sink name for logs (e.g., "shell", "console")
    fn name(&self) -> &str;

    /// Carry out an action
    async fn invoke(&self, action: &Action) -> Result<(), ActionError>;

    /// Query current host output state for the device status sync
    async fn status(&self) -> Result<HostStatus, ActionError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink shared by the dispatch, debounce and session tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    pub struct RecordingSink {
        invoked: Mutex<Vec<Action>>,
        fail_on: Mutex<Option<Action>>,
        status: Mutex<Option<HostStatus>>,
        delay: Mutex<Option<Duration>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_status(status: HostStatus) -> Arc<Self> {
            let sink = Self::default();
            *sink.status.lock() = Some(status);
            Arc::new(sink)
        }

        pub fn fail_on(&self, action: Action) {
            *self.fail_on.lock() = Some(action);
        }

        /// Make every invocation take this long
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = Some(delay);
        }

        pub fn invoked(&self) -> Vec<Action> {
            self.invoked.lock().clone()
        }

        /// Highest number of invocations seen running at once
        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn invoke(&self, action: &Action) -> Result<(), ActionError> {
            self.invoked.lock().push(action.clone());

            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.lock().as_ref() == Some(action) {
                return Err(ActionError::Failed {
                    action: action.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            Ok(())
        }

        async fn status(&self) -> Result<HostStatus, ActionError> {
            (*self.status.lock()).ok_or_else(|| ActionError::Unsupported("status".to_string()))
        }
    }
}
