//! Console sink - logs all actions for testing and debugging

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::action::{Action, ActionSink, HostStatus};
use crate::error::ActionError;

/// ConsoleSink logs every action instead of touching the host
///
/// This is useful for:
/// - Trying a command table without side effects
/// - Checking debounce behaviour of the knob
/// - Development without host integration
pub struct ConsoleSink {
    state: Mutex<ConsoleState>,
}

#[derive(Debug)]
struct ConsoleState {
    status: HostStatus,
    /// Execution counter for debugging
    execution_count: u64,
}

impl ConsoleSink {
    pub fn new(initial: HostStatus) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                status: initial,
                execution_count: 0,
            }),
        }
    }

    pub fn execution_count(&self) -> u64 {
        self.state.lock().execution_count
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(HostStatus {
            volume: 50,
            mute: false,
        })
    }
}

#[async_trait]
impl ActionSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn invoke(&self, action: &Action) -> Result<(), ActionError> {
        let (exec_num, status) = {
            let mut state = self.state.lock();
            state.execution_count += 1;
            match action {
                Action::SetVolume(value) => state.status.volume = *value,
                Action::ToggleMute => state.status.mute = !state.status.mute,
                _ => {}
            }
            (state.execution_count, state.status)
        };

        info!(
            "🎮 [{}] {} [exec #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            action,
            exec_num
        );
        debug!(
            action = action.id(),
            volume = status.volume,
            mute = status.mute,
            exec_count = exec_num,
            "ConsoleSink execution"
        );

        Ok(())
    }

    async fn status(&self) -> Result<HostStatus, ActionError> {
        Ok(self.state.lock().status)
    }
}
