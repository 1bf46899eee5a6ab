//! Analog debouncer
//!
//! Collapses a burst of knob samples into one settled volume change.
//!
//! # Settling strategy
//!
//! 1. Every poll interval, the newest buffered sample is compared with the
//!    last dispatched value. Equal (or no sample) means idle.
//! 2. On a difference, the debouncer sleeps for the settle delay, then re-reads
//!    the *newest* buffered sample. Samples arriving during the delay are
//!    folded into the same window.
//! 3. If that value still differs from the last dispatched one and lies in
//!    0-100, a `SetVolume` action fires. A burst that ends on the original
//!    value fires nothing.
//! 4. The buffer is cleared after every settling attempt.
//!
//! Cancellation never interrupts an armed settle window. Once cancelled, the
//! debouncer runs one last poll so samples buffered before the stop still
//! settle.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use crate::action::{Action, ActionSink};
use crate::cancel::CancelSignal;
use crate::classifier::SampleBuffer;

/// Quiet period before a sample counts as settled
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How often the buffer is checked for a new sample
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Debouncer state, owned by a single session's debouncer worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceState {
    /// Sample that opened the current settling window
    pub pending: Option<i64>,
    /// Last value actually dispatched
    pub settled: Option<i64>,
}

pub struct AnalogDebouncer {
    samples: SampleBuffer,
    sink: Arc<dyn ActionSink>,
    state: DebounceState,
    settle_delay: Duration,
    poll_interval: Duration,
}

impl AnalogDebouncer {
    pub fn new(
        samples: SampleBuffer,
        sink: Arc<dyn ActionSink>,
        settle_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            samples,
            sink,
            state: DebounceState::default(),
            settle_delay,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Start from a known dispatched value
    pub fn with_settled(mut self, value: i64) -> Self {
        self.state.settled = Some(value);
        self
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// One polling step, returning the volume dispatched by it, if any
    pub async fn poll_once(&mut self) -> Option<u8> {
        let latest = self.samples.latest()?;

        if Some(latest) == self.state.settled {
            self.samples.clear();
            return None;
        }

        self.state.pending = Some(latest);
        trace!("Analog change to {}, settling for {:?}", latest, self.settle_delay);
        tokio::time::sleep(self.settle_delay).await;

        let current = self.samples.latest().unwrap_or(latest);
        self.samples.clear();
        self.state.pending = None;

        if Some(current) == self.state.settled {
            debug!("Analog burst settled back on {}, nothing to do", current);
            return None;
        }

        let Some(volume) = u8::try_from(current).ok().filter(|v| *v <= 100) else {
            debug!("Ignoring out-of-range analog value {}", current);
            return None;
        };

        self.state.settled = Some(current);
        info!("🔊 Setting volume to {}", volume);
        if let Err(e) = self.sink.invoke(&Action::SetVolume(volume)).await {
            error!(
                sink = self.sink.name(),
                "Error processing volume change to {}: {}",
                volume,
                e
            );
        }

        Some(volume)
    }

    /// Poll until cancelled, then flush what is still buffered
    pub async fn run(mut self, mut cancel: CancelSignal) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        if let Some(volume) = self.poll_once().await {
            debug!("Flushed volume {} on stop", volume);
        }
        debug!("Analog debouncer stopped (last settled: {:?})", self.state.settled);
    }
}
