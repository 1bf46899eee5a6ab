//! Session supervisor
//!
//! Owns the connect → run → teardown → reconnect cycle. Exactly one session
//! is alive at a time: [`Session::run`] returns only after its workers have
//! stopped, and the next connect happens after that.
//!
//! Reconnect timing:
//!
//! - after a session ends, wait `session_backoff`
//! - while the device cannot be opened, retry every `delay`, switching to
//!   `escalated_delay` once failures have lasted `escalate_after`
//! - with `give_up_after` set, return [`BridgeError::RetryExhausted`] once
//!   connect or session-start failures have lasted that long


use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::cancel::CancelSignal;
use crate::error::BridgeError;
use crate::link::Connector;
use crate::session::{Session, SessionContext, SessionEnd};

/// Backoff and give-up settings
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub escalated_delay: Duration,
    pub escalate_after: Duration,
    /// Wait after a session ends before reconnecting
    pub session_backoff: Duration,
    pub give_up_after: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            escalated_delay: Duration::from_secs(5),
            escalate_after: Duration::from_secs(10),
            session_backoff: Duration::from_secs(5),
            give_up_after: None,
        }
    }
}

impl ReconnectPolicy {
    /// Retry delay after connect failures lasting `failing_for`
    pub fn delay_for(&self, failing_for: Duration) -> Duration {
        if failing_for >= self.escalate_after {
            self.escalated_delay
        } else {
            self.delay
        }
    }

    fn exhausted(&self, failing_for: Duration) -> bool {
        self.give_up_after
            .is_some_and(|limit| failing_for >= limit)
    }
}

/// Already-resolved device to connect to
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub path: String,
    pub baud: u32,
}

pub struct Supervisor {
    connector: Arc<dyn Connector>,
    device: DeviceTarget,
    ctx: SessionContext,
    policy: ReconnectPolicy,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        device: DeviceTarget,
        ctx: SessionContext,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            device,
            ctx,
            policy,
        }
    }

    /// Keep a session running until shutdown or until retries are exhausted
    pub async fn run(&self, mut shutdown: CancelSignal) -> Result<(), BridgeError> {
        let mut failing_since = Instant::now();
        let mut session_id = 0u64;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                connected = self.connector.connect(&self.device.path, self.device.baud) => connected,
            };

            let wait = match connected {
                Ok(link) => {
                    session_id += 1;
                    match Session::start(session_id, link, &self.ctx).await {
                        Ok(session) => match session.run(&mut shutdown).await {
                            SessionEnd::Shutdown => break,
                            SessionEnd::Disconnected(e) => {
                                failing_since = Instant::now();
                                warn!(
                                    "🔌 Device {} lost ({}), reconnecting in {:?}",
                                    self.device.path, e, self.policy.session_backoff
                                );
                                self.policy.session_backoff
                            }
                        },
                        Err(e) => {
                            error!("Error initializing serial connection: {}", e);
                            self.check_give_up(failing_since)?;
                            self.policy.session_backoff
                        }
                    }
                }
                Err(e) => {
                    let failing_for = self.check_give_up(failing_since)?;
                    let delay = self.policy.delay_for(failing_for);
                    warn!("{} (retrying in {:?})", e, delay);
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!("Supervisor stopped after {} session(s)", session_id);
        Ok(())
    }

    /// How long the device has been unusable, or an error once that exceeds the give-up limit
    fn check_give_up(&self, failing_since: Instant) -> Result<Duration, BridgeError> {
        let failing_for = failing_since.elapsed();
        if self.policy.exhausted(failing_for) {
            error!(
                "No usable device at {} for {:?}, giving up",
                self.device.path, failing_for
            );
            return Err(BridgeError::RetryExhausted {
                elapsed: failing_for,
            });
        }
        Ok(failing_for)
    }
}
