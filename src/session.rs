//! Session: one connected lifetime of a link plus its workers
//!
//! A session owns four workers:
//!
//! - **ingest**: the only task touching the link; forwards records, reports
//!   read failures
//! - **process**: decodes records and classifies events (key dispatch runs on
//!   the bounded dispatch pool)
//! - **debounce**: the analog debouncer loop
//! - **heartbeat**: periodic link liveness check
//!
//! The first worker to fail ends the session. Teardown cancels every worker
//! and waits for them before [`Session::run`] returns, so a replacement
//! session never overlaps with the old one.
//!
//! On teardown the process worker first classifies records already queued by
//! ingest, then stops the debouncer, which settles whatever was buffered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::action::ActionSink;
use crate::cancel::{self, CancelSignal, Canceller};
use crate::classifier::{Classifier, SampleBuffer, DEFAULT_SAMPLE_CAPACITY};
use crate::codec;
use crate::commands::CommandTable;
use crate::debounce::{AnalogDebouncer, DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_DELAY};
use crate::dispatch::{KeyDispatcher, DEFAULT_MAX_IN_FLIGHT};
use crate::error::BridgeError;
use crate::link::{Link, LinkHealth};

/// How long teardown waits for workers before aborting them
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub sample_capacity: usize,
    pub max_in_flight: usize,
    /// Records buffered between ingest and process
    pub line_queue: usize,
    pub heartbeat: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            line_queue: 256,
            heartbeat: Duration::from_secs(1),
        }
    }
}

/// Everything a session needs besides its link
#[derive(Clone)]
pub struct SessionContext {
    pub table: Arc<CommandTable>,
    pub sink: Arc<dyn ActionSink>,
    pub config: SessionConfig,
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The link failed; the supervisor should reconnect
    Disconnected(BridgeError),
    /// Shutdown was requested
    Shutdown,
}

#[derive(Debug)]
enum WorkerExit {
    Stopped,
    Failed(BridgeError),
}

pub struct Session {
    id: u64,
    endpoint: String,
    canceller: Canceller,
    workers: JoinSet<(&'static str, WorkerExit)>,
}

impl Session {
    /// Sync device status, then spawn the session workers
    ///
    /// Takes ownership of the link; it is closed when the ingest worker
    /// exits.
    pub async fn start(
        id: u64,
        mut link: Box<dyn Link>,
        ctx: &SessionContext,
    ) -> Result<Self, BridgeError> {
        let endpoint = link.endpoint().to_string();
        let span = info_span!("session", id, device = %endpoint);

        if let Err(e) = sync_status(link.as_mut(), ctx.sink.as_ref())
            .instrument(span.clone())
            .await
        {
            link.close();
            return Err(e);
        }

        let (canceller, signal) = cancel::channel();
        let (line_tx, line_rx) = mpsc::channel(ctx.config.line_queue.max(1));
        let samples = SampleBuffer::new(ctx.config.sample_capacity);
        let health = link.health();

        let dispatcher = KeyDispatcher::new(
            Arc::clone(&ctx.table),
            Arc::clone(&ctx.sink),
            ctx.config.max_in_flight,
        );
        let classifier = Classifier::new(dispatcher, samples.clone());
        let debouncer = AnalogDebouncer::new(
            samples,
            Arc::clone(&ctx.sink),
            ctx.config.settle_delay,
            ctx.config.poll_interval,
        );

        let mut workers = JoinSet::new();
        workers.spawn(
            async move { ("ingest", ingest(link, line_tx, signal).await) }.instrument(span.clone()),
        );
        // The debouncer stops only after process has drained its queue
        let (debounce_canceller, debounce_signal) = cancel::channel();
        let signal = canceller.signal();
        workers.spawn(
            async move {
                let exit = process(line_rx, classifier, signal).await;
                debounce_canceller.cancel();
                ("process", exit)
            }
            .instrument(span.clone()),
        );
        workers.spawn(
            async move {
                debouncer.run(debounce_signal).await;
                ("debounce", WorkerExit::Stopped)
            }
            .instrument(span.clone()),
        );
        let signal = canceller.signal();
        let period = ctx.config.heartbeat;
        workers.spawn(
            async move { ("heartbeat", heartbeat(health, period, signal).await) }
                .instrument(span),
        );

        info!(session = id, "Session started on {}", endpoint);
        Ok(Self {
            id,
            endpoint,
            canceller,
            workers,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run until a worker fails or shutdown is requested, then tear down
    pub async fn run(mut self, shutdown: &mut CancelSignal) -> SessionEnd {
        let end = tokio::select! {
            _ = shutdown.cancelled() => SessionEnd::Shutdown,
            end = self.next_failure() => end,
        };

        self.teardown().await;
        end
    }

    async fn next_failure(&mut self) -> SessionEnd {
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok((name, WorkerExit::Failed(e))) => {
                    warn!(session = self.id, "Worker '{}' failed: {}", name, e);
                    return SessionEnd::Disconnected(e);
                }
                Ok((name, WorkerExit::Stopped)) => {
                    debug!(session = self.id, "Worker '{}' stopped", name);
                }
                Err(e) => {
                    warn!(session = self.id, "Worker ended abnormally: {}", e);
                    return SessionEnd::Disconnected(BridgeError::Disconnected(format!(
                        "session worker ended abnormally: {}",
                        e
                    )));
                }
            }
        }

        SessionEnd::Disconnected(BridgeError::Disconnected(
            "all session workers stopped".to_string(),
        ))
    }

    /// Cancel every worker and wait for them to exit
    async fn teardown(mut self) {
        self.canceller.cancel();

        let drained = tokio::time::timeout(TEARDOWN_GRACE, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                session = self.id,
                "Workers did not stop within {:?}, aborting", TEARDOWN_GRACE
            );
            self.workers.shutdown().await;
        }

        info!(session = self.id, "Session on {} torn down", self.endpoint);
    }
}

/// Push current host status to the device
async fn sync_status(link: &mut dyn Link, sink: &dyn ActionSink) -> Result<(), BridgeError> {
    let status = match sink.status().await {
        Ok(status) => status,
        Err(e) => {
            warn!("Skipping device status sync: {}", e);
            return Ok(());
        }
    };

    let line = match codec::encode_status(&status) {
        Ok(line) => line,
        Err(e) => {
            warn!("Cannot encode status {:?}: {}", status, e);
            return Ok(());
        }
    };

    info!(
        "Syncing device status - Volume: {}, Mute: {}",
        status.volume, status.mute
    );
    link.write_line(line.as_bytes()).await
}

async fn ingest(
    mut link: Box<dyn Link>,
    lines: mpsc::Sender<Vec<u8>>,
    mut cancel: CancelSignal,
) -> WorkerExit {
    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => break WorkerExit::Stopped,
            read = link.read_line() => match read {
                Ok(line) => match lines.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(line)) => {
                        warn!(
                            "Processing backlog full, dropping record: {}",
                            String::from_utf8_lossy(&line)
                        );
                    }
                    Err(TrySendError::Closed(_)) => break WorkerExit::Stopped,
                },
                Err(e) => break WorkerExit::Failed(e),
            },
        }
    };

    link.close();
    exit
}

async fn process(
    mut lines: mpsc::Receiver<Vec<u8>>,
    mut classifier: Classifier,
    mut cancel: CancelSignal,
) -> WorkerExit {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Records already read before the stop still count
                lines.close();
                while let Some(line) = lines.recv().await {
                    classifier.classify(codec::decode_line(&line));
                }
                break;
            }
            line = lines.recv() => match line {
                Some(line) => {
                    let event = codec::decode_line(&line);
                    classifier.classify(event);
                }
                None => break,
            },
        }
    }

    // Tracked dispatches finish inside the session, bounded by the teardown grace
    let dispatcher = classifier.dispatcher_mut();
    let in_flight = dispatcher.in_flight();
    if in_flight > 0 {
        debug!("Waiting for {} key dispatch(es) before session end", in_flight);
        dispatcher.drain().await;
    }
    WorkerExit::Stopped
}

async fn heartbeat(health: LinkHealth, period: Duration, mut cancel: CancelSignal) -> WorkerExit {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return WorkerExit::Stopped,
            _ = ticker.tick() => {
                if !health.is_alive() {
                    return WorkerExit::Failed(BridgeError::Disconnected(
                        "heartbeat: link is no longer alive".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::RecordingSink;
    use crate::action::{Action, HostStatus};
    use crate::link::memory::{MemoryLink, Step};

    fn context(sink: Arc<RecordingSink>) -> SessionContext {
        SessionContext {
            table: Arc::new(CommandTable::defaults()),
            sink,
            config: SessionConfig::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_sync_written_on_start() {
        let sink = RecordingSink::with_status(HostStatus {
            volume: 35,
            mute: true,
        });
        let link = MemoryLink::new(vec![]);
        let written = link.written();

        let session = Session::start(1, Box::new(link), &context(sink))
            .await
            .unwrap();

        assert_eq!(
            written.lock().clone(),
            vec![r#"{"volume":35,"mute":true}"#.to_string()]
        );

        let (canceller, mut shutdown) = cancel::channel();
        canceller.cancel();
        assert!(matches!(session.run(&mut shutdown).await, SessionEnd::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_write_failure_fails_start() {
        let sink = RecordingSink::with_status(HostStatus {
            volume: 10,
            mute: false,
        });
        let link = MemoryLink::new(vec![]).failing_writes();

        let result = Session::start(1, Box::new(link), &context(sink)).await;

        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_ends_session() {
        let sink = RecordingSink::new();
        let link = MemoryLink::new(vec![
            Step::Line(r#"{"ks":4,"kd":2}"#),
            Step::Line("not json"),
            Step::Line(r#"{"ks":0,"ku":2}"#),
            Step::Wait(Duration::from_millis(50)),
            Step::Disconnect,
        ]);

        let session = Session::start(1, Box::new(link), &context(sink.clone()))
            .await
            .unwrap();
        let (_canceller, mut shutdown) = cancel::channel();
        let end = session.run(&mut shutdown).await;

        assert!(matches!(end, SessionEnd::Disconnected(_)));
        assert_eq!(sink.invoked(), vec![Action::NextTrack]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_right_after_samples_still_settles() {
        let sink = RecordingSink::new();
        let link = MemoryLink::new(vec![
            Step::Line(r#"{"p":5}"#),
            Step::Line(r#"{"p":50}"#),
            Step::Disconnect,
        ]);

        let session = Session::start(1, Box::new(link), &context(sink.clone()))
            .await
            .unwrap();
        let (_canceller, mut shutdown) = cancel::channel();
        let end = session.run(&mut shutdown).await;

        assert!(matches!(end, SessionEnd::Disconnected(_)));
        assert_eq!(sink.invoked(), vec![Action::SetVolume(50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_detects_stale_link() {
        let sink = RecordingSink::new();
        let link = MemoryLink::new(vec![Step::GoStale]);

        let session = Session::start(1, Box::new(link), &context(sink))
            .await
            .unwrap();
        let (_canceller, mut shutdown) = cancel::channel();
        let end = tokio::time::timeout(Duration::from_secs(5), session.run(&mut shutdown))
            .await
            .unwrap();

        match end {
            SessionEnd::Disconnected(BridgeError::Disconnected(reason)) => {
                assert!(reason.contains("heartbeat"))
            }
            other => panic!("unexpected end: {:?}", other),
        }
    }
}
