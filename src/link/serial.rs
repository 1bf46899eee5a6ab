//! Serial port link
//!
//! `serialport` is blocking, so each link runs a dedicated reader thread that
//! frames incoming bytes into records and forwards them over a bounded tokio
//! channel, the same way MIDI input callbacks feed the async side. The thread
//! marks the link dead on EOF or I/O error.

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::{Connector, Link, LinkHealth};
use crate::codec::LineFramer;
use crate::error::BridgeError;

/// Baud rate of the keypad firmware
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Blocking read timeout; bounds how long the reader takes to notice `close`
///
/// The reader thread keeps its port handle for up to this long after
/// `close`, so a reconnect must not come sooner.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Records buffered between the reader thread and the session
const LINE_BUFFER: usize = 256;

/// Opens [`SerialLink`]s
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Delay after opening before the link is used
    settle: Duration,
}

impl SerialConnector {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, path: &str, baud: u32) -> Result<Box<dyn Link>, BridgeError> {
        info!("🔌 Connecting to serial device {} at {} baud", path, baud);

        let builder = serialport::new(path, baud).timeout(READ_TIMEOUT);
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| BridgeError::Connection {
                path: path.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| BridgeError::Connection {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        // Give the device time to reset after the port opens
        tokio::time::sleep(self.settle).await;

        let link = SerialLink::start(path, port)?;
        info!("✅ Serial device {} connected", path);
        Ok(Box::new(link))
    }
}

/// Open serial connection with its reader thread
pub struct SerialLink {
    endpoint: String,
    lines: mpsc::Receiver<Vec<u8>>,
    writer: Option<Box<dyn SerialPort>>,
    health: LinkHealth,
    stop: Arc<AtomicBool>,
    /// Why the reader thread stopped
    failure: Arc<Mutex<Option<String>>>,
}

impl SerialLink {
    fn start(path: &str, port: Box<dyn SerialPort>) -> Result<Self, BridgeError> {
        let writer = port.try_clone().map_err(|e| BridgeError::Connection {
            path: path.to_string(),
            reason: format!("cannot clone port handle: {}", e),
        })?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        let health = LinkHealth::new();
        let stop = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let reader = SerialReader {
            endpoint: path.to_string(),
            port,
            tx,
            health: health.clone(),
            stop: Arc::clone(&stop),
            failure: Arc::clone(&failure),
        };
        std::thread::Builder::new()
            .name(format!("serial-reader {}", path))
            .spawn(move || reader.run())
            .map_err(|e| BridgeError::Connection {
                path: path.to_string(),
                reason: format!("cannot spawn reader thread: {}", e),
            })?;

        Ok(Self {
            endpoint: path.to_string(),
            lines,
            writer: Some(writer),
            health,
            stop,
            failure,
        })
    }

    fn disconnected(&self) -> BridgeError {
        let reason = self
            .failure
            .lock()
            .clone()
            .unwrap_or_else(|| "serial reader stopped".to_string());
        BridgeError::Disconnected(format!("{}: {}", self.endpoint, reason))
    }
}

#[async_trait]
impl Link for SerialLink {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, BridgeError> {
        match self.lines.recv().await {
            Some(line) => Ok(line),
            None => Err(self.disconnected()),
        }
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), BridgeError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(self.disconnected());
        };

        if let Err(e) = write_record(writer.as_mut(), line) {
            self.health.mark_dead();
            *self.failure.lock() = Some(format!("write failed: {}", e));
            return Err(self.disconnected());
        }

        trace!("Sent to {}: {}", self.endpoint, String::from_utf8_lossy(line));
        Ok(())
    }

    fn health(&self) -> LinkHealth {
        self.health.clone()
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.health.mark_dead();
        self.lines.close();
        if self.writer.take().is_some() {
            debug!("Serial device {} closed", self.endpoint);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_record(writer: &mut dyn SerialPort, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Blocking side of a [`SerialLink`]
struct SerialReader {
    endpoint: String,
    port: Box<dyn SerialPort>,
    tx: mpsc::Sender<Vec<u8>>,
    health: LinkHealth,
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
}

impl SerialReader {
    fn run(mut self) {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 1024];

        'read: while !self.stop.load(Ordering::Acquire) {
            match self.port.read(&mut buf) {
                Ok(0) => {
                    self.fail("end of stream".to_string());
                    break;
                }
                Ok(n) => {
                    for line in framer.push(&buf[..n]) {
                        trace!("Received data: {}", String::from_utf8_lossy(&line));
                        if self.tx.blocking_send(line).is_err() {
                            // Link closed on the async side
                            break 'read;
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(e) => {
                    error!("Error handling serial input on {}: {}", self.endpoint, e);
                    self.fail(e.to_string());
                    break;
                }
            }
        }

        self.health.mark_dead();
        debug!("Serial reader for {} exited", self.endpoint);
    }

    fn fail(&self, reason: String) {
        self.failure.lock().get_or_insert(reason);
    }
}
