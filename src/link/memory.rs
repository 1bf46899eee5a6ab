//! Scripted in-memory link for session and supervisor tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{Connector, Link, LinkHealth};
use crate::error::BridgeError;

/// One scripted link behaviour
#[derive(Debug, Clone)]
pub enum Step {
    Line(&'static str),
    Wait(Duration),
    /// Read fails with an I/O error
    Disconnect,
    /// Liveness flips to dead while reads keep hanging
    GoStale,
}

pub struct MemoryLink {
    script: VecDeque<Step>,
    written: Arc<Mutex<Vec<String>>>,
    health: LinkHealth,
    fail_writes: bool,
}

impl MemoryLink {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            written: Arc::default(),
            health: LinkHealth::new(),
            fail_writes: false,
        }
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }
}

#[async_trait]
impl Link for MemoryLink {
    fn endpoint(&self) -> &str {
        "memory"
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, BridgeError> {
        loop {
            // Peek first so a cancelled wait is replayed on the next call
            match self.script.front().cloned() {
                Some(Step::Line(line)) => {
                    self.script.pop_front();
                    return Ok(line.as_bytes().to_vec());
                }
                Some(Step::Wait(delay)) => {
                    tokio::time::sleep(delay).await;
                    self.script.pop_front();
                }
                Some(Step::Disconnect) => {
                    self.script.pop_front();
                    self.health.mark_dead();
                    return Err(BridgeError::Disconnected("memory: read failed".into()));
                }
                Some(Step::GoStale) => {
                    self.script.pop_front();
                    self.health.mark_dead();
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), BridgeError> {
        if self.fail_writes {
            return Err(BridgeError::Disconnected("memory: write failed".into()));
        }
        self.written
            .lock()
            .push(String::from_utf8_lossy(line).into_owned());
        Ok(())
    }

    fn health(&self) -> LinkHealth {
        self.health.clone()
    }

    fn close(&mut self) {
        self.health.mark_dead();
    }
}

/// Hands out scripted links in order; connect fails once they run out
#[derive(Default)]
pub struct MemoryConnector {
    links: Mutex<VecDeque<Option<MemoryLink>>>,
    attempts: Mutex<Vec<Instant>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful connect
    pub fn push_link(&self, link: MemoryLink) {
        self.links.lock().push_back(Some(link));
    }

    /// Queue a failed connect
    pub fn push_failure(&self) {
        self.links.lock().push_back(None);
    }

    /// Time of every connect attempt
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, path: &str, _baud: u32) -> Result<Box<dyn Link>, BridgeError> {
        self.attempts.lock().push(Instant::now());
        match self.links.lock().pop_front().flatten() {
            Some(link) => Ok(Box::new(link)),
            None => Err(BridgeError::Connection {
                path: path.to_string(),
                reason: "no such device".to_string(),
            }),
        }
    }
}
