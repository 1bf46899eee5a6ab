//! Event classifier
//!
//! Routes decoded events to the key dispatcher or the analog sample buffer.
//! Never blocks: key events go to the bounded dispatch pool, analog samples
//! overwrite the oldest buffered sample once the buffer is full.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::dispatch::KeyDispatcher;
use crate::event::Event;

/// Default analog buffer capacity
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;

/// Bounded most-recent-wins analog sample buffer
///
/// Written by the classifier, read and cleared by the debouncer. Cloning
/// shares the same buffer.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    inner: Arc<Mutex<VecDeque<i64>>>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a sample, discarding the oldest one when full
    pub fn push(&self, value: i64) {
        let mut samples = self.inner.lock();
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    /// Newest buffered sample
    pub fn latest(&self) -> Option<i64> {
        self.inner.lock().back().copied()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

/// Where an event was routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Key,
    Analog,
    Dropped,
}

/// Fans decoded events out to their handlers
pub struct Classifier {
    keys: KeyDispatcher,
    samples: SampleBuffer,
}

impl Classifier {
    pub fn new(keys: KeyDispatcher, samples: SampleBuffer) -> Self {
        Self { keys, samples }
    }

    pub fn classify(&mut self, event: Event) -> Route {
        match event {
            Event::Key(key) => {
                trace!("Key event {}", key);
                self.keys.submit(key);
                Route::Key
            }
            Event::Analog(sample) => {
                trace!("Analog sample {}", sample.value);
                self.samples.push(sample.value);
                Route::Analog
            }
            Event::Unrecognized { raw } => {
                debug!("Received unhandled data: {}", raw);
                Route::Dropped
            }
        }
    }

    /// Access to the key dispatcher (e.g., to drain in-flight work)
    pub fn dispatcher_mut(&mut self) -> &mut KeyDispatcher {
        &mut self.keys
    }
}
