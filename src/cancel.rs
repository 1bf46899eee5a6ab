//! Session-scoped cancellation built on a `watch` channel

use tokio::sync::watch;

/// Owner side: flips every linked [`CancelSignal`] once
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Worker side: cheap to clone, resolves once cancelled
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked canceller / signal pair
pub fn channel() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelSignal { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// Resolves when cancelled, or when the canceller is gone
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
