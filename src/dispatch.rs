//! Key dispatcher
//!
//! Maps key edges to bound actions through the [`CommandTable`]. Each matching
//! edge triggers at most one action, invoked on its own task so a slow host
//! action never stalls ingestion.
//!
//! # Pool overflow policy
//!
//! At most `max_in_flight` actions run at once; every dispatch holds a
//! semaphore permit while it resolves and invokes. Dispatches beyond that wait
//! for a permit in arrival order.
//!
//! At most `max_in_flight` dispatches are tracked. When a new dispatch arrives
//! and the pool is full, the oldest tracked dispatch is dropped from tracking
//! (detached, not aborted) and the new one takes its place. Delivery order
//! across dispatches is not guaranteed.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::ActionSink;
use crate::commands::CommandTable;
use crate::event::KeyEvent;

/// Default bound on tracked in-flight dispatches
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Result of dispatching one key event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No binding matched
    Unbound,
    /// A binding matched but carries no action
    Observed { description: String },
    /// The bound action ran successfully
    Invoked { description: String },
    /// The bound action ran and failed (already logged)
    Failed { description: String },
}

/// Match one key event against the table and run the bound action
///
/// No-fail boundary: action errors are logged with context and reported as
/// [`DispatchOutcome::Failed`].
pub async fn dispatch(
    event: &KeyEvent,
    table: &CommandTable,
    sink: &dyn ActionSink,
) -> DispatchOutcome {
    let Some(binding) = table.resolve(event) else {
        debug!("No binding for key event {}", event);
        return DispatchOutcome::Unbound;
    };

    let description = binding.description.clone();
    let Some(action) = &binding.action else {
        debug!("Key event {} observed ({}), no action bound", event, description);
        return DispatchOutcome::Observed { description };
    };

    info!("🎹 {} → {}", description, action);
    match sink.invoke(action).await {
        Ok(()) => DispatchOutcome::Invoked { description },
        Err(e) => {
            error!(
                event = %event,
                action = %action,
                sink = sink.name(),
                "Error processing key press '{}': {}",
                description,
                e
            );
            DispatchOutcome::Failed { description }
        }
    }
}

/// Bounded fire-and-forget dispatch pool
pub struct KeyDispatcher {
    table: Arc<CommandTable>,
    sink: Arc<dyn ActionSink>,
    in_flight: VecDeque<JoinHandle<DispatchOutcome>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl KeyDispatcher {
    pub fn new(table: Arc<CommandTable>, sink: Arc<dyn ActionSink>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            table,
            sink,
            in_flight: VecDeque::with_capacity(max_in_flight),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Start dispatching a key event without waiting for it
    pub fn submit(&mut self, event: KeyEvent) {
        self.in_flight.retain(|handle| !handle.is_finished());

        if self.in_flight.len() >= self.max_in_flight {
            // Dropping the handle detaches the task, it keeps running
            self.in_flight.pop_front();
            warn!(
                "Dispatch pool full ({} in flight), oldest dispatch no longer tracked",
                self.max_in_flight
            );
        }

        let table = Arc::clone(&self.table);
        let sink = Arc::clone(&self.sink);
        let permits = Arc::clone(&self.permits);
        self.in_flight.push_back(tokio::spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            dispatch(&event, &table, sink.as_ref()).await
        }));
    }

    /// Number of tracked dispatches that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every tracked dispatch to finish
    pub async fn drain(&mut self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.in_flight.len());
        while let Some(handle) = self.in_flight.pop_front() {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Dispatch task ended abnormally: {}", e),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::RecordingSink;
    use crate::action::Action;
    use crate::commands::{CommandBinding, KeyMatch};
    use std::time::Duration;

    fn table(bindings: Vec<(KeyMatch, Option<Action>)>) -> CommandTable {
        CommandTable::new(
            bindings
                .into_iter()
                .enumerate()
                .map(|(i, (key, action))| CommandBinding {
                    key,
                    description: format!("binding {}", i),
                    action,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_first_match_only_fires_once() {
        let sink = RecordingSink::new();
        let table = table(vec![
            (KeyMatch::down(2, 1), Some(Action::Command("A".into()))),
            (KeyMatch::down(2, 1), Some(Action::Command("B".into()))),
        ]);

        let outcome = dispatch(&KeyEvent::down(2, 1), &table, sink.as_ref()).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Invoked {
                description: "binding 0".into()
            }
        );
        assert_eq!(sink.invoked(), vec![Action::Command("A".into())]);
    }

    #[tokio::test]
    async fn test_default_next_track() {
        let sink = RecordingSink::new();
        let table = CommandTable::defaults();

        dispatch(&KeyEvent::down(4, 2), &table, sink.as_ref()).await;

        assert_eq!(sink.invoked(), vec![Action::NextTrack]);
    }

    #[tokio::test]
    async fn test_up_edge_is_observed_not_acted() {
        let sink = RecordingSink::new();
        let table = CommandTable::defaults();

        let outcome = dispatch(&KeyEvent::up(0, 2), &table, sink.as_ref()).await;

        assert!(matches!(outcome, DispatchOutcome::Observed { .. }));
        assert!(sink.invoked().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_and_state_only() {
        let sink = RecordingSink::new();
        let table = CommandTable::defaults();

        assert_eq!(
            dispatch(&KeyEvent::down(64, 6), &table, sink.as_ref()).await,
            DispatchOutcome::Unbound
        );
        assert_eq!(
            dispatch(&KeyEvent::state_only(4), &table, sink.as_ref()).await,
            DispatchOutcome::Unbound
        );
        assert!(sink.invoked().is_empty());
    }

    #[tokio::test]
    async fn test_action_error_is_contained() {
        let sink = RecordingSink::new();
        sink.fail_on(Action::PlayPause);
        let table = CommandTable::defaults();

        let outcome = dispatch(&KeyEvent::down(2, 1), &table, sink.as_ref()).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_pool_runs_submitted_events() {
        let sink = RecordingSink::new();
        let mut dispatcher =
            KeyDispatcher::new(Arc::new(CommandTable::defaults()), sink.clone(), 4);

        dispatcher.submit(KeyEvent::down(1, 0));
        dispatcher.submit(KeyEvent::down(8, 3));
        let outcomes = dispatcher.drain().await;

        assert_eq!(outcomes.len(), 2);
        let mut invoked = sink.invoked();
        invoked.sort_by_key(|a| a.id());
        assert_eq!(invoked, vec![Action::PreviousTrack, Action::ToggleMute]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_caps_concurrent_invocations() {
        let sink = RecordingSink::new();
        sink.set_delay(Duration::from_secs(1));
        let mut dispatcher =
            KeyDispatcher::new(Arc::new(CommandTable::defaults()), sink.clone(), 10);

        for _ in 0..50 {
            dispatcher.submit(KeyEvent::down(4, 2));
        }
        dispatcher.drain().await;
        // Detached dispatches are still queued on the semaphore
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(sink.invoked().len(), 50);
        assert!(sink.peak_concurrency() <= 10);
        assert!(sink.peak_concurrency() > 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_tracking() {
        let sink = RecordingSink::new();
        let mut dispatcher =
            KeyDispatcher::new(Arc::new(CommandTable::defaults()), sink.clone(), 2);

        for _ in 0..5 {
            dispatcher.submit(KeyEvent::down(4, 2));
        }
        assert!(dispatcher.in_flight.len() <= 2);

        dispatcher.drain().await;
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
