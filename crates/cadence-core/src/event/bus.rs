//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.
//! [`EventBus::subscribe_matching`] adds wildcard filtering on event names.

use cadence_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for workflow, routine, step, and output events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events whose name matches `pattern` (`*`, `routine:*`,
    /// `*:failure`, `step:output`, ...).
    pub fn subscribe_matching(&self, pattern: impl Into<String>) -> FilteredSubscription {
        FilteredSubscription {
            receiver: self.sender.subscribe(),
            pattern: pattern.into(),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FilteredSubscription
// ---------------------------------------------------------------------------

/// A receiver that only yields events matching a wildcard pattern.
pub struct FilteredSubscription {
    receiver: broadcast::Receiver<WorkflowEvent>,
    pattern: String,
}

impl FilteredSubscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once every sender is dropped. Lagged gaps are logged
    /// and skipped.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.matches(&self.pattern) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, pattern = %self.pattern, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::event::RoutineRef;
    use cadence_types::status::RunStatus;
    use uuid::Uuid;

    fn routine_event(status: RunStatus) -> WorkflowEvent {
        WorkflowEvent::Routine {
            run_id: Uuid::now_v7(),
            routine: RoutineRef::plain("build"),
            status,
            error: None,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(routine_event(RunStatus::Running));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "routine:running");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(routine_event(RunStatus::Success));

        assert!(matches!(rx1.recv().await.unwrap(), WorkflowEvent::Routine { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), WorkflowEvent::Routine { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(routine_event(RunStatus::Running));
        bus.publish(routine_event(RunStatus::Success));
    }

    #[tokio::test]
    async fn filtered_subscription_skips_non_matching() {
        let bus = EventBus::new(16);
        let mut failures = bus.subscribe_matching("*:failure");

        bus.publish(routine_event(RunStatus::Running));
        bus.publish(routine_event(RunStatus::Success));
        bus.publish(routine_event(RunStatus::Failure));

        let event = failures.recv().await.unwrap();
        assert_eq!(event.name(), "routine:failure");
        assert_eq!(failures.pattern(), "*:failure");
    }

    #[tokio::test]
    async fn filtered_subscription_ends_when_bus_dropped() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_matching("*");
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn filtered_subscription_survives_lag() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe_matching("routine:failure");

        for _ in 0..5 {
            bus.publish(routine_event(RunStatus::Running));
        }
        bus.publish(routine_event(RunStatus::Failure));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.name(), "routine:failure");
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(routine_event(RunStatus::Running));

        assert!(rx.try_recv().is_ok());
    }
}
