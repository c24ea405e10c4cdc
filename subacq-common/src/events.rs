//! Broadcast event bus
//!
//! Thin wrapper over `tokio::sync::broadcast` used to publish engine
//! events to any number of observers. Delivery is best effort: a bus with
//! no subscribers drops events, and a slow subscriber that falls more than
//! `capacity` events behind observes a `Lagged` error and skips ahead.

use tokio::sync::broadcast;

/// Multi-subscriber event bus
#[derive(Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
    capacity: usize,
}

impl<E: Clone> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<E: Clone> EventBus<E> {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use subacq_common::events::EventBus;
    ///
    /// let event_bus: EventBus<String> = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns the number of subscribers that will see the event; zero when
    /// nobody is listening. Never fails.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_not_an_error() {
        let bus: EventBus<u32> = EventBus::new(4);
        assert_eq!(bus.emit(1), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus: EventBus<&'static str> = EventBus::new(4);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        assert_eq!(bus.emit("decision"), 1);
        assert_eq!(rx.recv().await.unwrap(), "decision");
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let bus: EventBus<u8> = EventBus::new(4);
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.emit(7);
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let bus: EventBus<u8> = EventBus::new(0);
        assert_eq!(bus.capacity(), 1);
    }
}
