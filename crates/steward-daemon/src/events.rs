//! Typed event bus.
//!
//! Each service publishes its own closed event enum through an
//! [`EventBus`]; subscribers receive every event published after they
//! subscribe. Publishing never blocks and never fails: with no subscribers
//! the event is dropped.

use tokio::sync::broadcast;

/// Default broadcast buffer size.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast sink for one component's events.
#[derive(Debug, Clone)]
pub struct EventBus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus with the given buffer size.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus: EventBus<u32> = EventBus::default();
        assert_eq!(bus.publish(1), 0);
    }

    #[test]
    fn subscribers_receive_later_events() {
        let bus: EventBus<u32> = EventBus::new(4);
        bus.publish(1);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(2), 1);
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
    }
}
