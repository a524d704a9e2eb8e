//! Push feed distributing change notifications to connected clients.

use filesync_protocol::ChangeEvent;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A feed that distributes change notifications to subscribers.
///
/// The feed:
/// - Preserves emit order per subscriber
/// - Supports multiple subscribers
/// - Drops subscribers whose receiver is gone on the next emit
/// - Is thread-safe
#[derive(Default)]
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl EventFeed {
    /// Creates a new feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that will receive all future notifications.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a notification to all subscribers.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_in_order() {
        let feed = EventFeed::new();
        let a = feed.subscribe();
        let b = feed.subscribe();

        feed.emit(ChangeEvent::deleted("x"));
        feed.emit(ChangeEvent::renamed("y", "z"));

        for rx in [&a, &b] {
            assert_eq!(rx.recv().unwrap(), ChangeEvent::deleted("x"));
            assert_eq!(rx.recv().unwrap(), ChangeEvent::renamed("y", "z"));
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        assert_eq!(feed.subscriber_count(), 2);

        feed.emit(ChangeEvent::deleted("x"));
        assert_eq!(feed.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
