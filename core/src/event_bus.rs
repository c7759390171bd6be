use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Topics are plain strings so repo-scoped topics (`"{repo_id}-file-modified"`)
/// can be formatted on demand rather than enumerated as an enum.
pub type Topic = String;

/// Event payload: a small positional bag of strings.
pub type Event = Vec<String>;

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Event>,
}

/// In-process publish/subscribe bus. Each subscription gets its own unbounded
/// queue, so a slow subscriber never blocks `publish` or other subscribers.
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subs = self.subscribers.lock();
        f.debug_struct("EventBus")
            .field("topics", &subs.len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publishes `event` to every current subscriber of `topic`. Never
    /// blocks: a full or closed subscriber is simply dropped from future
    /// delivery.
    pub fn publish(&self, topic: &str, event: Event) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(topic) {
            list.retain(|s| s.sender.send(event.clone()).is_ok());
        }
    }

    /// Subscribes to `topic`, returning a receiver and a handle that can be
    /// passed to [`EventBus::unsubscribe`].
    pub fn subscribe(&self, topic: impl Into<Topic>) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = topic.into();
        self.subscribers
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, sender: tx });
        (SubscriptionHandle { topic, id }, rx)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(&handle.topic) {
            list.retain(|s| s.id != handle.id);
        }
    }

    /// Removes every subscriber, closing their receivers.
    pub fn shutdown(&self) {
        self.subscribers.lock().clear();
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = EventBus::new();
        let (_handle, mut rx) = bus.subscribe("repo1-file-modified");
        bus.publish("repo1-file-modified", vec!["a.txt".to_string()]);
        let event = rx.recv().await.unwrap();
        assert_eq!(event, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribed_receiver_gets_no_more_events() {
        let bus = EventBus::new();
        let (handle, mut rx) = bus.subscribe("topic");
        bus.unsubscribe(&handle);
        bus.publish("topic", vec!["x".to_string()]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        let (_h1, mut rx1) = bus.subscribe("topic");
        let (_h2, _rx2) = bus.subscribe("topic");
        for i in 0..1000 {
            bus.publish("topic", vec![i.to_string()]);
        }
        let first = rx1.recv().await.unwrap();
        assert_eq!(first, vec!["0".to_string()]);
    }

    #[tokio::test]
    async fn independent_topics_do_not_cross_deliver() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe("topic-a");
        bus.publish("topic-b", vec!["nope".to_string()]);
        bus.shutdown();
        assert!(rx.recv().await.is_none());
    }
}
