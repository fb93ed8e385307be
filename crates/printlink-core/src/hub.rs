//! Process-wide event hub.
//!
//! The hub delivers each published value to every listener registered for
//! the topic at the time of the call, synchronously and in registration
//! order. There is no replay: a listener only sees events published after
//! it subscribed.
//!
//! Create one hub per process with [`EventHub::new`] and hand it to the
//! registry and sessions as an `Arc<EventHub>`. [`EventHub::clear`] is the
//! teardown. Tests build their own isolated hubs.

use crate::event::Event;
use crate::topic::WILDCARD;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A listener callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifier of a registered listener.
pub type ListenerId = u64;

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: ListenerId,
}

impl Subscription {
    /// Topic this subscription listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Listener identifier.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

/// The central publish/subscribe hub.
pub struct EventHub {
    /// Listeners indexed by topic, in registration order.
    topics: DashMap<String, Vec<(ListenerId, Listener)>>,
    /// Next listener ID.
    next_id: AtomicU64,
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for a topic.
    ///
    /// Subscribing to [`WILDCARD`] receives every event published on any
    /// topic, after that topic's own listeners.
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        debug!(topic = %topic, listener = id, "Subscribed");
        Subscription { topic, id }
    }

    /// Register a listener that forwards events into an async channel.
    ///
    /// The listener stays registered until the subscription is removed,
    /// even if the receiver is dropped.
    pub fn subscribe_stream(
        &self,
        topic: impl Into<String>,
    ) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(topic, move |event: &Event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Remove a listener. Unknown subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let removed = match self.topics.get_mut(&subscription.topic) {
            Some(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(id, _)| *id != subscription.id);
                before != listeners.len()
            }
            None => false,
        };

        self.topics
            .remove_if(&subscription.topic, |_, listeners| listeners.is_empty());

        if removed {
            debug!(topic = %subscription.topic, listener = subscription.id, "Unsubscribed");
        }
    }

    /// Publish a value on a topic.
    ///
    /// Listeners run on the caller's thread. A listener that panics is
    /// logged and skipped; the remaining listeners still receive the event.
    pub fn publish(&self, topic: &str, payload: Value) {
        let mut listeners = self.snapshot(topic);
        if topic != WILDCARD {
            listeners.extend(self.snapshot(WILDCARD));
        }

        if listeners.is_empty() {
            trace!(topic = %topic, "Publish with no listeners");
            return;
        }

        let event = Event::new(topic, payload);
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(topic = %topic, event = event.id, "Listener panicked");
            }
        }

        trace!(topic = %topic, recipients = listeners.len(), "Published event");
    }

    /// Number of listeners registered for a topic.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// All topics with at least one listener.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            topic_count: self.topics.len(),
            listener_count: self.topics.iter().map(|e| e.len()).sum(),
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.topics.clear();
        debug!("Event hub cleared");
    }

    /// Clone the listener list so that no lock is held during dispatch.
    fn snapshot(&self, topic: &str) -> Vec<Listener> {
        self.topics
            .get(topic)
            .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of topics with listeners.
    pub topic_count: usize,
    /// Total number of listeners.
    pub listener_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |name: &str| -> Box<dyn Fn(&Event) + Send + Sync> {
            let log = Arc::clone(&log2);
            let name = name.to_string();
            Box::new(move |e: &Event| log.lock().unwrap().push(format!("{}:{}", name, e.payload)))
        };
        (log, make)
    }

    #[test]
    fn test_publish_in_registration_order() {
        let hub = EventHub::new();
        let (log, make) = recorder();

        hub.subscribe("t", make("a"));
        hub.subscribe("t", make("b"));
        hub.subscribe("other", make("x"));

        hub.publish("t", json!(1));

        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_no_replay() {
        let hub = EventHub::new();
        let (log, make) = recorder();

        hub.publish("t", json!("early"));
        hub.subscribe("t", make("a"));
        hub.publish("t", json!("late"));

        assert_eq!(*log.lock().unwrap(), vec!["a:\"late\""]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = EventHub::new();
        let (log, make) = recorder();

        let sub = hub.subscribe("t", make("a"));
        assert_eq!(hub.listener_count("t"), 1);

        hub.unsubscribe(&sub);
        hub.unsubscribe(&sub);
        assert_eq!(hub.listener_count("t"), 0);
        assert!(hub.topics().is_empty());

        hub.publish("t", json!(1));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let hub = EventHub::new();
        let (log, make) = recorder();

        hub.subscribe("t", make("a"));
        hub.subscribe("t", |_: &Event| panic!("listener failure"));
        hub.subscribe("t", make("c"));

        hub.publish("t", json!(7));

        assert_eq!(*log.lock().unwrap(), vec!["a:7", "c:7"]);
    }

    #[test]
    fn test_subscribe_during_dispatch_uses_snapshot() {
        let hub = Arc::new(EventHub::new());
        let calls = Arc::new(AtomicU64::new(0));

        let hub2 = Arc::clone(&hub);
        let calls2 = Arc::clone(&calls);
        hub.subscribe("t", move |_: &Event| {
            let calls3 = Arc::clone(&calls2);
            // Added during dispatch: must not see the in-flight event
            hub2.subscribe("t", move |_: &Event| {
                calls3.fetch_add(1, Ordering::SeqCst);
            });
        });

        hub.publish("t", json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hub.listener_count("t"), 2);

        hub.publish("t", json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_uses_snapshot() {
        let hub = Arc::new(EventHub::new());
        let (log, make) = recorder();

        let victim = Arc::new(Mutex::new(None::<Subscription>));
        let hub2 = Arc::clone(&hub);
        let victim2 = Arc::clone(&victim);
        hub.subscribe("t", move |_: &Event| {
            if let Some(sub) = victim2.lock().unwrap().take() {
                hub2.unsubscribe(&sub);
            }
        });
        *victim.lock().unwrap() = Some(hub.subscribe("t", make("b")));

        hub.publish("t", json!(1));
        hub.publish("t", json!(2));

        assert_eq!(*log.lock().unwrap(), vec!["b:1"]);
    }

    #[test]
    fn test_wildcard_receives_everything() {
        let hub = EventHub::new();
        let (log, make) = recorder();

        hub.subscribe("device:c1:status", make("direct"));
        hub.subscribe(WILDCARD, make("all"));

        hub.publish("device:c1:status", json!(1));
        hub.publish("connection:added", json!(2));

        assert_eq!(*log.lock().unwrap(), vec!["direct:1", "all:1", "all:2"]);
    }

    #[tokio::test]
    async fn test_subscribe_stream() {
        let hub = EventHub::new();
        let (sub, mut rx) = hub.subscribe_stream("device:c1:telemetry");

        hub.publish("device:c1:telemetry", json!({"ping": 1}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "device:c1:telemetry");
        assert_eq!(event.payload, json!({"ping": 1}));

        hub.unsubscribe(&sub);
        hub.publish("device:c1:telemetry", json!({"ping": 2}));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_concurrent_publish_and_subscribe() {
        let hub = Arc::new(EventHub::new());
        let delivered = Arc::new(AtomicU64::new(0));

        let d = Arc::clone(&delivered);
        hub.subscribe("device:c1:telemetry", move |_: &Event| {
            d.fetch_add(1, Ordering::Relaxed);
        });

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        hub.publish("device:c1:telemetry", json!(i));
                    }
                })
            })
            .collect();

        let churn = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    let sub = hub.subscribe("device:c1:telemetry", |_: &Event| {});
                    hub.unsubscribe(&sub);
                }
            })
        };

        for p in publishers {
            p.join().unwrap();
        }
        churn.join().unwrap();

        assert_eq!(delivered.load(Ordering::Relaxed), 1000);
        assert_eq!(hub.listener_count("device:c1:telemetry"), 1);
    }

    #[test]
    fn test_clear_and_stats() {
        let hub = EventHub::new();
        hub.subscribe("a", |_: &Event| {});
        hub.subscribe("a", |_: &Event| {});
        hub.subscribe("b", |_: &Event| {});

        let stats = hub.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.listener_count, 3);

        hub.clear();
        assert_eq!(hub.stats().listener_count, 0);
    }
}
