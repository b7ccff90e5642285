//! Shared publish/subscribe hub.
//!
//! The hub is the cross-module broadcast channel: module instances
//! republish every lifecycle signal here under a `module:` prefixed topic,
//! and anything holding the hub handle can listen without knowing which
//! instance emitted. Delivery is synchronous and in subscription order;
//! subscriber panics are not caught.
//!
//! # Example
//!
//! ```
//! use trellis_core::Hub;
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let hub = Hub::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let seen2 = Arc::clone(&seen);
//! hub.subscribe("module:remove", move |payload| {
//!     seen2.lock().unwrap().push(payload.clone());
//! });
//!
//! hub.publish("module:remove", json!({"id": "tooltip-1"}));
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// A unique identifier for a hub subscription.
    pub struct SubscriptionId;
}

type TopicHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct Subscription {
    /// `None` subscribes to every topic.
    topic: Option<String>,
    handler: TopicHandler,
}

struct HubState {
    subscriptions: SlotMap<SubscriptionId, Subscription>,
    order: Vec<SubscriptionId>,
}

/// A synchronous, string-topic publish/subscribe channel.
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                subscriptions: SlotMap::with_key(),
                order: Vec::new(),
            }),
        }
    }

    /// Subscribe to one topic.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.insert(Subscription {
            topic: Some(topic.into()),
            handler: Arc::new(move |_, payload| handler(payload)),
        })
    }

    /// Subscribe to every topic; the handler also receives the topic name.
    pub fn subscribe_any(
        &self,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.insert(Subscription {
            topic: None,
            handler: Arc::new(handler),
        })
    }

    fn insert(&self, subscription: Subscription) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = state.subscriptions.insert(subscription);
        state.order.push(id);
        id
    }

    /// Remove a subscription. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        if state.subscriptions.remove(id).is_some() {
            state.order.retain(|&s| s != id);
        }
    }

    /// Publish a payload to every matching subscriber, in subscription
    /// order. The subscriber list is snapshotted first, so handlers may
    /// subscribe or unsubscribe freely.
    pub fn publish(&self, topic: &str, payload: Value) {
        let handlers: Vec<TopicHandler> = {
            let state = self.state.lock();
            state
                .order
                .iter()
                .filter_map(|&id| {
                    let sub = &state.subscriptions[id];
                    match &sub.topic {
                        Some(t) if t != topic => None,
                        _ => Some(Arc::clone(&sub.handler)),
                    }
                })
                .collect()
        };
        tracing::trace!(
            target: "trellis_core::hub",
            topic,
            subscribers = handlers.len(),
            "publishing"
        );
        for handler in handlers {
            handler(topic, &payload);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delivers_to_matching_topic_only() {
        let hub = Hub::new();
        let hits = Arc::new(Mutex::new(0usize));
        let hits2 = Arc::clone(&hits);
        hub.subscribe("a", move |_| *hits2.lock() += 1);

        hub.publish("a", json!(1));
        hub.publish("b", json!(2));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn wildcard_sees_every_topic() {
        let hub = Hub::new();
        let topics = Arc::new(Mutex::new(Vec::new()));
        let topics2 = Arc::clone(&topics);
        hub.subscribe_any(move |topic, _| topics2.lock().push(topic.to_owned()));

        hub.publish("x", Value::Null);
        hub.publish("y", Value::Null);
        assert_eq!(*topics.lock(), vec!["x", "y"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = Hub::new();
        let hits = Arc::new(Mutex::new(0usize));
        let hits2 = Arc::clone(&hits);
        let id = hub.subscribe("a", move |_| *hits2.lock() += 1);

        hub.publish("a", Value::Null);
        hub.unsubscribe(id);
        hub.publish("a", Value::Null);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn handlers_may_unsubscribe_mid_publish() {
        let hub = Arc::new(Hub::new());
        let hub2 = Arc::clone(&hub);
        let hits = Arc::new(Mutex::new(0usize));
        let hits2 = Arc::clone(&hits);

        let id = Arc::new(Mutex::new(None));
        let id2 = Arc::clone(&id);
        let sub = hub.subscribe("a", move |_| {
            *hits2.lock() += 1;
            if let Some(id) = *id2.lock() {
                hub2.unsubscribe(id);
            }
        });
        *id.lock() = Some(sub);

        hub.publish("a", Value::Null);
        hub.publish("a", Value::Null);
        assert_eq!(*hits.lock(), 1);
    }
}
