//! # Delivery Bus
//!
//! In-process publish/subscribe fan-out for new messages and friendship
//! state changes. All registries are concurrent (DashMap) for lock-free
//! access.
//!
//! ## Delivery Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DELIVERY FLOW                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  MessageStore ──publish──►  DeliveryBus                                 │
//! │  FriendshipService          │                                           │
//! │                             ├── conversation topics ──► Subscription    │
//! │                             │   (keyed by conversation id)              │
//! │                             │                                           │
//! │                             └── friendship topics   ──► Subscription    │
//! │                                 (keyed by user id)                      │
//! │                                                                         │
//! │  Live fan-out only: a subscriber connected at publish time receives     │
//! │  the value at least once, in publish order per topic. Nothing is        │
//! │  buffered for anyone else — reconnecting callers reconcile from         │
//! │  storage (message listing / unread count) instead.                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::friends::FriendshipEvent;
use crate::messaging::Message;

/// One registered receiver on a topic
struct Subscriber<T> {
    /// Unique id, used to remove exactly this subscriber on unsubscribe
    id: String,
    /// Sending half; the receiving half lives in the [`Subscription`]
    sender: mpsc::UnboundedSender<T>,
}

/// A live subscription handle
///
/// Owns the receiving half of the channel. Dropping the handle ends the
/// subscription; the bus prunes the dead sender on the next publish to the
/// same topic.
pub struct Subscription<T> {
    id: String,
    key: String,
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// The unique id of this subscription
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The topic key this subscription is attached to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next published value
    ///
    /// Returns None once the bus side has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

/// The delivery bus
///
/// Messages fan out by conversation id, friendship events by user id. A key
/// may have any number of subscribers (for example one per device).
pub struct DeliveryBus {
    /// Conversation id → message subscribers
    conversation_subscribers: Arc<DashMap<String, Vec<Subscriber<Message>>>>,

    /// User id → friendship event subscribers
    friendship_subscribers: Arc<DashMap<String, Vec<Subscriber<FriendshipEvent>>>>,
}

impl DeliveryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            conversation_subscribers: Arc::new(DashMap::new()),
            friendship_subscribers: Arc::new(DashMap::new()),
        }
    }

    // ── Conversation topics ───────────────────────────────────────────────

    /// Subscribe to new messages in a conversation
    pub fn subscribe_conversation(&self, conversation_id: &str) -> Subscription<Message> {
        Self::subscribe_topic(&self.conversation_subscribers, conversation_id)
    }

    /// Remove a conversation subscription
    pub fn unsubscribe_conversation(&self, subscription: Subscription<Message>) {
        Self::unsubscribe_topic(&self.conversation_subscribers, subscription);
    }

    /// Deliver a message to everyone subscribed to its conversation
    ///
    /// Returns the number of subscribers reached. Subscribers whose handle
    /// was dropped are pruned here.
    pub fn publish_message(&self, message: &Message) -> usize {
        Self::publish_topic(
            &self.conversation_subscribers,
            &message.conversation_id,
            message,
        )
    }

    /// Number of live subscribers on a conversation
    pub fn conversation_subscriber_count(&self, conversation_id: &str) -> usize {
        self.conversation_subscribers
            .get(conversation_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    // ── Friendship topics ─────────────────────────────────────────────────

    /// Subscribe to friendship state changes affecting a user
    pub fn subscribe_friendship_events(&self, user_id: &str) -> Subscription<FriendshipEvent> {
        Self::subscribe_topic(&self.friendship_subscribers, user_id)
    }

    /// Remove a friendship event subscription
    pub fn unsubscribe_friendship_events(&self, subscription: Subscription<FriendshipEvent>) {
        Self::unsubscribe_topic(&self.friendship_subscribers, subscription);
    }

    /// Deliver a friendship event to a user's subscribers
    ///
    /// Returns the number of subscribers reached.
    pub fn publish_friendship_event(&self, user_id: &str, event: &FriendshipEvent) -> usize {
        Self::publish_topic(&self.friendship_subscribers, user_id, event)
    }

    /// Number of live subscribers on a user's friendship topic
    pub fn friendship_subscriber_count(&self, user_id: &str) -> usize {
        self.friendship_subscribers
            .get(user_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    // ── Shared topic mechanics ────────────────────────────────────────────

    fn subscribe_topic<T>(
        map: &DashMap<String, Vec<Subscriber<T>>>,
        key: &str,
    ) -> Subscription<T> {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        map.entry(key.to_string()).or_default().push(Subscriber {
            id: id.clone(),
            sender,
        });

        tracing::debug!(key = key, subscription = id.as_str(), "Subscribed");

        Subscription {
            id,
            key: key.to_string(),
            receiver,
        }
    }

    fn unsubscribe_topic<T>(
        map: &DashMap<String, Vec<Subscriber<T>>>,
        subscription: Subscription<T>,
    ) {
        if let Some(mut subs) = map.get_mut(&subscription.key) {
            subs.retain(|s| s.id != subscription.id);
        }
        // Drop empty topic entries to keep the map small
        map.remove_if(&subscription.key, |_, subs| subs.is_empty());

        tracing::debug!(
            key = subscription.key.as_str(),
            subscription = subscription.id.as_str(),
            "Unsubscribed"
        );
    }

    fn publish_topic<T: Clone>(
        map: &DashMap<String, Vec<Subscriber<T>>>,
        key: &str,
        value: &T,
    ) -> usize {
        let mut delivered = 0;
        let mut pruned = 0;

        if let Some(mut subs) = map.get_mut(key) {
            subs.retain(|sub| {
                if sub.sender.send(value.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    pruned += 1;
                    false
                }
            });
        }
        if pruned > 0 {
            // The guard above is released before touching the map again
            map.remove_if(key, |_, subs| subs.is_empty());
            tracing::debug!(key = key, pruned = pruned, "Pruned dead subscriptions");
        }

        delivered
    }
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(id: &str, conversation_id: &str, content: &str) -> Message {
        Message {
            seq: 1,
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "alice".to_string(),
            content: content.to_string(),
            created_at: 1000,
            read: false,
        }
    }

    #[test]
    fn test_subscribe_and_publish() {
        let bus = DeliveryBus::new();
        let mut sub = bus.subscribe_conversation("conv-1");

        let delivered = bus.publish_message(&test_message("m1", "conv-1", "hello"));
        assert_eq!(delivered, 1);

        let received = sub.try_recv().unwrap();
        assert_eq!(received.id, "m1");
        assert_eq!(received.content, "hello");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = DeliveryBus::new();
        let delivered = bus.publish_message(&test_message("m1", "conv-1", "hello"));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_publish_preserves_order() {
        let bus = DeliveryBus::new();
        let mut sub = bus.subscribe_conversation("conv-1");

        bus.publish_message(&test_message("m1", "conv-1", "one"));
        bus.publish_message(&test_message("m2", "conv-1", "two"));
        bus.publish_message(&test_message("m3", "conv-1", "three"));

        assert_eq!(sub.try_recv().unwrap().id, "m1");
        assert_eq!(sub.try_recv().unwrap().id, "m2");
        assert_eq!(sub.try_recv().unwrap().id, "m3");
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = DeliveryBus::new();
        let mut sub_one = bus.subscribe_conversation("conv-1");
        let mut sub_two = bus.subscribe_conversation("conv-2");

        bus.publish_message(&test_message("m1", "conv-1", "hello"));

        assert!(sub_one.try_recv().is_some());
        assert!(sub_two.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = DeliveryBus::new();
        let sub = bus.subscribe_conversation("conv-1");
        assert_eq!(bus.conversation_subscriber_count("conv-1"), 1);

        bus.unsubscribe_conversation(sub);
        assert_eq!(bus.conversation_subscriber_count("conv-1"), 0);

        let delivered = bus.publish_message(&test_message("m1", "conv-1", "hello"));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = DeliveryBus::new();
        let sub = bus.subscribe_conversation("conv-1");
        drop(sub);

        // The sender is still registered until the next publish notices it
        assert_eq!(bus.conversation_subscriber_count("conv-1"), 1);
        let delivered = bus.publish_message(&test_message("m1", "conv-1", "hello"));
        assert_eq!(delivered, 0);
        assert_eq!(bus.conversation_subscriber_count("conv-1"), 0);
    }

    #[test]
    fn test_subscribe_after_publish_gets_nothing() {
        let bus = DeliveryBus::new();
        bus.publish_message(&test_message("m1", "conv-1", "hello"));

        let mut sub = bus.subscribe_conversation("conv-1");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_multiple_subscribers_each_receive() {
        let bus = DeliveryBus::new();
        let mut first = bus.subscribe_conversation("conv-1");
        let mut second = bus.subscribe_conversation("conv-1");

        let delivered = bus.publish_message(&test_message("m1", "conv-1", "hello"));
        assert_eq!(delivered, 2);
        assert!(first.try_recv().is_some());
        assert!(second.try_recv().is_some());
    }

    #[test]
    fn test_friendship_events_keyed_by_user() {
        let bus = DeliveryBus::new();
        let mut alice = bus.subscribe_friendship_events("alice");

        let event = FriendshipEvent::Requested {
            from: "bob".to_string(),
            to: "alice".to_string(),
            at: 1000,
        };
        assert_eq!(bus.publish_friendship_event("alice", &event), 1);
        assert_eq!(bus.publish_friendship_event("carol", &event), 0);

        assert!(matches!(
            alice.try_recv(),
            Some(FriendshipEvent::Requested { .. })
        ));
        assert!(alice.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let bus = Arc::new(DeliveryBus::new());
        let mut sub = bus.subscribe_conversation("conv-1");

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish_message(&test_message("m1", "conv-1", "hello"));
        });

        let received = sub.recv().await.unwrap();
        assert_eq!(received.id, "m1");
    }
}
