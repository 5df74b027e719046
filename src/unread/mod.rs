//! # Unread Module
//!
//! Per-user unread message counts, answered from a cache that can always
//! be rebuilt from storage.
//!
//! ## Cache Protocol
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      UNREAD CACHE PROTOCOL                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  The stored `read` flags are the source of truth; the cache is only     │
//! │  a memo of the last full count. Writers never "adjust" the cache to     │
//! │  what they believe the new count is:                                    │
//! │                                                                         │
//! │    message appended ──► drop the recipient's entry (invalidate)         │
//! │    mark one read    ──► decrement the entry, only if the flag           │
//! │                         actually flipped in storage                     │
//! │    mark all read    ──► sweep storage, then pin the entry to 0          │
//! │    count queried    ──► cached entry, or recount from storage           │
//! │                                                                         │
//! │  Invalidation on append (rather than increment) means a racing sweep    │
//! │  can never strand a stale number: whichever writer runs last either     │
//! │  removed the entry or set it while holding the lock that the sweep      │
//! │  also takes.                                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::Database;

/// Tracks how many stored messages each user has not read yet
///
/// A message counts toward its recipient: a participant of the
/// conversation who is not the sender. Senders never see their own
/// messages as unread.
pub struct UnreadTracker {
    /// Database holding the authoritative read flags
    database: Arc<Database>,
    /// Cached counts by user, rebuilt lazily after invalidation
    counts: RwLock<HashMap<String, i64>>,
}

impl UnreadTracker {
    /// Create a new unread tracker
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Total unread messages for a user across all conversations
    pub fn get_unread_count(&self, user_id: &str) -> Result<i64> {
        if let Some(count) = self.counts.read().get(user_id) {
            return Ok(*count);
        }

        let mut counts = self.counts.write();
        // Another caller may have recounted while we waited for the lock
        if let Some(count) = counts.get(user_id) {
            return Ok(*count);
        }
        let count = self.database.count_unread_for_user(user_id)?;
        counts.insert(user_id.to_string(), count);
        Ok(count)
    }

    /// Mark a single message as read
    ///
    /// Only the message's recipient may do this. Marking an already-read
    /// message is a no-op, so retries are harmless.
    pub fn mark_as_read(&self, user_id: &str, message_id: &str) -> Result<()> {
        let message = self
            .database
            .get_message(message_id)?
            .ok_or(Error::MessageNotFound)?;
        if message.sender_id == user_id {
            return Err(Error::NotMessageRecipient);
        }
        let conversation = self
            .database
            .get_conversation(&message.conversation_id)?
            .ok_or(Error::MessageNotFound)?;
        if user_id != conversation.user_low && user_id != conversation.user_high {
            return Err(Error::NotMessageRecipient);
        }

        let mut counts = self.counts.write();
        let flipped = self.database.mark_message_read(message_id)?;
        if flipped {
            if let Some(count) = counts.get_mut(user_id) {
                *count = (*count - 1).max(0);
            }
            tracing::debug!(user = user_id, message_id = message_id, "Message marked read");
        }
        Ok(())
    }

    /// Mark every unread message addressed to a user as read
    ///
    /// Returns how many messages changed. Messages appended after the
    /// sweep remain unread.
    pub fn mark_all_as_read(&self, user_id: &str) -> Result<usize> {
        // The entry is pinned to zero under the same lock the sweep holds,
        // so a concurrent append cannot leave a stale nonzero cache.
        let mut counts = self.counts.write();
        let marked = self.database.mark_all_read_for_user(user_id)?;
        counts.insert(user_id.to_string(), 0);

        if marked > 0 {
            tracing::info!(user = user_id, marked = marked, "All messages marked read");
        }
        Ok(marked)
    }

    /// Invalidate a recipient's cached count after an append
    pub(crate) fn note_appended(&self, recipient: &str) {
        self.counts.write().remove(recipient);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DeliveryBus;
    use crate::conversations::ConversationRegistry;
    use crate::messaging::MessageStore;

    struct Fixture {
        database: Arc<Database>,
        unread: Arc<UnreadTracker>,
        store: MessageStore,
        conversation_id: String,
    }

    async fn fixture() -> Fixture {
        let database = Arc::new(Database::open(None).await.unwrap());
        let bus = Arc::new(DeliveryBus::new());
        let unread = Arc::new(UnreadTracker::new(database.clone()));
        let registry = ConversationRegistry::new(database.clone());
        let conversation = registry.get_or_create("alice", "bob").unwrap();
        Fixture {
            database: database.clone(),
            unread: unread.clone(),
            store: MessageStore::new(database, bus, unread),
            conversation_id: conversation.id,
        }
    }

    #[tokio::test]
    async fn test_counts_recipient_not_sender() {
        let f = fixture().await;

        f.store.append(&f.conversation_id, "alice", "one").unwrap();
        f.store.append(&f.conversation_id, "alice", "two").unwrap();

        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 2);
        assert_eq!(f.unread.get_unread_count("alice").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_reflects_appends_after_caching() {
        let f = fixture().await;

        // Prime the cache at zero, then append
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 0);
        f.store.append(&f.conversation_id, "alice", "one").unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_idempotent() {
        let f = fixture().await;
        let message = f.store.append(&f.conversation_id, "alice", "one").unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 1);

        f.unread.mark_as_read("bob", &message.id).unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 0);

        // Marking again changes nothing
        f.unread.mark_as_read("bob", &message.id).unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_only_recipient_may_mark() {
        let f = fixture().await;
        let message = f.store.append(&f.conversation_id, "alice", "one").unwrap();

        let by_sender = f.unread.mark_as_read("alice", &message.id);
        assert!(matches!(by_sender, Err(Error::NotMessageRecipient)));

        let by_outsider = f.unread.mark_as_read("carol", &message.id);
        assert!(matches!(by_outsider, Err(Error::NotMessageRecipient)));

        // The message is still unread
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_unknown_message() {
        let f = fixture().await;
        let result = f.unread.mark_as_read("bob", "no-such-message");
        assert!(matches!(result, Err(Error::MessageNotFound)));
    }

    #[tokio::test]
    async fn test_mark_all_as_read() {
        let f = fixture().await;
        for i in 0..3 {
            f.store
                .append(&f.conversation_id, "alice", &format!("msg {}", i))
                .unwrap();
        }
        f.store.append(&f.conversation_id, "bob", "reply").unwrap();

        let marked = f.unread.mark_all_as_read("bob").unwrap();
        assert_eq!(marked, 3);
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 0);

        // Alice's unread reply is untouched
        assert_eq!(f.unread.get_unread_count("alice").unwrap(), 1);

        // A sweep with nothing to do reports zero
        assert_eq!(f.unread.mark_all_as_read("bob").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_after_sweep_counts_again() {
        let f = fixture().await;
        f.store.append(&f.conversation_id, "alice", "one").unwrap();
        f.unread.mark_all_as_read("bob").unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 0);

        f.store.append(&f.conversation_id, "alice", "two").unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_matches_storage_after_mixed_operations() {
        let f = fixture().await;

        let m1 = f.store.append(&f.conversation_id, "alice", "one").unwrap();
        f.store.append(&f.conversation_id, "alice", "two").unwrap();
        assert_eq!(f.unread.get_unread_count("bob").unwrap(), 2);

        f.unread.mark_as_read("bob", &m1.id).unwrap();
        f.store.append(&f.conversation_id, "alice", "three").unwrap();
        f.store.append(&f.conversation_id, "bob", "reply").unwrap();

        let cached = f.unread.get_unread_count("bob").unwrap();
        let stored = f.database.count_unread_for_user("bob").unwrap();
        assert_eq!(cached, stored);
        assert_eq!(cached, 2);
    }

    #[tokio::test]
    async fn test_concurrent_sweep_and_append_stay_consistent() {
        let f = Arc::new(fixture().await);
        f.store.append(&f.conversation_id, "alice", "old").unwrap();

        let sweep = {
            let f = f.clone();
            tokio::spawn(async move { f.unread.mark_all_as_read("bob") })
        };
        let append = {
            let f = f.clone();
            tokio::spawn(async move { f.store.append(&f.conversation_id, "alice", "new") })
        };
        sweep.await.unwrap().unwrap();
        append.await.unwrap().unwrap();

        // Whatever the interleaving, the cache answer equals storage
        let cached = f.unread.get_unread_count("bob").unwrap();
        let stored = f.database.count_unread_for_user("bob").unwrap();
        assert_eq!(cached, stored);
    }
}
