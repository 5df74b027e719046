//! # Conversations Module
//!
//! The registry of direct conversations, one per user pair.
//!
//! ## Conversation Identity
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CONVERSATION IDENTITY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  A conversation id is derived from the canonical pair, not generated:   │
//! │                                                                         │
//! │      id = hex( sha256( low || "|" || high )[..16] )                     │
//! │                                                                         │
//! │  Both sides of the pair derive the same id, so get_or_create(A,B) and   │
//! │  get_or_create(B,A) race on one INSERT OR IGNORE of the same row and    │
//! │  the loser simply reads the winner's conversation. There is never a     │
//! │  duplicate and the loser never sees an error.                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pair::UserPair;
use crate::storage::{ConversationRecord, ConversationSummaryRecord, Database};

/// Maximum length of the last-message preview in a summary, in characters
const PREVIEW_MAX_CHARS: usize = 50;

/// A direct conversation between two users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Deterministic conversation ID derived from the pair
    pub id: String,
    /// Lexicographically smaller participant
    pub user_low: String,
    /// Lexicographically larger participant
    pub user_high: String,
    /// When the conversation was created
    pub created_at: i64,
    /// Timestamp of the newest message, None while empty
    pub last_message_at: Option<i64>,
}

impl Conversation {
    /// Derive the deterministic conversation ID for a pair
    ///
    /// Both participants derive the same ID regardless of argument order,
    /// because the pair is already canonical.
    pub fn derive_id(pair: &UserPair) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(pair.low().as_bytes());
        hasher.update(b"|");
        hasher.update(pair.high().as_bytes());

        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }

    /// Whether `user_id` is a participant
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_low == user_id || self.user_high == user_id
    }

    /// The other participant, if `user_id` is one
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if user_id == self.user_low {
            Some(&self.user_high)
        } else if user_id == self.user_high {
            Some(&self.user_low)
        } else {
            None
        }
    }

    fn from_record(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            user_low: record.user_low,
            user_high: record.user_high,
            created_at: record.created_at,
            last_message_at: record.last_message_at,
        }
    }
}

/// A conversation as it appears in one user's inbox list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation ID
    pub id: String,
    /// The other participant
    pub other: String,
    /// When the conversation was created
    pub created_at: i64,
    /// Timestamp of the newest message, None while empty
    pub last_message_at: Option<i64>,
    /// Truncated content of the newest message
    pub last_message_preview: Option<String>,
    /// Messages addressed to this user and not yet read
    pub unread_count: i64,
}

impl ConversationSummary {
    fn from_record(record: ConversationSummaryRecord, viewer: &str) -> Self {
        let other = if record.user_low == viewer {
            record.user_high
        } else {
            record.user_low
        };
        Self {
            id: record.id,
            other,
            created_at: record.created_at,
            last_message_at: record.last_message_at,
            last_message_preview: record.last_message.map(|m| truncate_preview(&m)),
            unread_count: record.unread_count,
        }
    }
}

/// Truncate message content to the preview length on a char boundary
fn truncate_preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((byte_index, _)) => format!("{}...", &content[..byte_index]),
        None => content.to_string(),
    }
}

/// Registry mapping user pairs to their single conversation
pub struct ConversationRegistry {
    /// Database for persistence
    database: Arc<Database>,
}

impl ConversationRegistry {
    /// Create a new conversation registry
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Get the conversation between two users, creating it if absent
    ///
    /// Safe to call concurrently from both sides: the storage layer keeps
    /// one row per pair and the loser of the insert race reads the
    /// winner's row.
    pub fn get_or_create(&self, caller: &str, other: &str) -> Result<Conversation> {
        let pair = UserPair::new(caller, other)?;
        let id = Conversation::derive_id(&pair);
        let now = crate::time::now_timestamp_millis();

        let created = self.database.insert_conversation_if_absent(&id, &pair, now)?;
        if created {
            tracing::info!(
                conversation_id = id.as_str(),
                low = pair.low(),
                high = pair.high(),
                "Conversation created"
            );
        }

        let record = self
            .database
            .get_conversation(&id)?
            .ok_or_else(|| Error::DatabaseError("Conversation row missing after insert".into()))?;
        Ok(Conversation::from_record(record))
    }

    /// Look up a conversation by ID
    pub fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .database
            .get_conversation(conversation_id)?
            .map(Conversation::from_record))
    }

    /// Look up the conversation between two users, if it exists
    pub fn find_between(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        let pair = UserPair::new(a, b)?;
        Ok(self
            .database
            .get_conversation_by_pair(&pair)?
            .map(Conversation::from_record))
    }

    /// List a user's conversations as inbox summaries
    ///
    /// Ordered by most recent activity; conversations the user hid are
    /// omitted until a new message arrives in them.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let records = self.database.get_conversation_summaries_for_user(user_id)?;
        Ok(records
            .into_iter()
            .map(|record| ConversationSummary::from_record(record, user_id))
            .collect())
    }

    /// Hide a conversation from the caller's inbox list
    ///
    /// Cosmetic only: the conversation and its messages remain, and the
    /// conversation reappears when a new message is stored in it.
    pub fn hide(&self, caller: &str, conversation_id: &str) -> Result<()> {
        let record = self
            .database
            .get_conversation(conversation_id)?
            .ok_or(Error::ConversationNotFound)?;
        let conversation = Conversation::from_record(record);

        if !conversation.involves(caller) {
            return Err(Error::NotParticipant);
        }

        let caller_is_low = caller == conversation.user_low;
        self.database
            .set_conversation_hidden(conversation_id, caller_is_low, true)?;

        tracing::debug!(
            conversation_id = conversation_id,
            user = caller,
            "Conversation hidden"
        );
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_registry() -> ConversationRegistry {
        let database = Arc::new(Database::open(None).await.unwrap());
        ConversationRegistry::new(database)
    }

    fn pair(a: &str, b: &str) -> UserPair {
        UserPair::new(a, b).unwrap()
    }

    #[test]
    fn test_derived_id_is_order_independent() {
        let id1 = Conversation::derive_id(&pair("alice", "bob"));
        let id2 = Conversation::derive_id(&pair("bob", "alice"));
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 32); // 16 bytes as hex

        let id3 = Conversation::derive_id(&pair("alice", "carol"));
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn test_get_or_create_creates_once() {
        let registry = test_registry().await;

        let first = registry.get_or_create("alice", "bob").unwrap();
        let second = registry.get_or_create("bob", "alice").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.user_low, "alice");
        assert_eq!(first.user_high, "bob");
        assert!(first.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_with_self_rejected() {
        let registry = test_registry().await;
        let result = registry.get_or_create("alice", "alice");
        assert!(matches!(result, Err(Error::SelfPair)));
    }

    #[tokio::test]
    async fn test_find_between_exact_pair_only() {
        let registry = test_registry().await;
        registry.get_or_create("alice", "bob").unwrap();

        assert!(registry.find_between("bob", "alice").unwrap().is_some());
        // A pair sharing one member is a different conversation
        assert!(registry.find_between("alice", "carol").unwrap().is_none());
        assert!(registry.find_between("bob", "carol").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let registry = test_registry().await;
        let created = registry.get_or_create("alice", "bob").unwrap();

        let found = registry.get(&created.id).unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(registry.get("no-such-conversation").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_row() {
        let registry = Arc::new(test_registry().await);

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("alice", "bob") })
        };
        let second = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("bob", "alice") })
        };

        // Both callers succeed and see the same conversation
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.id, b.id);

        let summaries = registry.list_for_user("alice").unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_hide_requires_participant() {
        let registry = test_registry().await;
        let conversation = registry.get_or_create("alice", "bob").unwrap();

        let outsider = registry.hide("carol", &conversation.id);
        assert!(matches!(outsider, Err(Error::NotParticipant)));

        let missing = registry.hide("alice", "no-such-conversation");
        assert!(matches!(missing, Err(Error::ConversationNotFound)));
    }

    #[tokio::test]
    async fn test_hide_removes_from_own_list_only() {
        let registry = test_registry().await;
        let conversation = registry.get_or_create("alice", "bob").unwrap();

        registry.hide("alice", &conversation.id).unwrap();

        assert!(registry.list_for_user("alice").unwrap().is_empty());
        assert_eq!(registry.list_for_user("bob").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_shows_other_participant() {
        let registry = test_registry().await;
        registry.get_or_create("alice", "bob").unwrap();

        let for_alice = registry.list_for_user("alice").unwrap();
        assert_eq!(for_alice[0].other, "bob");
        assert_eq!(for_alice[0].unread_count, 0);
        assert!(for_alice[0].last_message_preview.is_none());

        let for_bob = registry.list_for_user("bob").unwrap();
        assert_eq!(for_bob[0].other, "alice");
    }

    #[test]
    fn test_preview_truncation() {
        let short = truncate_preview("hello");
        assert_eq!(short, "hello");

        let long = truncate_preview(&"x".repeat(80));
        assert_eq!(long, format!("{}...", "x".repeat(50)));

        // Multi-byte content truncates on a char boundary
        let emoji = "🦀".repeat(60);
        let truncated = truncate_preview(&emoji);
        assert_eq!(truncated, format!("{}...", "🦀".repeat(50)));
    }
}
