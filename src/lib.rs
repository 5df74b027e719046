//! # Encore Core
//!
//! The social connection core of the Encore platform: friendships,
//! direct conversations, message history, live delivery, and unread
//! tracking, backed by a local SQLite database.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENCORE CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐  ┌─────────────┐   │
//! │  │   Friends   │  │Conversations │  │  Messaging  │  │   Unread    │   │
//! │  │             │  │              │  │             │  │             │   │
//! │  │ - Requests  │  │ - One per    │  │ - Append    │  │ - Counts    │   │
//! │  │ - Accept /  │  │   user pair  │  │ - History   │  │ - Mark read │   │
//! │  │   Reject    │  │ - Derived id │  │ - Cursors   │  │ - Mark all  │   │
//! │  │ - Block     │  │ - Summaries  │  │             │  │             │   │
//! │  └──────┬──────┘  └──────┬───────┘  └──────┬──────┘  └──────┬──────┘   │
//! │         │                │                 │                │          │
//! │         └────────────────┴────────┬────────┴────────────────┘          │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │ ┌─────────────────────────────────┐│
//! │  │    Pair     │  │   Storage   │ │ │          Delivery Bus           ││
//! │  │             │  │             │◄┘ │                                 ││
//! │  │ - Canonical │  │ - SQLite    │   │ - Per-conversation messages     ││
//! │  │   ordering  │  │ - Schema /  │   │ - Per-user friendship events    ││
//! │  │ - One key   │  │   migration │   │ - No buffering while offline    ││
//! │  │   per pair  │  │ - Queries   │   │                                 ││
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`pair`] - Canonical unordered user pairs
//! - [`storage`] - Local persistence (SQLite schema, migrations, queries)
//! - [`bus`] - In-process delivery of messages and friendship events
//! - [`friends`] - Friendship lifecycle (request, respond, cancel, block)
//! - [`conversations`] - The one-conversation-per-pair registry
//! - [`messaging`] - Message append and paginated history
//! - [`unread`] - Unread counts derived from stored read flags
//!
//! ## Consistency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONSISTENCY MODEL                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Storage is the source of truth                                         │
//! │  ──────────────────────────────                                         │
//! │  Every relationship and message lives in one SQLite row. Races          │
//! │  between the two sides of a pair are settled by the pair's primary      │
//! │  key, not by application locks.                                         │
//! │                                                                         │
//! │  Delivery follows commit                                                │
//! │  ───────────────────────                                                │
//! │  Subscribers are notified only after a row is durable, in commit        │
//! │  order per conversation. Disconnected users receive nothing and         │
//! │  catch up from history instead.                                         │
//! │                                                                         │
//! │  Derived state can be rebuilt                                           │
//! │  ────────────────────────────                                           │
//! │  Unread counts are a cache over the stored read flags and are           │
//! │  invalidated rather than incrementally patched, so they can never       │
//! │  drift from a full recount.                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod bus;
pub mod conversations;
pub mod error;
pub mod friends;
pub mod messaging;
pub mod pair;
pub mod storage;
/// Time utilities shared by every module that stamps rows.
pub mod time;
pub mod unread;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use bus::{DeliveryBus, Subscription};
pub use conversations::{Conversation, ConversationRegistry, ConversationSummary};
pub use error::{Error, ErrorKind, Result};
pub use friends::{
    Friendship, FriendshipEvent, FriendshipService, FriendshipState, FriendshipStatus,
    RequestDecision,
};
pub use messaging::{Message, MessagePage, MessageStore};
pub use pair::UserPair;
pub use unread::UnreadTracker;

// ============================================================================
// CORE FACADE
// ============================================================================

use std::sync::Arc;

use storage::{Database, StorageConfig};

/// Configuration for opening an Encore core
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Database path; in-memory when None
    pub storage_path: Option<String>,
}

/// The assembled social connection core
///
/// Owns one database and one delivery bus and wires the component
/// services over them. There is no global instance: every [`EncoreCore`]
/// is independent, several can coexist in one process, and every
/// operation names the acting user explicitly.
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        ENCORE CORE LIFECYCLE                            │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Open                                                                │
/// │     ┌─────────────┐                                                     │
/// │     │ EncoreCore::│──► Open (or create) the database                    │
/// │     │ open(config)│──► Apply schema migrations                          │
/// │     └─────────────┘──► Wire services over one bus                       │
/// │            │                                                            │
/// │            ▼                                                            │
/// │  2. Operate                                                             │
/// │     ┌─────────────┐                                                     │
/// │     │  Active     │◄─► Manage friendships                               │
/// │     │  State      │◄─► Send and list messages                           │
/// │     └─────────────┘◄─► Subscribe to live delivery                       │
/// │            │                                                            │
/// │            ▼                                                            │
/// │  3. Drop                                                                │
/// │     ┌─────────────┐                                                     │
/// │     │  (drop)     │──► Subscriptions close                              │
/// │     │             │──► Database handle released                         │
/// │     └─────────────┘                                                     │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct EncoreCore {
    /// Friendship lifecycle service
    friendships: FriendshipService,
    /// One-conversation-per-pair registry
    conversations: ConversationRegistry,
    /// Message persistence and history
    messages: MessageStore,
    /// Unread counts over the stored read flags
    unread: Arc<UnreadTracker>,
    /// Delivery bus shared by all services
    bus: Arc<DeliveryBus>,
}

impl EncoreCore {
    /// Open a core over the configured database
    ///
    /// ## Example
    ///
    /// ```ignore
    /// use encore_core::{CoreConfig, EncoreCore};
    ///
    /// let core = EncoreCore::open(CoreConfig::default()).await?;
    /// ```
    pub async fn open(config: CoreConfig) -> Result<Self> {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "Opening Encore core");

        let database: Arc<Database> = Arc::new(
            storage::init(StorageConfig {
                database_path: config.storage_path,
            })
            .await?,
        );
        let bus = Arc::new(DeliveryBus::new());
        let unread = Arc::new(UnreadTracker::new(database.clone()));

        Ok(Self {
            friendships: FriendshipService::new(database.clone(), bus.clone()),
            conversations: ConversationRegistry::new(database.clone()),
            messages: MessageStore::new(database, bus.clone(), unread.clone()),
            unread,
            bus,
        })
    }

    // ========================================================================
    // Friendships
    // ========================================================================

    /// Send a friend request from `requester` to `target`
    pub fn request_friendship(&self, requester: &str, target: &str) -> Result<Friendship> {
        self.friendships.request_friendship(requester, target)
    }

    /// Accept or reject the pending request between `responder` and `other`
    pub fn respond_friendship(
        &self,
        responder: &str,
        other: &str,
        decision: RequestDecision,
    ) -> Result<Option<Friendship>> {
        self.friendships.respond(responder, other, decision)
    }

    /// Cancel a pending request `caller` previously sent
    pub fn cancel_friendship(&self, caller: &str, other: &str) -> Result<()> {
        self.friendships.cancel_request(caller, other)
    }

    /// Remove an accepted friendship
    pub fn remove_friend(&self, caller: &str, other: &str) -> Result<()> {
        self.friendships.remove_friend(caller, other)
    }

    /// Block another user, from whatever state the pair is in
    pub fn block_user(&self, caller: &str, other: &str) -> Result<Friendship> {
        self.friendships.block_user(caller, other)
    }

    /// Lift a block previously created by `caller`
    pub fn unblock_user(&self, caller: &str, other: &str) -> Result<()> {
        self.friendships.unblock_user(caller, other)
    }

    /// The relationship between two users, as `viewer` sees it
    pub fn get_friendship_status(&self, viewer: &str, other: &str) -> Result<FriendshipStatus> {
        self.friendships.get_friendship_status(viewer, other)
    }

    /// All accepted friendships of a user
    pub fn get_friends(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships.get_friends(user_id)
    }

    /// Pending requests sent to this user
    pub fn get_incoming_requests(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships.get_incoming_requests(user_id)
    }

    /// Pending requests this user sent
    pub fn get_outgoing_requests(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships.get_outgoing_requests(user_id)
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Get the conversation between two users, creating it if absent
    pub fn get_or_create_conversation(&self, caller: &str, other: &str) -> Result<Conversation> {
        self.conversations.get_or_create(caller, other)
    }

    /// List a user's conversations as inbox summaries
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.conversations.list_for_user(user_id)
    }

    /// Hide a conversation from the caller's inbox until new activity
    pub fn hide_conversation(&self, caller: &str, conversation_id: &str) -> Result<()> {
        self.conversations.hide(caller, conversation_id)
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Append a message to a conversation
    pub fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message> {
        self.messages.append(conversation_id, sender_id, content)
    }

    /// List a conversation's messages, oldest first
    pub fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<MessagePage> {
        self.messages.list(conversation_id, cursor, limit)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to new messages in a conversation
    ///
    /// The subscriber must be a participant. Only messages stored while
    /// the subscription is alive are delivered; history is served by
    /// [`list_messages`](Self::list_messages).
    pub fn subscribe_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Subscription<Message>> {
        let conversation = self
            .conversations
            .get(conversation_id)?
            .ok_or(Error::ConversationNotFound)?;
        if !conversation.involves(user_id) {
            return Err(Error::NotParticipant);
        }
        Ok(self.bus.subscribe_conversation(conversation_id))
    }

    /// Subscribe to friendship state changes affecting a user
    pub fn subscribe_friendship_events(&self, user_id: &str) -> Subscription<FriendshipEvent> {
        self.bus.subscribe_friendship_events(user_id)
    }

    // ========================================================================
    // Unread
    // ========================================================================

    /// Total unread messages for a user across all conversations
    pub fn get_unread_count(&self, user_id: &str) -> Result<i64> {
        self.unread.get_unread_count(user_id)
    }

    /// Mark a single message as read; recipient only, idempotent
    pub fn mark_as_read(&self, user_id: &str, message_id: &str) -> Result<()> {
        self.unread.mark_as_read(user_id, message_id)
    }

    /// Mark every unread message addressed to a user as read
    pub fn mark_all_as_read(&self, user_id: &str) -> Result<usize> {
        self.unread.mark_all_as_read(user_id)
    }

    // ========================================================================
    // Component access
    // ========================================================================

    /// The friendship service
    pub fn friendships(&self) -> &FriendshipService {
        &self.friendships
    }

    /// The conversation registry
    pub fn conversations(&self) -> &ConversationRegistry {
        &self.conversations
    }

    /// The message store
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// The unread tracker
    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    /// The delivery bus
    pub fn bus(&self) -> &DeliveryBus {
        &self.bus
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Encore Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[tokio::test]
    async fn test_friendship_to_messaging_flow() {
        let core = EncoreCore::open(CoreConfig::default()).await.unwrap();

        core.request_friendship("alice", "bob").unwrap();
        core.respond_friendship("bob", "alice", RequestDecision::Accept)
            .unwrap();
        assert_eq!(
            core.get_friendship_status("alice", "bob").unwrap(),
            FriendshipStatus::Accepted
        );

        let conversation = core.get_or_create_conversation("alice", "bob").unwrap();
        let mut subscription = core
            .subscribe_conversation(&conversation.id, "bob")
            .unwrap();

        let sent = core
            .send_message(&conversation.id, "alice", "See you at the book club?")
            .unwrap();
        let received = subscription.try_recv().unwrap();
        assert_eq!(received.id, sent.id);

        assert_eq!(core.get_unread_count("bob").unwrap(), 1);
        core.mark_as_read("bob", &sent.id).unwrap();
        assert_eq!(core.get_unread_count("bob").unwrap(), 0);

        let inbox = core.list_conversations("bob").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].other, "alice");
        assert_eq!(inbox[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_subscribe_requires_participant() {
        let core = EncoreCore::open(CoreConfig::default()).await.unwrap();
        let conversation = core.get_or_create_conversation("alice", "bob").unwrap();

        let outsider = core.subscribe_conversation(&conversation.id, "carol");
        assert!(matches!(outsider, Err(Error::NotParticipant)));

        let missing = core.subscribe_conversation("no-such-conversation", "alice");
        assert!(matches!(missing, Err(Error::ConversationNotFound)));
    }

    #[tokio::test]
    async fn test_hidden_conversation_resurfaces_on_message() {
        let core = EncoreCore::open(CoreConfig::default()).await.unwrap();
        let conversation = core.get_or_create_conversation("alice", "bob").unwrap();
        core.send_message(&conversation.id, "alice", "lunch on Sunday?")
            .unwrap();

        core.hide_conversation("bob", &conversation.id).unwrap();
        assert!(core.list_conversations("bob").unwrap().is_empty());
        assert_eq!(core.list_conversations("alice").unwrap().len(), 1);

        // A new message un-hides the conversation for both sides
        core.send_message(&conversation.id, "alice", "or Monday?")
            .unwrap();
        let inbox = core.list_conversations("bob").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].unread_count, 2);
    }

    #[tokio::test]
    async fn test_cores_are_independent() {
        let core_a = EncoreCore::open(CoreConfig::default()).await.unwrap();
        let core_b = EncoreCore::open(CoreConfig::default()).await.unwrap();

        core_a.request_friendship("alice", "bob").unwrap();

        // No shared global state: the second core sees nothing
        assert_eq!(
            core_b.get_friendship_status("alice", "bob").unwrap(),
            FriendshipStatus::None
        );
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("encore.db")
            .to_string_lossy()
            .into_owned();

        {
            let core = EncoreCore::open(CoreConfig {
                storage_path: Some(path.clone()),
            })
            .await
            .unwrap();
            core.request_friendship("alice", "bob").unwrap();
            core.respond_friendship("bob", "alice", RequestDecision::Accept)
                .unwrap();
            let conversation = core.get_or_create_conversation("alice", "bob").unwrap();
            core.send_message(&conversation.id, "alice", "still here?")
                .unwrap();
        }

        let core = EncoreCore::open(CoreConfig {
            storage_path: Some(path),
        })
        .await
        .unwrap();
        assert_eq!(
            core.get_friendship_status("bob", "alice").unwrap(),
            FriendshipStatus::Accepted
        );
        assert_eq!(core.get_unread_count("bob").unwrap(), 1);

        let conversation = core.get_or_create_conversation("bob", "alice").unwrap();
        let page = core.list_messages(&conversation.id, None, None).unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].content, "still here?");
    }
}
