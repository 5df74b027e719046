//! # Messaging Module
//!
//! Message persistence and retrieval for direct conversations.
//!
//! ## Append Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE APPEND PIPELINE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  append(conversation_id, sender_id, content)                            │
//! │                                                                         │
//! │  1. Validate content                                                    │
//! │     └─► non-blank, within MAX_MESSAGE_SIZE                              │
//! │                                                                         │
//! │  2. Authorize sender                                                    │
//! │     └─► conversation exists, sender is a participant                    │
//! │                                                                         │
//! │  3. Stamp and store             ┐                                       │
//! │     └─► timestamp taken,        │ under the append lock, so             │
//! │         row committed,          │ (created_at, seq) agrees with         │
//! │         sequence assigned       │ commit order and subscribers          │
//! │                                 │ observe messages in that order        │
//! │  4. Invalidate unread cache     │                                       │
//! │                                 │                                       │
//! │  5. Publish to subscribers      ┘                                       │
//! │     └─► after the row is durable; a crash between 3 and 5 loses         │
//! │         only the notification, never the message                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pagination
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CURSOR PAGINATION                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Listing is oldest-first. Messages sharing a timestamp are ordered      │
//! │  by storage sequence, so the order is total and stable.                 │
//! │                                                                         │
//! │  Cursor (opaque to callers):                                            │
//! │                                                                         │
//! │      base64( {"created_at": 1712000000123, "seq": 42} )                 │
//! │                                                                         │
//! │  The next page starts strictly after (created_at, seq), so pages        │
//! │  never overlap and never skip, even when new messages arrive            │
//! │  between calls.                                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::DeliveryBus;
use crate::error::{Error, Result};
use crate::storage::{Database, MessageRecord};
use crate::unread::UnreadTracker;

/// Maximum message content size (64KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 200;

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Storage sequence number; total order within the store
    pub seq: i64,
    /// Unique message ID (UUID)
    pub id: String,
    /// Conversation this belongs to
    pub conversation_id: String,
    /// Who sent it
    pub sender_id: String,
    /// Message content
    pub content: String,
    /// Unix timestamp when stored (milliseconds)
    pub created_at: i64,
    /// Whether the recipient has read it
    pub read: bool,
}

impl Message {
    fn from_record(record: MessageRecord) -> Self {
        Self {
            seq: record.seq,
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            content: record.content,
            created_at: record.created_at,
            read: record.read,
        }
    }

    /// Check if this message was sent by `user_id`
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

/// One page of a conversation's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages in oldest-first order
    pub messages: Vec<Message>,
    /// Cursor for the next page, None when this page was short
    pub next_cursor: Option<String>,
}

/// Resume position inside a conversation's history
///
/// Serialized to base64 JSON so callers can treat it as an opaque token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MessageCursor {
    /// Timestamp of the last message seen
    created_at: i64,
    /// Sequence of the last message seen, breaking timestamp ties
    seq: i64,
}

impl MessageCursor {
    fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64.encode(json))
    }

    fn decode(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::InvalidCursor(format!("Invalid base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidCursor(format!("Invalid cursor payload: {}", e)))
    }
}

/// Service for storing and listing messages
///
/// Appends run under a store-wide lock covering commit, unread cache
/// invalidation, and publication, so subscribers see each conversation's
/// messages in the order they were committed.
pub struct MessageStore {
    /// Database for persistence
    database: Arc<Database>,
    /// Bus for delivering stored messages to subscribers
    bus: Arc<DeliveryBus>,
    /// Unread cache to invalidate on append
    unread: Arc<UnreadTracker>,
    /// Serializes commit-then-publish across appends
    append_lock: parking_lot::Mutex<()>,
}

impl MessageStore {
    /// Create a new message store
    pub fn new(database: Arc<Database>, bus: Arc<DeliveryBus>, unread: Arc<UnreadTracker>) -> Self {
        Self {
            database,
            bus,
            unread,
            append_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Append a message to a conversation
    ///
    /// The sender must be a participant. Content must contain something
    /// other than whitespace, but is stored exactly as given. The stored
    /// message is published to conversation subscribers only after the
    /// row is committed.
    pub fn append(&self, conversation_id: &str, sender_id: &str, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        if content.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(content.len()));
        }

        let conversation = self
            .database
            .get_conversation(conversation_id)?
            .ok_or(Error::ConversationNotFound)?;
        if sender_id != conversation.user_low && sender_id != conversation.user_high {
            return Err(Error::NotParticipant);
        }
        let recipient = if sender_id == conversation.user_low {
            conversation.user_high.as_str()
        } else {
            conversation.user_low.as_str()
        };

        let id = Uuid::new_v4().to_string();

        let guard = self.append_lock.lock();
        // The timestamp is taken under the lock so commit order and
        // (created_at, seq) order agree
        let created_at = crate::time::now_timestamp_millis();
        let seq = self
            .database
            .store_message(&id, conversation_id, sender_id, content, created_at)?;

        let message = Message {
            seq,
            id,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
            read: false,
        };

        self.unread.note_appended(recipient);
        let delivered = self.bus.publish_message(&message);
        drop(guard);

        tracing::info!(
            conversation_id = conversation_id,
            message_id = message.id.as_str(),
            delivered = delivered,
            "Message stored"
        );
        Ok(message)
    }

    /// List a conversation's messages, oldest first
    ///
    /// `cursor` resumes a previous listing; `limit` is clamped to
    /// [`MAX_PAGE_SIZE`] and defaults to [`DEFAULT_PAGE_SIZE`].
    pub fn list(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<MessagePage> {
        if self.database.get_conversation(conversation_id)?.is_none() {
            return Err(Error::ConversationNotFound);
        }

        let after = match cursor {
            Some(encoded) => {
                let cursor = MessageCursor::decode(encoded)?;
                Some((cursor.created_at, cursor.seq))
            }
            None => None,
        };
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let records = self
            .database
            .get_messages_page(conversation_id, after, limit)?;
        let messages: Vec<Message> = records.into_iter().map(Message::from_record).collect();

        let next_cursor = if messages.len() == limit {
            let last = &messages[messages.len() - 1];
            Some(
                MessageCursor {
                    created_at: last.created_at,
                    seq: last.seq,
                }
                .encode()?,
            )
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Look up a single message by ID
    pub fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        Ok(self
            .database
            .get_message(message_id)?
            .map(Message::from_record))
    }
}

// ============================================================================
// TESTS
// ============================================================================
