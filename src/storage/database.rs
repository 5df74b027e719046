//! # Database
//!
//! SQLite database wrapper for the social connection core.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                    │
//! │  │    Services     │                                                    │
//! │  └────────┬────────┘                                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │    Database     │  Row-level API                                     │
//! │  │   (this file)   │  - Friendship rows (one per canonical pair)        │
//! │  │                 │  - Conversation registry                           │
//! │  │                 │  - Message log + read flags                        │
//! │  └────────┬────────┘                                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │    rusqlite     │  SQLite wrapper                                    │
//! │  └────────┬────────┘                                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │   SQLite DB     │  Storage                                           │
//! │  │   (file or      │  - In-memory for tests                             │
//! │  │    memory)      │  - File for production                             │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `Database` exposes row-level operations only; state-machine rules and
//! permission checks live in the services. The one exception is duplicate
//! arbitration: the pair-keyed uniqueness constraints decide concurrent
//! creation races here, and the insert methods translate the constraint
//! violation into the matching domain error.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use super::schema;
use crate::error::{Error, Result};
use crate::pair::UserPair;

/// The main database handle
///
/// This wraps a SQLite connection and provides row-level methods for the
/// friendship, conversation, and message tables.
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        // Initialize schema
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Check current schema version
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                // Fresh database, create all tables
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                // Set schema version
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::info!(
                    "Database schema version {} is older than current {}, running migrations",
                    v,
                    schema::SCHEMA_VERSION
                );

                if v < 2 {
                    tracing::info!("Running migration v1 → v2 (conversation hide flags)");
                    conn.execute_batch(schema::MIGRATE_V1_TO_V2)
                        .map_err(|e| Error::DatabaseError(format!("Migration v1→v2 failed: {}", e)))?;
                }

                tracing::info!("All migrations complete (now at version {})", schema::SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    // ========================================================================
    // FRIENDSHIP OPERATIONS
    // ========================================================================

    /// Insert the friendship row for a pair
    ///
    /// Returns [`Error::FriendshipExists`] if any row for this pair already
    /// exists, whatever its status. Under a concurrent insert for the same
    /// pair (from either side), the primary key guarantees exactly one
    /// winner; the loser gets `FriendshipExists`.
    pub fn insert_friendship(
        &self,
        pair: &UserPair,
        status: &str,
        requested_by: &str,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO friendships (user_low, user_high, status, requested_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![pair.low(), pair.high(), status, requested_by, now, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::FriendshipExists
            }
            other => Error::DatabaseError(format!("Failed to insert friendship: {}", other)),
        })?;

        Ok(())
    }

    /// Get the friendship row for a pair, if any
    pub fn get_friendship(&self, pair: &UserPair) -> Result<Option<FriendshipRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT user_low, user_high, status, requested_by, created_at, updated_at
             FROM friendships WHERE user_low = ? AND user_high = ?",
            params![pair.low(), pair.high()],
            Self::friendship_from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get friendship: {}", e))),
        }
    }

    /// Transition a friendship row from one status to another
    ///
    /// Compare-and-set: the update only applies while the row is still in
    /// `expected_status` with `expected_requested_by` as its initiator.
    /// Returns false if the row is gone or already moved on (e.g. a
    /// concurrent cancel, reject, or block got there first). Matching the
    /// initiator as well as the status means a row that was deleted and
    /// re-created from the other side between a caller's read and this
    /// write does not satisfy the stale transition.
    pub fn update_friendship_status(
        &self,
        pair: &UserPair,
        expected_status: &str,
        expected_requested_by: &str,
        new_status: &str,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "UPDATE friendships SET status = ?, updated_at = ?
                 WHERE user_low = ? AND user_high = ? AND status = ? AND requested_by = ?",
                params![
                    new_status,
                    now,
                    pair.low(),
                    pair.high(),
                    expected_status,
                    expected_requested_by
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update friendship: {}", e)))?;

        Ok(rows > 0)
    }

    /// Delete the friendship row for a pair while it is in `expected_status`
    /// with `expected_requested_by` as its initiator
    ///
    /// Returns false if no such row existed, including when a concurrent
    /// transition moved it to a different status or replaced it with a row
    /// initiated by the other side.
    pub fn delete_friendship(
        &self,
        pair: &UserPair,
        expected_status: &str,
        expected_requested_by: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "DELETE FROM friendships
                 WHERE user_low = ? AND user_high = ? AND status = ? AND requested_by = ?",
                params![
                    pair.low(),
                    pair.high(),
                    expected_status,
                    expected_requested_by
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to delete friendship: {}", e)))?;

        Ok(rows > 0)
    }

    /// Block a pair: insert the row as blocked, or overwrite whatever state
    /// it was in
    ///
    /// An already-blocked row is left untouched (the first block stands, so
    /// unblock rights stay with the original blocker even under concurrent
    /// block calls). `created_at` of an existing row is preserved.
    pub fn upsert_blocked_friendship(
        &self,
        pair: &UserPair,
        blocked_status: &str,
        blocker: &str,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO friendships (user_low, user_high, status, requested_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(user_low, user_high) DO UPDATE SET
                 status = excluded.status,
                 requested_by = excluded.requested_by,
                 updated_at = excluded.updated_at
             WHERE friendships.status != ?3",
            params![pair.low(), pair.high(), blocked_status, blocker, now],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to block pair: {}", e)))?;

        Ok(())
    }

    /// Get all friendship rows a user is part of, most recently updated first
    pub fn get_friendships_for_user(&self, user_id: &str) -> Result<Vec<FriendshipRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT user_low, user_high, status, requested_by, created_at, updated_at
                 FROM friendships WHERE user_low = ?1 OR user_high = ?1
                 ORDER BY updated_at DESC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], Self::friendship_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query friendships: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::DatabaseError(format!("Failed to read friendship: {}", e)))?,
            );
        }

        Ok(records)
    }

    // ========================================================================
    // CONVERSATION OPERATIONS
    // ========================================================================

    /// Insert a conversation row unless one already exists for the pair
    ///
    /// Returns true if this call created the row. With the deterministic id,
    /// concurrent get-or-create calls for the same pair land on the same row;
    /// the loser's insert is ignored and it reads the winner's row afterwards.
    pub fn insert_conversation_if_absent(
        &self,
        id: &str,
        pair: &UserPair,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO conversations (id, user_low, user_high, created_at)
                 VALUES (?, ?, ?, ?)",
                params![id, pair.low(), pair.high(), now],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert conversation: {}", e)))?;

        Ok(rows > 0)
    }

    /// Get a conversation by id
    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT id, user_low, user_high, created_at, last_message_at, hidden_by_low, hidden_by_high
             FROM conversations WHERE id = ?",
            params![id],
            Self::conversation_from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get conversation: {}", e))),
        }
    }

    /// Get the conversation for a canonical pair, if any
    pub fn get_conversation_by_pair(&self, pair: &UserPair) -> Result<Option<ConversationRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT id, user_low, user_high, created_at, last_message_at, hidden_by_low, hidden_by_high
             FROM conversations WHERE user_low = ? AND user_high = ?",
            params![pair.low(), pair.high()],
            Self::conversation_from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get conversation: {}", e))),
        }
    }

    /// Get the inbox view for a user: every conversation they participate in
    /// and haven't hidden, with the latest message content and their unread
    /// count, sorted by most recent activity
    pub fn get_conversation_summaries_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummaryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.user_low, c.user_high, c.created_at, c.last_message_at,
                        (SELECT m.content FROM messages m
                          WHERE m.conversation_id = c.id
                          ORDER BY m.created_at DESC, m.seq DESC LIMIT 1),
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.conversation_id = c.id AND m.read = 0 AND m.sender_id != ?1)
                 FROM conversations c
                 WHERE (c.user_low = ?1 AND c.hidden_by_low = 0)
                    OR (c.user_high = ?1 AND c.hidden_by_high = 0)
                 ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(ConversationSummaryRecord {
                    id: row.get(0)?,
                    user_low: row.get(1)?,
                    user_high: row.get(2)?,
                    created_at: row.get(3)?,
                    last_message_at: row.get(4)?,
                    last_message: row.get(5)?,
                    unread_count: row.get(6)?,
                })
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query conversations: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::DatabaseError(format!("Failed to read conversation: {}", e)))?,
            );
        }

        Ok(records)
    }

    /// Set one side's hide flag on a conversation
    pub fn set_conversation_hidden(&self, id: &str, user_is_low: bool, hidden: bool) -> Result<()> {
        let conn = self.conn.lock();

        // Column names can't be bound as parameters
        let sql = if user_is_low {
            "UPDATE conversations SET hidden_by_low = ? WHERE id = ?"
        } else {
            "UPDATE conversations SET hidden_by_high = ? WHERE id = ?"
        };

        conn.execute(sql, params![hidden, id])
            .map_err(|e| Error::DatabaseError(format!("Failed to update conversation: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // MESSAGE OPERATIONS
    // ========================================================================

    /// Store a message and touch its conversation
    ///
    /// Bumps the conversation's `last_message_at` and clears both hide flags
    /// in the same transaction as the insert, so the message row and the
    /// conversation touch commit or roll back together. A failed touch never
    /// strands a message row for the caller to duplicate on retry. Returns
    /// the assigned insertion sequence.
    pub fn store_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        created_at: i64,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![id, conversation_id, sender_id, content, created_at],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store message: {}", e)))?;

        let seq = tx.last_insert_rowid();

        // Update conversation activity and resurface it for both sides
        tx.execute(
            "UPDATE conversations
             SET last_message_at = ?, hidden_by_low = 0, hidden_by_high = 0
             WHERE id = ?",
            params![created_at, conversation_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to update conversation: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit message: {}", e)))?;

        Ok(seq)
    }

    /// Get a single message by its public id
    pub fn get_message(&self, id: &str) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT seq, id, conversation_id, sender_id, content, created_at, read
             FROM messages WHERE id = ?",
            params![id],
            Self::message_from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get message: {}", e))),
        }
    }

    /// Get one page of a conversation's messages in chronological order
    ///
    /// Ordering is `(created_at, seq)` ascending; `seq` breaks same-
    /// millisecond ties in insertion order. `after` is the position of the
    /// last message of the previous page; None starts from the beginning.
    pub fn get_messages_page(
        &self,
        conversation_id: &str,
        after: Option<(i64, i64)>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock();

        let mut records = Vec::new();
        match after {
            Some((created_at, seq)) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT seq, id, conversation_id, sender_id, content, created_at, read
                         FROM messages
                         WHERE conversation_id = ?1
                           AND (created_at > ?2 OR (created_at = ?2 AND seq > ?3))
                         ORDER BY created_at ASC, seq ASC LIMIT ?4",
                    )
                    .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

                let rows = stmt
                    .query_map(
                        params![conversation_id, created_at, seq, limit as i64],
                        Self::message_from_row,
                    )
                    .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

                for row in rows {
                    records.push(row.map_err(|e| {
                        Error::DatabaseError(format!("Failed to read message: {}", e))
                    })?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT seq, id, conversation_id, sender_id, content, created_at, read
                         FROM messages WHERE conversation_id = ?
                         ORDER BY created_at ASC, seq ASC LIMIT ?",
                    )
                    .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

                let rows = stmt
                    .query_map(params![conversation_id, limit as i64], Self::message_from_row)
                    .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

                for row in rows {
                    records.push(row.map_err(|e| {
                        Error::DatabaseError(format!("Failed to read message: {}", e))
                    })?);
                }
            }
        }

        Ok(records)
    }

    /// Count unread messages addressed to a user across all their
    /// conversations
    pub fn count_unread_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock();

        let count = conn
            .query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN conversations c ON c.id = m.conversation_id
                 WHERE m.read = 0
                   AND m.sender_id != ?1
                   AND (c.user_low = ?1 OR c.user_high = ?1)",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to count unread: {}", e)))?;

        Ok(count)
    }

    /// Mark a message as read
    ///
    /// Returns true if this call flipped the flag; false if it was already
    /// read (the guard makes repeats no-ops).
    pub fn mark_message_read(&self, message_id: &str) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "UPDATE messages SET read = 1 WHERE id = ? AND read = 0",
                params![message_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to mark read: {}", e)))?;

        Ok(rows > 0)
    }

    /// Mark every unread message addressed to a user as read
    ///
    /// One UPDATE statement, so it is atomic with respect to concurrent
    /// appends: rows committed before it are all covered, rows committed
    /// after it stay unread. Returns how many rows were flipped.
    pub fn mark_all_read_for_user(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock();

        let rows = conn
            .execute(
                "UPDATE messages SET read = 1
                 WHERE read = 0
                   AND sender_id != ?1
                   AND conversation_id IN
                       (SELECT id FROM conversations WHERE user_low = ?1 OR user_high = ?1)",
                params![user_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to mark all read: {}", e)))?;

        Ok(rows)
    }

    // ========================================================================
    // ROW MAPPERS
    // ========================================================================

    fn friendship_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendshipRecord> {
        Ok(FriendshipRecord {
            user_low: row.get(0)?,
            user_high: row.get(1)?,
            status: row.get(2)?,
            requested_by: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
        Ok(ConversationRecord {
            id: row.get(0)?,
            user_low: row.get(1)?,
            user_high: row.get(2)?,
            created_at: row.get(3)?,
            last_message_at: row.get(4)?,
            hidden_by_low: row.get(5)?,
            hidden_by_high: row.get(6)?,
        })
    }

    fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
        Ok(MessageRecord {
            seq: row.get(0)?,
            id: row.get(1)?,
            conversation_id: row.get(2)?,
            sender_id: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
            read: row.get(6)?,
        })
    }
}

// ============================================================================
// RECORD TYPES
// ============================================================================

/// A friendship row from the database
#[derive(Debug, Clone)]
pub struct FriendshipRecord {
    /// Lexicographically smaller user id
    pub user_low: String,
    /// Lexicographically larger user id
    pub user_high: String,
    /// Lifecycle state ('pending', 'accepted', 'blocked')
    pub status: String,
    /// Who initiated the current state
    pub requested_by: String,
    /// Created timestamp
    pub created_at: i64,
    /// Last transition timestamp
    pub updated_at: i64,
}

/// A conversation row from the database
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    /// Deterministic pair digest
    pub id: String,
    /// Lexicographically smaller participant
    pub user_low: String,
    /// Lexicographically larger participant
    pub user_high: String,
    /// Created timestamp
    pub created_at: i64,
    /// Last message timestamp (None until the first message)
    pub last_message_at: Option<i64>,
    /// Hidden from the low participant's inbox?
    pub hidden_by_low: bool,
    /// Hidden from the high participant's inbox?
    pub hidden_by_high: bool,
}

/// A message row from the database
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Insertion sequence (tie-breaker within a conversation)
    pub seq: i64,
    /// Public message id (UUID)
    pub id: String,
    /// Conversation id
    pub conversation_id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Plain text content
    pub content: String,
    /// Sent timestamp (ms)
    pub created_at: i64,
    /// Read flag
    pub read: bool,
}

/// One row of a user's inbox view
#[derive(Debug, Clone)]
pub struct ConversationSummaryRecord {
    /// Conversation id
    pub id: String,
    /// Lexicographically smaller participant
    pub user_low: String,
    /// Lexicographically larger participant
    pub user_high: String,
    /// Created timestamp
    pub created_at: i64,
    /// Last message timestamp
    pub last_message_at: Option<i64>,
    /// Content of the latest message, if any
    pub last_message: Option<String>,
    /// Unread messages addressed to the queried user
    pub unread_count: i64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> UserPair {
        UserPair::new(a, b).unwrap()
    }

    #[tokio::test]
    async fn test_database_creation() {
        let db = Database::open(None).await.unwrap();
        assert!(db.get_friendships_for_user("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_friendship_roundtrip() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");

        db.insert_friendship(&p, "pending", "alice", 1000).unwrap();

        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.user_low, "alice");
        assert_eq!(record.user_high, "bob");
        assert_eq!(record.status, "pending");
        assert_eq!(record.requested_by, "alice");

        assert!(db
            .update_friendship_status(&p, "pending", "alice", "accepted", 2000)
            .unwrap());
        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.status, "accepted");
        assert_eq!(record.updated_at, 2000);

        // Compare-and-set: the row is no longer pending
        assert!(!db
            .update_friendship_status(&p, "pending", "alice", "blocked", 3000)
            .unwrap());

        assert!(db.delete_friendship(&p, "accepted", "alice").unwrap());
        assert!(db.get_friendship(&p).unwrap().is_none());
        assert!(!db.delete_friendship(&p, "accepted", "alice").unwrap());
    }

    #[tokio::test]
    async fn test_update_requires_matching_initiator() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");

        // Bob validated alice's request, then alice cancelled and bob's own
        // request took the row's place before bob's accept landed
        db.insert_friendship(&p, "pending", "alice", 1000).unwrap();
        assert!(db.delete_friendship(&p, "pending", "alice").unwrap());
        db.insert_friendship(&p, "pending", "bob", 2000).unwrap();

        // The stale accept names alice as initiator; the replacement row
        // does not match, so bob cannot accept his own request
        assert!(!db
            .update_friendship_status(&p, "pending", "alice", "accepted", 3000)
            .unwrap());

        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.status, "pending");
        assert_eq!(record.requested_by, "bob");
    }

    #[tokio::test]
    async fn test_delete_requires_matching_initiator() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");

        // Alice's cancel raced with a reject plus a fresh request from bob
        db.insert_friendship(&p, "pending", "alice", 1000).unwrap();
        assert!(db.delete_friendship(&p, "pending", "alice").unwrap());
        db.insert_friendship(&p, "pending", "bob", 2000).unwrap();

        // Bob's request is not alice's to cancel
        assert!(!db.delete_friendship(&p, "pending", "alice").unwrap());

        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.requested_by, "bob");
    }

    #[tokio::test]
    async fn test_duplicate_friendship_rejected() {
        let db = Database::open(None).await.unwrap();

        db.insert_friendship(&pair("alice", "bob"), "pending", "alice", 1000)
            .unwrap();

        // Same pair, either argument order, any status: the key is the pair
        let result = db.insert_friendship(&pair("bob", "alice"), "pending", "bob", 2000);
        assert!(matches!(result, Err(Error::FriendshipExists)));
    }

    #[tokio::test]
    async fn test_block_overwrites_state_once() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");

        db.insert_friendship(&p, "pending", "alice", 1000).unwrap();
        db.upsert_blocked_friendship(&p, "blocked", "bob", 2000)
            .unwrap();

        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.status, "blocked");
        assert_eq!(record.requested_by, "bob");
        // Original creation time survives the overwrite
        assert_eq!(record.created_at, 1000);
        assert_eq!(record.updated_at, 2000);

        // A second block does not steal the blocker slot
        db.upsert_blocked_friendship(&p, "blocked", "alice", 3000)
            .unwrap();
        let record = db.get_friendship(&p).unwrap().unwrap();
        assert_eq!(record.requested_by, "bob");
        assert_eq!(record.updated_at, 2000);
    }

    #[tokio::test]
    async fn test_conversation_insert_if_absent() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");

        assert!(db.insert_conversation_if_absent("conv-1", &p, 1000).unwrap());
        assert!(!db.insert_conversation_if_absent("conv-1", &p, 2000).unwrap());

        let record = db.get_conversation_by_pair(&p).unwrap().unwrap();
        assert_eq!(record.id, "conv-1");
        assert_eq!(record.created_at, 1000);
        assert!(record.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_message_operations() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");
        db.insert_conversation_if_absent("conv-1", &p, 1000).unwrap();

        // Same timestamp: seq must keep insertion order
        let seq1 = db
            .store_message("m1", "conv-1", "alice", "first", 5000)
            .unwrap();
        let seq2 = db
            .store_message("m2", "conv-1", "alice", "second", 5000)
            .unwrap();
        assert!(seq2 > seq1);

        let page = db.get_messages_page("conv-1", None, 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "m1");
        assert_eq!(page[1].id, "m2");

        // Cursor resumes after the first message
        let rest = db
            .get_messages_page("conv-1", Some((page[0].created_at, page[0].seq)), 10)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "m2");

        // Appending touched the conversation
        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert_eq!(conv.last_message_at, Some(5000));
    }

    #[tokio::test]
    async fn test_hidden_flags_cleared_by_message() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");
        db.insert_conversation_if_absent("conv-1", &p, 1000).unwrap();

        db.set_conversation_hidden("conv-1", true, true).unwrap();
        db.set_conversation_hidden("conv-1", false, true).unwrap();
        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert!(conv.hidden_by_low);
        assert!(conv.hidden_by_high);

        db.store_message("m1", "conv-1", "bob", "hello again", 2000)
            .unwrap();
        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert!(!conv.hidden_by_low);
        assert!(!conv.hidden_by_high);
    }

    #[tokio::test]
    async fn test_store_message_rolls_back_as_a_unit() {
        let db = Database::open(None).await.unwrap();
        let p = pair("alice", "bob");
        db.insert_conversation_if_absent("conv-1", &p, 1000).unwrap();

        // Make the conversation touch fail after the message insert succeeds
        {
            let conn = db.conn.lock();
            conn.execute_batch(
                "CREATE TRIGGER conversations_frozen BEFORE UPDATE ON conversations
                 BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
            )
            .unwrap();
        }

        let result = db.store_message("m1", "conv-1", "alice", "hello", 2000);
        assert!(result.is_err());

        // The message insert must not survive the failed touch; a retry
        // after this error starts from a clean slate
        let count: i64 = {
            let conn = db.conn.lock();
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(count, 0);
        let conv = db.get_conversation("conv-1").unwrap().unwrap();
        assert!(conv.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_unread_counting_and_mark_all() {
        let db = Database::open(None).await.unwrap();
        db.insert_conversation_if_absent("conv-ab", &pair("alice", "bob"), 1000)
            .unwrap();
        db.insert_conversation_if_absent("conv-ac", &pair("alice", "carol"), 1000)
            .unwrap();

        // Two addressed to alice, one sent by alice
        db.store_message("m1", "conv-ab", "bob", "hi", 2000).unwrap();
        db.store_message("m2", "conv-ac", "carol", "hello", 3000).unwrap();
        db.store_message("m3", "conv-ab", "alice", "hey", 4000).unwrap();

        assert_eq!(db.count_unread_for_user("alice").unwrap(), 2);
        assert_eq!(db.count_unread_for_user("bob").unwrap(), 1);

        let flipped = db.mark_all_read_for_user("alice").unwrap();
        assert_eq!(flipped, 2);
        assert_eq!(db.count_unread_for_user("alice").unwrap(), 0);
        // Alice's own message to bob is untouched
        assert_eq!(db.count_unread_for_user("bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_guarded() {
        let db = Database::open(None).await.unwrap();
        db.insert_conversation_if_absent("conv-1", &pair("alice", "bob"), 1000)
            .unwrap();
        db.store_message("m1", "conv-1", "bob", "hi", 2000).unwrap();

        assert!(db.mark_message_read("m1").unwrap());
        assert!(!db.mark_message_read("m1").unwrap());
        assert!(!db.mark_message_read("missing").unwrap());
    }

    #[tokio::test]
    async fn test_summaries_filter_hidden_and_count_unread() {
        let db = Database::open(None).await.unwrap();
        db.insert_conversation_if_absent("conv-ab", &pair("alice", "bob"), 1000)
            .unwrap();
        db.insert_conversation_if_absent("conv-ac", &pair("alice", "carol"), 1500)
            .unwrap();
        db.store_message("m1", "conv-ab", "bob", "hi alice", 2000).unwrap();

        let summaries = db.get_conversation_summaries_for_user("alice").unwrap();
        assert_eq!(summaries.len(), 2);
        // Active conversation sorts first, empty one last
        assert_eq!(summaries[0].id, "conv-ab");
        assert_eq!(summaries[0].unread_count, 1);
        assert_eq!(summaries[0].last_message.as_deref(), Some("hi alice"));
        assert_eq!(summaries[1].id, "conv-ac");
        assert_eq!(summaries[1].unread_count, 0);
        assert!(summaries[1].last_message.is_none());

        // Hiding removes it from alice's view only
        db.set_conversation_hidden("conv-ab", true, true).unwrap();
        let summaries = db.get_conversation_summaries_for_user("alice").unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "conv-ac");
        let bobs = db.get_conversation_summaries_for_user("bob").unwrap();
        assert_eq!(bobs.len(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encore.db");
        let path_str = path.to_str().unwrap();

        {
            let db = Database::open(Some(path_str)).await.unwrap();
            db.insert_friendship(&pair("alice", "bob"), "accepted", "alice", 1000)
                .unwrap();
        }

        let db = Database::open(Some(path_str)).await.unwrap();
        let record = db.get_friendship(&pair("alice", "bob")).unwrap().unwrap();
        assert_eq!(record.status, "accepted");
    }
}
