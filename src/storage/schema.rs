//! # Database Schema
//!
//! SQL schema definitions for the Encore social connection database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │   friendships   │    │  conversations  │      │    messages     │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ user_low     ┐PK│    │ id (digest)     │◄─────│ conversation_id │    │
//! │  │ user_high    ┘  │    │ user_low    ┐UQ │      │ seq             │    │
//! │  │ status          │    │ user_high   ┘   │      │ id              │    │
//! │  │ requested_by    │    │ created_at      │      │ sender_id       │    │
//! │  │ created_at      │    │ last_message_at │      │ content         │    │
//! │  │ updated_at      │    │ hidden_by_low   │      │ created_at      │    │
//! │  └─────────────────┘    │ hidden_by_high  │      │ read            │    │
//! │                         └─────────────────┘      └─────────────────┘    │
//! │                                                                         │
//! │  Both pair-keyed tables store the unordered user pair in canonical      │
//! │  (user_low, user_high) order with a CHECK enforcing it, so the          │
//! │  uniqueness constraints themselves arbitrate concurrent creation        │
//! │  races — there is never a second row for the reversed pair.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Friendships table
-- One row per unordered user pair, in canonical (low, high) order.
-- The primary key is the only duplicate-prevention mechanism needed:
-- a racing insert for the same pair (in either argument order) hits
-- the same key and fails with a constraint violation.
CREATE TABLE IF NOT EXISTS friendships (
    -- Lexicographically smaller user id
    user_low TEXT NOT NULL,
    -- Lexicographically larger user id
    user_high TEXT NOT NULL,
    -- Lifecycle state of the relationship
    status TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'blocked')),
    -- Who initiated: the requester for pending/accepted, the blocker for blocked
    requested_by TEXT NOT NULL,
    -- When the row was created
    created_at INTEGER NOT NULL,
    -- Last state transition
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (user_low, user_high),
    CONSTRAINT pair_ordered CHECK (user_low < user_high),
    CONSTRAINT initiator_in_pair CHECK (requested_by IN (user_low, user_high))
);
CREATE INDEX IF NOT EXISTS idx_friendships_high ON friendships(user_high);
CREATE INDEX IF NOT EXISTS idx_friendships_status ON friendships(status);

-- Conversations table
-- One row per unordered user pair. The id is a deterministic digest of the
-- canonical pair, so both participants independently derive the same id and
-- a concurrent get-or-create race collapses onto one row.
CREATE TABLE IF NOT EXISTS conversations (
    -- Deterministic digest of (user_low, user_high)
    id TEXT PRIMARY KEY,
    -- Lexicographically smaller participant
    user_low TEXT NOT NULL,
    -- Lexicographically larger participant
    user_high TEXT NOT NULL,
    -- When the conversation was created
    created_at INTEGER NOT NULL,
    -- Last message timestamp (for inbox sorting; NULL until first message)
    last_message_at INTEGER,
    -- Per-side hide flags; cleared when a new message arrives
    hidden_by_low INTEGER NOT NULL DEFAULT 0,
    hidden_by_high INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT pair_unique UNIQUE (user_low, user_high),
    CONSTRAINT pair_ordered CHECK (user_low < user_high)
);
CREATE INDEX IF NOT EXISTS idx_conversations_high ON conversations(user_high);
CREATE INDEX IF NOT EXISTS idx_conversations_last_message ON conversations(last_message_at DESC);

-- Messages table
-- Append-only log. seq is the insertion order within the whole store and
-- breaks created_at ties, giving every conversation a total order on
-- (created_at, seq). Messages are never updated except the read flag.
CREATE TABLE IF NOT EXISTS messages (
    -- Monotonic insertion sequence (also the pagination tie-breaker)
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    -- Stable public id (UUID)
    id TEXT NOT NULL UNIQUE,
    -- Which conversation this belongs to
    conversation_id TEXT NOT NULL,
    -- Which participant sent it
    sender_id TEXT NOT NULL,
    -- Plain text content
    content TEXT NOT NULL,
    -- When the message was sent (Unix timestamp ms)
    created_at INTEGER NOT NULL,
    -- Has the recipient read this?
    read INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, seq);
CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(conversation_id, sender_id) WHERE read = 0;
"#;

/// Migration SQL from schema version 1 → 2
///
/// Adds the per-side conversation hide flags (hide-from-inbox support).
pub const MIGRATE_V1_TO_V2: &str = r#"
-- Per-side hide flags on conversations
ALTER TABLE conversations ADD COLUMN hidden_by_low INTEGER NOT NULL DEFAULT 0;
ALTER TABLE conversations ADD COLUMN hidden_by_high INTEGER NOT NULL DEFAULT 0;

-- Update schema version
UPDATE schema_version SET version = 2;
"#;

/// SQL to drop all tables (for testing/reset)
pub const DROP_TABLES: &str = r#"
DROP TABLE IF EXISTS messages;
DROP TABLE IF EXISTS conversations;
DROP TABLE IF EXISTS friendships;
DROP TABLE IF EXISTS schema_version;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        // Applying again must be a no-op (everything is IF NOT EXISTS)
        conn.execute_batch(CREATE_TABLES).unwrap();
        conn.execute_batch(DROP_TABLES).unwrap();
    }

    #[test]
    fn test_friendships_reject_unordered_pair() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        let result = conn.execute(
            "INSERT INTO friendships (user_low, user_high, status, requested_by, created_at, updated_at)
             VALUES ('zoe', 'amy', 'pending', 'zoe', 0, 0)",
            [],
        );
        assert!(result.is_err(), "CHECK (user_low < user_high) should fire");
    }

    #[test]
    fn test_friendships_reject_foreign_initiator() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        let result = conn.execute(
            "INSERT INTO friendships (user_low, user_high, status, requested_by, created_at, updated_at)
             VALUES ('amy', 'zoe', 'pending', 'carol', 0, 0)",
            [],
        );
        assert!(result.is_err(), "requested_by must be one of the pair");
    }
}
