//! # Storage Module
//!
//! Local persistence for the social connection core.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │  SQLite Database                                                │    │
//! │  │  ───────────────                                                │    │
//! │  │                                                                 │    │
//! │  │  Tables:                                                        │    │
//! │  │  • friendships - One row per canonical user pair               │    │
//! │  │  • conversations - Registry keyed by pair digest               │    │
//! │  │  • messages - Append-only ordered log with read flags          │    │
//! │  │                                                                 │    │
//! │  │  The pair-keyed uniqueness constraints are the arbitration     │    │
//! │  │  point for concurrent creation: racing inserts for {A,B} and   │    │
//! │  │  {B,A} collapse onto the same key, so duplicates cannot exist  │    │
//! │  │  no matter how calls interleave.                               │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod schema;

pub use database::{
    ConversationRecord, ConversationSummaryRecord, Database, FriendshipRecord, MessageRecord,
};

use crate::error::Result;

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Path to the database file (None for in-memory)
    pub database_path: Option<String>,
}

/// Initialize the storage system
pub async fn init(config: StorageConfig) -> Result<Database> {
    Database::open(config.database_path.as_deref()).await
}
