//! # Error Handling
//!
//! This module provides comprehensive error types for Encore Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                      │
//! │  │                                                                      │
//! │  ├── Validation Errors                                                  │
//! │  │   ├── SelfPair              - Both sides of a pair are the same user │
//! │  │   ├── EmptyMessage          - Message content is empty/whitespace    │
//! │  │   ├── InvalidCursor         - Pagination cursor cannot be decoded    │
//! │  │   └── MessageTooLarge       - Message content exceeds the size cap   │
//! │  │                                                                      │
//! │  ├── Friendship Errors                                                  │
//! │  │   ├── FriendshipExists      - Pair already has a relationship row    │
//! │  │   ├── FriendshipNotFound    - Pair has no relationship row           │
//! │  │   ├── RequestNotFound       - No pending request for the pair        │
//! │  │   ├── NotRequestRecipient   - Responder initiated the request        │
//! │  │   ├── NotRequestInitiator   - Canceller did not send the request     │
//! │  │   └── NotBlocker            - Caller did not create the block        │
//! │  │                                                                      │
//! │  ├── Conversation Errors                                                │
//! │  │   ├── ConversationNotFound  - Conversation doesn't exist             │
//! │  │   └── NotParticipant        - User is not in the conversation        │
//! │  │                                                                      │
//! │  ├── Message Errors                                                     │
//! │  │   ├── MessageNotFound       - Message doesn't exist                  │
//! │  │   └── NotMessageRecipient   - Only the recipient may mark read       │
//! │  │                                                                      │
//! │  └── Storage Errors                                                     │
//! │      ├── DatabaseError         - SQLite operation failed                │
//! │      └── SerializationError    - Encoding/decoding failed               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Kinds
//!
//! Outer layers (HTTP handlers, RPC bindings) usually don't care which exact
//! variant occurred, only which class of failure it was. [`Error::kind`]
//! collapses every variant into one of five kinds:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           KIND MAPPING                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SelfPair / EmptyMessage / InvalidCursor /                              │
//! │  MessageTooLarge                          ──────►  InvalidRequest       │
//! │                                                                         │
//! │  FriendshipExists                         ──────►  AlreadyExists        │
//! │                                                                         │
//! │  FriendshipNotFound / RequestNotFound /                                 │
//! │  ConversationNotFound / MessageNotFound   ──────►  NotFound             │
//! │                                                                         │
//! │  NotRequestRecipient / NotRequestInitiator /                            │
//! │  NotBlocker / NotParticipant /                                          │
//! │  NotMessageRecipient                      ──────►  Forbidden            │
//! │                                                                         │
//! │  DatabaseError / SerializationError       ──────►  Storage              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for Encore Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Encore Core
///
/// All errors are categorized by module/domain to make error handling
/// clearer and to provide meaningful error messages to users.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation Errors (100-199)
    // ========================================================================

    /// Both sides of a user pair are the same identity
    #[error("Operation requires two distinct users.")]
    SelfPair,

    /// Message content is empty or whitespace-only
    #[error("Message content cannot be empty.")]
    EmptyMessage,

    /// Pagination cursor could not be decoded
    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),

    /// Message content exceeds the maximum allowed size
    #[error("Message content is too large: {0} bytes.")]
    MessageTooLarge(usize),

    // ========================================================================
    // Friendship Errors (200-299)
    // ========================================================================

    /// A relationship row already exists for this pair
    #[error("A relationship already exists between these users.")]
    FriendshipExists,

    /// No relationship row exists for this pair
    #[error("No friendship exists between these users.")]
    FriendshipNotFound,

    /// No pending request exists for this pair
    #[error("No pending friend request exists between these users.")]
    RequestNotFound,

    /// The responder is the one who sent the request
    #[error("Only the recipient of a friend request can respond to it.")]
    NotRequestRecipient,

    /// The canceller is not the one who sent the request
    #[error("Only the sender of a friend request can cancel it.")]
    NotRequestInitiator,

    /// The caller is not the user who created the block
    #[error("Only the user who created a block can remove it.")]
    NotBlocker,

    // ========================================================================
    // Conversation Errors (300-399)
    // ========================================================================

    /// Conversation not found
    #[error("Conversation not found.")]
    ConversationNotFound,

    /// User is not a participant in the conversation
    #[error("User is not a participant in this conversation.")]
    NotParticipant,

    // ========================================================================
    // Message Errors (400-499)
    // ========================================================================

    /// Message not found
    #[error("Message not found.")]
    MessageNotFound,

    /// Only the recipient of a message may mark it as read
    #[error("Only the recipient of a message can mark it as read.")]
    NotMessageRecipient,

    // ========================================================================
    // Storage Errors (500-599)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Coarse classification of an [`Error`], for API layers
///
/// Maps one-to-one onto the usual HTTP-ish failure classes so an embedding
/// application can translate errors without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed (bad arguments, empty content)
    InvalidRequest,
    /// The thing being created already exists
    AlreadyExists,
    /// The thing being operated on does not exist
    NotFound,
    /// The caller exists but is not allowed to perform this operation
    Forbidden,
    /// The storage layer failed; the operation may succeed on retry
    Storage,
}

impl ErrorKind {
    /// String form, for logging and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage",
        }
    }
}

impl Error {
    /// Get the stable numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Validation
    /// - 200-299: Friendship
    /// - 300-399: Conversation
    /// - 400-499: Message
    /// - 500-599: Storage
    pub fn code(&self) -> i32 {
        match self {
            // Validation (100-199)
            Error::SelfPair => 100,
            Error::EmptyMessage => 101,
            Error::InvalidCursor(_) => 102,
            Error::MessageTooLarge(_) => 103,

            // Friendship (200-299)
            Error::FriendshipExists => 200,
            Error::FriendshipNotFound => 201,
            Error::RequestNotFound => 202,
            Error::NotRequestRecipient => 203,
            Error::NotRequestInitiator => 204,
            Error::NotBlocker => 205,

            // Conversation (300-399)
            Error::ConversationNotFound => 300,
            Error::NotParticipant => 301,

            // Message (400-499)
            Error::MessageNotFound => 400,
            Error::NotMessageRecipient => 401,

            // Storage (500-599)
            Error::DatabaseError(_) => 500,
            Error::SerializationError(_) => 501,
        }
    }

    /// Classify this error into a coarse [`ErrorKind`]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SelfPair
            | Error::EmptyMessage
            | Error::InvalidCursor(_)
            | Error::MessageTooLarge(_) => ErrorKind::InvalidRequest,

            Error::FriendshipExists => ErrorKind::AlreadyExists,

            Error::FriendshipNotFound
            | Error::RequestNotFound
            | Error::ConversationNotFound
            | Error::MessageNotFound => ErrorKind::NotFound,

            Error::NotRequestRecipient
            | Error::NotRequestInitiator
            | Error::NotBlocker
            | Error::NotParticipant
            | Error::NotMessageRecipient => ErrorKind::Forbidden,

            Error::DatabaseError(_) | Error::SerializationError(_) => ErrorKind::Storage,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying. Contract
    /// violations (wrong caller, missing row, bad input) are not: retrying
    /// the same call yields the same result.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SelfPair.code(), 100);
        assert_eq!(Error::MessageTooLarge(70_000).code(), 103);
        assert_eq!(Error::FriendshipExists.code(), 200);
        assert_eq!(Error::NotBlocker.code(), 205);
        assert_eq!(Error::ConversationNotFound.code(), 300);
        assert_eq!(Error::MessageNotFound.code(), 400);
        assert_eq!(Error::DatabaseError("test".into()).code(), 500);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::SelfPair.kind(), ErrorKind::InvalidRequest);
        assert_eq!(Error::EmptyMessage.kind(), ErrorKind::InvalidRequest);
        assert_eq!(Error::FriendshipExists.kind(), ErrorKind::AlreadyExists);
        assert_eq!(Error::RequestNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(Error::ConversationNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(Error::NotRequestRecipient.kind(), ErrorKind::Forbidden);
        assert_eq!(Error::NotParticipant.kind(), ErrorKind::Forbidden);
        assert_eq!(Error::DatabaseError("x".into()).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::DatabaseError("locked".into()).is_recoverable());
        assert!(!Error::SelfPair.is_recoverable());
        assert!(!Error::FriendshipExists.is_recoverable());
        assert!(!Error::NotParticipant.is_recoverable());
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(ErrorKind::InvalidRequest.as_str(), "invalid_request");
        assert_eq!(ErrorKind::AlreadyExists.as_str(), "already_exists");
        assert_eq!(ErrorKind::Forbidden.as_str(), "forbidden");
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::DatabaseError(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
