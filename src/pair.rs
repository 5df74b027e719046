//! # Canonical User Pair
//!
//! Friendships and conversations are keyed by an *unordered* pair of user
//! ids: `{A, B}` and `{B, A}` name the same relationship. [`UserPair`] is the
//! single place that normalization happens. Construction sorts the two ids
//! into `(low, high)` lexicographic order and rejects self-pairs, so every
//! lookup and every storage uniqueness constraint operates on one canonical
//! form. Querying each direction independently (the classic
//! `WHERE a = ? OR b = ?` mistake) is never necessary for pair identity.

use crate::error::{Error, Result};

/// An unordered pair of user ids in canonical `(low, high)` form.
///
/// Invariant: `low < high` (lexicographic), established at construction and
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPair {
    low: String,
    high: String,
}

impl UserPair {
    /// Create a canonical pair from two user ids, in either order.
    ///
    /// Returns [`Error::SelfPair`] if both ids are the same user.
    pub fn new(a: &str, b: &str) -> Result<Self> {
        if a == b {
            return Err(Error::SelfPair);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    /// The lexicographically smaller member.
    pub fn low(&self) -> &str {
        &self.low
    }

    /// The lexicographically larger member.
    pub fn high(&self) -> &str {
        &self.high
    }

    /// Whether `user_id` is one of the two members.
    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The other member of the pair, if `user_id` is a member.
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if user_id == self.low {
            Some(&self.high)
        } else if user_id == self.high {
            Some(&self.low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_ids_lexicographically() {
        let pair = UserPair::new("zoe", "amy").unwrap();
        assert_eq!(pair.low(), "amy");
        assert_eq!(pair.high(), "zoe");
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let forward = UserPair::new("alice", "bob").unwrap();
        let reversed = UserPair::new("bob", "alice").unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_rejects_self_pair() {
        let result = UserPair::new("alice", "alice");
        assert!(matches!(result, Err(Error::SelfPair)));
    }

    #[test]
    fn test_contains_and_other() {
        let pair = UserPair::new("alice", "bob").unwrap();
        assert!(pair.contains("alice"));
        assert!(pair.contains("bob"));
        assert!(!pair.contains("carol"));

        assert_eq!(pair.other("alice"), Some("bob"));
        assert_eq!(pair.other("bob"), Some("alice"));
        assert_eq!(pair.other("carol"), None);
    }
}
