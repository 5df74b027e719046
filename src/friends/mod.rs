//! # Friends Module
//!
//! Friendship lifecycle management: requests, acceptance, rejection,
//! cancellation, removal, and blocking.
//!
//! ## Friendship State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     FRIENDSHIP STATE MACHINE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  There is at most ONE row per unordered user pair. Its state, viewed    │
//! │  from either side:                                                      │
//! │                                                                         │
//! │                    request (initiator)                                  │
//! │       ┌─────────┐ ───────────────────► ┌─────────┐                      │
//! │       │  none   │                      │ pending │                      │
//! │       └─────────┘ ◄─────────────────── └────┬────┘                      │
//! │            ▲        reject (recipient)      │                           │
//! │            │        cancel (initiator)      │ accept (recipient)        │
//! │            │                                ▼                           │
//! │            │        remove (either)    ┌──────────┐                     │
//! │            └────────────────────────── │ accepted │                     │
//! │            │                           └──────────┘                     │
//! │            │                                                            │
//! │            │        unblock (blocker)  ┌──────────┐                     │
//! │            └────────────────────────── │ blocked  │ ◄── block (any      │
//! │                                        └──────────┘      state, by      │
//! │                                                           either side)  │
//! │                                                                         │
//! │  blocked suppresses new requests for the pair; the block is owned by    │
//! │  whoever created it and only they can lift it.                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RACE ARBITRATION                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  request(A,B) and request(B,A) normalize to the same canonical pair     │
//! │  and race on one primary-key insert: exactly one wins, the loser        │
//! │  gets FriendshipExists. Transitions use compare-and-set on the stored   │
//! │  status, so a respond racing a cancel (or a block racing anything)      │
//! │  resolves to a single survivor instead of corrupting the row.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bus::DeliveryBus;
use crate::error::{Error, Result};
use crate::pair::UserPair;
use crate::storage::{Database, FriendshipRecord};

/// Lifecycle state of the single row kept per user pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipState {
    /// Request sent, waiting for the recipient
    Pending,
    /// Both sides confirmed
    Accepted,
    /// One side blocked the pair
    Blocked,
}

impl FriendshipState {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipState::Pending => "pending",
            FriendshipState::Accepted => "accepted",
            FriendshipState::Blocked => "blocked",
        }
    }

    /// Parse from database string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipState::Pending),
            "accepted" => Some(FriendshipState::Accepted),
            "blocked" => Some(FriendshipState::Blocked),
            _ => None,
        }
    }
}

/// A friendship as one specific viewer sees it
///
/// The stored state is symmetric; the viewer-relative reading distinguishes
/// which side of a pending request you are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    /// No relationship row exists
    None,
    /// The viewer sent a request that is still pending
    PendingSent,
    /// The viewer received a request that is still pending
    PendingReceived,
    /// The pair are friends
    Accepted,
    /// The pair is blocked
    Blocked,
}

/// The relationship record for one user pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    /// Lexicographically smaller user id
    pub user_low: String,
    /// Lexicographically larger user id
    pub user_high: String,
    /// Lifecycle state
    pub state: FriendshipState,
    /// Who initiated the current state (requester, or blocker when blocked)
    pub requested_by: String,
    /// When the row was created
    pub created_at: i64,
    /// Last state transition
    pub updated_at: i64,
}

impl Friendship {
    fn from_record(record: FriendshipRecord) -> Result<Self> {
        let state = FriendshipState::parse(&record.status).ok_or_else(|| {
            Error::DatabaseError(format!("Unknown friendship status: {}", record.status))
        })?;
        Ok(Self {
            user_low: record.user_low,
            user_high: record.user_high,
            state,
            requested_by: record.requested_by,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Whether `user_id` is one of the two members
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_low == user_id || self.user_high == user_id
    }

    /// The other member of the pair, if `user_id` is a member
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if user_id == self.user_low {
            Some(&self.user_high)
        } else if user_id == self.user_high {
            Some(&self.user_low)
        } else {
            None
        }
    }

    /// How this friendship reads from `viewer`'s side
    pub fn status_for(&self, viewer: &str) -> FriendshipStatus {
        match self.state {
            FriendshipState::Pending => {
                if self.requested_by == viewer {
                    FriendshipStatus::PendingSent
                } else {
                    FriendshipStatus::PendingReceived
                }
            }
            FriendshipState::Accepted => FriendshipStatus::Accepted,
            FriendshipState::Blocked => FriendshipStatus::Blocked,
        }
    }
}

/// Decision on a pending friend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Confirm the friendship
    Accept,
    /// Decline and delete the request
    Reject,
}

/// A friendship state change, published on the delivery bus
///
/// Request-phase events carry the original requester as `from`; the later
/// events carry whoever performed the transition as `by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FriendshipEvent {
    /// A new request was created
    Requested {
        /// Who sent the request
        from: String,
        /// Who it was sent to
        to: String,
        /// When it happened
        at: i64,
    },
    /// The recipient accepted the request
    Accepted {
        /// Who sent the original request
        from: String,
        /// Who accepted it
        to: String,
        /// When it happened
        at: i64,
    },
    /// The recipient rejected the request
    Rejected {
        /// Who sent the original request
        from: String,
        /// Who rejected it
        to: String,
        /// When it happened
        at: i64,
    },
    /// The initiator cancelled the request
    Cancelled {
        /// Who sent, then cancelled, the request
        from: String,
        /// Who would have received it
        to: String,
        /// When it happened
        at: i64,
    },
    /// An accepted friendship was removed
    Removed {
        /// Who performed the removal
        by: String,
        /// The other member of the pair
        other: String,
        /// When it happened
        at: i64,
    },
    /// The pair was blocked
    Blocked {
        /// Who created the block
        by: String,
        /// The blocked user
        other: String,
        /// When it happened
        at: i64,
    },
    /// The block was lifted
    Unblocked {
        /// Who lifted their block
        by: String,
        /// The formerly blocked user
        other: String,
        /// When it happened
        at: i64,
    },
}

/// Service enforcing the friendship state machine
///
/// Every operation takes the acting user explicitly; there is no ambient
/// "current user". State transitions are arbitrated by the storage layer's
/// pair constraints, so concurrent calls from both sides of a pair cannot
/// produce duplicate or contradictory rows.
pub struct FriendshipService {
    /// Database for persistence
    database: Arc<Database>,
    /// Bus for state change notifications
    bus: Arc<DeliveryBus>,
}

impl FriendshipService {
    /// Create a new friendship service
    pub fn new(database: Arc<Database>, bus: Arc<DeliveryBus>) -> Self {
        Self { database, bus }
    }

    /// Send a friend request from `requester` to `target`
    ///
    /// Fails with [`Error::SelfPair`] for a self-request and
    /// [`Error::FriendshipExists`] if any relationship row already exists
    /// for the pair, whatever its state. Under a concurrent request from
    /// the other side, exactly one call wins.
    pub fn request_friendship(&self, requester: &str, target: &str) -> Result<Friendship> {
        let pair = UserPair::new(requester, target)?;
        let now = crate::time::now_timestamp_millis();

        self.database.insert_friendship(
            &pair,
            FriendshipState::Pending.as_str(),
            requester,
            now,
        )?;

        let event = FriendshipEvent::Requested {
            from: requester.to_string(),
            to: target.to_string(),
            at: now,
        };
        self.bus.publish_friendship_event(requester, &event);
        self.bus.publish_friendship_event(target, &event);

        tracing::info!(from = requester, to = target, "Friend request created");

        Ok(Friendship {
            user_low: pair.low().to_string(),
            user_high: pair.high().to_string(),
            state: FriendshipState::Pending,
            requested_by: requester.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Respond to the pending request between `responder` and `other`
    ///
    /// Only the recipient may respond. Accepting updates the row in place
    /// and returns it; rejecting deletes the row (the pair returns to none
    /// and may be re-requested later) and returns None.
    pub fn respond(
        &self,
        responder: &str,
        other: &str,
        decision: RequestDecision,
    ) -> Result<Option<Friendship>> {
        let pair = UserPair::new(responder, other)?;
        let record = self
            .database
            .get_friendship(&pair)?
            .ok_or(Error::RequestNotFound)?;
        let friendship = Friendship::from_record(record)?;

        if friendship.state != FriendshipState::Pending {
            return Err(Error::RequestNotFound);
        }
        if friendship.requested_by == responder {
            return Err(Error::NotRequestRecipient);
        }

        let now = crate::time::now_timestamp_millis();
        match decision {
            RequestDecision::Accept => {
                // The accept commits only against a pending row that `other`
                // initiated; a concurrent cancel, block, or cancel-and-
                // re-request from this side leaves nothing to accept
                let applied = self.database.update_friendship_status(
                    &pair,
                    FriendshipState::Pending.as_str(),
                    other,
                    FriendshipState::Accepted.as_str(),
                    now,
                )?;
                if !applied {
                    return Err(Error::RequestNotFound);
                }

                let event = FriendshipEvent::Accepted {
                    from: friendship.requested_by.clone(),
                    to: responder.to_string(),
                    at: now,
                };
                self.bus.publish_friendship_event(responder, &event);
                self.bus.publish_friendship_event(other, &event);

                tracing::info!(responder = responder, other = other, "Friend request accepted");

                Ok(Some(Friendship {
                    state: FriendshipState::Accepted,
                    updated_at: now,
                    ..friendship
                }))
            }
            RequestDecision::Reject => {
                let applied = self.database.delete_friendship(
                    &pair,
                    FriendshipState::Pending.as_str(),
                    other,
                )?;
                if !applied {
                    return Err(Error::RequestNotFound);
                }

                let event = FriendshipEvent::Rejected {
                    from: friendship.requested_by.clone(),
                    to: responder.to_string(),
                    at: now,
                };
                self.bus.publish_friendship_event(responder, &event);
                self.bus.publish_friendship_event(other, &event);

                tracing::info!(responder = responder, other = other, "Friend request rejected");

                Ok(None)
            }
        }
    }

    /// Cancel a pending request that `caller` previously sent to `other`
    ///
    /// Only the initiator may cancel; the recipient's path is
    /// [`respond`](Self::respond) with [`RequestDecision::Reject`].
    pub fn cancel_request(&self, caller: &str, other: &str) -> Result<()> {
        let pair = UserPair::new(caller, other)?;
        let record = self
            .database
            .get_friendship(&pair)?
            .ok_or(Error::RequestNotFound)?;
        let friendship = Friendship::from_record(record)?;

        if friendship.state != FriendshipState::Pending {
            return Err(Error::RequestNotFound);
        }
        if friendship.requested_by != caller {
            return Err(Error::NotRequestInitiator);
        }

        // Only the caller's own request is theirs to withdraw; a pending row
        // re-created by the other side in the meantime stays put
        let applied =
            self.database
                .delete_friendship(&pair, FriendshipState::Pending.as_str(), caller)?;
        if !applied {
            return Err(Error::RequestNotFound);
        }

        let now = crate::time::now_timestamp_millis();
        let event = FriendshipEvent::Cancelled {
            from: caller.to_string(),
            to: other.to_string(),
            at: now,
        };
        self.bus.publish_friendship_event(caller, &event);
        self.bus.publish_friendship_event(other, &event);

        tracing::info!(from = caller, to = other, "Friend request cancelled");
        Ok(())
    }

    /// Remove an accepted friendship; either party may do this
    pub fn remove_friend(&self, caller: &str, other: &str) -> Result<()> {
        let pair = UserPair::new(caller, other)?;
        let record = self
            .database
            .get_friendship(&pair)?
            .ok_or(Error::FriendshipNotFound)?;
        let friendship = Friendship::from_record(record)?;

        if friendship.state != FriendshipState::Accepted {
            return Err(Error::FriendshipNotFound);
        }

        // Either party may remove, so the guard pins the row version that
        // was validated rather than a particular caller
        let applied = self.database.delete_friendship(
            &pair,
            FriendshipState::Accepted.as_str(),
            &friendship.requested_by,
        )?;
        if !applied {
            return Err(Error::FriendshipNotFound);
        }

        let now = crate::time::now_timestamp_millis();
        let event = FriendshipEvent::Removed {
            by: caller.to_string(),
            other: other.to_string(),
            at: now,
        };
        self.bus.publish_friendship_event(caller, &event);
        self.bus.publish_friendship_event(other, &event);

        tracing::info!(by = caller, other = other, "Friendship removed");
        Ok(())
    }

    /// Block the pair, from whatever state it is in
    ///
    /// Overwrites a pending or accepted row; creates one if none exists.
    /// If the pair is already blocked the existing block stands untouched
    /// (re-blocking must not transfer unblock rights to the second caller).
    /// The blocked party is not notified; the caller's event names whoever
    /// actually holds the block, which is not the caller when the other
    /// side blocked first.
    pub fn block_user(&self, caller: &str, other: &str) -> Result<Friendship> {
        let pair = UserPair::new(caller, other)?;

        if let Some(record) = self.database.get_friendship(&pair)? {
            let existing = Friendship::from_record(record)?;
            if existing.state == FriendshipState::Blocked && existing.requested_by == caller {
                // Re-blocking one's own block is a no-op, no event
                return Ok(existing);
            }
        }

        let now = crate::time::now_timestamp_millis();
        self.database.upsert_blocked_friendship(
            &pair,
            FriendshipState::Blocked.as_str(),
            caller,
            now,
        )?;

        // Read back: under a concurrent block the other side may have won
        let record = self
            .database
            .get_friendship(&pair)?
            .ok_or_else(|| Error::DatabaseError("Friendship row missing after block".into()))?;
        let friendship = Friendship::from_record(record)?;

        let blocked_party = if friendship.requested_by == caller {
            other
        } else {
            caller
        };
        let event = FriendshipEvent::Blocked {
            by: friendship.requested_by.clone(),
            other: blocked_party.to_string(),
            at: friendship.updated_at,
        };
        self.bus.publish_friendship_event(caller, &event);

        tracing::info!(
            by = friendship.requested_by.as_str(),
            other = blocked_party,
            "User blocked"
        );
        Ok(friendship)
    }

    /// Lift a block previously created by `caller`
    pub fn unblock_user(&self, caller: &str, other: &str) -> Result<()> {
        let pair = UserPair::new(caller, other)?;
        let record = self
            .database
            .get_friendship(&pair)?
            .ok_or(Error::FriendshipNotFound)?;
        let friendship = Friendship::from_record(record)?;

        if friendship.state != FriendshipState::Blocked {
            return Err(Error::FriendshipNotFound);
        }
        if friendship.requested_by != caller {
            return Err(Error::NotBlocker);
        }

        // The delete is conditional on the block still being the caller's
        let applied =
            self.database
                .delete_friendship(&pair, FriendshipState::Blocked.as_str(), caller)?;
        if !applied {
            return Err(Error::FriendshipNotFound);
        }

        let now = crate::time::now_timestamp_millis();
        let event = FriendshipEvent::Unblocked {
            by: caller.to_string(),
            other: other.to_string(),
            at: now,
        };
        self.bus.publish_friendship_event(caller, &event);

        tracing::info!(by = caller, other = other, "User unblocked");
        Ok(())
    }

    /// The relationship between two users, as `viewer` sees it
    pub fn get_friendship_status(&self, viewer: &str, other: &str) -> Result<FriendshipStatus> {
        let pair = UserPair::new(viewer, other)?;
        match self.database.get_friendship(&pair)? {
            None => Ok(FriendshipStatus::None),
            Some(record) => Ok(Friendship::from_record(record)?.status_for(viewer)),
        }
    }

    /// The full relationship row between two users, if any
    pub fn get_friendship(&self, a: &str, b: &str) -> Result<Option<Friendship>> {
        let pair = UserPair::new(a, b)?;
        match self.database.get_friendship(&pair)? {
            None => Ok(None),
            Some(record) => Ok(Some(Friendship::from_record(record)?)),
        }
    }

    /// All accepted friendships of a user, most recently updated first
    pub fn get_friends(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships_where(user_id, |f| f.state == FriendshipState::Accepted)
    }

    /// Pending requests sent to this user
    pub fn get_incoming_requests(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships_where(user_id, |f| {
            f.state == FriendshipState::Pending && f.requested_by != user_id
        })
    }

    /// Pending requests this user sent
    pub fn get_outgoing_requests(&self, user_id: &str) -> Result<Vec<Friendship>> {
        self.friendships_where(user_id, |f| {
            f.state == FriendshipState::Pending && f.requested_by == user_id
        })
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    fn friendships_where(
        &self,
        user_id: &str,
        keep: impl Fn(&Friendship) -> bool,
    ) -> Result<Vec<Friendship>> {
        let records = self.database.get_friendships_for_user(user_id)?;
        let mut friendships = Vec::new();
        for record in records {
            let friendship = Friendship::from_record(record)?;
            if keep(&friendship) {
                friendships.push(friendship);
            }
        }
        Ok(friendships)
    }
}

// ============================================================================
// TESTS
// ============================================================================
