//! # Friendship Demo
//!
//! This example demonstrates the friendship lifecycle:
//! 1. Alice sends Bob a friend request
//! 2. Bob watches his friendship events and accepts
//! 3. Requests are cancelled, rejected, and re-sent
//! 4. Blocking shuts a pair down until the blocker relents
//!
//! ## Run
//!
//! ```bash
//! cargo run --example friendship_demo
//! ```

use encore_core::{CoreConfig, EncoreCore, FriendshipEvent, RequestDecision};

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("            ENCORE FRIENDSHIP DEMO");
    println!("=================================================\n");

    // =========================================================================
    // STEP 1: Open an in-memory core
    // =========================================================================
    println!("1. Opening an in-memory core...\n");

    let core = EncoreCore::open(CoreConfig::default())
        .await
        .expect("Failed to open core");

    println!("   Core v{} ready (no database file, nothing persists)", encore_core::version());
    println!();

    // =========================================================================
    // STEP 2: Bob subscribes to his friendship events
    // =========================================================================
    println!("2. Bob subscribes to his friendship events...\n");

    let mut bob_events = core.subscribe_friendship_events("bob");
    println!("   Subscription {} listening on key '{}'", bob_events.id(), bob_events.key());
    println!();

    // =========================================================================
    // STEP 3: Alice sends Bob a friend request
    // =========================================================================
    println!("3. Alice sends Bob a friend request...\n");

    let friendship = core
        .request_friendship("alice", "bob")
        .expect("Failed to create request");

    println!("   Pair: {{{}, {}}}", friendship.user_low, friendship.user_high);
    println!("   State: {:?}, requested by {}", friendship.state, friendship.requested_by);
    println!("   Alice sees: {:?}", core.get_friendship_status("alice", "bob").unwrap());
    println!("   Bob sees:   {:?}", core.get_friendship_status("bob", "alice").unwrap());

    match bob_events.try_recv() {
        Some(FriendshipEvent::Requested { from, .. }) => {
            println!("   [OK] Bob was notified of a request from {}", from)
        }
        other => println!("   [FAIL] Unexpected event: {:?}", other),
    }
    println!();

    // =========================================================================
    // STEP 4: Duplicates are rejected, whichever direction they come from
    // =========================================================================
    println!("4. Duplicate requests are rejected...\n");

    match core.request_friendship("alice", "bob") {
        Ok(_) => println!("   [FAIL] Duplicate request was allowed!"),
        Err(e) => println!("   [OK] Same direction rejected: {}", e),
    }
    match core.request_friendship("bob", "alice") {
        Ok(_) => println!("   [FAIL] Reverse request was allowed!"),
        Err(e) => println!("   [OK] Reverse direction rejected: {}", e),
    }
    match core.request_friendship("alice", "alice") {
        Ok(_) => println!("   [FAIL] Self-request was allowed!"),
        Err(e) => println!("   [OK] Self-request rejected: {}", e),
    }
    println!();

    // =========================================================================
    // STEP 5: Bob accepts
    // =========================================================================
    println!("5. Bob accepts the request...\n");

    let accepted = core
        .respond_friendship("bob", "alice", RequestDecision::Accept)
        .expect("Failed to respond")
        .expect("Accept should return the friendship");

    println!("   State is now {:?}", accepted.state);
    println!("   Alice sees: {:?}", core.get_friendship_status("alice", "bob").unwrap());
    println!("   Bob sees:   {:?}", core.get_friendship_status("bob", "alice").unwrap());

    match bob_events.try_recv() {
        Some(FriendshipEvent::Accepted { .. }) => println!("   [OK] Bob's feed shows the acceptance"),
        other => println!("   [FAIL] Unexpected event: {:?}", other),
    }
    println!();

    // =========================================================================
    // STEP 6: Cancelling a request you sent
    // =========================================================================
    println!("6. Alice requests Carol, then thinks better of it...\n");

    core.request_friendship("alice", "carol").expect("Failed to request");

    match core.cancel_friendship("carol", "alice") {
        Ok(()) => println!("   [FAIL] The recipient was allowed to cancel!"),
        Err(e) => println!("   [OK] Only the initiator may cancel: {}", e),
    }

    core.cancel_friendship("alice", "carol").expect("Failed to cancel");
    println!(
        "   [OK] Cancelled; Carol now sees {:?}",
        core.get_friendship_status("carol", "alice").unwrap()
    );
    println!();

    // =========================================================================
    // STEP 7: Rejection deletes the request, so it can be re-sent
    // =========================================================================
    println!("7. Dave requests Alice; Alice declines...\n");

    core.request_friendship("dave", "alice").expect("Failed to request");
    let rejected = core
        .respond_friendship("alice", "dave", RequestDecision::Reject)
        .expect("Failed to respond");
    println!("   Reject returns {:?} (the row is gone)", rejected);

    core.request_friendship("dave", "alice")
        .expect("Re-request after rejection should be allowed");
    println!("   [OK] Dave could ask again after the rejection");
    println!();

    // =========================================================================
    // STEP 8: Blocking
    // =========================================================================
    println!("8. Alice blocks Mallory...\n");

    let blocked = core.block_user("alice", "mallory").expect("Failed to block");
    println!("   State: {:?}, block held by {}", blocked.state, blocked.requested_by);

    match core.request_friendship("mallory", "alice") {
        Ok(_) => println!("   [FAIL] Mallory could still send a request!"),
        Err(e) => println!("   [OK] Mallory cannot send a request: {}", e),
    }
    match core.unblock_user("mallory", "alice") {
        Ok(()) => println!("   [FAIL] Mallory lifted Alice's block!"),
        Err(e) => println!("   [OK] Only the blocker may unblock: {}", e),
    }

    core.unblock_user("alice", "mallory").expect("Failed to unblock");
    println!(
        "   [OK] Unblocked; Mallory now sees {:?}",
        core.get_friendship_status("mallory", "alice").unwrap()
    );
    println!();

    // =========================================================================
    // STEP 9: Friend and request lists
    // =========================================================================
    println!("9. Alice's lists...\n");

    let friends = core.get_friends("alice").unwrap();
    let incoming = core.get_incoming_requests("alice").unwrap();
    let outgoing = core.get_outgoing_requests("alice").unwrap();

    println!("   Friends:  {:?}", friends.iter().map(|f| f.other("alice").unwrap_or("?")).collect::<Vec<_>>());
    println!("   Incoming: {:?}", incoming.iter().map(|f| f.other("alice").unwrap_or("?")).collect::<Vec<_>>());
    println!("   Outgoing: {:?}", outgoing.iter().map(|f| f.other("alice").unwrap_or("?")).collect::<Vec<_>>());
    println!();

    // =========================================================================
    // Summary
    // =========================================================================
    println!("=================================================");
    println!("                    SUMMARY");
    println!("=================================================\n");
    println!("  One row per pair:");
    println!("  - {{A, B}} and {{B, A}} are the same relationship");
    println!("  - Concurrent requests from both sides produce one winner");
    println!();
    println!("  Role checks:");
    println!("  - Only the recipient may accept or reject");
    println!("  - Only the initiator may cancel");
    println!("  - Only the blocker may unblock");
    println!();
    println!("  Transitions:");
    println!("  - Reject and cancel delete the row; the pair may start over");
    println!("  - Block overrides any state and suppresses new requests");
    println!();
}
