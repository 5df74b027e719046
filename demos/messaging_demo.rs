//! # Messaging Demo
//!
//! This example demonstrates conversations and message delivery:
//! 1. Alice and Bob share one conversation, whoever opens it
//! 2. Live delivery reaches subscribers in commit order
//! 3. History is paginated with opaque cursors
//! 4. Unread counts follow reads and sweeps
//!
//! ## Run
//!
//! ```bash
//! cargo run --example messaging_demo
//! ```

use encore_core::{CoreConfig, EncoreCore, RequestDecision};

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("            ENCORE MESSAGING DEMO");
    println!("=================================================\n");

    // =========================================================================
    // STEP 1: Open a core and make Alice and Bob friends
    // =========================================================================
    println!("1. Opening a core; Alice and Bob become friends...\n");

    let core = EncoreCore::open(CoreConfig::default())
        .await
        .expect("Failed to open core");

    core.request_friendship("alice", "bob").expect("Failed to request");
    core.respond_friendship("bob", "alice", RequestDecision::Accept)
        .expect("Failed to accept");

    println!("   Alice and Bob are friends");
    println!();

    // =========================================================================
    // STEP 2: Both sides open "their" conversation and get the same one
    // =========================================================================
    println!("2. Opening the conversation from both sides...\n");

    let from_alice = core
        .get_or_create_conversation("alice", "bob")
        .expect("Failed to open conversation");
    let from_bob = core
        .get_or_create_conversation("bob", "alice")
        .expect("Failed to open conversation");

    println!("   Alice opened: {}", from_alice.id);
    println!("   Bob opened:   {}", from_bob.id);
    if from_alice.id == from_bob.id {
        println!("   [OK] Same conversation: the id is derived from the pair");
    } else {
        println!("   [FAIL] Two different conversations were created!");
    }
    let conversation_id = from_alice.id;
    println!();

    // =========================================================================
    // STEP 3: Bob subscribes, Alice writes
    // =========================================================================
    println!("3. Bob subscribes for live delivery; Alice writes...\n");

    let mut bob_live = core
        .subscribe_conversation(&conversation_id, "bob")
        .expect("Failed to subscribe");

    for text in [
        "Morning! Still on for the garden walk?",
        "I found my old camera, bringing it along.",
        "Meet at the east gate at ten.",
    ] {
        core.send_message(&conversation_id, "alice", text)
            .expect("Failed to send");
    }

    println!("   Bob's live feed:");
    while let Some(message) = bob_live.try_recv() {
        println!("   - [{}] {}: {}", message.seq, message.sender_id, message.content);
    }
    println!();

    // =========================================================================
    // STEP 4: Only participants may write or listen
    // =========================================================================
    println!("4. Outsiders are kept out...\n");

    match core.send_message(&conversation_id, "carol", "hello?") {
        Ok(_) => println!("   [FAIL] An outsider sent a message!"),
        Err(e) => println!("   [OK] Send rejected: {}", e),
    }
    match core.subscribe_conversation(&conversation_id, "carol") {
        Ok(_) => println!("   [FAIL] An outsider subscribed!"),
        Err(e) => println!("   [OK] Subscribe rejected: {}", e),
    }
    match core.send_message(&conversation_id, "alice", "   ") {
        Ok(_) => println!("   [FAIL] A blank message was stored!"),
        Err(e) => println!("   [OK] Blank content rejected: {}", e),
    }
    println!();

    // =========================================================================
    // STEP 5: Unread counts
    // =========================================================================
    println!("5. Unread counts...\n");

    println!("   Bob unread:   {}", core.get_unread_count("bob").unwrap());
    println!("   Alice unread: {}", core.get_unread_count("alice").unwrap());

    let page = core
        .list_messages(&conversation_id, None, None)
        .expect("Failed to list");
    let first_id = page.messages[0].id.clone();

    core.mark_as_read("bob", &first_id).expect("Failed to mark read");
    println!("   Bob read one message -> unread {}", core.get_unread_count("bob").unwrap());

    let swept = core.mark_all_as_read("bob").expect("Failed to sweep");
    println!("   Bob marked all read ({} changed) -> unread {}", swept, core.get_unread_count("bob").unwrap());
    println!();

    // =========================================================================
    // STEP 6: Paginated history
    // =========================================================================
    println!("6. Walking history two messages at a time...\n");

    let mut cursor: Option<String> = None;
    let mut page_number = 1;
    loop {
        let page = core
            .list_messages(&conversation_id, cursor.as_deref(), Some(2))
            .expect("Failed to list");
        if page.messages.is_empty() {
            break;
        }
        println!("   Page {}:", page_number);
        for message in &page.messages {
            println!("   - [{}] {}", message.seq, message.content);
        }
        match page.next_cursor {
            Some(next) => {
                println!("     (cursor: {}...)", &next[..16.min(next.len())]);
                cursor = Some(next);
                page_number += 1;
            }
            None => break,
        }
    }
    println!();

    // =========================================================================
    // STEP 7: Hiding a conversation
    // =========================================================================
    println!("7. Bob tidies his inbox...\n");

    core.hide_conversation("bob", &conversation_id).expect("Failed to hide");
    println!("   Bob's inbox after hiding:   {} conversations", core.list_conversations("bob").unwrap().len());
    println!("   Alice's inbox (unaffected): {} conversations", core.list_conversations("alice").unwrap().len());

    core.send_message(&conversation_id, "alice", "One more thing...")
        .expect("Failed to send");
    let inbox = core.list_conversations("bob").unwrap();
    println!("   After a new message, Bob's inbox: {} conversations", inbox.len());
    if let Some(summary) = inbox.first() {
        println!(
            "   - {} | preview: {:?} | unread: {}",
            summary.other, summary.last_message_preview, summary.unread_count
        );
    }
    println!();

    // =========================================================================
    // Summary
    // =========================================================================
    println!("=================================================");
    println!("                    SUMMARY");
    println!("=================================================\n");
    println!("  Conversations:");
    println!("  - One per pair, id derived from the canonical pair");
    println!("  - Opening from either side is the same conversation");
    println!();
    println!("  Delivery:");
    println!("  - Subscribers get each message once, in commit order");
    println!("  - Nothing is buffered for the disconnected; history catches up");
    println!();
    println!("  Reading:");
    println!("  - Unread counts track the recipient's stored read flags");
    println!("  - Marking is idempotent; sweeps leave later messages unread");
    println!();
}
