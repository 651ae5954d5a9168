use crate::*;

use std::time::Duration;

use weft_mesh::SendOutcome;

/// The full pairing flow: first private send falls back to a handshake,
/// the peers derive equal keys, and the retried message arrives decrypted.
#[tokio::test]
async fn handshake_then_private_message() {
    let hub = MemoryHub::new();
    let mut alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    let node_a = alice.node.clone();
    let bob_hex = bob.id.to_hex();
    wait_until("alice learns bob", move || {
        node_a.peers().iter().any(|p| p.id == bob_hex)
    })
    .await;

    // No session yet: the command sends a handshake instead.
    let outcome = alice
        .node
        .send_private_message("secret", bob.id)
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::HandshakeSent);

    let (node_a, node_b) = (alice.node.clone(), bob.node.clone());
    let (alice_id, bob_id) = (alice.id, bob.id);
    wait_until("both sides hold a session", move || {
        node_a.has_session(&bob_id) && node_b.has_session(&alice_id)
    })
    .await;

    // Retry now that the session exists.
    let outcome = alice
        .node
        .send_private_message("secret", bob.id)
        .await
        .unwrap();
    let message_id = match outcome {
        SendOutcome::Sent { message_id } => message_id,
        other => panic!("expected sent, got {other:?}"),
    };

    let event = expect_event(&mut bob.events, "private message on bob", |event| {
        matches!(event, MeshEvent::MessageReceived { is_private: true, .. })
    })
    .await;
    match event {
        MeshEvent::MessageReceived {
            id,
            content,
            sender_id,
            is_private,
            ..
        } => {
            assert_eq!(id, message_id);
            assert_eq!(content, "secret");
            assert_eq!(sender_id, alice.id.to_hex());
            assert!(is_private);
        }
        other => panic!("wrong event: {other:?}"),
    }

    // The receiving node acks the delivery automatically.
    let event = expect_event(&mut alice.events, "delivery ack on alice", |event| {
        matches!(event, MeshEvent::DeliveryAck { .. })
    })
    .await;
    match event {
        MeshEvent::DeliveryAck {
            message_id: acked, ..
        } => assert_eq!(acked, message_id),
        other => panic!("wrong event: {other:?}"),
    }
}

/// Read receipts travel back encrypted and carry the original message id.
#[tokio::test]
async fn read_receipt_round_trip() {
    let hub = MemoryHub::new();
    let mut alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    let outcome = alice
        .node
        .send_private_message("read me", bob.id)
        .await
        .unwrap();
    let message_id = match outcome {
        SendOutcome::Sent { message_id } => message_id,
        other => panic!("expected sent, got {other:?}"),
    };

    expect_event(&mut bob.events, "message on bob", |event| {
        matches!(event, MeshEvent::MessageReceived { is_private: true, .. })
    })
    .await;

    bob.node
        .send_read_receipt(&message_id, alice.id)
        .await
        .unwrap();

    let event = expect_event(&mut alice.events, "read receipt on alice", |event| {
        matches!(event, MeshEvent::ReadReceipt { .. })
    })
    .await;
    match event {
        MeshEvent::ReadReceipt {
            message_id: receipt_id,
            sender_id,
        } => {
            assert_eq!(receipt_id, message_id);
            assert_eq!(sender_id, bob.id.to_hex());
        }
        other => panic!("wrong event: {other:?}"),
    }
}

/// A stopping node's last act is a leave; the survivor forgets the peer
/// and drops the session.
#[tokio::test]
async fn leave_removes_peer_and_session() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    assert!(bob.node.has_session(&alice.id));

    alice.node.stop().await.unwrap();
    assert!(!alice.node.is_running());

    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob processes the leave", move || {
        !node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;
    assert!(!bob.node.has_session(&alice.id));
}

/// Fingerprints: stable, shared, and prefixed by the short id.
#[tokio::test]
async fn fingerprints_line_up_across_nodes() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob learns alice", move || {
        node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    let own = alice.node.identity_fingerprint().unwrap();
    let seen = bob
        .node
        .peer_fingerprint(&alice.id)
        .expect("bob has alice's key from the announce");
    assert_eq!(own, seen);
    assert!(own.starts_with(&alice.id.to_hex()));
}

/// Commands against a node that was never started fail cleanly.
#[tokio::test]
async fn commands_require_a_running_node() {
    let hub = MemoryHub::new();
    let (link, link_events) = hub.attach();
    let (node, _events) = MeshNode::new(
        test_config(),
        std::sync::Arc::new(link),
        link_events,
        std::sync::Arc::new(weft_core::identity::MemorySecretStore::new()),
    );

    assert!(node.my_id().is_err());
    assert!(node
        .send_broadcast_message("into the void")
        .await
        .is_err());
    // stop() before start() is a no-op.
    node.stop().await.unwrap();
}

/// verify_peer flips the flag surfaced in peer snapshots.
#[tokio::test]
async fn verify_peer_marks_directory_entry() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob learns alice", {
        let node_b = node_b.clone();
        let alice_hex = alice_hex.clone();
        move || node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    bob.node.verify_peer(alice.id).await.unwrap();
    let peers = bob.node.peers();
    let entry = peers.iter().find(|p| p.id == alice_hex).unwrap();
    assert!(entry.verified);

    // Stop both nodes so the leave path runs under test at least twice.
    bob.node.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.node.stop().await.unwrap();
}
