use crate::*;

use bytes::Bytes;
use weft_core::crypto::{Keypair, SigningKeypair};
use weft_core::wire::{Packet, PacketType};
use weft_mesh::link::Link;

/// Two nodes, direct link: a broadcast shows up exactly once on the other
/// side, with the sender's id and nickname.
#[tokio::test]
async fn broadcast_reaches_direct_neighbor() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    // Announces propagate both ways on connect.
    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob learns alice", move || {
        node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    alice
        .node
        .send_broadcast_message("hello")
        .await
        .expect("broadcast");

    let event = expect_event(&mut bob.events, "message on bob", |event| {
        matches!(event, MeshEvent::MessageReceived { .. })
    })
    .await;
    match event {
        MeshEvent::MessageReceived {
            content,
            sender_id,
            sender_nickname,
            is_private,
            ..
        } => {
            assert_eq!(content, "hello");
            assert_eq!(sender_id, alice.id.to_hex());
            assert_eq!(sender_nickname, "alice");
            assert!(!is_private);
        }
        other => panic!("wrong event: {other:?}"),
    }
}

/// Re-injecting the identical encoded packet is suppressed by the dedup
/// cache: one event, no matter how many copies arrive.
#[tokio::test]
async fn duplicate_frames_yield_one_event() {
    let hub = MemoryHub::new();
    let mut bob = spawn_node(&hub, "bob").await;

    // A bare link stands in for a neighbor radio; the test hand-crafts
    // the frames it writes.
    let (bare, mut bare_events) = hub.attach();
    bare.start().await.unwrap();
    hub.connect(bare.handle(), bob.handle).await;
    // Drain the connect event and bob's introduction announce.
    let _ = bare_events.recv().await;

    let keypair = Keypair::generate();
    let signing = SigningKeypair::generate();
    let mut packet = Packet::new(
        PacketType::PlainMessage,
        keypair.short_id(),
        None,
        1_700_000_000_000,
        Bytes::from_static(b"hello again"),
    );
    packet.signature = Some(signing.sign(&packet.signed_region()));
    let frame = Bytes::from(packet.encode().unwrap());

    bare.write(bob.handle, frame.clone()).await.unwrap();
    bare.write(bob.handle, frame.clone()).await.unwrap();
    bare.write(bob.handle, frame).await.unwrap();

    let event = expect_event(&mut bob.events, "first copy", |event| {
        matches!(event, MeshEvent::MessageReceived { .. })
    })
    .await;
    match event {
        MeshEvent::MessageReceived { content, .. } => assert_eq!(content, "hello again"),
        other => panic!("wrong event: {other:?}"),
    }

    expect_quiet(
        &mut bob.events,
        std::time::Duration::from_millis(300),
        "second message event",
        |event| matches!(event, MeshEvent::MessageReceived { .. }),
    )
    .await;
}

/// Connection events fire as links come and go, and a dropped link marks
/// the peer disconnected without forgetting it.
#[tokio::test]
async fn link_drop_marks_peer_disconnected() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    expect_event(&mut bob.events, "connection up", |event| {
        matches!(
            event,
            MeshEvent::ConnectionStateChanged {
                connected_neighbors: 1
            }
        )
    })
    .await;
    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob learns alice", move || {
        node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    hub.disconnect(alice.handle, bob.handle).await;
    expect_event(&mut bob.events, "connection down", |event| {
        matches!(
            event,
            MeshEvent::ConnectionStateChanged {
                connected_neighbors: 0
            }
        )
    })
    .await;

    let peers = bob.node.peers();
    let entry = peers
        .iter()
        .find(|p| p.id == alice.id.to_hex())
        .expect("alice still in directory");
    assert!(!entry.is_connected, "alice should be marked disconnected");
}

/// Events serialize with kebab-case tags for the host bridge.
#[tokio::test]
async fn events_serialize_for_the_host() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    alice.node.send_broadcast_message("json").await.unwrap();
    let event = expect_event(&mut bob.events, "message", |event| {
        matches!(event, MeshEvent::MessageReceived { .. })
    })
    .await;

    let value = serde_json::to_value(&event).expect("event serializes");
    assert_eq!(value["event"], "message-received");
    assert_eq!(value["content"], "json");
    assert_eq!(value["is_private"], false);
}

/// set_nickname re-announces and the directory picks the new name up.
#[tokio::test]
async fn nickname_change_propagates() {
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

    alice.node.set_nickname("alice-prime").await.unwrap();
    assert_eq!(alice.node.my_nickname(), "alice-prime");

    wait_until("bob sees the new nickname", move || {
        node_b
            .peers()
            .iter()
            .any(|p| p.id == alice_hex && p.nickname == "alice-prime")
    })
    .await;
}
