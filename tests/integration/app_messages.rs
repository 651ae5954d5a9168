use crate::*;

use anyhow::Result;

/// A 1,500-byte application blob: the ciphertext tops the single-envelope
/// limit, travels as metadata plus 400-byte fragments, and decrypts to the
/// original after reassembly.
#[tokio::test]
async fn oversized_app_message_is_chunked_and_decrypted() -> Result<()> {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    let blob: Vec<u8> = (0..1500u32).map(|i| (i % 233) as u8).collect();
    let id = alice
        .node
        .send_app_message("transaction", blob.clone(), bob.id)
        .await?;

    let event = expect_event(&mut bob.events, "app message on bob", |event| {
        matches!(event, MeshEvent::AppMessageReceived { .. })
    })
    .await;
    match event {
        MeshEvent::AppMessageReceived {
            id: received_id,
            kind,
            body,
            sender_id,
        } => {
            assert_eq!(received_id, id);
            assert_eq!(kind, "transaction");
            assert_eq!(body, blob);
            assert_eq!(sender_id, alice.id.to_hex());
        }
        other => panic!("wrong event: {other:?}"),
    }
    Ok(())
}

/// A small blob fits one envelope: no metadata round, same event.
#[tokio::test]
async fn small_app_message_uses_a_single_envelope() -> Result<()> {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    let blob = vec![0xaau8; 64];
    let id = alice.node.send_app_message("ping", blob.clone(), bob.id).await?;

    let event = expect_event(&mut bob.events, "app message on bob", |event| {
        matches!(event, MeshEvent::AppMessageReceived { .. })
    })
    .await;
    match event {
        MeshEvent::AppMessageReceived {
            id: received_id,
            body,
            ..
        } => {
            assert_eq!(received_id, id);
            assert_eq!(body, blob);
        }
        other => panic!("wrong event: {other:?}"),
    }
    Ok(())
}

/// The response path: bob answers alice's payload and alice sees the
/// success flag and payload.
#[tokio::test]
async fn app_response_round_trip() -> Result<()> {
    let hub = MemoryHub::new();
    let mut alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    let id = alice
        .node
        .send_app_message("transaction", vec![1, 2, 3], bob.id)
        .await?;

    expect_event(&mut bob.events, "app message on bob", |event| {
        matches!(event, MeshEvent::AppMessageReceived { .. })
    })
    .await;

    bob.node
        .respond_to_app_message(&id, alice.id, Some(b"receipt".to_vec()), None)
        .await?;

    let event = expect_event(&mut alice.events, "app response on alice", |event| {
        matches!(event, MeshEvent::AppResponseReceived { .. })
    })
    .await;
    match event {
        MeshEvent::AppResponseReceived {
            id: response_id,
            success,
            payload,
            error,
            sender_id,
        } => {
            assert_eq!(response_id, id);
            assert!(success);
            assert_eq!(payload.as_deref(), Some(&b"receipt"[..]));
            assert!(error.is_none());
            assert_eq!(sender_id, bob.id.to_hex());
        }
        other => panic!("wrong event: {other:?}"),
    }
    Ok(())
}

/// An error response carries the message and flips success off.
#[tokio::test]
async fn app_error_response() -> Result<()> {
    let hub = MemoryHub::new();
    let mut alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;
    establish_session(&alice, &bob).await;

    let id = alice
        .node
        .send_app_message("transaction", vec![9], bob.id)
        .await?;
    expect_event(&mut bob.events, "app message on bob", |event| {
        matches!(event, MeshEvent::AppMessageReceived { .. })
    })
    .await;

    bob.node
        .respond_to_app_message(&id, alice.id, None, Some("insufficient funds"))
        .await?;

    let event = expect_event(&mut alice.events, "error response on alice", |event| {
        matches!(event, MeshEvent::AppResponseReceived { .. })
    })
    .await;
    match event {
        MeshEvent::AppResponseReceived { success, error, .. } => {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("insufficient funds"));
        }
        other => panic!("wrong event: {other:?}"),
    }
    Ok(())
}

/// Without a session the command refuses rather than sending plaintext.
#[tokio::test]
async fn app_message_requires_a_session() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    let err = alice
        .node
        .send_app_message("transaction", vec![1], bob.id)
        .await
        .expect_err("no session yet");
    assert!(matches!(err, weft_mesh::MeshError::NoSession(_)));
}
