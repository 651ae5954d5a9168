use crate::*;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// A 900-byte file crosses the mesh in five 180-byte fragments and comes
/// back out byte-identical.
#[tokio::test]
async fn file_transfer_end_to_end() -> Result<()> {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let mut bob = spawn_node(&hub, "bob").await;
    hub.connect(alice.handle, bob.handle).await;

    let node_b = bob.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("bob learns alice", move || {
        node_b.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    let payload: Vec<u8> = (0..900u32).map(|i| (i % 251) as u8).collect();
    let dir = std::env::temp_dir().join(format!("weft-file-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("x.bin");
    std::fs::write(&path, &payload)?;

    let transfer_id = alice
        .node
        .send_file(&path, Some(bob.id), Some("application/octet-stream"))
        .await
        .context("send_file")?;
    assert!(!transfer_id.is_empty());

    let event = expect_event(&mut bob.events, "file on bob", |event| {
        matches!(event, MeshEvent::FileReceived { .. })
    })
    .await;
    match event {
        MeshEvent::FileReceived {
            file_name,
            file_size,
            mime_type,
            sender_id,
            data,
            ..
        } => {
            assert_eq!(file_name, "x.bin");
            assert_eq!(file_size, 900);
            assert_eq!(mime_type, "application/octet-stream");
            assert_eq!(sender_id, alice.id.to_hex());
            let decoded = BASE64.decode(data).context("data must be base64")?;
            assert_eq!(decoded.len(), 900);
            assert_eq!(decoded, payload);
        }
        other => panic!("wrong event: {other:?}"),
    }

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

/// A broadcast file (no recipient) reaches a node two hops away intact.
#[tokio::test]
async fn broadcast_file_crosses_a_relay() -> Result<()> {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;
    let _bob = spawn_node(&hub, "bob").await;
    let mut carol = spawn_node(&hub, "carol").await;
    hub.connect(alice.handle, _bob.handle).await;
    hub.connect(_bob.handle, carol.handle).await;

    let node_c = carol.node.clone();
    let alice_hex = alice.id.to_hex();
    wait_until("carol learns alice", move || {
        node_c.peers().iter().any(|p| p.id == alice_hex)
    })
    .await;

    let payload = vec![0x5au8; 450];
    let dir = std::env::temp_dir().join(format!("weft-bcast-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("notes.txt");
    std::fs::write(&path, &payload)?;

    alice
        .node
        .send_file(&path, None, Some("text/plain"))
        .await
        .context("send_file")?;

    let event = expect_event(&mut carol.events, "file on carol", |event| {
        matches!(event, MeshEvent::FileReceived { .. })
    })
    .await;
    match event {
        MeshEvent::FileReceived {
            file_name,
            file_size,
            data,
            ..
        } => {
            assert_eq!(file_name, "notes.txt");
            assert_eq!(file_size, 450);
            assert_eq!(BASE64.decode(data)?, payload);
        }
        other => panic!("wrong event: {other:?}"),
    }

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

/// A missing file surfaces as a command error, not an event.
#[tokio::test]
async fn unreadable_file_fails_the_command() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "alice").await;

    let missing = std::path::Path::new("/nonexistent/weft/no-such-file.bin");
    let err = alice
        .node
        .send_file(missing, None, None)
        .await
        .expect_err("missing file must fail");
    assert!(matches!(err, weft_mesh::MeshError::Transfer(_)));
}
