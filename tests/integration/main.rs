//! Multi-node scenario tests, run over the in-memory link hub.
//!
//! Every test builds a small mesh, drives it through the public command
//! surface, and asserts on the host-facing event stream. Nothing here
//! touches a radio.

mod app_messages;
mod files;
mod messaging;
mod relaying;
mod sessions;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use weft_core::config::MeshConfig;
use weft_core::identity::MemorySecretStore;
use weft_core::wire::PeerId;
use weft_mesh::link::LinkHandle;
use weft_mesh::{MemoryHub, MeshEvent, MeshNode};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// One started node plus everything a test needs to poke at it.
pub struct TestNode {
    pub node: MeshNode,
    pub events: mpsc::Receiver<MeshEvent>,
    pub handle: LinkHandle,
    pub id: PeerId,
}

/// Config tuned for test speed: same protocol, shorter delays. Pacing
/// stays well above the jitter ceiling so a relayed metadata packet
/// always beats the first relayed fragment.
pub fn test_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.node.announce_interval_secs = 1;
    config.relay.jitter_min_ms = 1;
    config.relay.jitter_max_ms = 3;
    config.transfer.pacing_ms = 25;
    config
}

/// Attach a fresh node to the hub and start it.
pub async fn spawn_node(hub: &MemoryHub, nickname: &str) -> TestNode {
    init_tracing();
    let (link, link_events) = hub.attach();
    let handle = link.handle();
    let (node, events) = MeshNode::new(
        test_config(),
        Arc::new(link),
        link_events,
        Arc::new(MemorySecretStore::new()),
    );
    node.start(Some(nickname)).await.expect("node start");
    let id = node.my_id().expect("identity after start");
    TestNode {
        node,
        events,
        handle,
        id,
    }
}

/// Pump the event stream until one matches, or panic after the timeout.
pub async fn expect_event<F>(
    events: &mut mpsc::Receiver<MeshEvent>,
    what: &str,
    mut matches: F,
) -> MeshEvent
where
    F: FnMut(&MeshEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed while waiting for {what}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Assert that no matching event shows up within the window.
pub async fn expect_quiet<F>(
    events: &mut mpsc::Receiver<MeshEvent>,
    window: Duration,
    what: &str,
    mut matches: F,
) where
    F: FnMut(&MeshEvent) -> bool,
{
    let unexpected = tokio::time::timeout(window, async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => std::future::pending::<MeshEvent>().await,
            };
        }
    })
    .await;
    if let Ok(event) = unexpected {
        panic!("unexpected {what}: {event:?}");
    }
}

/// Poll a condition until it holds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

/// Drive a handshake from `a` toward `b_id` and wait for both key tables.
pub async fn establish_session(a: &TestNode, b: &TestNode) {
    let outcome = a
        .node
        .send_private_message("", b.id)
        .await
        .expect("handshake send");
    assert_eq!(outcome, weft_mesh::SendOutcome::HandshakeSent);
    let (node_a, node_b) = (a.node.clone(), b.node.clone());
    let (id_a, id_b) = (a.id, b.id);
    wait_until("both sessions established", move || {
        node_a.has_session(&id_b) && node_b.has_session(&id_a)
    })
    .await;
}
