//! The link seam — how the mesh core talks to the radio driver.
//!
//! The core never sees scanning, advertising, connections, or
//! characteristics. A driver implements [`Link`] and feeds the node a
//! stream of [`LinkEvent`]s; the node writes frames back through
//! [`Link::write`]. Neighbors are opaque handles: the core attaches no
//! meaning to their values beyond equality.
//!
//! Implementations must serialize writes per neighbor. The in-memory hub
//! below does this with one delivery channel per attached node.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque handle for a directly connected neighbor.
pub type LinkHandle = u64;

/// What the radio driver reports to the node.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A neighbor came into range and the duplex channel is up.
    Connected(LinkHandle),
    /// The channel to a neighbor dropped.
    Disconnected(LinkHandle),
    /// A frame arrived from a neighbor.
    Data { from: LinkHandle, frame: Bytes },
}

/// The duplex neighbor transport consumed by the mesh core.
#[async_trait]
pub trait Link: Send + Sync {
    /// Begin scanning and advertising. Idempotent.
    async fn start(&self) -> Result<(), LinkError>;

    /// Stop all radio activity and drop neighbor channels.
    async fn stop(&self) -> Result<(), LinkError>;

    /// Deliver one frame to one neighbor.
    async fn write(&self, neighbor: LinkHandle, frame: Bytes) -> Result<(), LinkError>;

    /// Currently connected neighbors.
    fn neighbors(&self) -> Vec<LinkHandle>;
}

/// Radio-layer failure. Scan/advertise failures also surface as error
/// events so the host can prompt for permissions.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("scan failed: {0}")]
    Scan(String),

    #[error("advertise failed: {0}")]
    Advertise(String),

    #[error("write to neighbor {0} failed: {1}")]
    Write(LinkHandle, String),

    #[error("neighbor {0} is not connected")]
    NotConnected(LinkHandle),

    #[error("link is stopped")]
    Stopped,
}

// ── In-memory hub ─────────────────────────────────────────────────────────────

/// An in-process mesh fabric for tests and simulations.
///
/// Every attached node gets a [`MemoryLink`] plus the event receiver the
/// node consumes. Edges are symmetric and managed by the hub; connecting
/// two nodes emits `Connected` on both sides, exactly as a radio driver
/// would on a completed connection.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    nodes: Mutex<HashMap<LinkHandle, NodeSlot>>,
}

struct NodeSlot {
    events: mpsc::Sender<LinkEvent>,
    edges: HashSet<LinkHandle>,
    started: bool,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node to the fabric. Returns its link and the event
    /// stream to hand to the node.
    pub fn attach(&self) -> (MemoryLink, mpsc::Receiver<LinkEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(1024);
        self.inner.nodes.lock().expect("hub poisoned").insert(
            id,
            NodeSlot {
                events: tx,
                edges: HashSet::new(),
                started: false,
            },
        );
        let link = MemoryLink {
            id,
            hub: self.inner.clone(),
        };
        (link, rx)
    }

    /// Bring up a symmetric edge between two attached nodes.
    pub async fn connect(&self, a: LinkHandle, b: LinkHandle) {
        let (to_a, to_b) = {
            let mut nodes = self.inner.nodes.lock().expect("hub poisoned");
            let inserted = match (nodes.contains_key(&a), nodes.contains_key(&b)) {
                (true, true) => {
                    nodes.get_mut(&a).expect("checked").edges.insert(b);
                    nodes.get_mut(&b).expect("checked").edges.insert(a);
                    true
                }
                _ => false,
            };
            if !inserted {
                return;
            }
            (
                nodes[&a].events.clone(),
                nodes[&b].events.clone(),
            )
        };
        let _ = to_a.send(LinkEvent::Connected(b)).await;
        let _ = to_b.send(LinkEvent::Connected(a)).await;
    }

    /// Tear down the edge between two nodes, as a radio drop would.
    pub async fn disconnect(&self, a: LinkHandle, b: LinkHandle) {
        let (to_a, to_b) = {
            let mut nodes = self.inner.nodes.lock().expect("hub poisoned");
            let had_edge = nodes
                .get_mut(&a)
                .map(|slot| slot.edges.remove(&b))
                .unwrap_or(false);
            if let Some(slot) = nodes.get_mut(&b) {
                slot.edges.remove(&a);
            }
            if !had_edge {
                return;
            }
            (
                nodes.get(&a).map(|s| s.events.clone()),
                nodes.get(&b).map(|s| s.events.clone()),
            )
        };
        if let Some(tx) = to_a {
            let _ = tx.send(LinkEvent::Disconnected(b)).await;
        }
        if let Some(tx) = to_b {
            let _ = tx.send(LinkEvent::Disconnected(a)).await;
        }
    }
}

/// One node's endpoint on a [`MemoryHub`].
pub struct MemoryLink {
    id: LinkHandle,
    hub: Arc<HubInner>,
}

impl MemoryLink {
    /// The handle under which other nodes see this link.
    pub fn handle(&self) -> LinkHandle {
        self.id
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn start(&self) -> Result<(), LinkError> {
        let mut nodes = self.hub.nodes.lock().expect("hub poisoned");
        match nodes.get_mut(&self.id) {
            Some(slot) => {
                slot.started = true;
                Ok(())
            }
            None => Err(LinkError::Stopped),
        }
    }

    async fn stop(&self) -> Result<(), LinkError> {
        let mut nodes = self.hub.nodes.lock().expect("hub poisoned");
        if let Some(slot) = nodes.get_mut(&self.id) {
            slot.started = false;
            slot.edges.clear();
        }
        Ok(())
    }

    async fn write(&self, neighbor: LinkHandle, frame: Bytes) -> Result<(), LinkError> {
        let target = {
            let nodes = self.hub.nodes.lock().expect("hub poisoned");
            let slot = nodes.get(&self.id).ok_or(LinkError::Stopped)?;
            if !slot.started {
                return Err(LinkError::Stopped);
            }
            if !slot.edges.contains(&neighbor) {
                return Err(LinkError::NotConnected(neighbor));
            }
            nodes
                .get(&neighbor)
                .ok_or(LinkError::NotConnected(neighbor))?
                .events
                .clone()
        };
        target
            .send(LinkEvent::Data {
                from: self.id,
                frame,
            })
            .await
            .map_err(|_| LinkError::Write(neighbor, "receiver dropped".into()))
    }

    fn neighbors(&self) -> Vec<LinkHandle> {
        let nodes = self.hub.nodes.lock().expect("hub poisoned");
        nodes
            .get(&self.id)
            .map(|slot| slot.edges.iter().copied().collect())
            .unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
