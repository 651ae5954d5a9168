//! MeshNode — the command surface the host application drives.
//!
//! Construction wires together the link, the secret store, and the event
//! channel; `start` loads (or creates) the identity and spawns the
//! dispatcher task. Mutating commands travel over a channel to the
//! dispatcher and resolve once their first link write has been enqueued.
//! Queries read the shared tables directly and never block dispatch.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use weft_core::config::MeshConfig;
use weft_core::crypto::fingerprint;
use weft_core::identity::{NodeIdentity, SecretStore};
use weft_core::wire::PeerId;

use crate::chunker::PendingTransfers;
use crate::dedup::DedupCache;
use crate::dispatch::{Command, Dispatcher};
use crate::error::MeshError;
use crate::event::MeshEvent;
use crate::link::{Link, LinkEvent};
use crate::peer::{PeerDirectory, PeerSnapshot};
use crate::session::SessionTable;

/// What happened to a private send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was encrypted and sent.
    Sent { message_id: String },
    /// No session existed; a handshake went out instead. Retry the message
    /// once `has_session` turns true.
    HandshakeSent,
}

/// MIME type used when the caller does not supply one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

struct RunState {
    commands: Option<mpsc::Sender<Command>>,
    identity: Option<Arc<NodeIdentity>>,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
}

/// Handle to one mesh node. Cheap to clone; all clones drive the same node.
#[derive(Clone)]
pub struct MeshNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: MeshConfig,
    link: Arc<dyn Link>,
    secrets: Arc<dyn SecretStore>,
    peers: PeerDirectory,
    sessions: SessionTable,
    nickname: Arc<RwLock<String>>,
    events: mpsc::Sender<MeshEvent>,
    running: Arc<AtomicBool>,
    state: Mutex<RunState>,
}

impl MeshNode {
    /// Wire a node to its collaborators. Returns the node handle and the
    /// event stream the host consumes.
    pub fn new(
        config: MeshConfig,
        link: Arc<dyn Link>,
        link_events: mpsc::Receiver<LinkEvent>,
        secrets: Arc<dyn SecretStore>,
    ) -> (Self, mpsc::Receiver<MeshEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.node.event_capacity.max(1));
        let nickname = Arc::new(RwLock::new(config.node.nickname.clone()));
        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                link,
                secrets,
                peers: PeerDirectory::new(),
                sessions: SessionTable::new(),
                nickname,
                events: events_tx,
                running: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(RunState {
                    commands: None,
                    identity: None,
                    link_events: Some(link_events),
                }),
            }),
        };
        (node, events_rx)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Load or generate the identity, bring the link up, announce.
    /// Idempotent while running.
    pub async fn start(&self, nickname: Option<&str>) -> Result<(), MeshError> {
        let commands = {
            let mut state = self.inner.state.lock().expect("node state poisoned");
            if state.commands.is_none() {
                let requested = nickname.or(Some(self.inner.config.node.nickname.as_str()));
                let identity = Arc::new(NodeIdentity::load_or_generate(
                    self.inner.secrets.as_ref(),
                    requested,
                )?);
                *self.inner.nickname.write().expect("nickname lock poisoned") =
                    identity.nickname.clone();

                let link_events = state
                    .link_events
                    .take()
                    .expect("link event stream consumed exactly once");
                let (commands_tx, commands_rx) = mpsc::channel(64);
                let (shutdown_tx, _) = broadcast::channel(4);

                let dispatcher = Dispatcher {
                    identity: identity.clone(),
                    nickname: self.inner.nickname.clone(),
                    config: self.inner.config.clone(),
                    link: self.inner.link.clone(),
                    peers: self.inner.peers.clone(),
                    sessions: self.inner.sessions.clone(),
                    dedup: DedupCache::new(self.inner.config.relay.dedup_capacity),
                    pending: PendingTransfers::new(Duration::from_secs(
                        self.inner.config.transfer.assembly_timeout_secs,
                    )),
                    events: self.inner.events.clone(),
                    shutdown: shutdown_tx,
                    running: self.inner.running.clone(),
                    handshakes_sent: Default::default(),
                    neighbors: Default::default(),
                    link_peers: Default::default(),
                    peer_links: Default::default(),
                };
                tokio::spawn(dispatcher.run(commands_rx, link_events));

                state.commands = Some(commands_tx);
                state.identity = Some(identity);
            }
            state.commands.clone().expect("just installed")
        };

        self.roundtrip_on(commands.clone(), |reply| Command::Start { reply })
            .await?;

        // A nickname passed to a later start still takes effect.
        if let Some(nick) = nickname {
            let current = self.my_nickname();
            if current != nick {
                self.roundtrip_on(commands, |reply| Command::SetNickname {
                    nickname: nick.to_owned(),
                    reply,
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Emit a leave, tear the link down, clear peers and sessions.
    /// A node that never started is already stopped.
    pub async fn stop(&self) -> Result<(), MeshError> {
        let commands = {
            let state = self.inner.state.lock().expect("node state poisoned");
            state.commands.clone()
        };
        match commands {
            Some(commands) => self.roundtrip_on(commands, |reply| Command::Stop { reply }).await,
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Update the announced nickname and re-announce.
    pub async fn set_nickname(&self, nickname: &str) -> Result<(), MeshError> {
        let nickname = nickname.to_owned();
        self.roundtrip(move |reply| Command::SetNickname { nickname, reply })
            .await
    }

    /// Send a plaintext message to everyone in range of the flood.
    pub async fn send_broadcast_message(&self, content: &str) -> Result<(), MeshError> {
        let content = content.to_owned();
        self.roundtrip(move |reply| Command::SendBroadcast { content, reply })
            .await
    }

    /// Send an end-to-end encrypted message to one peer. Without a session
    /// this sends a handshake instead; see [`SendOutcome`].
    pub async fn send_private_message(
        &self,
        content: &str,
        recipient: PeerId,
    ) -> Result<SendOutcome, MeshError> {
        let content = content.to_owned();
        self.roundtrip(move |reply| Command::SendPrivate {
            recipient,
            content,
            reply,
        })
        .await
    }

    /// Read a file and send it chunked, to one peer or to everyone.
    /// Resolves with the transfer id once the metadata packet is on its way.
    pub async fn send_file(
        &self,
        path: &Path,
        recipient: Option<PeerId>,
        mime_type: Option<&str>,
    ) -> Result<String, MeshError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| MeshError::Transfer(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unnamed")
            .to_owned();
        let mime_type = mime_type.unwrap_or(DEFAULT_MIME_TYPE).to_owned();
        self.roundtrip(move |reply| Command::SendFile {
            recipient,
            file_name,
            mime_type,
            data,
            reply,
        })
        .await
    }

    /// Send an opaque application payload, encrypted end to end and chunked
    /// when the ciphertext is oversized. Returns the generated message id.
    pub async fn send_app_message(
        &self,
        kind: &str,
        body: Vec<u8>,
        recipient: PeerId,
    ) -> Result<String, MeshError> {
        let kind = kind.to_owned();
        self.roundtrip(move |reply| Command::SendAppMessage {
            recipient,
            kind,
            body,
            reply,
        })
        .await
    }

    /// Answer a previously received application payload.
    pub async fn respond_to_app_message(
        &self,
        id: &str,
        recipient: PeerId,
        payload: Option<Vec<u8>>,
        error: Option<&str>,
    ) -> Result<(), MeshError> {
        let id = id.to_owned();
        let success = error.is_none();
        let error = error.map(str::to_owned);
        self.roundtrip(move |reply| Command::RespondApp {
            recipient,
            id,
            success,
            payload,
            error,
            reply,
        })
        .await
    }

    /// Tell a peer one of their private messages was read.
    pub async fn send_read_receipt(
        &self,
        message_id: &str,
        recipient: PeerId,
    ) -> Result<(), MeshError> {
        let message_id = message_id.to_owned();
        self.roundtrip(move |reply| Command::SendReadReceipt {
            recipient,
            message_id,
            reply,
        })
        .await
    }

    /// Record an out-of-band fingerprint confirmation for a peer.
    pub async fn verify_peer(&self, peer: PeerId) -> Result<(), MeshError> {
        self.roundtrip(move |reply| Command::VerifyPeer {
            peer,
            verified: true,
            reply,
        })
        .await
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Our short identifier. Available once `start` has loaded the identity.
    pub fn my_id(&self) -> Result<PeerId, MeshError> {
        let state = self.inner.state.lock().expect("node state poisoned");
        state
            .identity
            .as_ref()
            .map(|identity| identity.short_id)
            .ok_or(MeshError::NotRunning)
    }

    pub fn my_nickname(&self) -> String {
        self.inner
            .nickname
            .read()
            .expect("nickname lock poisoned")
            .clone()
    }

    /// Every peer the directory knows, connected or not.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.inner.peers.snapshot()
    }

    /// Full SHA-256 fingerprint of our static public key.
    pub fn identity_fingerprint(&self) -> Result<String, MeshError> {
        let state = self.inner.state.lock().expect("node state poisoned");
        state
            .identity
            .as_ref()
            .map(|identity| identity.fingerprint())
            .ok_or(MeshError::NotRunning)
    }

    /// Full fingerprint of a peer's announced static key, if we have it.
    pub fn peer_fingerprint(&self, peer: &PeerId) -> Option<String> {
        self.inner
            .peers
            .get(peer)
            .and_then(|entry| entry.static_key)
            .map(|key| fingerprint(&key))
    }

    /// Whether an established session key exists for a peer.
    pub fn has_session(&self, peer: &PeerId) -> bool {
        self.inner.sessions.has(peer)
    }

    // ── Plumbing ──────────────────────────────────────────────────────────────

    async fn roundtrip<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, MeshError>>) -> Command,
    ) -> Result<T, MeshError> {
        let commands = {
            let state = self.inner.state.lock().expect("node state poisoned");
            state.commands.clone().ok_or(MeshError::NotRunning)?
        };
        self.roundtrip_on(commands, build).await
    }

    async fn roundtrip_on<T>(
        &self,
        commands: mpsc::Sender<Command>,
        build: impl FnOnce(oneshot::Sender<Result<T, MeshError>>) -> Command,
    ) -> Result<T, MeshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(build(reply_tx))
            .await
            .map_err(|_| MeshError::ShuttingDown)?;
        reply_rx.await.map_err(|_| MeshError::ShuttingDown)?
    }
}
