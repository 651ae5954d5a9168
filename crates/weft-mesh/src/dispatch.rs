//! The dispatcher — one task that owns every mutable mesh table.
//!
//! Commands from the control surface and events from the link driver meet
//! in a single select loop, so each dispatch step (parse, update state,
//! emit events, schedule relay) runs to completion before the next one
//! starts. Peers and sessions live in shared maps for lock-free host
//! queries, but only this task ever writes them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};

use weft_core::config::MeshConfig;
use weft_core::crypto::{self, content_id};
use weft_core::identity::NodeIdentity;
use weft_core::payload::{
    frame_inner, Announce, AppMessage, AppResponse, FileMetadata, Fragment, InnerType,
    PrivateMessage, TxMetadata,
};
use weft_core::wire::{Packet, PacketType, PeerId};

use crate::chunker::{self, Completed, PendingTransfers};
use crate::dedup::DedupCache;
use crate::error::MeshError;
use crate::event::MeshEvent;
use crate::link::{Link, LinkEvent, LinkHandle};
use crate::node::SendOutcome;
use crate::peer::PeerDirectory;
use crate::relay;
use crate::session::{SessionError, SessionTable};

/// Milliseconds since the Unix epoch. Timestamps of locally originated
/// packets come from here, so within one runtime they never decrease.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// What the control surface asks of the dispatcher.
pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SetNickname {
        nickname: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SendBroadcast {
        content: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SendPrivate {
        recipient: PeerId,
        content: String,
        reply: oneshot::Sender<Result<SendOutcome, MeshError>>,
    },
    SendFile {
        recipient: Option<PeerId>,
        file_name: String,
        mime_type: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<String, MeshError>>,
    },
    SendAppMessage {
        recipient: PeerId,
        kind: String,
        body: Vec<u8>,
        reply: oneshot::Sender<Result<String, MeshError>>,
    },
    RespondApp {
        recipient: PeerId,
        id: String,
        success: bool,
        payload: Option<Vec<u8>>,
        error: Option<String>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SendReadReceipt {
        recipient: PeerId,
        message_id: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    VerifyPeer {
        peer: PeerId,
        verified: bool,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub(crate) struct Dispatcher {
    pub identity: Arc<NodeIdentity>,
    pub nickname: Arc<RwLock<String>>,
    pub config: MeshConfig,
    pub link: Arc<dyn Link>,
    pub peers: PeerDirectory,
    pub sessions: SessionTable,
    pub dedup: DedupCache,
    pub pending: PendingTransfers,
    pub events: mpsc::Sender<MeshEvent>,
    pub shutdown: broadcast::Sender<()>,
    pub running: Arc<AtomicBool>,

    /// Peers we have already offered a handshake, so a reciprocal
    /// handshake is sent at most once per pairing.
    pub handshakes_sent: HashSet<PeerId>,
    /// Live radio links.
    pub neighbors: HashSet<LinkHandle>,
    /// Bidirectional neighbor/peer lookup. Two maps, never a cycle.
    pub link_peers: HashMap<LinkHandle, PeerId>,
    pub peer_links: HashMap<PeerId, LinkHandle>,
}

impl Dispatcher {
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut link_events: mpsc::Receiver<LinkEvent>,
    ) {
        let mut announce_timer = tokio::time::interval(Duration::from_secs(
            self.config.node.announce_interval_secs.max(1),
        ));
        announce_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every control handle dropped: shut down.
                    None => {
                        self.tear_down().await;
                        break;
                    }
                },
                event = link_events.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => {
                        tracing::warn!("link event stream closed, shutting down");
                        self.tear_down().await;
                        break;
                    }
                },
                _ = announce_timer.tick() => {
                    // Periodic presence refresh keeps far-away directories
                    // warm even when no neighbor set changes.
                    if self.is_running() {
                        if let Err(e) = self.send_announce(None).await {
                            tracing::warn!(error = %e, "periodic announce failed");
                        }
                    }
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: MeshEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    // ── Command handling ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        // Start and Stop manage the running flag themselves. A stopped
        // dispatcher keeps consuming its queues so the node can restart.
        match command {
            Command::Start { reply } => {
                let result = self.start_link().await;
                let _ = reply.send(result);
                return;
            }
            Command::Stop { reply } => {
                self.tear_down().await;
                let _ = reply.send(Ok(()));
                return;
            }
            command if !self.is_running() => {
                refuse(command);
                return;
            }
            Command::SetNickname { nickname, reply } => {
                *self.nickname.write().expect("nickname lock poisoned") = nickname;
                let result = self.send_announce(None).await;
                let _ = reply.send(result);
            }
            Command::SendBroadcast { content, reply } => {
                let result = self.send_plain_broadcast(content).await;
                let _ = reply.send(result);
            }
            Command::SendPrivate {
                recipient,
                content,
                reply,
            } => {
                let result = self.send_private(recipient, content).await;
                let _ = reply.send(result);
            }
            Command::SendFile {
                recipient,
                file_name,
                mime_type,
                data,
                reply,
            } => {
                let result = self.send_file(recipient, file_name, mime_type, data).await;
                let _ = reply.send(result);
            }
            Command::SendAppMessage {
                recipient,
                kind,
                body,
                reply,
            } => {
                let result = self.send_app_message(recipient, kind, body).await;
                let _ = reply.send(result);
            }
            Command::RespondApp {
                recipient,
                id,
                success,
                payload,
                error,
                reply,
            } => {
                let result = self
                    .send_app_response(recipient, id, success, payload, error)
                    .await;
                let _ = reply.send(result);
            }
            Command::SendReadReceipt {
                recipient,
                message_id,
                reply,
            } => {
                let result = self.send_read_receipt(recipient, message_id).await;
                let _ = reply.send(result);
            }
            Command::VerifyPeer {
                peer,
                verified,
                reply,
            } => {
                let changed = self.peers.set_verified(&peer, verified);
                if changed {
                    let peers = self.peers.snapshot();
                    self.emit(MeshEvent::PeerListUpdated { peers }).await;
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Bring the link up and introduce ourselves. Idempotent.
    async fn start_link(&mut self) -> Result<(), MeshError> {
        if self.is_running() {
            return Ok(());
        }
        if let Err(e) = self.link.start().await {
            self.emit(MeshEvent::Error {
                code: "link-start".into(),
                message: e.to_string(),
            })
            .await;
            return Err(e.into());
        }
        self.running.store(true, Ordering::SeqCst);
        for neighbor in self.link.neighbors() {
            self.neighbors.insert(neighbor);
        }
        self.send_announce(None).await?;
        tracing::info!(id = %self.identity.short_id, "mesh node started");
        Ok(())
    }

    /// Leave, stop the link, drop every table.
    async fn tear_down(&mut self) {
        if self.is_running() {
            // Last act: tell the mesh we are going.
            if let Ok(frame) = self.build_frame(PacketType::Leave, None, Bytes::new()) {
                self.broadcast_frame(Bytes::from(frame)).await;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        if let Err(e) = self.link.stop().await {
            tracing::warn!(error = %e, "link stop failed");
        }
        self.peers.clear();
        self.sessions.clear();
        self.pending.clear();
        self.handshakes_sent.clear();
        self.neighbors.clear();
        self.link_peers.clear();
        self.peer_links.clear();
        tracing::info!("mesh node stopped");
    }

    // ── Link events ───────────────────────────────────────────────────────────

    async fn handle_link_event(&mut self, event: LinkEvent) {
        if !self.is_running() {
            return;
        }
        match event {
            LinkEvent::Connected(neighbor) => {
                self.neighbors.insert(neighbor);
                self.emit(MeshEvent::ConnectionStateChanged {
                    connected_neighbors: self.neighbors.len(),
                })
                .await;
                // Introduce ourselves to the new neighbor directly.
                if let Err(e) = self.send_announce(Some(neighbor)).await {
                    tracing::warn!(neighbor, error = %e, "announce to new neighbor failed");
                }
            }
            LinkEvent::Disconnected(neighbor) => {
                self.neighbors.remove(&neighbor);
                if let Some(peer) = self.link_peers.remove(&neighbor) {
                    self.peer_links.remove(&peer);
                    if self.peers.mark_disconnected(&peer) {
                        let peers = self.peers.snapshot();
                        self.emit(MeshEvent::PeerListUpdated { peers }).await;
                    }
                }
                self.emit(MeshEvent::ConnectionStateChanged {
                    connected_neighbors: self.neighbors.len(),
                })
                .await;
            }
            LinkEvent::Data { from, frame } => self.handle_frame(from, frame).await,
        }
    }

    async fn handle_frame(&mut self, from: LinkHandle, frame: Bytes) {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "dropping malformed frame");
                return;
            }
        };

        let fingerprint =
            DedupCache::fingerprint(&packet.sender, packet.timestamp_ms, packet.packet_type);
        if !self.dedup.check_and_insert(fingerprint) {
            tracing::trace!(sender = %packet.sender, "duplicate packet suppressed");
            return;
        }

        // Our own traffic echoed back through the mesh.
        if packet.sender == self.identity.short_id {
            return;
        }

        self.dispatch_packet(&packet, from).await;

        if packet.ttl > 0 {
            relay::schedule(
                self.link.clone(),
                frame.to_vec(),
                packet.ttl - 1,
                Some(from),
                self.config.relay.jitter_min_ms,
                self.config.relay.jitter_max_ms,
                self.shutdown.subscribe(),
            );
        }
    }

    /// True when the packet is for everyone or for us specifically.
    /// Local dispatch ignores the recipient for every type except the
    /// envelope (not ours to decrypt) and the handshake reciprocal.
    fn addressed_to_us(&self, packet: &Packet) -> bool {
        match packet.recipient {
            None => true,
            Some(recipient) => recipient == self.identity.short_id,
        }
    }

    async fn dispatch_packet(&mut self, packet: &Packet, from: LinkHandle) {
        match packet.packet_type {
            PacketType::Announce => self.on_announce(packet, from).await,
            PacketType::PlainMessage => self.on_plain_message(packet).await,
            PacketType::Leave => self.on_leave(packet).await,
            PacketType::Handshake => self.on_handshake(packet).await,
            PacketType::EncryptedEnvelope => self.on_envelope(packet).await,
            PacketType::FileTransferMetadata => self.on_file_metadata(packet).await,
            PacketType::Fragment => self.on_fragment(packet).await,
            PacketType::OpaqueAppMessageMetadata => self.on_tx_metadata(packet).await,
            PacketType::RequestSync => {
                tracing::debug!(sender = %packet.sender, "request-sync is reserved, ignoring");
            }
        }
    }

    async fn on_announce(&mut self, packet: &Packet, from: LinkHandle) {
        let announce = match Announce::decode(&packet.payload) {
            Ok(announce) => announce,
            Err(e) => {
                tracing::warn!(sender = %packet.sender, error = %e, "bad announce payload");
                return;
            }
        };

        // Signatures only verify on unrelayed packets; a failure on a
        // multi-hop announce is expected and not grounds for rejection.
        if let Some(signature) = &packet.signature {
            if crypto::verify_signature(&announce.signing_key, &packet.signed_region(), signature)
                .is_err()
            {
                tracing::debug!(sender = %packet.sender, "announce signature not verifiable (relayed?)");
            }
        }

        self.peers
            .upsert_from_announce(packet.sender, &announce, now_ms());

        // An unrelayed announce identifies which neighbor this peer is.
        if packet.ttl == self.config.relay.initial_ttl {
            if let Some(previous) = self.link_peers.insert(from, packet.sender) {
                if previous != packet.sender {
                    self.peer_links.remove(&previous);
                }
            }
            self.peer_links.insert(packet.sender, from);
        }

        let peers = self.peers.snapshot();
        self.emit(MeshEvent::PeerListUpdated { peers }).await;
    }

    async fn on_plain_message(&mut self, packet: &Packet) {
        let content = match std::str::from_utf8(&packet.payload) {
            Ok(content) => content.to_owned(),
            Err(_) => {
                tracing::warn!(sender = %packet.sender, "plain message is not UTF-8, dropping");
                return;
            }
        };
        let id = content_id(&packet.sender, packet.timestamp_ms, &packet.payload);
        let sender_nickname = self.peers.nickname_or_hex(&packet.sender);
        self.emit(MeshEvent::MessageReceived {
            id,
            sender_id: packet.sender.to_hex(),
            sender_nickname,
            content,
            is_private: false,
            timestamp_ms: packet.timestamp_ms,
        })
        .await;
    }

    async fn on_leave(&mut self, packet: &Packet) {
        let removed = self.peers.remove(&packet.sender);
        self.sessions.remove(&packet.sender);
        self.handshakes_sent.remove(&packet.sender);
        if let Some(link) = self.peer_links.remove(&packet.sender) {
            self.link_peers.remove(&link);
        }
        if removed {
            let peers = self.peers.snapshot();
            self.emit(MeshEvent::PeerListUpdated { peers }).await;
        }
    }

    async fn on_handshake(&mut self, packet: &Packet) {
        let their_public: [u8; 32] = match packet.payload.as_ref().try_into() {
            Ok(key) => key,
            Err(_) => {
                tracing::warn!(sender = %packet.sender, len = packet.payload.len(), "handshake payload is not a 32-byte key");
                return;
            }
        };

        let key = match self.identity.keypair.derive_session_key(&their_public) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(sender = %packet.sender, error = %e, "key agreement failed");
                self.emit(MeshEvent::Error {
                    code: "handshake".into(),
                    message: format!("key agreement with {} failed: {e}", packet.sender),
                })
                .await;
                return;
            }
        };

        self.sessions.establish(packet.sender, key);
        self.peers
            .learn_static_key(packet.sender, their_public, now_ms());
        tracing::debug!(peer = %packet.sender, "session established");

        // Reciprocate only when the handshake concerns us, and only once.
        if self.addressed_to_us(packet) && !self.handshakes_sent.contains(&packet.sender) {
            if let Err(e) = self.send_handshake(packet.sender).await {
                tracing::warn!(peer = %packet.sender, error = %e, "reciprocal handshake failed");
            }
        }
    }

    async fn on_envelope(&mut self, packet: &Packet) {
        if !self.addressed_to_us(packet) {
            // Not ours to read. Relay still floods it onward.
            return;
        }
        let plaintext = match self.sessions.open_from(&packet.sender, &packet.payload) {
            Ok(plaintext) => plaintext,
            Err(SessionError::NoSession(_)) => {
                tracing::trace!(sender = %packet.sender, "envelope without session, dropping");
                return;
            }
            Err(SessionError::Crypto(_)) => {
                tracing::trace!(sender = %packet.sender, "envelope failed authentication, dropping");
                return;
            }
        };
        self.handle_inner(packet.sender, &plaintext).await;
    }

    async fn on_file_metadata(&mut self, packet: &Packet) {
        let metadata = match FileMetadata::decode(&packet.payload) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(sender = %packet.sender, error = %e, "bad file metadata");
                return;
            }
        };
        tracing::debug!(
            id = %metadata.transfer_id,
            file = %metadata.file_name,
            chunks = metadata.total_chunks,
            "file transfer opened"
        );
        self.pending.begin_file(metadata, packet.sender);
    }

    async fn on_tx_metadata(&mut self, packet: &Packet) {
        let metadata = match TxMetadata::decode(&packet.payload) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(sender = %packet.sender, error = %e, "bad transaction metadata");
                return;
            }
        };
        tracing::debug!(
            id = %metadata.tx_id,
            chunks = metadata.total_chunks,
            "oversized envelope transfer opened"
        );
        self.pending.begin_transaction(metadata, packet.sender);
    }

    async fn on_fragment(&mut self, packet: &Packet) {
        let fragment = match Fragment::decode(&packet.payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::warn!(sender = %packet.sender, error = %e, "bad fragment");
                return;
            }
        };
        match self.pending.accept_fragment(fragment) {
            None => {}
            Some(Completed::File {
                metadata,
                sender,
                data,
            }) => {
                self.emit(MeshEvent::FileReceived {
                    file_name: metadata.file_name,
                    file_size: metadata.file_size,
                    mime_type: metadata.mime_type,
                    sender_id: sender.to_hex(),
                    data: BASE64.encode(&data),
                    timestamp_ms: now_ms(),
                })
                .await;
            }
            Some(Completed::Transaction { sender, ciphertext }) => {
                // The reassembled buffer is an envelope payload from the
                // transfer's sender.
                let plaintext = match self.sessions.open_from(&sender, &ciphertext) {
                    Ok(plaintext) => plaintext,
                    Err(_) => {
                        tracing::trace!(sender = %sender, "reassembled envelope failed to open, dropping");
                        return;
                    }
                };
                self.handle_inner(sender, &plaintext).await;
            }
        }
    }

    // ── Inner payload dispatch ────────────────────────────────────────────────

    async fn handle_inner(&mut self, sender: PeerId, plaintext: &[u8]) {
        let Some((&type_byte, body)) = plaintext.split_first() else {
            tracing::trace!(sender = %sender, "empty envelope plaintext");
            return;
        };
        let inner = match InnerType::try_from(type_byte) {
            Ok(inner) => inner,
            Err(e) => {
                tracing::debug!(sender = %sender, error = %e, "dropping envelope");
                return;
            }
        };

        match inner {
            InnerType::PrivateMessage => {
                let message = match PrivateMessage::decode(body) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(sender = %sender, error = %e, "bad private message");
                        return;
                    }
                };
                let sender_nickname = self.peers.nickname_or_hex(&sender);
                let message_id = message.message_id.clone();
                self.emit(MeshEvent::MessageReceived {
                    id: message.message_id,
                    sender_id: sender.to_hex(),
                    sender_nickname,
                    content: message.content,
                    is_private: true,
                    timestamp_ms: now_ms(),
                })
                .await;
                // Ack the delivery so the sender can mark the message.
                if let Err(e) = self
                    .send_inner(sender, InnerType::DeliveryAck, message_id.as_bytes())
                    .await
                {
                    tracing::debug!(peer = %sender, error = %e, "delivery ack failed");
                }
            }
            InnerType::ReadReceipt => match std::str::from_utf8(body) {
                Ok(message_id) => {
                    self.emit(MeshEvent::ReadReceipt {
                        message_id: message_id.to_owned(),
                        sender_id: sender.to_hex(),
                    })
                    .await;
                }
                Err(_) => tracing::warn!(sender = %sender, "read receipt id is not UTF-8"),
            },
            InnerType::DeliveryAck => match std::str::from_utf8(body) {
                Ok(message_id) => {
                    self.emit(MeshEvent::DeliveryAck {
                        message_id: message_id.to_owned(),
                        sender_id: sender.to_hex(),
                    })
                    .await;
                }
                Err(_) => tracing::warn!(sender = %sender, "delivery ack id is not UTF-8"),
            },
            InnerType::AppMessage => {
                let message = match AppMessage::decode(body) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(sender = %sender, error = %e, "bad app message");
                        return;
                    }
                };
                self.emit(MeshEvent::AppMessageReceived {
                    id: message.id,
                    kind: message.kind,
                    body: message.body.to_vec(),
                    sender_id: sender.to_hex(),
                })
                .await;
            }
            InnerType::AppResponse => {
                let response = match AppResponse::decode(body) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(sender = %sender, error = %e, "bad app response");
                        return;
                    }
                };
                self.emit(MeshEvent::AppResponseReceived {
                    id: response.id,
                    success: response.success,
                    payload: response.payload.map(|p| p.to_vec()),
                    error: response.error,
                    sender_id: sender.to_hex(),
                })
                .await;
            }
            InnerType::FileTransfer | InnerType::VerifyChallenge | InnerType::VerifyResponse => {
                tracing::debug!(sender = %sender, ?inner, "reserved inner type, ignoring");
            }
        }
    }

    // ── Outbound construction ─────────────────────────────────────────────────

    /// Frame and sign an outgoing packet: our id, wall-clock timestamp,
    /// configured initial ttl, Ed25519 signature over the signed region.
    fn build_frame(
        &self,
        packet_type: PacketType,
        recipient: Option<PeerId>,
        payload: Bytes,
    ) -> Result<Vec<u8>, MeshError> {
        let mut packet = Packet::new(
            packet_type,
            self.identity.short_id,
            recipient,
            now_ms(),
            payload,
        );
        packet.ttl = self.config.relay.initial_ttl;
        packet.signature = Some(self.identity.signing.sign(&packet.signed_region()));
        Ok(packet.encode()?)
    }

    /// Write a frame to every active neighbor. Flooding handles the rest.
    async fn broadcast_frame(&self, frame: Bytes) {
        for neighbor in self.link.neighbors() {
            if let Err(e) = self.link.write(neighbor, frame.clone()).await {
                tracing::debug!(neighbor, error = %e, "broadcast write failed");
            }
        }
    }

    /// Announce presence and public keys, to one neighbor or to all.
    async fn send_announce(&self, only: Option<LinkHandle>) -> Result<(), MeshError> {
        let announce = Announce {
            nickname: self.nickname.read().expect("nickname lock poisoned").clone(),
            static_key: self.identity.keypair.public,
            signing_key: self.identity.signing.public,
        };
        let frame = Bytes::from(self.build_frame(
            PacketType::Announce,
            None,
            announce.encode().map_err(MeshError::Payload)?,
        )?);
        match only {
            Some(neighbor) => {
                if let Err(e) = self.link.write(neighbor, frame).await {
                    tracing::debug!(neighbor, error = %e, "announce write failed");
                }
            }
            None => self.broadcast_frame(frame).await,
        }
        Ok(())
    }

    async fn send_plain_broadcast(&self, content: String) -> Result<(), MeshError> {
        let frame = self.build_frame(PacketType::PlainMessage, None, Bytes::from(content))?;
        self.broadcast_frame(Bytes::from(frame)).await;
        Ok(())
    }

    /// Offer our static key to a peer so both sides can derive the session.
    async fn send_handshake(&mut self, recipient: PeerId) -> Result<(), MeshError> {
        let frame = self.build_frame(
            PacketType::Handshake,
            Some(recipient),
            Bytes::copy_from_slice(&self.identity.keypair.public),
        )?;
        self.broadcast_frame(Bytes::from(frame)).await;
        self.handshakes_sent.insert(recipient);
        Ok(())
    }

    async fn send_private(
        &mut self,
        recipient: PeerId,
        content: String,
    ) -> Result<SendOutcome, MeshError> {
        if !self.sessions.has(&recipient) {
            // No session yet: offer a handshake. The caller retries the
            // message once the session exists.
            self.send_handshake(recipient).await?;
            return Ok(SendOutcome::HandshakeSent);
        }

        let message_id = content_id(&self.identity.short_id, now_ms(), content.as_bytes());
        let message = PrivateMessage {
            message_id: message_id.clone(),
            content,
        };
        let body = message.encode().map_err(MeshError::Payload)?;
        self.send_sealed(recipient, InnerType::PrivateMessage, &body)
            .await?;
        Ok(SendOutcome::Sent { message_id })
    }

    /// Seal one inner payload and send it, chunking when the ciphertext
    /// exceeds the single-envelope limit.
    async fn send_sealed(
        &mut self,
        recipient: PeerId,
        inner: InnerType,
        body: &[u8],
    ) -> Result<(), MeshError> {
        let plaintext = frame_inner(inner, body);
        let sealed = match self.sessions.seal_for(&recipient, &plaintext) {
            Some(Ok(sealed)) => sealed,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(MeshError::NoSession(recipient)),
        };

        if sealed.len() <= self.config.transfer.single_envelope_max {
            let frame = self.build_frame(
                PacketType::EncryptedEnvelope,
                Some(recipient),
                Bytes::from(sealed),
            )?;
            self.broadcast_frame(Bytes::from(frame)).await;
            return Ok(());
        }

        // Oversized: announce the transfer, then pace the fragments out.
        let tx_id = content_id(&self.identity.short_id, now_ms(), &sealed);
        let (metadata, fragments) = chunker::split_ciphertext(&tx_id, &sealed);
        tracing::debug!(
            id = %tx_id,
            bytes = metadata.total_size,
            chunks = metadata.total_chunks,
            "chunking oversized envelope"
        );
        let metadata_frame = self.build_frame(
            PacketType::OpaqueAppMessageMetadata,
            Some(recipient),
            metadata.encode().map_err(MeshError::Payload)?,
        )?;
        let fragment_frames = self.encode_fragments(&fragments, Some(recipient))?;
        self.broadcast_frame(Bytes::from(metadata_frame)).await;
        self.spawn_paced_emission(fragment_frames);
        Ok(())
    }

    async fn send_app_message(
        &mut self,
        recipient: PeerId,
        kind: String,
        body: Vec<u8>,
    ) -> Result<String, MeshError> {
        let id = content_id(&self.identity.short_id, now_ms(), &body);
        let message = AppMessage {
            id: id.clone(),
            kind,
            body: Bytes::from(body),
        };
        let encoded = message.encode().map_err(MeshError::Payload)?;
        self.send_sealed(recipient, InnerType::AppMessage, &encoded)
            .await?;
        Ok(id)
    }

    async fn send_app_response(
        &mut self,
        recipient: PeerId,
        id: String,
        success: bool,
        payload: Option<Vec<u8>>,
        error: Option<String>,
    ) -> Result<(), MeshError> {
        let response = AppResponse {
            id,
            success,
            payload: payload.map(Bytes::from),
            error,
        };
        let encoded = response.encode().map_err(MeshError::Payload)?;
        self.send_sealed(recipient, InnerType::AppResponse, &encoded)
            .await
    }

    async fn send_read_receipt(
        &mut self,
        recipient: PeerId,
        message_id: String,
    ) -> Result<(), MeshError> {
        self.send_inner(recipient, InnerType::ReadReceipt, message_id.as_bytes())
            .await
    }

    /// Seal a small fixed inner payload. Errors if no session exists.
    async fn send_inner(
        &mut self,
        recipient: PeerId,
        inner: InnerType,
        body: &[u8],
    ) -> Result<(), MeshError> {
        self.send_sealed(recipient, inner, body).await
    }

    async fn send_file(
        &mut self,
        recipient: Option<PeerId>,
        file_name: String,
        mime_type: String,
        data: Vec<u8>,
    ) -> Result<String, MeshError> {
        if data.len() > u32::MAX as usize {
            return Err(MeshError::Transfer(format!(
                "{file_name} is too large to describe on the wire"
            )));
        }
        let transfer_id = content_id(&self.identity.short_id, now_ms(), file_name.as_bytes());
        let (metadata, fragments) = chunker::split_file(&transfer_id, &file_name, &mime_type, &data);
        tracing::info!(
            id = %transfer_id,
            file = %file_name,
            bytes = metadata.file_size,
            chunks = metadata.total_chunks,
            "sending file"
        );

        let metadata_frame = self.build_frame(
            PacketType::FileTransferMetadata,
            recipient,
            metadata.encode().map_err(MeshError::Payload)?,
        )?;
        let fragment_frames = self.encode_fragments(&fragments, recipient)?;

        // Metadata goes out before the command resolves; fragments follow
        // on their own task so pacing never blocks dispatch.
        self.broadcast_frame(Bytes::from(metadata_frame)).await;
        self.spawn_paced_emission(fragment_frames);
        Ok(transfer_id)
    }

    fn encode_fragments(
        &self,
        fragments: &[Fragment],
        recipient: Option<PeerId>,
    ) -> Result<Vec<Bytes>, MeshError> {
        fragments
            .iter()
            .map(|fragment| {
                let payload = fragment.encode().map_err(MeshError::Payload)?;
                Ok(Bytes::from(self.build_frame(
                    PacketType::Fragment,
                    recipient,
                    payload,
                )?))
            })
            .collect()
    }

    /// Emit pre-built fragment frames, pacing before each one so slow
    /// radios keep up and the metadata packet wins the race to the
    /// receiver. Stops early on shutdown.
    fn spawn_paced_emission(&self, frames: Vec<Bytes>) {
        let link = self.link.clone();
        let pacing = Duration::from_millis(self.config.transfer.pacing_ms);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            for frame in frames {
                tokio::select! {
                    _ = tokio::time::sleep(pacing) => {}
                    _ = shutdown.recv() => return,
                }
                for neighbor in link.neighbors() {
                    if let Err(e) = link.write(neighbor, frame.clone()).await {
                        tracing::debug!(neighbor, error = %e, "fragment write failed");
                    }
                }
            }
        });
    }
}

/// Reject a command that needs a running node.
fn refuse(command: Command) {
    match command {
        Command::SetNickname { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::SendBroadcast { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::SendPrivate { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::SendFile { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::SendAppMessage { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::RespondApp { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::SendReadReceipt { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::VerifyPeer { reply, .. } => {
            let _ = reply.send(Err(MeshError::NotRunning));
        }
        Command::Start { .. } | Command::Stop { .. } => unreachable!("handled above"),
    }
}
