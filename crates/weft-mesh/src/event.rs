//! Host-facing events.
//!
//! Everything the mesh wants the host application to see arrives as one
//! [`MeshEvent`] on a bounded channel handed out at node construction.
//! Peer identifiers are hex strings here: events cross the host bridge,
//! which speaks strings, not wire types.

use serde::Serialize;

use crate::peer::PeerSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum MeshEvent {
    /// The peer directory changed: a peer appeared, updated, or left.
    PeerListUpdated { peers: Vec<PeerSnapshot> },

    /// A chat message arrived, broadcast or private.
    MessageReceived {
        id: String,
        sender_id: String,
        sender_nickname: String,
        content: String,
        is_private: bool,
        timestamp_ms: u64,
    },

    /// A chunked file completed reassembly. `data` is base64.
    FileReceived {
        file_name: String,
        file_size: u32,
        mime_type: String,
        sender_id: String,
        data: String,
        timestamp_ms: u64,
    },

    /// A decrypted application payload arrived.
    AppMessageReceived {
        id: String,
        kind: String,
        body: Vec<u8>,
        sender_id: String,
    },

    /// A peer answered one of our application payloads.
    AppResponseReceived {
        id: String,
        success: bool,
        payload: Option<Vec<u8>>,
        error: Option<String>,
        sender_id: String,
    },

    /// The set of live radio links changed.
    ConnectionStateChanged { connected_neighbors: usize },

    /// A peer read one of our private messages.
    ReadReceipt { message_id: String, sender_id: String },

    /// A peer's node decrypted one of our private messages.
    DeliveryAck { message_id: String, sender_id: String },

    /// A non-fatal failure the host should know about.
    Error { code: String, message: String },
}
