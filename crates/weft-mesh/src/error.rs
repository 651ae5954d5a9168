//! Error taxonomy surfaced by the command surface.
//!
//! Inbound packet problems never appear here: malformed packets are logged
//! and dropped, and undecryptable envelopes are dropped silently. These
//! variants reach the host only as results of its own commands.

use thiserror::Error;

use weft_core::identity::IdentityError;
use weft_core::tlv::TlvError;
use weft_core::wire::{PeerId, WireError};

use crate::link::LinkError;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("codec: {0}")]
    Codec(#[from] WireError),

    #[error("payload: {0}")]
    Payload(#[from] TlvError),

    #[error("crypto: {0}")]
    Crypto(#[from] weft_core::crypto::CryptoError),

    #[error("handshake with {peer}: {reason}")]
    Handshake { peer: PeerId, reason: String },

    #[error("link: {0}")]
    Link(#[from] LinkError),

    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("transfer: {0}")]
    Transfer(String),

    #[error("no session with {0}; send a handshake first")]
    NoSession(PeerId),

    #[error("node is not running")]
    NotRunning,

    #[error("node is shutting down")]
    ShuttingDown,
}
