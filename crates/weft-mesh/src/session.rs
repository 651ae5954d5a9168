//! Session table — derived symmetric keys, one per peer.
//!
//! Keys appear when a handshake completes and vanish on leave or stop.
//! Nothing here is persisted. Writes happen only on the dispatcher task;
//! the DashMap allows `has_session` queries from the host without
//! blocking dispatch.

use dashmap::DashMap;
use std::sync::Arc;

use weft_core::crypto::{CryptoError, SessionKey};
use weft_core::wire::PeerId;

/// The shared session table. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<DashMap<PeerId, SessionKey>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the key derived from a completed handshake.
    /// Replaces any previous key for the peer.
    pub fn establish(&self, peer: PeerId, key: SessionKey) {
        self.inner.insert(peer, key);
    }

    /// Drop the session on leave.
    pub fn remove(&self, peer: &PeerId) -> bool {
        self.inner.remove(peer).is_some()
    }

    pub fn has(&self, peer: &PeerId) -> bool {
        self.inner.contains_key(peer)
    }

    /// Encrypt envelope plaintext for a peer. `None` when no session exists;
    /// the caller decides whether to fall back to a handshake.
    pub fn seal_for(&self, peer: &PeerId, plaintext: &[u8]) -> Option<Result<Vec<u8>, CryptoError>> {
        self.inner.get(peer).map(|key| key.seal(plaintext))
    }

    /// Decrypt an envelope payload from a peer. `Err(NoSession)` and AEAD
    /// failures are both expected on a lossy mesh and are dropped silently
    /// by the dispatcher.
    pub fn open_from(&self, peer: &PeerId, sealed: &[u8]) -> Result<Vec<u8>, SessionError> {
        match self.inner.get(peer) {
            Some(key) => key.open(sealed).map_err(SessionError::Crypto),
            None => Err(SessionError::NoSession(*peer)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every session. Used by stop().
    pub fn clear(&self) {
        self.inner.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session with {0}")]
    NoSession(PeerId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
