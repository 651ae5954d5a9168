//! Peer directory — every node we have heard announce itself.
//!
//! Entries are written only by the dispatcher task; the DashMap exists so
//! host queries can read without stopping the dispatcher. A link drop
//! marks peers disconnected but never deletes them: the same peer may
//! come back through another neighbor. Only an explicit leave removes an
//! entry.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use weft_core::payload::Announce;
use weft_core::wire::PeerId;

/// Directory entry for one known peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    pub nickname: String,
    pub is_connected: bool,
    /// Wall-clock ms of the last packet that updated this entry.
    pub last_seen_ms: u64,
    /// Static key-agreement public key, learned from announce.
    pub static_key: Option<[u8; 32]>,
    /// Signing public key, learned from announce.
    pub signing_key: Option<[u8; 32]>,
    /// Out-of-band verification flag. Never set by the protocol itself.
    pub verified: bool,
}

/// Host-facing projection of a peer entry. Identifier is hex.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub id: String,
    pub nickname: String,
    pub is_connected: bool,
    pub last_seen_ms: u64,
    pub verified: bool,
}

impl From<&PeerEntry> for PeerSnapshot {
    fn from(entry: &PeerEntry) -> Self {
        Self {
            id: entry.id.to_hex(),
            nickname: entry.nickname.clone(),
            is_connected: entry.is_connected,
            last_seen_ms: entry.last_seen_ms,
            verified: entry.verified,
        }
    }
}

/// The shared peer table. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<DashMap<PeerId, PeerEntry>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer from its announce payload.
    pub fn upsert_from_announce(&self, id: PeerId, announce: &Announce, now_ms: u64) {
        match self.inner.get_mut(&id) {
            Some(mut entry) => {
                entry.nickname = announce.nickname.clone();
                entry.static_key = Some(announce.static_key);
                entry.signing_key = Some(announce.signing_key);
                entry.is_connected = true;
                entry.last_seen_ms = now_ms;
            }
            None => {
                self.inner.insert(
                    id,
                    PeerEntry {
                        id,
                        nickname: announce.nickname.clone(),
                        is_connected: true,
                        last_seen_ms: now_ms,
                        static_key: Some(announce.static_key),
                        signing_key: Some(announce.signing_key),
                        verified: false,
                    },
                );
            }
        }
    }

    /// Record the static key observed in a handshake, without touching the
    /// rest of the entry. Creates a nameless entry if the peer has not
    /// announced yet.
    pub fn learn_static_key(&self, id: PeerId, static_key: [u8; 32], now_ms: u64) {
        match self.inner.get_mut(&id) {
            Some(mut entry) => {
                if entry.static_key.is_none() {
                    entry.static_key = Some(static_key);
                }
                entry.last_seen_ms = now_ms;
            }
            None => {
                self.inner.insert(
                    id,
                    PeerEntry {
                        id,
                        nickname: id.to_hex(),
                        is_connected: true,
                        last_seen_ms: now_ms,
                        static_key: Some(static_key),
                        signing_key: None,
                        verified: false,
                    },
                );
            }
        }
    }

    /// Mark one peer disconnected. Returns true if the entry changed.
    pub fn mark_disconnected(&self, id: &PeerId) -> bool {
        match self.inner.get_mut(id) {
            Some(mut entry) if entry.is_connected => {
                entry.is_connected = false;
                true
            }
            _ => false,
        }
    }

    /// Remove a peer entirely (explicit leave).
    pub fn remove(&self, id: &PeerId) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Flip the out-of-band verification flag.
    pub fn set_verified(&self, id: &PeerId, verified: bool) -> bool {
        match self.inner.get_mut(id) {
            Some(mut entry) => {
                entry.verified = verified;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerEntry> {
        self.inner.get(id).map(|entry| entry.clone())
    }

    /// Nickname for events; falls back to the hex identifier.
    pub fn nickname_or_hex(&self, id: &PeerId) -> String {
        self.inner
            .get(id)
            .map(|entry| entry.nickname.clone())
            .unwrap_or_else(|| id.to_hex())
    }

    /// Snapshot of every entry, for queries and peer-list events.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self
            .inner
            .iter()
            .map(|entry| PeerSnapshot::from(entry.value()))
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every entry. Used by stop().
    pub fn clear(&self) {
        self.inner.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
