//! Node identity — the two long-term keypairs and their persistence.
//!
//! An identity is created once on first run, written to the host's secret
//! store, and loaded on every start after that. The short identifier is
//! derived from the static public key and therefore survives restarts.

use thiserror::Error;

use crate::crypto::{fingerprint, Keypair, SigningKeypair};
use crate::wire::PeerId;

/// Secret-store slot for the static key-agreement private key.
pub const PRIVATE_KEY_SLOT: &str = "mesh.privateKey";

/// Secret-store slot for the signing private key.
pub const SIGNING_KEY_SLOT: &str = "mesh.signingKey";

/// Nickname used until the host sets one.
pub const DEFAULT_NICKNAME: &str = "anon";

// ── Secret store ──────────────────────────────────────────────────────────────

/// Key-value secret storage supplied by the host platform.
///
/// The mesh core stores exactly two 32-byte values, under
/// [`PRIVATE_KEY_SLOT`] and [`SIGNING_KEY_SLOT`]. Implementations should
/// keep values out of world-readable storage.
pub trait SecretStore: Send + Sync {
    fn load(&self, slot: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;
    fn store(&self, slot: &str, value: &[u8]) -> Result<(), SecretStoreError>;
}

/// Storage failure reported by a [`SecretStore`] implementation.
#[derive(Debug, Error)]
#[error("secret store: {0}")]
pub struct SecretStoreError(pub String);

/// In-memory secret store. Nothing survives the process; intended for
/// tests and ephemeral nodes.
#[derive(Default)]
pub struct MemorySecretStore {
    slots: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self, slot: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        Ok(self.slots.lock().expect("secret store poisoned").get(slot).cloned())
    }

    fn store(&self, slot: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        self.slots
            .lock()
            .expect("secret store poisoned")
            .insert(slot.to_owned(), value.to_vec());
        Ok(())
    }
}

// ── Node identity ─────────────────────────────────────────────────────────────

/// The local node: static keypair, signing keypair, derived short id,
/// and a mutable nickname.
pub struct NodeIdentity {
    pub keypair: Keypair,
    pub signing: SigningKeypair,
    pub short_id: PeerId,
    pub nickname: String,
}

impl NodeIdentity {
    /// Load the identity from the secret store, generating and persisting
    /// a fresh one if either slot is empty.
    pub fn load_or_generate(
        store: &dyn SecretStore,
        nickname: Option<&str>,
    ) -> Result<Self, IdentityError> {
        let keypair = match store.load(PRIVATE_KEY_SLOT)? {
            Some(raw) => Keypair::from_private(key_material(PRIVATE_KEY_SLOT, raw)?),
            None => {
                let keypair = Keypair::generate();
                store.store(PRIVATE_KEY_SLOT, keypair.private_bytes().as_slice())?;
                keypair
            }
        };

        let signing = match store.load(SIGNING_KEY_SLOT)? {
            Some(raw) => SigningKeypair::from_private(key_material(SIGNING_KEY_SLOT, raw)?),
            None => {
                let signing = SigningKeypair::generate();
                store.store(SIGNING_KEY_SLOT, signing.private_bytes().as_slice())?;
                signing
            }
        };

        let short_id = keypair.short_id();
        Ok(Self {
            keypair,
            signing,
            short_id,
            nickname: nickname.unwrap_or(DEFAULT_NICKNAME).to_owned(),
        })
    }

    /// Full hex fingerprint of the static public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.keypair.public)
    }
}

fn key_material(slot: &str, raw: Vec<u8>) -> Result<[u8; 32], IdentityError> {
    let len = raw.len();
    raw.try_into()
        .map_err(|_| IdentityError::BadKeyMaterial {
            slot: slot.to_owned(),
            len,
        })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Store(#[from] SecretStoreError),

    #[error("slot {slot} holds {len} bytes, expected a 32-byte key")]
    BadKeyMaterial { slot: String, len: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
