//! Cryptographic primitives for weft.
//!
//! Provides four things:
//!   1. X25519 static keypairs and the pairwise session-key derivation
//!      (raw key agreement, then HKDF-SHA256 with the "mesh-encryption"
//!      context string)
//!   2. ChaCha20-Poly1305 authenticated encryption for envelope payloads
//!   3. Ed25519 packet signing
//!   4. SHA-256 fingerprints and the 8-byte short identifier
//!
//! All private key material is ZeroizeOnDrop — wiped from memory when
//! dropped. There is no unsafe code in this module.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::wire::PeerId;

/// Context string fed to the session KDF. Part of the protocol; both sides
/// of a handshake must use the same bytes or their keys will not match.
const KDF_CONTEXT: &[u8] = b"mesh-encryption";

/// AEAD nonce size: 96 bits, prefixed to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag size: 128 bits, appended by the AEAD.
pub const TAG_LEN: usize = 16;

// ── Hashing ───────────────────────────────────────────────────────────────────

/// SHA-256 of a byte slice. Used for fingerprints and short identifiers.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    digest.into()
}

/// The 8-byte short identifier: first 8 bytes of SHA-256 of the static
/// public key. Deterministic for a given keypair.
pub fn short_id(static_public: &[u8; 32]) -> PeerId {
    let digest = sha256(static_public);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    PeerId(id)
}

/// Full hex fingerprint of a public key, for out-of-band verification.
pub fn fingerprint(public: &[u8; 32]) -> String {
    hex::encode(sha256(public))
}

/// Deterministic content-derived identifier for messages and transfers.
/// Hex of the first 16 bytes of BLAKE3(sender || timestamp || content).
pub fn content_id(sender: &PeerId, timestamp_ms: u64, content: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(sender.as_bytes());
    hasher.update(&timestamp_ms.to_be_bytes());
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(&digest.as_bytes()[..16])
}

// ── Key-agreement keypair ─────────────────────────────────────────────────────

/// A node's long-term static X25519 keypair.
///
/// Generated once per node and persisted through the secret store. The
/// public key appears in every announce; the private key never leaves
/// this struct.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Private key — zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; 32]>,
    /// Public key — announced to the mesh.
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Serialize the private key for the secret store.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// The node's short identifier, derived from the public key.
    pub fn short_id(&self) -> PeerId {
        short_id(&self.public)
    }

    /// Agree on a session key with a peer's static public key.
    ///
    /// shared = X25519(our_private, their_public);
    /// key    = HKDF-SHA256(shared, info = "mesh-encryption"), 32 bytes.
    ///
    /// Symmetric by construction: both sides derive the same key.
    pub fn derive_session_key(
        &self,
        their_public: &[u8; 32],
    ) -> Result<SessionKey, CryptoError> {
        let secret = StaticSecret::from(*self.private_bytes());
        let shared = secret.diffie_hellman(&PublicKey::from(*their_public));
        // All-zero shared secret means a low-order peer key.
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::BadPublicKey);
        }

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KDF_CONTEXT, &mut key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(SessionKey::from_bytes(key))
    }
}

// ── Signing keypair ───────────────────────────────────────────────────────────

/// A node's long-term Ed25519 signing keypair.
pub struct SigningKeypair {
    signing: SigningKey,
    /// Public verification key — announced to the mesh.
    pub public: [u8; 32],
}

impl SigningKeypair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut rand::thread_rng());
        let public = signing.verifying_key().to_bytes();
        Self { signing, public }
    }

    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&private_bytes);
        let public = signing.verifying_key().to_bytes();
        Self { signing, public }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// Sign a byte string, producing the 64-byte wire signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

/// Verify a 64-byte signature against a peer's signing public key.
pub fn verify_signature(
    public: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::BadPublicKey)?;
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::BadSignature)
}

// ── Session key ───────────────────────────────────────────────────────────────

/// A derived 32-byte symmetric key for one peer, ready for envelope
/// encryption. Never persisted; dropped (and zeroized) on leave.
///
/// Wire format per envelope payload:
///   [12-byte random nonce] [ChaCha20-Poly1305 ciphertext + 16-byte tag]
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; 32],
}

impl SessionKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt plaintext under this key with a fresh random nonce.
    /// Output is nonce || ciphertext-with-tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Aead)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt nonce || ciphertext-with-tag. Fails on truncation, a wrong
    /// key, or any tampering with nonce or ciphertext.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Aead)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("peer public key is not a valid curve point")]
    BadPublicKey,

    #[error("session key derivation failed")]
    KeyDerivation,

    #[error("authenticated decryption failed")]
    Aead,

    #[error("ciphertext too short (need at least {} bytes)", NONCE_LEN + TAG_LEN)]
    TooShort,

    #[error("signature verification failed")]
    BadSignature,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
