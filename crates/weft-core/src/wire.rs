//! Weft wire format — the on-air packet all mesh traffic travels in.
//!
//! These types ARE the protocol. Every field, every size, every byte order
//! is part of the wire format and must not change without a version bump.
//!
//! The fixed header is #[repr(C)] with zerocopy big-endian fields for
//! deterministic layout and allocation-free parsing. There is no unsafe
//! code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header size in bytes: version | type | ttl | sender | recipient |
/// timestamp | payload length.
pub const HEADER_LEN: usize = 29;

/// Ed25519 signature size when present.
pub const SIGNATURE_LEN: usize = 64;

/// Hop budget given to every locally originated packet.
pub const INITIAL_TTL: u8 = 7;

/// Maximum payload size. The length field is a u16.
pub const MAX_PAYLOAD: usize = 65535;

/// Byte offset of the ttl field inside an encoded frame.
/// Relays rewrite this single byte in place.
pub const TTL_OFFSET: usize = 2;

// ── Peer Identifier ───────────────────────────────────────────────────────────

/// The 8-byte node handle: the first 8 bytes of SHA-256 of the node's
/// static public key. The all-zero value is the broadcast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 8]);

impl PeerId {
    /// The broadcast address. Never a valid node identifier.
    pub const BROADCAST: PeerId = PeerId([0u8; 8]);

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0u8; 8]
    }

    /// Hex form used in dedup keys, events, and logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 16-character hex identifier.
    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let raw = hex::decode(s).map_err(|_| WireError::BadPeerId)?;
        let bytes: [u8; 8] = raw.try_into().map_err(|_| WireError::BadPeerId)?;
        Ok(PeerId(bytes))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 8]> for PeerId {
    fn from(bytes: [u8; 8]) -> Self {
        PeerId(bytes)
    }
}

// ── Packet Type ───────────────────────────────────────────────────────────────

/// Outer packet type. Routed on by the dispatcher before any payload parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Presence + public keys, feeds the peer directory.
    Announce = 0x01,
    /// Plaintext broadcast chat message, payload is UTF-8.
    PlainMessage = 0x02,
    /// Graceful departure. Removes the peer and its session.
    Leave = 0x03,
    /// Raw static key-agreement public key.
    Handshake = 0x04,
    /// Authenticated-encrypted container for a typed inner payload.
    EncryptedEnvelope = 0x05,
    /// TLV metadata opening a file transfer.
    FileTransferMetadata = 0x06,
    /// One chunk of a larger payload under a transfer id.
    Fragment = 0x07,
    /// Reserved. Decoded and ignored.
    RequestSync = 0x08,
    /// TLV metadata opening an oversized encrypted payload transfer.
    OpaqueAppMessageMetadata = 0x09,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Announce),
            0x02 => Ok(PacketType::PlainMessage),
            0x03 => Ok(PacketType::Leave),
            0x04 => Ok(PacketType::Handshake),
            0x05 => Ok(PacketType::EncryptedEnvelope),
            0x06 => Ok(PacketType::FileTransferMetadata),
            0x07 => Ok(PacketType::Fragment),
            0x08 => Ok(PacketType::RequestSync),
            0x09 => Ok(PacketType::OpaqueAppMessageMetadata),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

// ── Packet Header ─────────────────────────────────────────────────────────────

/// The fixed 29-byte header preceding every payload.
///
/// Multi-byte integers are big-endian on the wire. An all-zero recipient
/// means broadcast.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: u8,
    pub ttl: u8,
    pub sender: [u8; 8],
    pub recipient: [u8; 8],
    pub timestamp_ms: U64<BigEndian>,
    pub payload_len: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 29]);

// ── Packet ────────────────────────────────────────────────────────────────────

/// A decoded mesh packet.
///
/// `recipient` is `None` for broadcast (encoded as all-zero bytes).
/// The signature covers version | type | sender | recipient (when present) |
/// timestamp | payload | ttl. Because ttl is rewritten on every hop, a
/// signature verifies only on packets that have not been relayed; see
/// `signed_region`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub ttl: u8,
    pub sender: PeerId,
    pub recipient: Option<PeerId>,
    pub timestamp_ms: u64,
    pub payload: Bytes,
    pub signature: Option<[u8; 64]>,
}

impl Packet {
    /// Build an unsigned packet with the standard initial ttl.
    pub fn new(
        packet_type: PacketType,
        sender: PeerId,
        recipient: Option<PeerId>,
        timestamp_ms: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            packet_type,
            ttl: INITIAL_TTL,
            sender,
            recipient,
            timestamp_ms,
            payload,
            signature: None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// The byte string the signature is computed over.
    ///
    /// Field order: version | type | sender | recipient (only when present) |
    /// timestamp (big-endian) | payload | ttl. The ttl at signing time is
    /// included, so relayed copies no longer verify; receivers treat
    /// signatures as meaningful only from direct neighbors.
    pub fn signed_region(&self) -> Vec<u8> {
        let mut region = Vec::with_capacity(2 + 16 + 8 + self.payload.len() + 1);
        region.push(PROTOCOL_VERSION);
        region.push(self.packet_type.into());
        region.extend_from_slice(&self.sender.0);
        if let Some(recipient) = &self.recipient {
            region.extend_from_slice(&recipient.0);
        }
        region.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        region.extend_from_slice(&self.payload);
        region.push(self.ttl);
        region
    }

    /// Serialize to the on-air frame: header, payload, optional signature.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: self.packet_type.into(),
            ttl: self.ttl,
            sender: self.sender.0,
            recipient: self.recipient.map(|r| r.0).unwrap_or([0u8; 8]),
            timestamp_ms: U64::new(self.timestamp_ms),
            payload_len: U16::new(self.payload.len() as u16),
        };

        let mut frame =
            Vec::with_capacity(HEADER_LEN + self.payload.len() + SIGNATURE_LEN);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(&self.payload);
        if let Some(sig) = &self.signature {
            frame.extend_from_slice(sig);
        }
        Ok(frame)
    }

    /// Parse an on-air frame.
    ///
    /// Requires the full 29-byte header and a payload no longer than the
    /// remaining buffer. Exactly 64 trailing bytes after the payload are a
    /// signature; any other remainder means the signature is absent.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                need: HEADER_LEN,
                have: frame.len(),
            });
        }

        let header = PacketHeader::read_from_prefix(frame)
            .ok_or(WireError::Truncated {
                need: HEADER_LEN,
                have: frame.len(),
            })?;

        if header.version != PROTOCOL_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }

        let packet_type = PacketType::try_from(header.packet_type)?;

        let payload_len = header.payload_len.get() as usize;
        if HEADER_LEN + payload_len > frame.len() {
            return Err(WireError::Truncated {
                need: HEADER_LEN + payload_len,
                have: frame.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + payload_len]);

        let trailing = &frame[HEADER_LEN + payload_len..];
        let signature = if trailing.len() == SIGNATURE_LEN {
            let mut sig = [0u8; 64];
            sig.copy_from_slice(trailing);
            Some(sig)
        } else {
            None
        };

        let recipient_bytes = header.recipient;
        let recipient = if recipient_bytes == [0u8; 8] {
            None
        } else {
            Some(PeerId(recipient_bytes))
        };

        Ok(Self {
            packet_type,
            ttl: header.ttl,
            sender: PeerId(header.sender),
            recipient,
            timestamp_ms: header.timestamp_ms.get(),
            payload,
            signature,
        })
    }
}

/// Rewrite the ttl byte of an already-encoded frame.
///
/// Relays use this instead of re-encoding: the rest of the frame, signature
/// included, is forwarded byte for byte.
pub fn patch_ttl(frame: &mut [u8], ttl: u8) {
    debug_assert!(frame.len() >= HEADER_LEN);
    frame[TTL_OFFSET] = ttl;
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("peer id is not 8 hex-encoded bytes")]
    BadPeerId,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
