//! Typed payload shapes carried inside packets.
//!
//! Each shape owns its TLV tag space. Decoders skip unknown tags and fail
//! only on malformed records or missing required fields, so payloads can
//! grow fields without breaking old nodes.

use bytes::Bytes;

use crate::tlv::{as_u32, as_utf8, TlvError, TlvReader, TlvWriter};

// ── Inner payload type ────────────────────────────────────────────────────────

/// First plaintext byte inside an encrypted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InnerType {
    PrivateMessage = 0x01,
    ReadReceipt = 0x02,
    DeliveryAck = 0x03,
    /// Reserved. Files travel as outer types 0x06/0x07.
    FileTransfer = 0x04,
    /// Reserved.
    VerifyChallenge = 0x05,
    /// Reserved.
    VerifyResponse = 0x06,
    AppMessage = 0x07,
    AppResponse = 0x08,
}

/// Raised when envelope plaintext opens with an unassigned type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown inner payload type: 0x{0:02x}")]
pub struct UnknownInnerType(pub u8);

impl TryFrom<u8> for InnerType {
    type Error = UnknownInnerType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(InnerType::PrivateMessage),
            0x02 => Ok(InnerType::ReadReceipt),
            0x03 => Ok(InnerType::DeliveryAck),
            0x04 => Ok(InnerType::FileTransfer),
            0x05 => Ok(InnerType::VerifyChallenge),
            0x06 => Ok(InnerType::VerifyResponse),
            0x07 => Ok(InnerType::AppMessage),
            0x08 => Ok(InnerType::AppResponse),
            other => Err(UnknownInnerType(other)),
        }
    }
}

impl From<InnerType> for u8 {
    fn from(t: InnerType) -> u8 {
        t as u8
    }
}

/// Prefix a typed body with its inner-type byte, producing envelope plaintext.
pub fn frame_inner(inner: InnerType, body: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(1 + body.len());
    plaintext.push(inner.into());
    plaintext.extend_from_slice(body);
    plaintext
}

// ── Announce ──────────────────────────────────────────────────────────────────

/// Presence payload: nickname and both public keys.
/// Tags: 0x01 nickname utf8, 0x02 static public key, 0x03 signing public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub nickname: String,
    pub static_key: [u8; 32],
    pub signing_key: [u8; 32],
}

impl Announce {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.nickname)?
            .field(0x02, &self.static_key)?
            .field(0x03, &self.signing_key)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut nickname = None;
        let mut static_key = None;
        let mut signing_key = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => nickname = Some(as_utf8(tag, value)?),
                0x02 => static_key = Some(key_bytes(tag, value)?),
                0x03 => signing_key = Some(key_bytes(tag, value)?),
                _ => {}
            }
        }
        Ok(Self {
            nickname: nickname.ok_or(TlvError::MissingField(0x01))?,
            static_key: static_key.ok_or(TlvError::MissingField(0x02))?,
            signing_key: signing_key.ok_or(TlvError::MissingField(0x03))?,
        })
    }
}

fn key_bytes(tag: u8, value: &[u8]) -> Result<[u8; 32], TlvError> {
    value
        .try_into()
        .map_err(|_| TlvError::BadWidth { tag, len: value.len() })
}

// ── Private message ───────────────────────────────────────────────────────────

/// Envelope body for one-to-one chat.
/// Tags: 0x01 message id utf8, 0x02 content utf8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub message_id: String,
    pub content: String,
}

impl PrivateMessage {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.message_id)?
            .utf8(0x02, &self.content)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut message_id = None;
        let mut content = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => message_id = Some(as_utf8(tag, value)?),
                0x02 => content = Some(as_utf8(tag, value)?),
                _ => {}
            }
        }
        Ok(Self {
            message_id: message_id.ok_or(TlvError::MissingField(0x01))?,
            content: content.ok_or(TlvError::MissingField(0x02))?,
        })
    }
}

// ── File transfer metadata ────────────────────────────────────────────────────

/// Opens a file transfer: everything the receiver needs before chunk one.
/// Tags: 0x01 transfer id utf8, 0x02 file name utf8, 0x03 file size u32,
/// 0x04 mime type utf8, 0x05 total chunks u32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u32,
    pub mime_type: String,
    pub total_chunks: u32,
}

impl FileMetadata {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.transfer_id)?
            .utf8(0x02, &self.file_name)?
            .u32(0x03, self.file_size)?
            .utf8(0x04, &self.mime_type)?
            .u32(0x05, self.total_chunks)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut transfer_id = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut mime_type = None;
        let mut total_chunks = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => transfer_id = Some(as_utf8(tag, value)?),
                0x02 => file_name = Some(as_utf8(tag, value)?),
                0x03 => file_size = Some(as_u32(tag, value)?),
                0x04 => mime_type = Some(as_utf8(tag, value)?),
                0x05 => total_chunks = Some(as_u32(tag, value)?),
                _ => {}
            }
        }
        Ok(Self {
            transfer_id: transfer_id.ok_or(TlvError::MissingField(0x01))?,
            file_name: file_name.ok_or(TlvError::MissingField(0x02))?,
            file_size: file_size.ok_or(TlvError::MissingField(0x03))?,
            mime_type: mime_type.ok_or(TlvError::MissingField(0x04))?,
            total_chunks: total_chunks.ok_or(TlvError::MissingField(0x05))?,
        })
    }
}

// ── Fragment ──────────────────────────────────────────────────────────────────

/// One chunk of a larger payload, file or ciphertext alike.
/// Tags: 0x01 id utf8, 0x02 chunk index u32, 0x03 total chunks u32,
/// 0x04 chunk data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: Bytes,
}

impl Fragment {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.id)?
            .u32(0x02, self.chunk_index)?
            .u32(0x03, self.total_chunks)?
            .field(0x04, &self.data)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut id = None;
        let mut chunk_index = None;
        let mut total_chunks = None;
        let mut data = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => id = Some(as_utf8(tag, value)?),
                0x02 => chunk_index = Some(as_u32(tag, value)?),
                0x03 => total_chunks = Some(as_u32(tag, value)?),
                0x04 => data = Some(Bytes::copy_from_slice(value)),
                _ => {}
            }
        }
        Ok(Self {
            id: id.ok_or(TlvError::MissingField(0x01))?,
            chunk_index: chunk_index.ok_or(TlvError::MissingField(0x02))?,
            total_chunks: total_chunks.ok_or(TlvError::MissingField(0x03))?,
            data: data.ok_or(TlvError::MissingField(0x04))?,
        })
    }
}

// ── Oversized-envelope metadata ───────────────────────────────────────────────

/// Opens a chunked transfer of an oversized encrypted payload.
/// Tags: 0x01 tx id utf8, 0x02 total size u32, 0x03 total chunks u32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMetadata {
    pub tx_id: String,
    pub total_size: u32,
    pub total_chunks: u32,
}

impl TxMetadata {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.tx_id)?
            .u32(0x02, self.total_size)?
            .u32(0x03, self.total_chunks)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut tx_id = None;
        let mut total_size = None;
        let mut total_chunks = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => tx_id = Some(as_utf8(tag, value)?),
                0x02 => total_size = Some(as_u32(tag, value)?),
                0x03 => total_chunks = Some(as_u32(tag, value)?),
                _ => {}
            }
        }
        Ok(Self {
            tx_id: tx_id.ok_or(TlvError::MissingField(0x01))?,
            total_size: total_size.ok_or(TlvError::MissingField(0x02))?,
            total_chunks: total_chunks.ok_or(TlvError::MissingField(0x03))?,
        })
    }
}

// ── Application message ───────────────────────────────────────────────────────

/// Envelope body for an opaque application payload. The body bytes mean
/// nothing to the mesh.
/// Tags: 0x01 id utf8, 0x02 kind utf8, 0x03 body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    pub id: String,
    pub kind: String,
    pub body: Bytes,
}

impl AppMessage {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        Ok(TlvWriter::new()
            .utf8(0x01, &self.id)?
            .utf8(0x02, &self.kind)?
            .field(0x03, &self.body)?
            .finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut id = None;
        let mut kind = None;
        let mut body = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => id = Some(as_utf8(tag, value)?),
                0x02 => kind = Some(as_utf8(tag, value)?),
                0x03 => body = Some(Bytes::copy_from_slice(value)),
                _ => {}
            }
        }
        Ok(Self {
            id: id.ok_or(TlvError::MissingField(0x01))?,
            kind: kind.ok_or(TlvError::MissingField(0x02))?,
            body: body.ok_or(TlvError::MissingField(0x03))?,
        })
    }
}

/// Envelope body answering an AppMessage.
/// Tags: 0x01 id utf8, 0x02 success u8, 0x03 payload bytes (optional),
/// 0x04 error utf8 (optional).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppResponse {
    pub id: String,
    pub success: bool,
    pub payload: Option<Bytes>,
    pub error: Option<String>,
}

impl AppResponse {
    pub fn encode(&self) -> Result<Bytes, TlvError> {
        let mut writer = TlvWriter::new()
            .utf8(0x01, &self.id)?
            .field(0x02, &[self.success as u8])?;
        if let Some(payload) = &self.payload {
            writer = writer.field(0x03, payload)?;
        }
        if let Some(error) = &self.error {
            writer = writer.utf8(0x04, error)?;
        }
        Ok(writer.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut id = None;
        let mut success = None;
        let mut payload = None;
        let mut error = None;
        for record in TlvReader::new(buf) {
            let (tag, value) = record?;
            match tag {
                0x01 => id = Some(as_utf8(tag, value)?),
                0x02 => {
                    let byte: [u8; 1] = value
                        .try_into()
                        .map_err(|_| TlvError::BadWidth { tag, len: value.len() })?;
                    success = Some(byte[0] != 0);
                }
                0x03 => payload = Some(Bytes::copy_from_slice(value)),
                0x04 => error = Some(as_utf8(tag, value)?),
                _ => {}
            }
        }
        Ok(Self {
            id: id.ok_or(TlvError::MissingField(0x01))?,
            success: success.ok_or(TlvError::MissingField(0x02))?,
            payload,
            error,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
