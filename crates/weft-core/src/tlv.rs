//! Tag/length/value records — the encoding every structured payload uses.
//!
//! One record is [tag: 1 byte][length: 2 bytes big-endian][value]. Tags are
//! local to the payload shape that contains them. Readers skip tags they do
//! not recognize, which is what lets old nodes tolerate new fields.

use bytes::Bytes;

// ── Writer ────────────────────────────────────────────────────────────────────

/// Appends TLV records to an owned buffer.
#[derive(Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Values longer than a u16 are a caller bug and
    /// are rejected rather than silently truncated.
    pub fn field(mut self, tag: u8, value: &[u8]) -> Result<Self, TlvError> {
        if value.len() > u16::MAX as usize {
            return Err(TlvError::ValueTooLong {
                tag,
                len: value.len(),
            });
        }
        self.buf.push(tag);
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        Ok(self)
    }

    pub fn utf8(self, tag: u8, value: &str) -> Result<Self, TlvError> {
        self.field(tag, value.as_bytes())
    }

    pub fn u32(self, tag: u8, value: u32) -> Result<Self, TlvError> {
        self.field(tag, &value.to_be_bytes())
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Iterates the records of a TLV buffer in order.
pub struct TlvReader<'a> {
    rest: &'a [u8],
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Result<(u8, &'a [u8]), TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 3 {
            self.rest = &[];
            return Some(Err(TlvError::TruncatedHeader));
        }
        let tag = self.rest[0];
        let len = u16::from_be_bytes([self.rest[1], self.rest[2]]) as usize;
        if self.rest.len() < 3 + len {
            self.rest = &[];
            return Some(Err(TlvError::TruncatedValue { tag, len }));
        }
        let value = &self.rest[3..3 + len];
        self.rest = &self.rest[3 + len..];
        Some(Ok((tag, value)))
    }
}

// ── Value helpers ─────────────────────────────────────────────────────────────

pub fn as_utf8(tag: u8, value: &[u8]) -> Result<String, TlvError> {
    std::str::from_utf8(value)
        .map(str::to_owned)
        .map_err(|_| TlvError::BadUtf8(tag))
}

pub fn as_u32(tag: u8, value: &[u8]) -> Result<u32, TlvError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| TlvError::BadWidth { tag, len: value.len() })?;
    Ok(u32::from_be_bytes(bytes))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("record header truncated")]
    TruncatedHeader,

    #[error("record 0x{tag:02x} claims {len} value bytes past end of buffer")]
    TruncatedValue { tag: u8, len: usize },

    #[error("record 0x{tag:02x} value of {len} bytes exceeds u16 length")]
    ValueTooLong { tag: u8, len: usize },

    #[error("record 0x{0:02x} is not valid UTF-8")]
    BadUtf8(u8),

    #[error("record 0x{tag:02x} has width {len}, expected a u32")]
    BadWidth { tag: u8, len: usize },

    #[error("required record 0x{0:02x} is missing")]
    MissingField(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
