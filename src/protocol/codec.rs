//! Protocol codec for framing requests and validating replies
//!
//! Both functions here are pure byte-buffer transformations. The transport
//! lives in `network`.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Request, RequestType, HEADER_SIZE, PROTOCOL_VERSION};

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Reply too short: {0} bytes, header alone is 16")]
    ReplyTooShort(usize),

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Request id mismatch: expected {expected:#010x}, got {actual:#010x}")]
    RequestIdMismatch { expected: u32, actual: u32 },

    #[error("Request type mismatch: expected {expected}, got {actual}")]
    RequestTypeMismatch { expected: u32, actual: u32 },

    #[error("Payload length mismatch: header declares {declared} bytes, {actual} present")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("Unknown request type: {0}")]
    UnknownRequestType(u32),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(String),
}

/// The fixed 16-byte header shared by requests and replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub request_id: u32,
    /// Raw tag; replies may carry tags this client does not know
    pub request_type: u32,
    pub payload_length: u32,
}

impl Header {
    pub fn new(request_id: u32, request_type: RequestType, payload_length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id,
            request_type: request_type.tag(),
            payload_length,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.request_type.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Decode a header from the start of `buf`. Returns `None` if too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Some(Self {
            version: field(0),
            request_id: field(4),
            request_type: field(8),
            payload_length: field(12),
        })
    }
}

/// Build a request header with a fresh random request id.
///
/// Returns the header bytes and the id the reply must echo.
pub fn encode_header(request_type: RequestType, payload_length: u32) -> ([u8; HEADER_SIZE], u32) {
    let request_id = rand::random::<u32>();
    let header = Header::new(request_id, request_type, payload_length);
    (header.encode(), request_id)
}

/// Encode a complete request message (header followed by payload).
///
/// Returns the message and its request id.
pub fn encode_request(request: &Request) -> Result<(Bytes, u32), CodecError> {
    let mut payload = BytesMut::new();
    request.encode_payload(&mut payload)?;
    let payload_length =
        u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

    let (header, request_id) = encode_header(request.request_type(), payload_length);

    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_slice(&header);
    message.put_slice(&payload);
    Ok((message.freeze(), request_id))
}

/// Validate a reply against the request that produced it and return its
/// payload.
///
/// A reply is accepted only if version, request id and request type all
/// match and the declared payload length equals the bytes after the header.
/// An accepted reply may still have an empty payload.
pub fn decode_and_validate(
    reply: Bytes,
    expected_id: u32,
    expected_type: RequestType,
) -> Result<Bytes, CodecError> {
    let header = Header::decode(&reply).ok_or(CodecError::ReplyTooShort(reply.len()))?;

    if header.version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: header.version,
        });
    }
    if header.request_id != expected_id {
        return Err(CodecError::RequestIdMismatch {
            expected: expected_id,
            actual: header.request_id,
        });
    }
    if header.request_type != expected_type.tag() {
        return Err(CodecError::RequestTypeMismatch {
            expected: expected_type.tag(),
            actual: header.request_type,
        });
    }

    let actual = reply.len() - HEADER_SIZE;
    if header.payload_length as usize != actual {
        return Err(CodecError::LengthMismatch {
            declared: header.payload_length,
            actual,
        });
    }

    Ok(reply.slice(HEADER_SIZE..))
}
