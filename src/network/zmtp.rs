//! ZMTP 3.0 framing
//!
//! The emulator's RPC server is a ZeroMQ REP socket, so requests travel as
//! ZMTP messages over plain TCP:
//! - 64-byte greeting exchange (NULL security mechanism)
//! - `READY` command carrying the socket type
//! - frames of `flags(1) + size(1 or 8, big-endian) + body`
//!
//! Everything here works on byte buffers; `Connection` does the I/O.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Greeting size in bytes
pub const GREETING_SIZE: usize = 64;

/// Largest frame body accepted from the peer (256 MiB)
pub const MAX_FRAME_SIZE: u64 = 256 * 1024 * 1024;

const SIGNATURE_START: u8 = 0xFF;
const SIGNATURE_END: u8 = 0x7F;
const VERSION_MAJOR: u8 = 3;
const VERSION_MINOR: u8 = 0;
const MECHANISM_NULL: &[u8] = b"NULL";
const MECHANISM_SIZE: usize = 20;

pub const SOCKET_TYPE_PROPERTY: &str = "Socket-Type";

/// Frame flag bits
pub mod flags {
    pub const MORE: u8 = 0b0000_0001;
    pub const LONG: u8 = 0b0000_0010;
    pub const COMMAND: u8 = 0b0000_0100;

    pub const RESERVED_MASK: u8 = 0b1111_1000;
}

/// Framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZmtpError {
    #[error("Invalid greeting signature")]
    InvalidSignature,

    #[error("Unsupported ZMTP version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("Unsupported security mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("Reserved frame flag bits set: {0:#04x}")]
    ReservedFlags(u8),

    #[error("Frame too large: {0} bytes (max: 256 MiB)")]
    FrameTooLarge(u64),

    #[error("Malformed command frame")]
    MalformedCommand,

    #[error("Reply does not start with an empty delimiter frame")]
    MissingDelimiter,
}

/// A single ZMTP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub body: Bytes,
}

impl Frame {
    pub fn is_more(&self) -> bool {
        self.flags & flags::MORE != 0
    }

    pub fn is_command(&self) -> bool {
        self.flags & flags::COMMAND != 0
    }
}

/// A decoded command frame body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub data: Bytes,
}

impl Command {
    /// Parse the body of a command frame
    pub fn parse(mut body: Bytes) -> Result<Self, ZmtpError> {
        if body.is_empty() {
            return Err(ZmtpError::MalformedCommand);
        }
        let name_len = body.get_u8() as usize;
        if body.len() < name_len {
            return Err(ZmtpError::MalformedCommand);
        }
        let name = body.split_to(name_len);
        Ok(Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            data: body,
        })
    }

    /// Parse `READY` metadata as `(name, value)` pairs
    pub fn properties(&self) -> Result<Vec<(String, Bytes)>, ZmtpError> {
        let mut data = self.data.clone();
        let mut properties = Vec::new();

        while data.has_remaining() {
            let name_len = data.get_u8() as usize;
            if data.len() < name_len + 4 {
                return Err(ZmtpError::MalformedCommand);
            }
            let name = data.split_to(name_len);
            let value_len = data.get_u32() as usize;
            if data.len() < value_len {
                return Err(ZmtpError::MalformedCommand);
            }
            let value = data.split_to(value_len);
            properties.push((String::from_utf8_lossy(&name).into_owned(), value));
        }

        Ok(properties)
    }

    /// Look up a metadata property; names are case-insensitive
    pub fn property(&self, name: &str) -> Result<Option<Bytes>, ZmtpError> {
        Ok(self
            .properties()?
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v))
    }

    /// Reason text of an `ERROR` command
    pub fn error_reason(&self) -> String {
        let mut data = self.data.clone();
        if !data.has_remaining() {
            return String::new();
        }
        let len = (data.get_u8() as usize).min(data.len());
        String::from_utf8_lossy(&data[..len]).into_owned()
    }
}

/// Build the greeting for a client using the NULL mechanism
pub fn greeting() -> [u8; GREETING_SIZE] {
    let mut buf = [0u8; GREETING_SIZE];
    buf[0] = SIGNATURE_START;
    buf[9] = SIGNATURE_END;
    buf[10] = VERSION_MAJOR;
    buf[11] = VERSION_MINOR;
    buf[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    // as-server (byte 32) and filler stay zero
    buf
}

/// Check a peer greeting. Any 3.x peer using the NULL mechanism is accepted.
pub fn check_greeting(buf: &[u8]) -> Result<(), ZmtpError> {
    if buf.len() < GREETING_SIZE || buf[0] != SIGNATURE_START || buf[9] != SIGNATURE_END {
        return Err(ZmtpError::InvalidSignature);
    }
    if buf[10] < VERSION_MAJOR {
        return Err(ZmtpError::UnsupportedVersion(buf[10], buf[11]));
    }

    let mechanism = &buf[12..12 + MECHANISM_SIZE];
    let end = mechanism.iter().position(|b| *b == 0).unwrap_or(MECHANISM_SIZE);
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(ZmtpError::UnsupportedMechanism(
            String::from_utf8_lossy(&mechanism[..end]).into_owned(),
        ));
    }

    Ok(())
}

/// Append one frame, choosing the short or long size encoding
pub fn encode_frame(buf: &mut BytesMut, frame_flags: u8, body: &[u8]) {
    if body.len() > u8::MAX as usize {
        buf.reserve(9 + body.len());
        buf.put_u8(frame_flags | flags::LONG);
        buf.put_u64(body.len() as u64);
    } else {
        buf.reserve(2 + body.len());
        buf.put_u8(frame_flags & !flags::LONG);
        buf.put_u8(body.len() as u8);
    }
    buf.put_slice(body);
}

/// Append a `READY` command announcing `socket_type`
pub fn encode_ready(buf: &mut BytesMut, socket_type: &str) {
    let mut body = BytesMut::new();
    body.put_u8(5);
    body.put_slice(b"READY");
    body.put_u8(SOCKET_TYPE_PROPERTY.len() as u8);
    body.put_slice(SOCKET_TYPE_PROPERTY.as_bytes());
    body.put_u32(socket_type.len() as u32);
    body.put_slice(socket_type.as_bytes());
    encode_frame(buf, flags::COMMAND, &body);
}

/// Append a request/reply envelope: empty delimiter, then the data frame
pub fn encode_message(buf: &mut BytesMut, data: &[u8]) {
    encode_frame(buf, flags::MORE, &[]);
    encode_frame(buf, 0, data);
}

/// Attempt to decode one frame from the buffer.
/// Returns `Ok(None)` if more data is needed.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ZmtpError> {
    let Some(&frame_flags) = buf.first() else {
        return Ok(None);
    };
    if frame_flags & flags::RESERVED_MASK != 0 {
        return Err(ZmtpError::ReservedFlags(frame_flags));
    }

    let (header_len, size) = if frame_flags & flags::LONG != 0 {
        if buf.len() < 9 {
            return Ok(None);
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[1..9]);
        (9, u64::from_be_bytes(size))
    } else {
        if buf.len() < 2 {
            return Ok(None);
        }
        (2, buf[1] as u64)
    };

    if size > MAX_FRAME_SIZE {
        return Err(ZmtpError::FrameTooLarge(size));
    }

    let size = size as usize;
    if buf.len() < header_len + size {
        return Ok(None);
    }

    buf.advance(header_len);
    let body = buf.split_to(size).freeze();
    Ok(Some(Frame {
        flags: frame_flags,
        body,
    }))
}

/// Join the frames of a reply into one message, dropping the delimiter
pub fn join_reply(frames: Vec<Frame>) -> Result<Bytes, ZmtpError> {
    let mut frames = frames.into_iter();
    match frames.next() {
        Some(delimiter) if delimiter.body.is_empty() => {}
        _ => return Err(ZmtpError::MissingDelimiter),
    }

    let mut parts: Vec<Bytes> = frames.map(|f| f.body).collect();
    match parts.len() {
        0 => Ok(Bytes::new()),
        1 => Ok(parts.remove(0)),
        _ => {
            let mut joined = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
            for part in parts {
                joined.put_slice(&part);
            }
            Ok(joined.freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(flags: u8, body: &'static [u8]) -> Frame {
        Frame {
            flags,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_greeting_layout() {
        let g = greeting();
        assert_eq!(g.len(), 64);
        assert_eq!(g[0], 0xFF);
        assert_eq!(&g[1..9], &[0u8; 8]);
        assert_eq!(g[9], 0x7F);
        assert_eq!(&g[10..12], &[3, 0]);
        assert_eq!(&g[12..16], b"NULL");
        assert!(g[16..].iter().all(|b| *b == 0));
        assert!(check_greeting(&g).is_ok());
    }

    #[test]
    fn test_check_greeting_rejects_bad_peers() {
        let mut g = greeting();
        g[9] = 0;
        assert_eq!(check_greeting(&g), Err(ZmtpError::InvalidSignature));

        let mut g = greeting();
        g[10] = 2;
        assert_eq!(check_greeting(&g), Err(ZmtpError::UnsupportedVersion(2, 0)));

        let mut g = greeting();
        g[12..17].copy_from_slice(b"PLAIN");
        assert_eq!(
            check_greeting(&g),
            Err(ZmtpError::UnsupportedMechanism("PLAIN".to_string()))
        );

        assert_eq!(check_greeting(&[0xFF; 10]), Err(ZmtpError::InvalidSignature));
    }

    #[test]
    fn test_newer_minor_version_accepted() {
        let mut g = greeting();
        g[11] = 1;
        assert!(check_greeting(&g).is_ok());
    }

    #[test]
    fn test_short_and_long_frames() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, 0, &[1, 2, 3]);
        assert_eq!(&buf[..], &[0x00, 3, 1, 2, 3]);

        let body = vec![0xAB; 300];
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, flags::MORE, &body);
        assert_eq!(buf[0], flags::MORE | flags::LONG);
        assert_eq!(&buf[1..9], &300u64.to_be_bytes());

        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert!(frame.is_more());
        assert_eq!(frame.body.len(), 300);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut full = BytesMut::new();
        encode_frame(&mut full, 0, b"hello");

        let mut partial = BytesMut::from(&full[..4]);
        assert_eq!(decode_frame(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), 4);

        partial.extend_from_slice(&full[4..]);
        let frame = decode_frame(&mut partial).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"hello");

        assert_eq!(decode_frame(&mut BytesMut::new()).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let mut buf = BytesMut::from(&[0x80u8, 0][..]);
        assert_eq!(decode_frame(&mut buf), Err(ZmtpError::ReservedFlags(0x80)));

        let mut buf = BytesMut::new();
        buf.put_u8(flags::LONG);
        buf.put_u64(MAX_FRAME_SIZE + 1);
        assert_eq!(
            decode_frame(&mut buf),
            Err(ZmtpError::FrameTooLarge(MAX_FRAME_SIZE + 1))
        );
    }

    #[test]
    fn test_ready_command() {
        let mut buf = BytesMut::new();
        encode_ready(&mut buf, "REQ");
        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert!(frame.is_command());

        let command = Command::parse(frame.body).unwrap();
        assert_eq!(command.name, "READY");
        assert_eq!(
            command.property("socket-type").unwrap(),
            Some(Bytes::from_static(b"REQ"))
        );
        assert_eq!(command.property("Identity").unwrap(), None);
    }

    #[test]
    fn test_error_command_reason() {
        let mut body = BytesMut::new();
        body.put_u8(5);
        body.put_slice(b"ERROR");
        body.put_u8(6);
        body.put_slice(b"denied");
        let command = Command::parse(body.freeze()).unwrap();
        assert_eq!(command.name, "ERROR");
        assert_eq!(command.error_reason(), "denied");
    }

    #[test]
    fn test_malformed_command() {
        assert_eq!(Command::parse(Bytes::new()), Err(ZmtpError::MalformedCommand));
        assert_eq!(
            Command::parse(Bytes::from_static(&[9, b'R'])),
            Err(ZmtpError::MalformedCommand)
        );

        let command = Command {
            name: "READY".to_string(),
            data: Bytes::from_static(&[3, b'a', b'b', b'c', 0, 0, 0, 9, 1]),
        };
        assert_eq!(command.properties(), Err(ZmtpError::MalformedCommand));
    }

    #[test]
    fn test_message_envelope() {
        let mut buf = BytesMut::new();
        encode_message(&mut buf, &[7, 7]);
        assert_eq!(&buf[..], &[flags::MORE, 0, 0, 2, 7, 7]);
    }

    #[test]
    fn test_join_reply() {
        let reply = join_reply(vec![
            data_frame(flags::MORE, b""),
            data_frame(0, b"abc"),
        ])
        .unwrap();
        assert_eq!(&reply[..], b"abc");

        let reply = join_reply(vec![
            data_frame(flags::MORE, b""),
            data_frame(flags::MORE, b"ab"),
            data_frame(0, b"cd"),
        ])
        .unwrap();
        assert_eq!(&reply[..], b"abcd");

        assert_eq!(
            join_reply(vec![data_frame(0, b"abc")]),
            Err(ZmtpError::MissingDelimiter)
        );
        assert_eq!(join_reply(Vec::new()), Err(ZmtpError::MissingDelimiter));
    }
}
