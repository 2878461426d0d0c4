//! Protocol module - Defines the Citra RPC wire protocol
//!
//! Every message is a fixed 16-byte header followed by a payload:
//! - 4 bytes protocol version
//! - 4 bytes request id (random, echoed by the emulator)
//! - 4 bytes request type
//! - 4 bytes payload length
//!
//! All integers are little-endian.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Protocol version carried by every header
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port the emulator's RPC server listens on
pub const DEFAULT_PORT: u16 = 45987;

/// Header size: version(4) + id(4) + type(4) + length(4) = 16 bytes
pub const HEADER_SIZE: usize = 16;
