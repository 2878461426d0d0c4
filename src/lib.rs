//! citra-rpc - Remote control for the Citra emulator
//!
//! A client for Citra's RPC server: a fixed 16-byte header framing typed
//! payloads, exchanged one request/one reply at a time over a ZeroMQ REQ
//! socket.
//!
//! ```ignore
//! use citra_rpc::{Client, Keys};
//!
//! let mut client = Client::connect_to("127.0.0.1", citra_rpc::DEFAULT_PORT).await?;
//! client.set_pad_state(Keys::A | Keys::START).await?;
//! let bytes = client.read_memory(0x0010_0000, 4).await?;
//! ```

pub mod config;
pub mod network;
pub mod protocol;

pub use network::{Channel, Client, ClientError, ClientResult, Connection, ReplyValidation};
pub use protocol::{
    Keys, MotionState, OverrideControls, Request, RequestType, DEFAULT_PORT, PROTOCOL_VERSION,
};
