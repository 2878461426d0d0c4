//! Citra RPC client
//!
//! Drives one request/reply exchange per call over a `Channel`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::connection::{Connection, ConnectionError};
use super::Channel;
use crate::config::{Config, ConnectionConfig};
use crate::protocol::{
    decode_and_validate, encode_request, CodecError, Keys, MotionState, OverrideControls,
    Request, HEADER_SIZE,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Which replies are checked against their request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyValidation {
    /// Every reply must echo version, id and type, and have a consistent length
    #[default]
    All,
    /// Only `ReadMemory` replies are checked; acknowledgements are discarded
    /// unread, as older clients did
    ReadMemoryOnly,
}

/// Citra RPC client
///
/// Every call is a blocking send/receive pair on the owned channel. There
/// are no timeouts or retries; wrap calls if bounded waits are needed. A
/// call dropped before its reply arrives closes the connection, so
/// `is_connected` turns false and a fresh client must be connected.
pub struct Client<C = Connection> {
    channel: C,
    validation: ReplyValidation,
}

impl Client<Connection> {
    /// Connect to the emulator described by `config`
    pub async fn connect(config: &ConnectionConfig) -> ClientResult<Self> {
        Self::connect_to(&config.host, config.port).await
    }

    /// Connect to the emulator at `host:port`
    pub async fn connect_to(host: &str, port: u16) -> ClientResult<Self> {
        let connection = Connection::connect(host, port).await?;
        Ok(Self::with_channel(connection))
    }

    /// Connect and apply every client setting from `config`
    pub async fn from_config(config: &Config) -> ClientResult<Self> {
        Ok(Self::connect(&config.connection)
            .await?
            .with_validation(config.client.validation))
    }
}

impl<C: Channel> Client<C> {
    /// Create a client over an already-connected channel
    pub fn with_channel(channel: C) -> Self {
        Self {
            channel,
            validation: ReplyValidation::default(),
        }
    }

    pub fn with_validation(mut self, validation: ReplyValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn validation(&self) -> ReplyValidation {
        self.validation
    }

    /// Check if the channel is open. No request is sent.
    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Send `request` and wait for its reply.
    ///
    /// Returns the reply payload. Requests that carry no data return an
    /// empty payload; with `ReplyValidation::ReadMemoryOnly` their reply is
    /// not inspected at all.
    pub async fn execute(&mut self, request: &Request) -> ClientResult<Bytes> {
        let request_type = request.request_type();
        let (message, request_id) = encode_request(request)?;

        tracing::debug!(
            "Sending {} request {:#010x} ({} byte payload)",
            request_type,
            request_id,
            message.len() - HEADER_SIZE
        );

        self.channel.send(message).await?;
        let reply = self.channel.recv().await?;

        if !request_type.returns_data() && self.validation == ReplyValidation::ReadMemoryOnly {
            return Ok(Bytes::new());
        }

        match decode_and_validate(reply, request_id, request_type) {
            Ok(payload) => {
                tracing::debug!(
                    "Reply to {} request {:#010x}: {} bytes",
                    request_type,
                    request_id,
                    payload.len()
                );
                Ok(payload)
            }
            Err(e) => {
                tracing::warn!(
                    "Rejected reply to {} request {:#010x}: {}",
                    request_type,
                    request_id,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn execute_unit(&mut self, request: Request) -> ClientResult<()> {
        self.execute(&request).await.map(|_| ())
    }

    /// Read `size` bytes of guest memory at `address`
    pub async fn read_memory(&mut self, address: u32, size: u32) -> ClientResult<Bytes> {
        self.execute(&Request::ReadMemory { address, size }).await
    }

    /// Write `data` into guest memory at `address`
    pub async fn write_memory(&mut self, address: u32, data: &[u8]) -> ClientResult<()> {
        self.execute_unit(Request::WriteMemory {
            address,
            data: Bytes::copy_from_slice(data),
        })
        .await
    }

    pub async fn set_pad_state(&mut self, keys: Keys) -> ClientResult<()> {
        self.execute_unit(Request::PadState { keys }).await
    }

    pub async fn set_touch_state(&mut self, x: i16, y: i16, valid: bool) -> ClientResult<()> {
        self.execute_unit(Request::TouchState { x, y, valid }).await
    }

    pub async fn set_motion_state(&mut self, motion: MotionState) -> ClientResult<()> {
        self.execute_unit(Request::MotionState(motion)).await
    }

    pub async fn set_circle_state(&mut self, x: i16, y: i16) -> ClientResult<()> {
        self.execute_unit(Request::CircleState { x, y }).await
    }

    pub async fn set_resolution(&mut self, factor: i16) -> ClientResult<()> {
        self.execute_unit(Request::SetResolution { factor }).await
    }

    /// Load a game. `path` is resolved on the emulator's host.
    pub async fn set_game(&mut self, path: impl AsRef<Path>) -> ClientResult<()> {
        let request = Request::set_game(path)?;
        self.execute_unit(request).await
    }

    pub async fn set_override_controls(&mut self, controls: OverrideControls) -> ClientResult<()> {
        self.execute_unit(Request::SetOverrideControls(controls)).await
    }

    pub async fn pause(&mut self) -> ClientResult<()> {
        self.execute_unit(Request::Pause).await
    }

    pub async fn resume(&mut self) -> ClientResult<()> {
        self.execute_unit(Request::Resume).await
    }

    pub async fn restart(&mut self) -> ClientResult<()> {
        self.execute_unit(Request::Restart).await
    }

    /// Set the emulation speed limit, in percent
    pub async fn set_speed_limit(&mut self, percent: i16) -> ClientResult<()> {
        self.execute_unit(Request::SetSpeedLimit { percent }).await
    }

    pub async fn set_background_color(&mut self, r: f32, g: f32, b: f32) -> ClientResult<()> {
        self.execute_unit(Request::SetBackgroundColor { r, g, b }).await
    }
}
