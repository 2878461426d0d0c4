//! Connection handling for the emulator RPC socket
//!
//! Speaks ZMTP as a REQ peer on top of any byte stream and enforces the
//! strict request/reply alternation a REQ socket has.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::zmtp::{self, Command, Frame, ZmtpError, GREETING_SIZE};
use super::Channel;

/// Socket type this client announces
const SOCKET_TYPE: &str = "REQ";

/// Socket types a REQ socket may talk to
const PEER_SOCKET_TYPES: [&str; 2] = ["REP", "ROUTER"];

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ZmtpError),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("A reply is still pending for the previous request")]
    ReplyPending,

    #[error("No request is waiting for a reply")]
    NoRequestPending,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready to send a request
    Idle,
    /// Request sent, reply not yet received
    AwaitingReply,
    /// No longer usable; a new connection is needed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A REQ connection to the emulator
pub struct Connection<S = TcpStream> {
    /// Peer label used in logs
    peer: String,
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl Connection<TcpStream> {
    /// Open a TCP connection and perform the ZMTP handshake
    pub async fn connect(host: &str, port: u16) -> ConnectionResult<Self> {
        let addr = super::resolve_host(host, port).await?;
        tracing::info!("Connecting to {}", addr);

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Self::handshake(stream, addr.to_string()).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Perform the ZMTP handshake over an already-connected stream
    pub async fn handshake(stream: S, peer: impl Into<String>) -> ConnectionResult<Self> {
        let mut conn = Self {
            peer: peer.into(),
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            // Not usable until the handshake completes
            state: ConnectionState::Closed,
            stats: ConnectionStats::default(),
        };

        match conn.exchange_greetings().await {
            Ok(()) => {
                conn.state = ConnectionState::Idle;
                tracing::info!("Handshake complete with {}", conn.peer);
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!("Handshake with {} failed: {}", conn.peer, e);
                Err(e)
            }
        }
    }

    async fn exchange_greetings(&mut self) -> ConnectionResult<()> {
        self.stream.write_all(&zmtp::greeting()).await?;
        self.stream.flush().await?;

        while self.read_buf.len() < GREETING_SIZE {
            self.read_more().await?;
        }
        let greeting = self.read_buf.split_to(GREETING_SIZE);
        zmtp::check_greeting(&greeting)?;

        self.write_buf.clear();
        zmtp::encode_ready(&mut self.write_buf, SOCKET_TYPE);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        let frame = self.read_frame().await?;
        if !frame.is_command() {
            return Err(ConnectionError::HandshakeFailed(
                "Expected READY command".to_string(),
            ));
        }

        let command = Command::parse(frame.body)?;
        match command.name.as_str() {
            "READY" => {
                let socket_type = command
                    .property(zmtp::SOCKET_TYPE_PROPERTY)?
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default();

                if !PEER_SOCKET_TYPES.contains(&socket_type.as_str()) {
                    return Err(ConnectionError::HandshakeFailed(format!(
                        "Incompatible peer socket type: {:?}",
                        socket_type
                    )));
                }
                Ok(())
            }
            "ERROR" => Err(ConnectionError::HandshakeFailed(command.error_reason())),
            other => Err(ConnectionError::HandshakeFailed(format!(
                "Unexpected command: {}",
                other
            ))),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Close the connection. Any pending reply is abandoned.
    pub async fn close(&mut self) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        self.stream.shutdown().await?;
        tracing::info!("Connection to {} closed", self.peer);
        Ok(())
    }

    async fn read_more(&mut self) -> ConnectionResult<()> {
        let mut buf = [0u8; 4096];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        self.read_buf.extend_from_slice(&buf[..n]);
        self.stats.bytes_received += n as u64;
        Ok(())
    }

    async fn read_frame(&mut self) -> ConnectionResult<Frame> {
        loop {
            if let Some(frame) = zmtp::decode_frame(&mut self.read_buf)? {
                return Ok(frame);
            }
            self.read_more().await?;
        }
    }

    async fn write_request(&mut self, message: &[u8]) -> ConnectionResult<()> {
        self.write_buf.clear();
        zmtp::encode_message(&mut self.write_buf, message);

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        Ok(())
    }

    async fn read_reply(&mut self) -> ConnectionResult<Bytes> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await?;
            // Heartbeats and other commands may arrive between messages
            if frame.is_command() {
                continue;
            }
            let more = frame.is_more();
            frames.push(frame);
            if !more {
                break;
            }
        }

        self.stats.messages_received += 1;
        Ok(zmtp::join_reply(frames)?)
    }
}

#[async_trait]
impl<S> Channel for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: Bytes) -> ConnectionResult<()> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::AwaitingReply => return Err(ConnectionError::ReplyPending),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
        }

        // Stays closed if this future is dropped before the write completes
        self.state = ConnectionState::Closed;
        self.write_request(&message).await?;
        self.state = ConnectionState::AwaitingReply;
        Ok(())
    }

    async fn recv(&mut self) -> ConnectionResult<Bytes> {
        match self.state {
            ConnectionState::AwaitingReply => {}
            ConnectionState::Idle => return Err(ConnectionError::NoRequestPending),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
        }

        // A reply abandoned halfway would desynchronize the stream
        self.state = ConnectionState::Closed;
        let reply = self.read_reply().await?;
        self.state = ConnectionState::Idle;
        Ok(reply)
    }

    fn is_open(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::AwaitingReply
        )
    }
}
