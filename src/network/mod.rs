//! Network module - Handles the request/reply channel to the emulator
//!
//! Provides:
//! - The `Channel` abstraction the client drives
//! - ZMTP framing and a TCP `Connection` speaking it
//! - The `Client` exposing one method per request type

mod client;
mod connection;
pub mod zmtp;

#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use connection::*;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

/// A request/reply message channel.
///
/// Exactly one reply follows each sent message; a second `send` before the
/// reply has been received is a usage error.
#[async_trait]
pub trait Channel: Send {
    /// Send one complete message
    async fn send(&mut self, message: Bytes) -> ConnectionResult<()>;

    /// Wait for the reply to the last message sent
    async fn recv(&mut self) -> ConnectionResult<Bytes>;

    /// Whether the channel is open. The peer is not contacted.
    fn is_open(&self) -> bool;
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
