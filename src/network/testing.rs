//! Test doubles: a scripted in-memory channel and a minimal REP server

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::zmtp::{self, Command, Frame};
use super::{Channel, ConnectionError, ConnectionResult};
use crate::protocol::{Header, HEADER_SIZE};

type Responder = Box<dyn FnMut(&[u8]) -> ConnectionResult<Bytes> + Send>;

/// In-memory channel answering each request through a closure
pub(crate) struct ScriptedChannel {
    pub sent: Vec<Bytes>,
    pending: Option<Bytes>,
    responder: Responder,
    open: bool,
}

impl ScriptedChannel {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> ConnectionResult<Bytes> + Send + 'static,
    {
        Self {
            sent: Vec::new(),
            pending: None,
            responder: Box::new(responder),
            open: true,
        }
    }

    /// A well-behaved emulator: echoes the header with `payload`
    pub fn replying(payload: &'static [u8]) -> Self {
        Self::new(move |request| Ok(reply_to(request, payload)))
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn send(&mut self, message: Bytes) -> ConnectionResult<()> {
        if !self.open {
            return Err(ConnectionError::Closed);
        }
        if self.pending.is_some() {
            return Err(ConnectionError::ReplyPending);
        }
        self.sent.push(message.clone());
        self.pending = Some(message);
        Ok(())
    }

    async fn recv(&mut self) -> ConnectionResult<Bytes> {
        let request = self.pending.take().ok_or(ConnectionError::NoRequestPending)?;
        (self.responder)(&request)
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Build a valid reply to `request` carrying `payload`
pub(crate) fn reply_to(request: &[u8], payload: &[u8]) -> Bytes {
    let request_header = Header::decode(request).expect("request shorter than a header");
    let header = Header {
        payload_length: payload.len() as u32,
        ..request_header
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

pub(crate) fn ready_frame(socket_type: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    zmtp::encode_ready(&mut buf, socket_type);
    buf.to_vec()
}

async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Option<Frame>> {
    loop {
        if let Some(frame) = zmtp::decode_frame(buf).expect("bad frame from client") {
            return Ok(Some(frame));
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

/// Spawn a single-connection REP server answering with `handler`.
///
/// The task finishes once the client hangs up.
pub(crate) async fn spawn_rep_server<F>(
    mut handler: F,
) -> (SocketAddr, JoinHandle<std::io::Result<()>>)
where
    F: FnMut(Bytes) -> Bytes + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        stream.write_all(&zmtp::greeting()).await?;

        let mut greeting = [0u8; zmtp::GREETING_SIZE];
        stream.read_exact(&mut greeting).await?;
        zmtp::check_greeting(&greeting).expect("bad client greeting");

        stream.write_all(&ready_frame("REP")).await?;

        let mut buf = BytesMut::new();
        let Some(ready) = read_frame(&mut stream, &mut buf).await? else {
            return Ok(());
        };
        let command = Command::parse(ready.body).expect("bad READY");
        assert_eq!(command.name, "READY");
        assert_eq!(
            command.property(zmtp::SOCKET_TYPE_PROPERTY).unwrap(),
            Some(Bytes::from_static(b"REQ"))
        );

        loop {
            let mut frames = Vec::new();
            loop {
                let Some(frame) = read_frame(&mut stream, &mut buf).await? else {
                    return Ok(());
                };
                let more = frame.is_more();
                frames.push(frame);
                if !more {
                    break;
                }
            }

            let request = zmtp::join_reply(frames).expect("request without delimiter");
            let mut out = BytesMut::new();
            zmtp::encode_message(&mut out, &handler(request));
            stream.write_all(&out).await?;
        }
    });

    (addr, task)
}
