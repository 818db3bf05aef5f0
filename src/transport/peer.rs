//! One live connection to one job server.
//!
//! A [`Peer`] owns the writer task for its socket and a closed signal. The
//! read loop decodes every frame and hands it to the handler registry
//! inline; nothing in that path blocks.
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::transport::Peer;
//!
//! let peer = Peer::connect("127.0.0.1:4730", &config, registry, span).await?;
//! peer.closed().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Instrument;

use crate::error::{GearmanError, Result};
use crate::handler::HandlerRegistry;
use crate::protocol::{FrameBuffer, Magic, Response};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Read buffer size for the decode loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Socket-level settings for a peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerOptions {
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Largest payload accepted from the server.
    pub max_payload_size: u32,
    /// Writer queue capacity.
    pub channel_capacity: usize,
}

/// One configured server endpoint and its live connection.
#[derive(Debug)]
pub struct Peer {
    addr: String,
    writer: WriterHandle,
    closed: CancellationToken,
}

impl Peer {
    /// Connect to `addr` and start the read and write loops.
    pub async fn connect(
        addr: &str,
        options: &PeerOptions,
        registry: Arc<HandlerRegistry>,
        span: tracing::Span,
    ) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GearmanError::Network(format!("connect to {} timed out", addr)))??;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Ok(Self::spawn(addr, reader, writer, options, registry, span))
    }

    /// Start a peer over an already established byte stream.
    pub fn spawn<R, W>(
        addr: &str,
        reader: R,
        writer: W,
        options: &PeerOptions,
        registry: Arc<HandlerRegistry>,
        span: tracing::Span,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let closed = CancellationToken::new();
        let loop_span = tracing::debug_span!(parent: &span, "peer", server = %addr);
        let writer = loop_span
            .in_scope(|| spawn_writer_task(writer, options.channel_capacity, closed.clone()));

        let peer = Arc::new(Self {
            addr: addr.to_string(),
            writer,
            closed,
        });

        let loop_peer = peer.clone();
        let max_payload = options.max_payload_size;
        tokio::spawn(
            async move {
                match read_loop(reader, &loop_peer, &registry, max_payload).await {
                    Ok(()) => tracing::debug!("connection closed"),
                    Err(e) => tracing::warn!(error = %e, "connection failed"),
                }
                loop_peer.closed.cancel();
            }
            .instrument(loop_span),
        );

        peer
    }

    /// A peer with no connection behind it, for unit tests.
    #[cfg(test)]
    pub(crate) fn detached(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.to_string(),
            writer: WriterHandle::closed(),
            closed: CancellationToken::new(),
        })
    }

    /// Server address as configured.
    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection has ended.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has ended. Fires for every waiter.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Tear the connection down. No reconnect is attempted.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Queue a frame on this connection. Never waits; a full queue is an
    /// error.
    pub fn write(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(GearmanError::Network(format!("{} is closed", self.addr)));
        }
        self.writer.try_send(frame)
    }
}

async fn read_loop<R>(
    mut reader: R,
    peer: &Arc<Peer>,
    registry: &HandlerRegistry,
    max_payload: u32,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(Magic::Response, max_payload);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = peer.closed() => return Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(GearmanError::Io(e)),
            },
        };

        for frame in frame_buffer.push(&buf[..n])? {
            let resp = Response::new(&frame, peer.clone());
            registry.dispatch(&resp);
        }
    }
}
