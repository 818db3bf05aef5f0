//! Per-connection writer task.
//!
//! Every frame for a peer goes through one task that owns the socket's write
//! half, so concurrent senders on the same peer never interleave bytes.
//!
//! ```text
//! Sender (create) ─┐
//! Sender (status) ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! Sender (control)─┘
//! ```
//!
//! Frames queued together are flushed with a single vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{GearmanError, Result};
use crate::protocol::{Header, Magic, Request, HEADER_SIZE};

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to a socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header (12 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Encode a request into a frame.
    pub fn from_request(req: &Request) -> Result<Self> {
        let payload = Bytes::from(req.encode_payload()?);
        let header = Header::new(Magic::Request, req.packet_type, payload.len() as u32);
        Ok(Self {
            header: header.encode(),
            payload,
        })
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame for writing without waiting.
    ///
    /// Fails when the queue is full or the writer task has stopped.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => GearmanError::Network("write queue full".to_string()),
            TrySendError::Closed(_) => GearmanError::Network("writer stopped".to_string()),
        })
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle whose writer is already gone.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when every handle is dropped, when `shutdown` fires, or on
/// the first write error. `shutdown` is cancelled in every case so readers
/// waiting on the peer observe the failure.
pub fn spawn_writer_task<W>(
    writer: W,
    capacity: usize,
    shutdown: CancellationToken,
) -> WriterHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(
        async move {
            if let Err(e) = writer_loop(rx, writer, shutdown.clone()).await {
                tracing::warn!(error = %e, "writer stopped");
            }
            shutdown.cancel();
        }
        .in_current_span(),
    );

    WriterHandle { tx }
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => return Ok(()),
            },
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of frames with vectored I/O, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(GearmanError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}
