//! Frame struct and payload field splitting.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` so split fields share the frame's allocation.
//!
//! # Example
//!
//! ```
//! use gearman_client::protocol::{build_frame, Magic, PacketType, FrameBuffer};
//!
//! let fields: [&[u8]; 2] = [b"H:1", b"chunk"];
//! let bytes = build_frame(Magic::Response, PacketType::WorkData, &fields);
//! let mut buffer = FrameBuffer::new(Magic::Response);
//! let frames = buffer.push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].fields()[1], "chunk");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, Magic, HEADER_SIZE};
use super::PacketType;

/// Field separator inside a payload.
pub const FIELD_SEPARATOR: u8 = 0;

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the packet type.
    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Split the payload into its NUL-separated fields.
    ///
    /// At most `field_count` fields are produced; the last one keeps any
    /// embedded NUL bytes. An empty payload for a single-field type yields one
    /// empty field.
    pub fn fields(&self) -> Vec<Bytes> {
        split_fields(&self.payload, self.packet_type().field_count())
    }
}

/// Split `payload` into at most `count` fields.
pub fn split_fields(payload: &Bytes, count: usize) -> Vec<Bytes> {
    if count == 0 {
        return Vec::new();
    }

    let mut fields = Vec::with_capacity(count);
    let mut rest = payload.clone();

    while fields.len() + 1 < count {
        match rest.iter().position(|&b| b == FIELD_SEPARATOR) {
            Some(pos) => {
                let field = rest.split_to(pos);
                let _ = rest.split_to(1);
                fields.push(field);
            }
            None => break,
        }
    }

    fields.push(rest);
    fields
}

/// Build a complete frame from its fields.
///
/// Fields are joined with a single NUL byte in the order given.
pub fn build_frame<F: AsRef<[u8]>>(magic: Magic, packet_type: PacketType, fields: &[F]) -> Vec<u8> {
    let payload = join_fields(fields);
    let header = Header::new(magic, packet_type, payload.len() as u32);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&payload);
    buf
}

/// Join fields with the NUL separator.
pub fn join_fields<F: AsRef<[u8]>>(fields: &[F]) -> Vec<u8> {
    let len = fields.iter().map(|f| f.as_ref().len()).sum::<usize>() + fields.len();
    let mut payload = Vec::with_capacity(len);

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            payload.push(FIELD_SEPARATOR);
        }
        payload.extend_from_slice(field.as_ref());
    }

    payload
}
