//! Wire format encoding and decoding.
//!
//! Implements the 12-byte header format:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Magic    │ Type     │ Length   │
//! │ 4 bytes  │ uint32 BE│ uint32 BE│
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! Magic is `\0REQ` for client-to-server frames and `\0RES` for
//! server-to-client frames.

use super::PacketType;
use crate::error::{GearmanError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Magic bytes of a request frame.
pub const REQ_MAGIC: [u8; 4] = *b"\0REQ";

/// Magic bytes of a response frame.
pub const RES_MAGIC: [u8; 4] = *b"\0RES";

/// Frame direction, identified by the magic marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

impl Magic {
    /// Raw magic bytes.
    #[inline]
    pub fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => REQ_MAGIC,
            Magic::Response => RES_MAGIC,
        }
    }

    fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        match bytes {
            REQ_MAGIC => Some(Magic::Request),
            RES_MAGIC => Some(Magic::Response),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Direction marker.
    pub magic: Magic,
    /// Packet type.
    pub packet_type: PacketType,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(magic: Magic, packet_type: PacketType, payload_length: u32) -> Self {
        Self {
            magic,
            packet_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.bytes());
        buf[4..8].copy_from_slice(&self.packet_type.code().to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Fails on a short buffer, an unrecognised magic, or an unknown type code.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(GearmanError::Protocol(format!(
                "Header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let raw_magic = [buf[0], buf[1], buf[2], buf[3]];
        let magic = Magic::from_bytes(raw_magic).ok_or_else(|| {
            GearmanError::Protocol(format!("Bad magic {:02x?}", raw_magic))
        })?;
        let code = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        Ok(Self {
            magic,
            packet_type: PacketType::from_code(code)?,
            payload_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Validate direction and payload size.
    pub fn validate(&self, expected: Magic, max_payload_size: u32) -> Result<()> {
        if self.magic != expected {
            return Err(GearmanError::Protocol(format!(
                "Expected {:?} magic, got {:?}",
                expected, self.magic
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(GearmanError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(Magic::Response, PacketType::JobCreated, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_byte_layout() {
        let bytes = Header::new(Magic::Request, PacketType::SubmitJob, 0x0102_0304).encode();

        assert_eq!(&bytes[0..4], b"\0REQ");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 11];
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut bytes = Header::new(Magic::Response, PacketType::Noop, 0).encode();
        bytes[1] = b'X';
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("Bad magic"));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = Header::new(Magic::Response, PacketType::Noop, 0).encode();
        bytes[7] = 200;
        assert!(matches!(
            Header::decode(&bytes),
            Err(GearmanError::Protocol(_))
        ));
    }

    #[test]
    fn test_validate_direction() {
        let header = Header::new(Magic::Request, PacketType::EchoReq, 0);
        assert!(header.validate(Magic::Request, DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        assert!(header
            .validate(Magic::Response, DEFAULT_MAX_PAYLOAD_SIZE)
            .is_err());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(Magic::Response, PacketType::WorkData, 1_000_000);
        let result = header.validate(Magic::Response, 100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }
}
