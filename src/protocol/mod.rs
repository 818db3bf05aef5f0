//! Protocol module - wire format, framing, requests and responses.
//!
//! This module implements the binary job-server protocol:
//! - 12-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request encoding and lenient response field accessors

mod frame;
mod frame_buffer;
mod packet_type;
mod request;
mod response;
mod wire_format;

pub use frame::{build_frame, join_fields, split_fields, Frame, FIELD_SEPARATOR};
pub use frame_buffer::FrameBuffer;
pub use packet_type::PacketType;
pub use request::{Request, Schedule};
pub use response::{parse_u32_lenient, Response};
pub use wire_format::{
    Header, Magic, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, REQ_MAGIC, RES_MAGIC,
};
