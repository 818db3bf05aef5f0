//! Outbound requests.
//!
//! A [`Request`] carries every argument a client packet can hold; `encode`
//! picks the ones its packet type needs, in wire order.

use std::time::Duration;

use bytes::Bytes;

use super::frame::{join_fields, Frame};
use super::wire_format::{Header, Magic, HEADER_SIZE};
use super::PacketType;
use crate::error::{GearmanError, Result};

/// Cron-style schedule for `SUBMIT_JOB_SCHED`. `None` is a wildcard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub minute: Option<u8>,
    pub hour: Option<u8>,
    pub day_of_month: Option<u8>,
    pub month: Option<u8>,
    pub day_of_week: Option<u8>,
}

impl Schedule {
    /// Schedule with every field set.
    pub fn at(minute: u8, hour: u8, day_of_month: u8, month: u8, day_of_week: u8) -> Self {
        Self {
            minute: Some(minute),
            hour: Some(hour),
            day_of_month: Some(day_of_month),
            month: Some(month),
            day_of_week: Some(day_of_week),
        }
    }

    fn to_fields(self) -> [String; 5] {
        let f = |v: Option<u8>| v.map(|v| v.to_string()).unwrap_or_default();
        [
            f(self.minute),
            f(self.hour),
            f(self.day_of_month),
            f(self.month),
            f(self.day_of_week),
        ]
    }

    fn from_fields(fields: &[Bytes]) -> Self {
        let f = |b: &Bytes| std::str::from_utf8(b).ok().and_then(|s| s.parse().ok());
        Self {
            minute: f(&fields[0]),
            hour: f(&fields[1]),
            day_of_month: f(&fields[2]),
            month: f(&fields[3]),
            day_of_week: f(&fields[4]),
        }
    }
}

/// Outbound intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Packet type to send.
    pub packet_type: PacketType,
    /// Function name (submissions).
    pub function: String,
    /// Opaque payload (submissions, echo).
    pub data: Bytes,
    /// Client-chosen unique id (submissions, unique status queries).
    pub unique_id: Option<String>,
    /// Server-assigned handle (status queries).
    pub handle: Option<String>,
    /// Connection option name.
    pub conn_option: Option<String>,
    /// Reducer function (reduce submissions).
    pub reducer: Option<String>,
    /// Schedule (scheduled submissions).
    pub schedule: Option<Schedule>,
    /// Unix time to run at (epoch submissions).
    pub epoch: Option<i64>,
    /// Target server address; `None` broadcasts to every server.
    pub server: Option<String>,
    /// Give up waiting for the response after this long.
    pub creation_timeout: Option<Duration>,
}

impl Request {
    /// Create an empty request of the given type.
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            function: String::new(),
            data: Bytes::new(),
            unique_id: None,
            handle: None,
            conn_option: None,
            reducer: None,
            schedule: None,
            epoch: None,
            server: None,
            creation_timeout: None,
        }
    }

    /// Create a request pinned to one server.
    pub fn to_server(server: impl Into<String>, packet_type: PacketType) -> Self {
        let mut req = Self::new(packet_type);
        req.server = Some(server.into());
        req
    }

    /// Encode the payload fields in wire order.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        use PacketType::*;

        let unique = self.unique_id.as_deref().unwrap_or("");
        let fields: Vec<&[u8]> = match self.packet_type {
            SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow
            | SubmitJobLowBg => vec![self.function.as_bytes(), unique.as_bytes(), &self.data[..]],
            SubmitJobSched => {
                let sched = self.schedule.unwrap_or_default().to_fields();
                let mut fields = vec![self.function.as_bytes(), unique.as_bytes()];
                fields.extend(sched.iter().map(|s| s.as_bytes()));
                fields.push(&self.data[..]);
                return Ok(join_fields(&fields));
            }
            SubmitJobEpoch => {
                let epoch = self.epoch.unwrap_or_default().to_string();
                return Ok(join_fields(&[
                    self.function.as_bytes(),
                    unique.as_bytes(),
                    epoch.as_bytes(),
                    &self.data[..],
                ]));
            }
            SubmitReduceJob | SubmitReduceJobBackground => vec![
                self.function.as_bytes(),
                unique.as_bytes(),
                self.reducer.as_deref().unwrap_or("").as_bytes(),
                &b""[..],
                &self.data[..],
            ],
            GetStatus => vec![self.handle.as_deref().unwrap_or("").as_bytes()],
            GetStatusUnique => vec![unique.as_bytes()],
            EchoReq => vec![&self.data[..]],
            OptionReq => vec![self.conn_option.as_deref().unwrap_or("").as_bytes()],
            other => {
                return Err(GearmanError::Protocol(format!(
                    "{:?} is not a client request",
                    other
                )))
            }
        };

        Ok(join_fields(&fields))
    }

    /// Encode the complete frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let header = Header::new(Magic::Request, self.packet_type, payload.len() as u32);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Rebuild a request from a decoded request frame.
    ///
    /// Routing-only fields (`server`, `creation_timeout`) are never on the wire
    /// and come back as `None`.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        use PacketType::*;

        let packet_type = frame.packet_type();
        let fields = frame.fields();
        if fields.len() < packet_type.field_count() {
            return Err(GearmanError::Protocol(format!(
                "{:?} needs {} fields, got {}",
                packet_type,
                packet_type.field_count(),
                fields.len()
            )));
        }

        let text = |b: &Bytes| String::from_utf8_lossy(b).into_owned();
        let opt_text = |b: &Bytes| (!b.is_empty()).then(|| text(b));

        let mut req = Self::new(packet_type);
        match packet_type {
            SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow
            | SubmitJobLowBg => {
                req.function = text(&fields[0]);
                req.unique_id = opt_text(&fields[1]);
                req.data = fields[2].clone();
            }
            SubmitJobSched => {
                req.function = text(&fields[0]);
                req.unique_id = opt_text(&fields[1]);
                req.schedule = Some(Schedule::from_fields(&fields[2..7]));
                req.data = fields[7].clone();
            }
            SubmitJobEpoch => {
                req.function = text(&fields[0]);
                req.unique_id = opt_text(&fields[1]);
                req.epoch = std::str::from_utf8(&fields[2])
                    .ok()
                    .and_then(|s| s.parse().ok());
                req.data = fields[3].clone();
            }
            SubmitReduceJob | SubmitReduceJobBackground => {
                req.function = text(&fields[0]);
                req.unique_id = opt_text(&fields[1]);
                req.reducer = opt_text(&fields[2]);
                req.data = fields[4].clone();
            }
            GetStatus => req.handle = Some(text(&fields[0])),
            GetStatusUnique => req.unique_id = Some(text(&fields[0])),
            EchoReq => req.data = fields[0].clone(),
            OptionReq => req.conn_option = Some(text(&fields[0])),
            other => {
                return Err(GearmanError::Protocol(format!(
                    "{:?} is not a client request",
                    other
                )))
            }
        }

        Ok(req)
    }
}
