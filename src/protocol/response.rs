//! Inbound responses.
//!
//! Numeric and boolean accessors are lenient: a field that is missing or does
//! not parse reads as `0` / `false`. Status polling relies on this, servers
//! are known to send empty numerators for jobs that never reported progress.

use std::sync::Arc;

use bytes::Bytes;

use super::{Frame, PacketType};
use crate::error::{GearmanError, Result};
use crate::transport::Peer;

/// A decoded server frame together with the peer it came from.
#[derive(Debug, Clone)]
pub struct Response {
    packet_type: PacketType,
    fields: Vec<Bytes>,
    peer: Arc<Peer>,
}

impl Response {
    /// Build a response from a decoded frame.
    pub fn new(frame: &Frame, peer: Arc<Peer>) -> Self {
        Self {
            packet_type: frame.packet_type(),
            fields: frame.fields(),
            peer,
        }
    }

    /// Build a response from already split fields.
    pub fn from_parts(packet_type: PacketType, fields: Vec<Bytes>, peer: Arc<Peer>) -> Self {
        Self {
            packet_type,
            fields,
            peer,
        }
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Raw payload fields.
    #[inline]
    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// Originating peer.
    #[inline]
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Address of the originating server.
    #[inline]
    pub fn remote(&self) -> &str {
        self.peer.addr()
    }

    fn field(&self, index: usize) -> Result<&Bytes> {
        self.fields.get(index).ok_or_else(|| {
            GearmanError::Protocol(format!(
                "{:?} from {} has no field {}",
                self.packet_type,
                self.remote(),
                index
            ))
        })
    }

    fn text(&self, index: usize) -> Result<String> {
        self.field(index)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn number(&self, index: usize) -> u32 {
        self.fields
            .get(index)
            .map(|b| parse_u32_lenient(b))
            .unwrap_or(0)
    }

    /// Job handle (JOB_CREATED, WORK_*, STATUS_RES).
    pub fn handle(&self) -> Result<String> {
        match self.packet_type {
            PacketType::JobCreated | PacketType::StatusRes => self.text(0),
            pt if pt.is_work_update() => self.text(0),
            other => Err(GearmanError::Protocol(format!(
                "{:?} carries no handle",
                other
            ))),
        }
    }

    /// Opaque data (WORK_DATA, WORK_WARNING, WORK_COMPLETE, WORK_EXCEPTION, ECHO_RES).
    pub fn data(&self) -> Result<Bytes> {
        use PacketType::*;
        match self.packet_type {
            WorkData | WorkWarning | WorkComplete | WorkException => self.field(1).cloned(),
            EchoRes => Ok(self.fields.first().cloned().unwrap_or_default()),
            other => Err(GearmanError::Protocol(format!(
                "{:?} carries no data",
                other
            ))),
        }
    }

    /// Accepted option name (OPTION_RES).
    pub fn conn_option(&self) -> Result<String> {
        match self.packet_type {
            PacketType::OptionRes => self.text(0),
            other => Err(GearmanError::Protocol(format!(
                "{:?} carries no option",
                other
            ))),
        }
    }

    /// Unique id (STATUS_RES_UNIQUE).
    pub fn unique_id(&self) -> Result<String> {
        match self.packet_type {
            PacketType::StatusResUnique => self.text(0),
            other => Err(GearmanError::Protocol(format!(
                "{:?} carries no unique id",
                other
            ))),
        }
    }

    /// Whether the server knows the job. Lenient.
    pub fn status_known(&self) -> bool {
        self.is_status() && self.number(1) != 0
    }

    /// Whether the job is running. Lenient.
    pub fn status_running(&self) -> bool {
        self.is_status() && self.number(2) != 0
    }

    /// Progress numerator (WORK_STATUS, STATUS_RES*). Lenient.
    pub fn numerator(&self) -> u32 {
        match self.packet_type {
            PacketType::WorkStatus => self.number(1),
            PacketType::StatusRes | PacketType::StatusResUnique => self.number(3),
            _ => 0,
        }
    }

    /// Progress denominator (WORK_STATUS, STATUS_RES*). Lenient.
    pub fn denominator(&self) -> u32 {
        match self.packet_type {
            PacketType::WorkStatus => self.number(2),
            PacketType::StatusRes | PacketType::StatusResUnique => self.number(4),
            _ => 0,
        }
    }

    /// Clients waiting on the job (STATUS_RES_UNIQUE only). Lenient.
    pub fn waiting_clients(&self) -> u32 {
        match self.packet_type {
            PacketType::StatusResUnique => self.number(5),
            _ => 0,
        }
    }

    /// Error code and message (ERROR).
    pub fn error(&self) -> Option<(String, String)> {
        if self.packet_type != PacketType::Error {
            return None;
        }
        Some((
            self.text(0).unwrap_or_default(),
            self.text(1).unwrap_or_default(),
        ))
    }

    fn is_status(&self) -> bool {
        matches!(
            self.packet_type,
            PacketType::StatusRes | PacketType::StatusResUnique
        )
    }
}

/// Parse a decimal field, yielding 0 for anything unparsable.
pub fn parse_u32_lenient(field: &[u8]) -> u32 {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(packet_type: PacketType, fields: &[&'static [u8]]) -> Response {
        Response::from_parts(
            packet_type,
            fields.iter().map(|f| Bytes::from_static(f)).collect(),
            Peer::detached("127.0.0.1:4730"),
        )
    }

    #[test]
    fn test_handle_and_data() {
        let resp = response(PacketType::WorkComplete, &[b"H:1", b"result"]);
        assert_eq!(resp.handle().unwrap(), "H:1");
        assert_eq!(resp.data().unwrap(), "result");
        assert_eq!(resp.remote(), "127.0.0.1:4730");
    }

    #[test]
    fn test_missing_data_field_is_protocol_error() {
        let resp = response(PacketType::WorkData, &[b"H:1"]);
        assert!(matches!(resp.data(), Err(GearmanError::Protocol(_))));
    }

    #[test]
    fn test_echo_data() {
        let resp = response(PacketType::EchoRes, &[b"ping"]);
        assert_eq!(resp.data().unwrap(), "ping");
        assert!(resp.handle().is_err());
    }

    #[test]
    fn test_status_fields() {
        let resp = response(PacketType::StatusRes, &[b"H:1", b"1", b"0", b"3", b"10"]);
        assert!(resp.status_known());
        assert!(!resp.status_running());
        assert_eq!(resp.numerator(), 3);
        assert_eq!(resp.denominator(), 10);
        assert_eq!(resp.waiting_clients(), 0);
    }

    #[test]
    fn test_status_unique_fields() {
        let resp = response(
            PacketType::StatusResUnique,
            &[b"u-1", b"1", b"1", b"5", b"8", b"2"],
        );
        assert_eq!(resp.unique_id().unwrap(), "u-1");
        assert!(resp.status_running());
        assert_eq!(resp.numerator(), 5);
        assert_eq!(resp.denominator(), 8);
        assert_eq!(resp.waiting_clients(), 2);
    }

    #[test]
    fn test_unparsable_numbers_read_as_zero() {
        let resp = response(PacketType::StatusRes, &[b"H:1", b"yes", b"1", b"\xff\xfe", b""]);
        assert!(!resp.status_known());
        assert!(resp.status_running());
        assert_eq!(resp.numerator(), 0);
        assert_eq!(resp.denominator(), 0);
    }

    #[test]
    fn test_truncated_status_reads_as_zero() {
        let resp = response(PacketType::StatusRes, &[b"H:1"]);
        assert!(!resp.status_known());
        assert_eq!(resp.denominator(), 0);
    }

    #[test]
    fn test_work_status_progress() {
        let resp = response(PacketType::WorkStatus, &[b"H:1", b"4", b"16"]);
        assert_eq!(resp.numerator(), 4);
        assert_eq!(resp.denominator(), 16);
    }

    #[test]
    fn test_error_packet() {
        let resp = response(PacketType::Error, &[b"ERR_UNKNOWN", b"bad command"]);
        assert_eq!(
            resp.error(),
            Some(("ERR_UNKNOWN".to_string(), "bad command".to_string()))
        );
        assert!(response(PacketType::Noop, &[]).error().is_none());
    }

    #[test]
    fn test_conn_option() {
        let resp = response(PacketType::OptionRes, &[b"exceptions"]);
        assert_eq!(resp.conn_option().unwrap(), "exceptions");
    }
}
