//! Packet type codes.
//!
//! Every opcode of the binary protocol is listed so that any well-formed
//! frame decodes, even the worker-side ones a client never expects.

use crate::error::{GearmanError, Result};

/// Protocol opcode carried in the second header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
    SubmitReduceJob = 37,
    SubmitReduceJobBackground = 38,
    GrabJobAll = 39,
    JobAssignAll = 40,
    GetStatusUnique = 41,
    StatusResUnique = 42,
}

impl PacketType {
    /// Wire code for this type.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parse a wire code.
    pub fn from_code(code: u32) -> Result<Self> {
        use PacketType::*;
        let pt = match code {
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            22 => SetClientId,
            23 => CanDoTimeout,
            24 => AllYours,
            25 => WorkException,
            26 => OptionReq,
            27 => OptionRes,
            28 => WorkData,
            29 => WorkWarning,
            30 => GrabJobUniq,
            31 => JobAssignUniq,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            35 => SubmitJobSched,
            36 => SubmitJobEpoch,
            37 => SubmitReduceJob,
            38 => SubmitReduceJobBackground,
            39 => GrabJobAll,
            40 => JobAssignAll,
            41 => GetStatusUnique,
            42 => StatusResUnique,
            other => {
                return Err(GearmanError::Protocol(format!(
                    "Unknown packet type {}",
                    other
                )))
            }
        };
        Ok(pt)
    }

    /// Number of NUL-separated fields in the payload.
    ///
    /// The last field is opaque and may itself contain NUL bytes.
    pub fn field_count(self) -> usize {
        use PacketType::*;
        match self {
            ResetAbilities | PreSleep | Noop | GrabJob | NoJob | AllYours | GrabJobUniq
            | GrabJobAll => 0,
            CanDo | CantDo | JobCreated | WorkFail | GetStatus | EchoReq | EchoRes
            | SetClientId | OptionReq | OptionRes | GetStatusUnique => 1,
            CanDoTimeout | WorkComplete | WorkException | WorkData | WorkWarning | Error => 2,
            SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow
            | SubmitJobLowBg | JobAssign | WorkStatus => 3,
            JobAssignUniq => 4,
            SubmitJobEpoch => 4,
            StatusRes | SubmitReduceJob | SubmitReduceJobBackground | JobAssignAll => 5,
            StatusResUnique => 6,
            SubmitJobSched => 8,
        }
    }

    /// True for submissions whose caller waits for a result.
    pub fn is_non_background(self) -> bool {
        use PacketType::*;
        matches!(
            self,
            SubmitJob | SubmitJobHigh | SubmitJobLow | SubmitReduceJob
        )
    }

    /// True for the packets a server sends about a running job.
    pub fn is_work_update(self) -> bool {
        use PacketType::*;
        matches!(
            self,
            WorkData | WorkWarning | WorkStatus | WorkComplete | WorkFail | WorkException
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_for_every_known_code() {
        for code in 1u32..=42 {
            if code == 5 {
                assert!(PacketType::from_code(code).is_err());
                continue;
            }
            let pt = PacketType::from_code(code).unwrap();
            assert_eq!(pt.code(), code);
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        let err = PacketType::from_code(99).unwrap_err();
        assert!(err.to_string().contains("Unknown packet type 99"));
    }

    #[test]
    fn test_background_classification() {
        assert!(PacketType::SubmitJob.is_non_background());
        assert!(PacketType::SubmitJobHigh.is_non_background());
        assert!(PacketType::SubmitJobLow.is_non_background());
        assert!(PacketType::SubmitReduceJob.is_non_background());
        assert!(!PacketType::SubmitJobBg.is_non_background());
        assert!(!PacketType::SubmitJobSched.is_non_background());
        assert!(!PacketType::SubmitJobEpoch.is_non_background());
    }

    #[test]
    fn test_field_counts() {
        assert_eq!(PacketType::SubmitJob.field_count(), 3);
        assert_eq!(PacketType::SubmitJobSched.field_count(), 8);
        assert_eq!(PacketType::StatusRes.field_count(), 5);
        assert_eq!(PacketType::StatusResUnique.field_count(), 6);
        assert_eq!(PacketType::Noop.field_count(), 0);
    }
}
