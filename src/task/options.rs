//! Submission options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{GearmanError, Result};
use crate::protocol::{PacketType, Request, Response, Schedule};

/// Callback for WORK_DATA and WORK_WARNING frames.
pub type ResponseCallback = Arc<dyn Fn(&Response) + Send + Sync>;

/// Callback for WORK_STATUS frames, called with (numerator, denominator).
pub type StatusCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Job priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Normal,
    High,
    Low,
}

/// Options for [`Client::add_task`](crate::Client::add_task).
///
/// # Example
///
/// ```ignore
/// let opts = TaskOptions::new()
///     .priority(Priority::High)
///     .unique_id("resize-42")
///     .on_data(|resp| println!("{:?}", resp.data()));
/// ```
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    pub background: bool,
    pub unique_id: Option<String>,
    /// Reducer function; turns the submission into SUBMIT_REDUCE_JOB.
    pub reducer: Option<String>,
    /// Run on a cron-style schedule. Background only.
    pub schedule: Option<Schedule>,
    /// Run at a Unix time. Background only.
    pub epoch: Option<i64>,
    /// Connection option to enable on the target servers first.
    pub conn_option: Option<String>,
    /// Give up waiting for JOB_CREATED after this long.
    pub creation_timeout: Option<Duration>,
    /// Submit only to this server instead of broadcasting.
    pub server: Option<String>,
    pub on_data: Option<ResponseCallback>,
    pub on_warning: Option<ResponseCallback>,
    pub on_status: Option<StatusCallback>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    pub fn reducer(mut self, name: impl Into<String>) -> Self {
        self.reducer = Some(name.into());
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn epoch(mut self, epoch: i64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn conn_option(mut self, name: impl Into<String>) -> Self {
        self.conn_option = Some(name.into());
        self
    }

    pub fn creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = Some(timeout);
        self
    }

    pub fn server(mut self, addr: impl Into<String>) -> Self {
        self.server = Some(addr.into());
        self
    }

    /// Called for every WORK_DATA frame, in arrival order.
    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    /// Called for every WORK_WARNING frame.
    pub fn on_warning<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.on_warning = Some(Arc::new(f));
        self
    }

    /// Called for every WORK_STATUS frame.
    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u32) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(f));
        self
    }

    /// Reject combinations the protocol cannot express.
    pub fn validate(&self) -> Result<()> {
        let timed = self.schedule.is_some() || self.epoch.is_some();

        if self.schedule.is_some() && self.epoch.is_some() {
            return Err(GearmanError::Config(
                "schedule and epoch are mutually exclusive".to_string(),
            ));
        }
        if self.reducer.is_some() && timed {
            return Err(GearmanError::Config(
                "reducer cannot be combined with schedule or epoch".to_string(),
            ));
        }
        if timed && !self.background {
            return Err(GearmanError::Config(
                "scheduled and epoch jobs must be background".to_string(),
            ));
        }
        if (timed || self.reducer.is_some()) && self.priority != Priority::Normal {
            return Err(GearmanError::Config(
                "scheduled, epoch and reduce jobs only support normal priority".to_string(),
            ));
        }
        if self.creation_timeout == Some(Duration::ZERO) {
            return Err(GearmanError::Config(
                "creation timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Submission opcode for these options.
    pub fn packet_type(&self) -> PacketType {
        use PacketType::*;

        if self.schedule.is_some() {
            return SubmitJobSched;
        }
        if self.epoch.is_some() {
            return SubmitJobEpoch;
        }
        if self.reducer.is_some() {
            return if self.background {
                SubmitReduceJobBackground
            } else {
                SubmitReduceJob
            };
        }
        match (self.priority, self.background) {
            (Priority::Normal, false) => SubmitJob,
            (Priority::Normal, true) => SubmitJobBg,
            (Priority::High, false) => SubmitJobHigh,
            (Priority::High, true) => SubmitJobHighBg,
            (Priority::Low, false) => SubmitJobLow,
            (Priority::Low, true) => SubmitJobLowBg,
        }
    }

    /// Build the submission request.
    pub fn to_request(&self, function: &str, data: Bytes) -> Request {
        let mut req = Request::new(self.packet_type());
        req.function = function.to_string();
        req.data = data;
        req.unique_id = self.unique_id.clone();
        req.reducer = self.reducer.clone();
        req.schedule = self.schedule;
        req.epoch = self.epoch;
        req.server = self.server.clone();
        req.creation_timeout = self.creation_timeout;
        req
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("priority", &self.priority)
            .field("background", &self.background)
            .field("unique_id", &self.unique_id)
            .field("reducer", &self.reducer)
            .field("schedule", &self.schedule)
            .field("epoch", &self.epoch)
            .field("conn_option", &self.conn_option)
            .field("creation_timeout", &self.creation_timeout)
            .field("server", &self.server)
            .field("on_data", &self.on_data.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_matrix() {
        use PacketType::*;
        let cases = [
            (Priority::Normal, false, SubmitJob),
            (Priority::Normal, true, SubmitJobBg),
            (Priority::High, false, SubmitJobHigh),
            (Priority::High, true, SubmitJobHighBg),
            (Priority::Low, false, SubmitJobLow),
            (Priority::Low, true, SubmitJobLowBg),
        ];
        for (priority, background, expected) in cases {
            let opts = TaskOptions::new().priority(priority).background(background);
            assert_eq!(opts.packet_type(), expected);
        }
    }

    #[test]
    fn test_timed_and_reduce_types() {
        let sched = TaskOptions::new().background(true).schedule(Schedule::default());
        assert_eq!(sched.packet_type(), PacketType::SubmitJobSched);

        let epoch = TaskOptions::new().background(true).epoch(1_700_000_000);
        assert_eq!(epoch.packet_type(), PacketType::SubmitJobEpoch);

        let reduce = TaskOptions::new().reducer("sum");
        assert_eq!(reduce.packet_type(), PacketType::SubmitReduceJob);
        assert_eq!(
            reduce.background(true).packet_type(),
            PacketType::SubmitReduceJobBackground
        );
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(TaskOptions::new().validate().is_ok());
        assert!(TaskOptions::new()
            .background(true)
            .epoch(10)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let bad = [
            TaskOptions::new()
                .background(true)
                .schedule(Schedule::default())
                .epoch(1),
            TaskOptions::new().background(true).reducer("r").epoch(1),
            TaskOptions::new().epoch(1),
            TaskOptions::new().schedule(Schedule::default()),
            TaskOptions::new().priority(Priority::High).reducer("r"),
            TaskOptions::new()
                .priority(Priority::Low)
                .background(true)
                .epoch(1),
            TaskOptions::new().creation_timeout(Duration::ZERO),
        ];
        for opts in bad {
            assert!(
                matches!(opts.validate(), Err(GearmanError::Config(_))),
                "{:?}",
                opts
            );
        }
    }

    #[test]
    fn test_to_request_carries_routing() {
        let req = TaskOptions::new()
            .unique_id("u-1")
            .server("a:1")
            .creation_timeout(Duration::from_millis(5))
            .to_request("reverse", Bytes::from_static(b"abc"));

        assert_eq!(req.packet_type, PacketType::SubmitJob);
        assert_eq!(req.function, "reverse");
        assert_eq!(req.unique_id.as_deref(), Some("u-1"));
        assert_eq!(req.server.as_deref(), Some("a:1"));
        assert_eq!(req.creation_timeout, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_debug_hides_callbacks() {
        let opts = TaskOptions::new().on_status(|_, _| {});
        let text = format!("{:?}", opts);
        assert!(text.contains("on_status: true"));
        assert!(text.contains("on_data: false"));
    }
}
