//! Status polling types.

use crate::protocol::Response;

/// What a status poll asks about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusQuery {
    /// The task's own handle.
    #[default]
    Task,
    /// Another handle on the task's server.
    Handle(String),
    /// A job by its unique id (GET_STATUS_UNIQUE).
    Unique(String),
}

/// Decoded STATUS_RES / STATUS_RES_UNIQUE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStatus {
    pub known: bool,
    pub running: bool,
    pub numerator: u32,
    pub denominator: u32,
    /// Only reported by GET_STATUS_UNIQUE; zero otherwise.
    pub waiting_clients: u32,
}

impl TaskStatus {
    /// Read a status response. Unparsable fields read as zero.
    pub fn from_response(resp: &Response) -> Self {
        Self {
            known: resp.status_known(),
            running: resp.status_running(),
            numerator: resp.numerator(),
            denominator: resp.denominator(),
            waiting_clients: resp.waiting_clients(),
        }
    }
}
