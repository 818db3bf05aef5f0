//! Task module - submitted jobs and their lifecycle.
//!
//! A [`Task`] is returned by [`TaskSet::add_task`] once the server has
//! assigned a handle. Non-background tasks are tracked until they reach a
//! terminal state:
//!
//! ```text
//! Submitted ─┬─► Untracked (background)
//!            └─► Tracked ─► Updating* ─┬─► Completed
//!                                       ├─► Failed / Excepted
//!                                       └─► TimedOut / Disconnected
//! ```
//!
//! The tracking entry is removed exactly once: when `wait` returns, or when
//! the task is dropped.

mod options;
mod set;
mod status;

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;

pub use options::{Priority, ResponseCallback, StatusCallback, TaskOptions};
pub use set::{RetryPolicy, TaskSet, DEFAULT_MAX_PENDING_LOOKUPS, WORK_PACKETS};
pub use status::{StatusQuery, TaskStatus};

use crate::context::Context;
use crate::error::{GearmanError, Result};
use crate::protocol::{PacketType, Response};
use crate::transport::Peer;
use set::TaskSetInner;

struct Tracking {
    set: Weak<TaskSetInner>,
    id: u64,
    rx: mpsc::UnboundedReceiver<Response>,
}

/// A submitted job.
///
/// Work packets for a tracked task are buffered until [`Task::wait`] reads
/// them, with no upper bound: the read loop must never block or drop a
/// terminal packet. Holding a task that streams WORK_DATA without waiting
/// on it grows that buffer until the task is waited on or dropped.
pub struct Task {
    packet_type: PacketType,
    function: String,
    handle: String,
    peer: Arc<Peer>,
    on_data: Option<ResponseCallback>,
    on_warning: Option<ResponseCallback>,
    on_status: Option<StatusCallback>,
    tracking: Option<Tracking>,
}

impl Task {
    fn new(
        packet_type: PacketType,
        function: &str,
        handle: String,
        peer: Arc<Peer>,
        opts: &TaskOptions,
    ) -> Self {
        Self {
            packet_type,
            function: function.to_string(),
            handle,
            peer,
            on_data: opts.on_data.clone(),
            on_warning: opts.on_warning.clone(),
            on_status: opts.on_status.clone(),
            tracking: None,
        }
    }

    fn track(&mut self, set: Weak<TaskSetInner>, id: u64, rx: mpsc::UnboundedReceiver<Response>) {
        self.tracking = Some(Tracking { set, id, rx });
    }

    fn untrack(&mut self) {
        if let Some(tracking) = self.tracking.take() {
            if let Some(set) = tracking.set.upgrade() {
                set.remove(self.peer.addr(), &self.handle, tracking.id);
            }
        }
    }

    /// Server-assigned job handle.
    #[inline]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Address of the server that accepted the job.
    #[inline]
    pub fn remote(&self) -> &str {
        self.peer.addr()
    }

    #[inline]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Background jobs report nothing back and cannot be waited on.
    #[inline]
    pub fn is_background(&self) -> bool {
        !self.packet_type.is_non_background()
    }

    /// Wait for the job to finish.
    ///
    /// Data, warning and status updates are passed to the callbacks from
    /// [`TaskOptions`] in arrival order; each callback returns before the
    /// next packet is read. An expired `ctx` yields `Timeout` without
    /// consuming a pending packet. The task is no longer tracked once this
    /// returns, whatever the outcome.
    pub async fn wait(&mut self, ctx: &Context) -> Result<Bytes> {
        if self.is_background() {
            return Err(GearmanError::NotWaitable);
        }
        let result = self.wait_terminal(ctx).await;
        self.untrack();
        result
    }

    async fn wait_terminal(&mut self, ctx: &Context) -> Result<Bytes> {
        let rx = match self.tracking.as_mut() {
            Some(tracking) => &mut tracking.rx,
            None => {
                return Err(GearmanError::Network(format!(
                    "task {} is no longer tracked",
                    self.handle
                )))
            }
        };

        loop {
            let resp = tokio::select! {
                biased;
                _ = ctx.done() => return Err(GearmanError::Timeout),
                resp = rx.recv() => match resp {
                    Some(resp) => resp,
                    None => return Err(GearmanError::Network("task channel closed".to_string())),
                },
                _ = self.peer.closed() => {
                    return Err(GearmanError::Network(format!("{} closed", self.peer.addr())))
                }
            };

            match resp.packet_type() {
                PacketType::WorkComplete => return resp.data(),
                PacketType::WorkFail => return Err(GearmanError::TaskFailed),
                PacketType::WorkException => {
                    return Err(GearmanError::TaskException(resp.data().unwrap_or_default()))
                }
                PacketType::WorkData => {
                    if let Some(on_data) = &self.on_data {
                        on_data(&resp);
                    }
                }
                PacketType::WorkWarning => {
                    if let Some(on_warning) = &self.on_warning {
                        on_warning(&resp);
                    }
                }
                PacketType::WorkStatus => {
                    if let Some(on_status) = &self.on_status {
                        on_status(resp.numerator(), resp.denominator());
                    }
                }
                other => tracing::debug!(packet = ?other, handle = %self.handle, "ignored"),
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.untrack();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("packet_type", &self.packet_type)
            .field("function", &self.function)
            .field("handle", &self.handle)
            .field("remote", &self.peer.addr())
            .field("tracked", &self.tracking.is_some())
            .finish()
    }
}
