//! Tracked tasks and work-packet routing.
//!
//! Non-background tasks are keyed by (server, handle). Work packets are
//! routed to the owning task's channel from the peer's read loop.
//!
//! A worker can answer before JOB_CREATED has been processed, so a work
//! packet may name a handle that is not registered yet. Such packets are
//! parked per key and a retry loop polls for the registration every
//! `tick`. Parked packets are delivered in arrival order once the task
//! appears and dropped when `window` elapses. Packets for a key that is
//! already parked join the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{Instrument, Span};

use super::{StatusQuery, Task, TaskOptions, TaskStatus};
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::protocol::{PacketType, Request, Response};
use crate::sender::Sender;

/// Packet types routed to tasks.
pub const WORK_PACKETS: [PacketType; 6] = [
    PacketType::WorkData,
    PacketType::WorkWarning,
    PacketType::WorkStatus,
    PacketType::WorkComplete,
    PacketType::WorkFail,
    PacketType::WorkException,
];

/// Default upper bound on concurrently parked keys.
pub const DEFAULT_MAX_PENDING_LOOKUPS: usize = 256;

/// How long unmatched work packets are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub window: Duration,
    pub tick: Duration,
    pub max_pending_lookups: usize,
}

impl RetryPolicy {
    /// Window of `send_timeout`, polled ten times.
    pub fn from_send_timeout(send_timeout: Duration) -> Self {
        Self {
            window: send_timeout,
            tick: send_timeout / 10,
            max_pending_lookups: DEFAULT_MAX_PENDING_LOOKUPS,
        }
    }
}

type Key = (String, String);

struct TaskEntry {
    id: u64,
    tx: mpsc::UnboundedSender<Response>,
}

pub(crate) struct TaskSetInner {
    tasks: RwLock<HashMap<String, HashMap<String, TaskEntry>>>,
    parked: Mutex<HashMap<Key, VecDeque<Response>>>,
    next_id: AtomicU64,
    retry: RetryPolicy,
    lookups: Arc<Semaphore>,
    span: Span,
}

impl TaskSetInner {
    pub(crate) fn register(
        &self,
        server: &str,
        handle: &str,
    ) -> (u64, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let previous = tasks
            .entry(server.to_string())
            .or_default()
            .insert(handle.to_string(), TaskEntry { id, tx });
        if previous.is_some() {
            tracing::warn!(parent: &self.span, %server, %handle, "handle re-registered, earlier task loses updates");
        }
        (id, rx)
    }

    /// Drop the entry for (server, handle) if it still belongs to task `id`.
    pub(crate) fn remove(&self, server: &str, handle: &str, id: u64) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(by_handle) = tasks.get_mut(server) {
            if by_handle.get(handle).is_some_and(|e| e.id == id) {
                by_handle.remove(handle);
            }
            if by_handle.is_empty() {
                tasks.remove(server);
            }
        }
    }

    fn lookup(&self, server: &str, handle: &str) -> Option<mpsc::UnboundedSender<Response>> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(server)
            .and_then(|by_handle| by_handle.get(handle))
            .map(|entry| entry.tx.clone())
    }

    fn tracked(&self) -> usize {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.values().map(HashMap::len).sum()
    }

    fn parked_keys(&self) -> usize {
        self.parked.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn route_work(self: &Arc<Self>, resp: &Response) {
        let handle = match resp.handle() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "work packet without handle");
                return;
            }
        };
        let key = (resp.remote().to_string(), handle);

        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = parked.get_mut(&key) {
            queue.push_back(resp.clone());
            return;
        }

        if let Some(tx) = self.lookup(&key.0, &key.1) {
            if tx.send(resp.clone()).is_err() {
                tracing::debug!(parent: &self.span, server = %key.0, handle = %key.1, "task gone, packet dropped");
            }
            return;
        }

        let permit = match self.lookups.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    parent: &self.span,
                    server = %key.0,
                    handle = %key.1,
                    packet = ?resp.packet_type(),
                    "lookup capacity reached, dropping work packet"
                );
                return;
            }
        };

        tracing::debug!(parent: &self.span, server = %key.0, handle = %key.1, "handle not registered yet, parking");
        parked.insert(key.clone(), VecDeque::from([resp.clone()]));
        drop(parked);

        let span = tracing::debug_span!(parent: &self.span, "retry", server = %key.0, handle = %key.1);
        tokio::spawn(retry_loop(Arc::downgrade(self), key, self.retry, permit).instrument(span));
    }
}

async fn retry_loop(
    set: Weak<TaskSetInner>,
    key: Key,
    retry: RetryPolicy,
    _permit: OwnedSemaphorePermit,
) {
    let deadline = Instant::now() + retry.window;
    loop {
        tokio::time::sleep(retry.tick).await;
        let Some(inner) = set.upgrade() else {
            return;
        };

        let mut parked = inner.parked.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = inner.lookup(&key.0, &key.1) {
            let queue = parked.remove(&key).unwrap_or_default();
            tracing::debug!(count = queue.len(), "delivering parked packets");
            for resp in queue {
                if tx.send(resp).is_err() {
                    break;
                }
            }
            return;
        }

        if Instant::now() >= deadline {
            let dropped = parked.remove(&key).map_or(0, |q| q.len());
            tracing::debug!(dropped, "registration window elapsed, dropping parked packets");
            return;
        }
    }
}

/// Submits tasks, tracks the non-background ones, and polls status.
pub struct TaskSet {
    inner: Arc<TaskSetInner>,
    create: Sender,
    status: Sender,
}

impl TaskSet {
    /// Create a task set and register its routes on `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, retry: RetryPolicy) -> Self {
        let inner = Arc::new(TaskSetInner {
            tasks: RwLock::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            retry,
            lookups: Arc::new(Semaphore::new(retry.max_pending_lookups)),
            span: dispatcher.span().clone(),
        });

        let weak = Arc::downgrade(&inner);
        dispatcher.register(&WORK_PACKETS, move |resp: &Response| {
            if let Some(inner) = weak.upgrade() {
                inner.route_work(resp);
            }
        });

        let create = Sender::new("create", dispatcher.clone(), &[PacketType::JobCreated]);
        let status = Sender::new(
            "status",
            dispatcher,
            &[PacketType::StatusRes, PacketType::StatusResUnique],
        );

        Self {
            inner,
            create,
            status,
        }
    }

    /// Submit a job and wait for its handle.
    ///
    /// Non-background tasks are tracked before this returns, so every work
    /// packet the server sends afterwards reaches [`Task::wait`].
    pub async fn add_task(
        &self,
        ctx: &Context,
        function: &str,
        data: Bytes,
        opts: TaskOptions,
    ) -> Result<Task> {
        opts.validate()?;
        let req = opts.to_request(function, data);

        let resp = self.create.send_and_wait(ctx, &req).await?;
        let handle = resp.handle()?;
        let peer = resp.peer().clone();

        tracing::debug!(
            parent: &self.inner.span,
            %function,
            %handle,
            server = %peer.addr(),
            "task created"
        );

        let mut task = Task::new(req.packet_type, function, handle, peer, &opts);
        if req.packet_type.is_non_background() {
            let (id, rx) = self.inner.register(task.remote(), task.handle());
            task.track(Arc::downgrade(&self.inner), id, rx);
        }
        Ok(task)
    }

    /// Poll the status of a job on the task's server.
    pub async fn task_status(
        &self,
        ctx: &Context,
        task: &Task,
        query: StatusQuery,
    ) -> Result<TaskStatus> {
        let req = match query {
            StatusQuery::Task => {
                let mut req = Request::to_server(task.remote(), PacketType::GetStatus);
                req.handle = Some(task.handle().to_string());
                req
            }
            StatusQuery::Handle(handle) => {
                let mut req = Request::to_server(task.remote(), PacketType::GetStatus);
                req.handle = Some(handle);
                req
            }
            StatusQuery::Unique(unique_id) => {
                let mut req = Request::to_server(task.remote(), PacketType::GetStatusUnique);
                req.unique_id = Some(unique_id);
                req
            }
        };

        let resp = self.status.send_and_wait(ctx, &req).await?;
        Ok(TaskStatus::from_response(&resp))
    }

    pub(crate) fn inner(&self) -> &Arc<TaskSetInner> {
        &self.inner
    }

    /// Number of tracked tasks.
    pub fn tracked(&self) -> usize {
        self.inner.tracked()
    }

    /// Number of handles with parked work packets.
    pub fn parked(&self) -> usize {
        self.inner.parked_keys()
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tracked", &self.tracked())
            .field("retry", &self.inner.retry)
            .finish()
    }
}
