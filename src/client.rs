//! Client builder and facade.
//!
//! The [`ClientBuilder`] collects configuration and connects to every
//! server. The [`Client`] then exposes the four client operations:
//! 1. `add_task` - submit a job, optionally wait on the returned [`Task`]
//! 2. `task_status` - poll a job's progress
//! 3. `echo` - round-trip bytes through one server
//! 4. `set_conn_option` - enable a connection option on every server
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::{Client, Context, TaskOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .server("127.0.0.1:4730")
//!         .send_timeout(std::time::Duration::from_secs(2))
//!         .connect()
//!         .await?;
//!
//!     let ctx = Context::with_timeout(std::time::Duration::from_secs(20));
//!     let mut task = client
//!         .add_task(&ctx, "reverse", "hello", TaskOptions::new())
//!         .await?;
//!     let result = task.wait(&ctx).await?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::Span;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::control::Control;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::task::{StatusQuery, Task, TaskOptions, TaskSet, TaskStatus};

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    config: ClientConfig,
    span: Option<Span>,
}

impl ClientBuilder {
    /// Create a builder with default settings and no servers.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            span: None,
        }
    }

    /// Start from a loaded configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a job server, `host:port`.
    pub fn server(mut self, addr: impl Into<String>) -> Self {
        self.config.servers.push(addr.into());
        self
    }

    /// Add several job servers.
    pub fn servers<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.servers.extend(addrs.into_iter().map(Into::into));
        self
    }

    /// Set the base send timeout.
    ///
    /// Unless set explicitly, the retry window equals this value and the
    /// retry tick is a tenth of it. Acknowledgement waits are bounded by the
    /// [`Context`] and [`TaskOptions::creation_timeout`] instead.
    /// Default: 1 second
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how long unmatched work packets are kept.
    pub fn retry_window(mut self, window: Duration) -> Self {
        self.config.retry_window_ms = Some(window.as_millis() as u64);
        self
    }

    /// Set how often unmatched work packets are retried.
    pub fn retry_tick(mut self, tick: Duration) -> Self {
        self.config.retry_tick_ms = Some(tick.as_millis() as u64);
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the largest payload accepted from a server.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the writer channel capacity per server.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the maximum number of handles with parked work packets.
    ///
    /// When this limit is reached, further unmatched packets are dropped
    /// with a warning.
    /// Default: 256
    pub fn max_pending_lookups(mut self, limit: usize) -> Self {
        self.config.max_pending_lookups = limit;
        self
    }

    /// Parent span for every log line and background task of the client.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the configuration and connect to every server.
    pub async fn connect(self) -> Result<Client> {
        self.config.validate()?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("gearman_client"));

        let mut dispatcher = Dispatcher::new(self.config.peer_options(), span);
        for addr in &self.config.servers {
            dispatcher.connect(addr).await?;
        }

        Ok(Client::from_dispatcher(Arc::new(dispatcher), self.config))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected job-server client.
#[derive(Debug)]
pub struct Client {
    dispatcher: Arc<Dispatcher>,
    tasks: TaskSet,
    control: Control,
    config: ClientConfig,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client over an already populated dispatcher.
    pub fn from_dispatcher(dispatcher: Arc<Dispatcher>, config: ClientConfig) -> Self {
        Self {
            tasks: TaskSet::new(dispatcher.clone(), config.retry_policy()),
            control: Control::new(dispatcher.clone()),
            dispatcher,
            config,
        }
    }

    /// Submit a job.
    ///
    /// Broadcast to every server unless `opts.server` pins one; the first
    /// JOB_CREATED wins. When `opts.conn_option` is set, OPTION_REQ goes to
    /// the same servers first.
    pub async fn add_task(
        &self,
        ctx: &Context,
        function: &str,
        data: impl Into<Bytes>,
        opts: TaskOptions,
    ) -> Result<Task> {
        opts.validate()?;
        if let Some(name) = &opts.conn_option {
            self.control
                .set_conn_option(ctx, name, opts.server.as_deref())
                .await?;
        }
        self.tasks.add_task(ctx, function, data.into(), opts).await
    }

    /// Poll the status of a job on the server that accepted `task`.
    pub async fn task_status(
        &self,
        ctx: &Context,
        task: &Task,
        query: StatusQuery,
    ) -> Result<TaskStatus> {
        self.tasks.task_status(ctx, task, query).await
    }

    /// Round-trip `data` through `server`.
    pub async fn echo(&self, ctx: &Context, server: &str, data: impl Into<Bytes>) -> Result<Bytes> {
        self.control.echo(ctx, server, data.into()).await
    }

    /// Enable a connection option on every server. Returns the option name
    /// from the first acknowledgement.
    pub async fn set_conn_option(&self, ctx: &Context, name: &str) -> Result<String> {
        self.control.set_conn_option(ctx, name, None).await
    }

    /// Configured server addresses.
    pub fn servers(&self) -> Vec<&str> {
        self.dispatcher.peers().iter().map(|p| p.addr()).collect()
    }

    /// Number of non-background tasks still tracked.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.tracked()
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close every connection. Pending waits resolve with a network error.
    pub fn close(&self) {
        self.dispatcher.close();
    }
}
