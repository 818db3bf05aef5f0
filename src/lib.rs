//! # gearman-client
//!
//! Async client for the Gearman job server protocol.
//!
//! Submits jobs to one or more job servers, tracks non-background jobs to
//! completion, polls job status and exchanges echo and connection-option
//! control messages.
//!
//! ## Architecture
//!
//! - **Peer** (one per server): a decode loop and a single writer task
//! - **Dispatcher**: routes decoded responses by packet type to handlers,
//!   broadcasts or targets outbound requests
//! - **Sender**: correlates one outbound request with its response
//! - **TaskSet**: tracks jobs by (server, handle) and feeds their updates to
//!   [`Task::wait`]
//!
//! ## Example
//!
//! ```ignore
//! use gearman_client::{Client, Context, TaskOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder()
//!         .servers(["10.0.0.1:4730", "10.0.0.2:4730"])
//!         .connect()
//!         .await
//!         .unwrap();
//!
//!     let ctx = Context::background();
//!     let mut task = client
//!         .add_task(&ctx, "reverse", "hello", TaskOptions::new())
//!         .await
//!         .unwrap();
//!     println!("{:?}", task.wait(&ctx).await);
//! }
//! ```

pub mod config;
pub mod context;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod sender;
pub mod task;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use context::Context;
pub use error::{GearmanError, Result};
pub use protocol::Schedule;
pub use task::{Priority, StatusQuery, Task, TaskOptions, TaskStatus};
