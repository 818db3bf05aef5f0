//! Handler module - response routing.
//!
//! Provides [`HandlerRegistry`], which maps packet types to the synchronous
//! handlers that forward responses to Senders and task channels.
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::handler::HandlerRegistry;
//! use gearman_client::protocol::PacketType;
//!
//! let registry = HandlerRegistry::new();
//!
//! // Every handler registered for a type fires.
//! registry.register(&[PacketType::WorkComplete], |resp| { /* task set */ });
//! registry.register(&[PacketType::WorkComplete], |resp| { /* metrics */ });
//! ```

mod registry;

pub use registry::{HandlerRegistry, ResponseHandler};
