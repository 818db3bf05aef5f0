//! Handler registry for routing responses by packet type.
//!
//! Any number of handlers may be registered for one packet type. Dispatch
//! calls all of them, in registration order. Handlers run inline on the
//! peer's read loop and must not block.
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::handler::HandlerRegistry;
//! use gearman_client::protocol::PacketType;
//!
//! let registry = HandlerRegistry::new();
//!
//! registry.register(&[PacketType::EchoRes], |resp| {
//!     tracing::info!(server = %resp.remote(), "echo");
//! });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::protocol::{PacketType, Response};

/// A synchronous response handler.
pub type ResponseHandler = Arc<dyn Fn(&Response) + Send + Sync>;

/// Registry mapping packet types to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: RwLock<HashMap<PacketType, Vec<ResponseHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one handler for every packet type in `types`.
    pub fn register<F>(&self, types: &[PacketType], handler: F)
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        let handler: ResponseHandler = Arc::new(handler);
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        for pt in types {
            routes.entry(*pt).or_default().push(handler.clone());
        }
    }

    /// Number of handlers registered for a packet type.
    pub fn handler_count(&self, packet_type: PacketType) -> usize {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&packet_type)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the response's type.
    ///
    /// Returns how many handlers ran. The lock is released before any
    /// handler is called, so handlers may register further handlers.
    pub fn dispatch(&self, resp: &Response) -> usize {
        let handlers = {
            let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
            match routes.get(&resp.packet_type()) {
                Some(list) => list.clone(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            tracing::debug!(
                packet = ?resp.packet_type(),
                server = %resp.remote(),
                "no handler, dropping frame"
            );
            return 0;
        }

        for handler in &handlers {
            handler(resp);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("HandlerRegistry")
            .field("packet_types", &routes.len())
            .finish()
    }
}
