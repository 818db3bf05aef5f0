//! Echo and connection-option requests.

use std::sync::Arc;

use bytes::Bytes;

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::protocol::{PacketType, Request};
use crate::sender::Sender;

/// Control requests sharing one Sender.
#[derive(Debug)]
pub struct Control {
    sender: Sender,
}

impl Control {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sender: Sender::new(
                "control",
                dispatcher,
                &[PacketType::EchoRes, PacketType::OptionRes],
            ),
        }
    }

    /// Round-trip `data` through one server.
    pub async fn echo(&self, ctx: &Context, server: &str, data: Bytes) -> Result<Bytes> {
        let mut req = Request::to_server(server, PacketType::EchoReq);
        req.data = data;

        let resp = self.sender.send_and_wait(ctx, &req).await?;
        resp.data()
    }

    /// Enable a connection option. `server` of `None` asks every server and
    /// returns the first acknowledgement.
    pub async fn set_conn_option(
        &self,
        ctx: &Context,
        name: &str,
        server: Option<&str>,
    ) -> Result<String> {
        let mut req = Request::new(PacketType::OptionReq);
        req.conn_option = Some(name.to_string());
        req.server = server.map(str::to_string);

        let resp = self.sender.send_and_wait(ctx, &req).await?;
        let accepted = resp.conn_option()?;
        tracing::debug!(option = %accepted, server = %resp.remote(), "connection option set");
        Ok(accepted)
    }
}
