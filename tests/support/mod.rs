//! Scripted in-process job server for integration tests.

use std::future::Future;
use std::time::Duration;

use gearman_client::protocol::{build_frame, FrameBuffer, Magic, PacketType, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One accepted client connection.
pub struct Conn {
    stream: TcpStream,
    decoder: FrameBuffer,
    pending: std::collections::VecDeque<Request>,
}

impl Conn {
    /// Next decoded request, or `None` once the client hangs up.
    pub async fn next_request(&mut self) -> Option<Request> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(req) = self.pending.pop_front() {
                return Some(req);
            }
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            for frame in self.decoder.push(&buf[..n]).ok()? {
                self.pending.push_back(Request::from_frame(&frame).ok()?);
            }
        }
    }

    /// Next request, which must be of type `expected`.
    pub async fn expect(&mut self, expected: PacketType) -> Request {
        let req = self.next_request().await.expect("client hung up");
        assert_eq!(req.packet_type, expected);
        req
    }

    pub async fn reply(&mut self, packet_type: PacketType, fields: &[&[u8]]) {
        let bytes = build_frame(Magic::Response, packet_type, fields);
        self.stream.write_all(&bytes).await.expect("reply");
    }

    pub async fn reply_after(&mut self, delay: Duration, packet_type: PacketType, fields: &[&[u8]]) {
        tokio::time::sleep(delay).await;
        self.reply(packet_type, fields).await;
    }

    /// Mirror echo and option requests until the client hangs up.
    pub async fn serve_control(mut self) {
        while let Some(req) = self.next_request().await {
            match req.packet_type {
                PacketType::EchoReq => self.reply(PacketType::EchoRes, &[&req.data[..]]).await,
                PacketType::OptionReq => {
                    let name = req.conn_option.unwrap_or_default();
                    self.reply(PacketType::OptionRes, &[name.as_bytes()]).await
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}

/// A listening fake server on 127.0.0.1.
pub struct FakeServer {
    addr: String,
}

impl FakeServer {
    /// Accept connections, running `script` on each one.
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: Fn(Conn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn = Conn {
                    stream,
                    decoder: FrameBuffer::new(Magic::Request),
                    pending: Default::default(),
                };
                tokio::spawn(script(conn));
            }
        });

        Self { addr }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}
