//! Request/response correlation.
//!
//! A job server answers the requests on one connection in the order they
//! were written, ERROR included. The [`Ledger`] shared by every Sender of a
//! Dispatcher keeps, per connection, a FIFO of (sender, request) tickets
//! pushed in the same critical section that queues the frame. A reply
//! settles the oldest ticket of its connection and reaches the caller only
//! when that ticket is the request its Sender is still waiting on.
//! Everything else is a straggler from an earlier broadcast, or an answer
//! nobody is waiting for any more, and is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::{GearmanError, Result};
use crate::protocol::{PacketType, Request, Response};
use crate::transport::Peer;
use crate::writer::OutboundFrame;

/// Packet types that answer a request.
pub const REPLY_PACKETS: [PacketType; 6] = [
    PacketType::JobCreated,
    PacketType::StatusRes,
    PacketType::StatusResUnique,
    PacketType::EchoRes,
    PacketType::OptionRes,
    PacketType::Error,
];

struct Waiter {
    request: u64,
    answers: Arc<[PacketType]>,
    /// Peers written to that have not answered yet.
    pending: usize,
    tx: oneshot::Sender<Response>,
}

/// Outstanding requests per connection.
#[derive(Default)]
pub(crate) struct Ledger {
    next_id: u64,
    owed: HashMap<String, VecDeque<(u64, u64)>>,
    waiting: HashMap<u64, Waiter>,
}

impl Ledger {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn post(&mut self, sender: u64, written: &[Arc<Peer>], mut waiter: Waiter) {
        for peer in written {
            self.owed
                .entry(peer.addr().to_string())
                .or_default()
                .push_back((sender, waiter.request));
        }
        if !written.is_empty() {
            waiter.pending = written.len();
            self.waiting.insert(sender, waiter);
        }
    }

    pub(crate) fn settle(&mut self, resp: &Response) {
        let addr = resp.remote();
        let ticket = match self.owed.get_mut(addr) {
            Some(queue) => {
                let ticket = queue.pop_front();
                if queue.is_empty() {
                    self.owed.remove(addr);
                }
                ticket
            }
            None => None,
        };

        let Some((sender, request)) = ticket else {
            tracing::debug!(packet = ?resp.packet_type(), server = %addr, "unsolicited response dropped");
            return;
        };

        let packet = resp.packet_type();
        let waiter = match self.waiting.get_mut(&sender) {
            Some(waiter) if waiter.request == request => waiter,
            _ => {
                tracing::debug!(?packet, server = %addr, "straggler dropped");
                return;
            }
        };

        if packet != PacketType::Error && !waiter.answers.contains(&packet) {
            tracing::warn!(?packet, server = %addr, "reply does not match the request, dropped");
            return;
        }
        waiter.pending = waiter.pending.saturating_sub(1);
        if packet == PacketType::Error && waiter.pending > 0 {
            tracing::debug!(server = %addr, pending = waiter.pending, "server error, waiting on the others");
            return;
        }

        if let Some(waiter) = self.waiting.remove(&sender) {
            if waiter.tx.send(resp.clone()).is_err() {
                tracing::debug!(server = %addr, "waiter gone, response dropped");
            }
        }
    }

    fn clear_waiting(&mut self, sender: u64, request: u64) {
        if self
            .waiting
            .get(&sender)
            .is_some_and(|waiter| waiter.request == request)
        {
            self.waiting.remove(&sender);
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("owed", &self.owed)
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

/// Pairs outbound requests with their responses.
pub struct Sender {
    name: &'static str,
    id: u64,
    answers: Arc<[PacketType]>,
    dispatcher: Arc<Dispatcher>,
    inflight: tokio::sync::Mutex<()>,
}

impl Sender {
    /// Create a Sender answered by responses of the given types.
    pub fn new(name: &'static str, dispatcher: Arc<Dispatcher>, answers: &[PacketType]) -> Self {
        let id = dispatcher.ledger().next_id();
        Self {
            name,
            id,
            answers: answers.into(),
            dispatcher,
            inflight: tokio::sync::Mutex::new(()),
        }
    }

    /// Send `req` and wait for its response.
    ///
    /// Queuing never waits: a peer whose write queue is full counts as not
    /// written. Fails with `Timeout` when `ctx` is done or
    /// `req.creation_timeout` elapses first, with `Network` when nothing
    /// could be written or every peer written to has closed, and with
    /// `Server` when the servers answered ERROR.
    pub async fn send_and_wait(&self, ctx: &Context, req: &Request) -> Result<Response> {
        let _inflight = self.inflight.lock().await;
        if ctx.is_done() {
            return Err(GearmanError::Timeout);
        }

        let frame = OutboundFrame::from_request(req)?;
        let targets = self.dispatcher.targets(req.server.as_deref())?;

        let (tx, mut rx) = oneshot::channel();
        let (request, written) = {
            let mut ledger = self.dispatcher.ledger();
            let request = ledger.next_id();
            let written = self.dispatcher.write(&targets, &frame);
            let waiter = Waiter {
                request,
                answers: self.answers.clone(),
                pending: 0,
                tx,
            };
            ledger.post(self.id, &written, waiter);
            (request, written)
        };
        if written.is_empty() {
            return Err(GearmanError::Network(format!(
                "{:?} could not be written to any server",
                req.packet_type
            )));
        }

        tracing::debug!(
            sender = self.name,
            packet = ?req.packet_type,
            servers = written.len(),
            "request sent"
        );

        let creation_timeout = async {
            match req.creation_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            biased;
            resp = &mut rx => {
                resp.map_err(|_| GearmanError::Network("response channel closed".to_string()))
            }
            _ = ctx.done() => Err(GearmanError::Timeout),
            _ = creation_timeout => Err(GearmanError::Timeout),
            _ = all_closed(&written) => Err(GearmanError::Network(
                "every server the request was written to has closed".to_string(),
            )),
        };

        self.dispatcher.ledger().clear_waiting(self.id, request);

        let resp = result?;
        if let Some((code, text)) = resp.error() {
            return Err(GearmanError::Server { code, text });
        }
        Ok(resp)
    }
}

async fn all_closed(peers: &[Arc<Peer>]) {
    for peer in peers {
        peer.closed().await;
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, FrameBuffer, Magic};
    use crate::transport::PeerOptions;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn dispatcher_with(addrs: &[&str]) -> (Arc<Dispatcher>, Vec<DuplexStream>) {
        let options = PeerOptions {
            connect_timeout: Duration::from_secs(1),
            max_payload_size: 1024,
            channel_capacity: 16,
        };
        let mut dispatcher = Dispatcher::new(options, tracing::Span::none());
        let mut servers = Vec::new();
        for addr in addrs {
            let (client, server) = duplex(4096);
            let (reader, writer) = tokio::io::split(client);
            dispatcher.attach(addr, reader, writer);
            servers.push(server);
        }
        (Arc::new(dispatcher), servers)
    }

    fn echo(data: &[u8]) -> Request {
        let mut req = Request::new(PacketType::EchoReq);
        req.data = bytes::Bytes::copy_from_slice(data);
        req
    }

    async fn read_request(server: &mut DuplexStream) -> Request {
        let mut decoder = FrameBuffer::new(Magic::Request);
        let mut buf = [0u8; 256];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            if let Some(frame) = decoder.push(&buf[..n]).unwrap().into_iter().next() {
                return Request::from_frame(&frame).unwrap();
            }
        }
    }

    async fn read_requests(server: &mut DuplexStream, count: usize) -> Vec<Request> {
        let mut decoder = FrameBuffer::new(Magic::Request);
        let mut buf = [0u8; 256];
        let mut requests = Vec::new();
        while requests.len() < count {
            let n = server.read(&mut buf).await.unwrap();
            for frame in decoder.push(&buf[..n]).unwrap() {
                requests.push(Request::from_frame(&frame).unwrap());
            }
        }
        requests
    }

    async fn reply_echo(server: &mut DuplexStream, data: &[u8]) {
        let fields: [&[u8]; 1] = [data];
        server
            .write_all(&build_frame(Magic::Response, PacketType::EchoRes, &fields))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_response_delivered() {
        let (dispatcher, mut servers) = dispatcher_with(&["a:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);
        let mut server = servers.remove(0);

        tokio::spawn(async move {
            let req = read_request(&mut server).await;
            reply_echo(&mut server, &req.data).await;
            server
        });

        let resp = sender
            .send_and_wait(&Context::background(), &echo(b"ping"))
            .await
            .unwrap();
        assert_eq!(resp.data().unwrap(), "ping");
        assert_eq!(resp.remote(), "a:1");
    }

    #[tokio::test]
    async fn test_expired_context_times_out() {
        let (dispatcher, _servers) = dispatcher_with(&["a:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);

        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = sender.send_and_wait(&ctx, &echo(b"x")).await.unwrap_err();
        assert!(matches!(err, GearmanError::Timeout));
    }

    #[tokio::test]
    async fn test_creation_timeout() {
        let (dispatcher, _servers) = dispatcher_with(&["a:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);

        let mut req = echo(b"x");
        req.creation_timeout = Some(Duration::from_millis(20));
        let err = sender
            .send_and_wait(&Context::background(), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, GearmanError::Timeout));
    }

    #[tokio::test]
    async fn test_peer_close_is_network_error() {
        let (dispatcher, mut servers) = dispatcher_with(&["a:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);
        let mut server = servers.remove(0);

        tokio::spawn(async move {
            read_request(&mut server).await;
            drop(server);
        });

        let err = sender
            .send_and_wait(&Context::background(), &echo(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GearmanError::Network(_)));
    }

    #[tokio::test]
    async fn test_late_broadcast_answer_does_not_leak() {
        let (dispatcher, servers) = dispatcher_with(&["a:1", "b:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);
        let mut servers = servers.into_iter();
        let mut a = servers.next().unwrap();
        let mut b = servers.next().unwrap();

        let (b_go, b_release) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let first = read_request(&mut a).await;
            reply_echo(&mut a, &first.data).await;
            let second = read_request(&mut a).await;
            reply_echo(&mut a, &second.data).await;
            a
        });
        tokio::spawn(async move {
            read_request(&mut b).await;
            let _ = b_release.await;
            reply_echo(&mut b, b"late").await;
            let second = read_request(&mut b).await;
            reply_echo(&mut b, &second.data).await;
            b
        });

        let ctx = Context::background();
        let first = sender.send_and_wait(&ctx, &echo(b"one")).await.unwrap();
        assert_eq!(first.data().unwrap(), "one");
        assert_eq!(first.remote(), "a:1");

        b_go.send(()).unwrap();
        let second = sender.send_and_wait(&ctx, &echo(b"two")).await.unwrap();
        assert_eq!(second.data().unwrap(), "two");
    }

    async fn reply_error(server: &mut DuplexStream, code: &[u8], text: &[u8]) {
        let fields: [&[u8]; 2] = [code, text];
        server
            .write_all(&build_frame(Magic::Response, PacketType::Error, &fields))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_fails_request_and_keeps_order() {
        let (dispatcher, mut servers) = dispatcher_with(&["a:1"]);
        let sender = Sender::new("control", dispatcher, &[PacketType::EchoRes, PacketType::OptionRes]);
        let mut server = servers.remove(0);

        tokio::spawn(async move {
            read_request(&mut server).await;
            reply_error(&mut server, b"ERR_UNKNOWN_OPTION", b"Unknown option").await;
            loop {
                let req = read_request(&mut server).await;
                reply_echo(&mut server, &req.data).await;
            }
        });

        let ctx = Context::background();
        let mut option = Request::new(PacketType::OptionReq);
        option.conn_option = Some("bogus".to_string());
        let err = sender.send_and_wait(&ctx, &option).await.unwrap_err();
        assert!(matches!(
            err,
            GearmanError::Server { ref code, .. } if code == "ERR_UNKNOWN_OPTION"
        ));

        for data in [&b"one"[..], b"two", b"three"] {
            let resp = sender
                .send_and_wait(&ctx, &echo(data))
                .await
                .unwrap();
            assert_eq!(&resp.data().unwrap()[..], data);
        }
    }

    #[tokio::test]
    async fn test_error_from_one_server_waits_for_the_others() {
        let (dispatcher, servers) = dispatcher_with(&["a:1", "b:1"]);
        let sender = Sender::new("echo", dispatcher, &[PacketType::EchoRes]);
        let mut servers = servers.into_iter();
        let mut a = servers.next().unwrap();
        let mut b = servers.next().unwrap();

        tokio::spawn(async move {
            read_request(&mut a).await;
            reply_error(&mut a, b"ERR", b"busy").await;
            a
        });
        tokio::spawn(async move {
            let req = read_request(&mut b).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            reply_echo(&mut b, &req.data).await;
            b
        });

        let resp = sender
            .send_and_wait(&Context::background(), &echo(b"ok"))
            .await
            .unwrap();
        assert_eq!(resp.remote(), "b:1");
    }

    #[tokio::test]
    async fn test_answers_shared_connection_in_write_order() {
        let (dispatcher, mut servers) = dispatcher_with(&["a:1"]);
        let control = Sender::new("control", dispatcher.clone(), &[PacketType::EchoRes]);
        let status = Sender::new("status", dispatcher, &[PacketType::StatusRes]);
        let mut server = servers.remove(0);

        tokio::spawn(async move {
            for req in read_requests(&mut server, 2).await {
                if req.packet_type == PacketType::GetStatus {
                    reply_error(&mut server, b"ERR", b"no such job").await;
                } else {
                    reply_echo(&mut server, &req.data).await;
                }
            }
            server
        });

        let ctx = Context::background();
        let mut get_status = Request::new(PacketType::GetStatus);
        get_status.handle = Some("H:1".to_string());
        let echo_req = echo(b"mine");
        let (status_result, echo_result) = tokio::join!(
            status.send_and_wait(&ctx, &get_status),
            control.send_and_wait(&ctx, &echo_req),
        );

        assert!(matches!(status_result, Err(GearmanError::Server { .. })));
        assert_eq!(echo_result.unwrap().data().unwrap(), "mine");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_write_queue_does_not_outlive_context() {
        let options = PeerOptions {
            connect_timeout: Duration::from_secs(1),
            max_payload_size: 1024,
            channel_capacity: 1,
        };
        let mut dispatcher = Dispatcher::new(options, tracing::Span::none());
        let (stalled, _stalled_server) = duplex(64);
        let (reader, writer) = tokio::io::split(stalled);
        dispatcher.attach("a:1", reader, writer);
        let (healthy, mut healthy_server) = duplex(4096);
        let (reader, writer) = tokio::io::split(healthy);
        dispatcher.attach("b:1", reader, writer);
        let sender = Sender::new("echo", Arc::new(dispatcher), &[PacketType::EchoRes]);

        tokio::spawn(async move {
            let req = read_request(&mut healthy_server).await;
            reply_echo(&mut healthy_server, &req.data).await;
            healthy_server
        });

        let mut big = echo(&[b'x'; 512]);
        big.server = Some("a:1".to_string());
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let ctx = Context::with_timeout(Duration::from_millis(100));
            let outcome = tokio::time::timeout(Duration::from_secs(1), sender.send_and_wait(&ctx, &big))
                .await
                .expect("send_and_wait outlived its context");
            outcomes.push(outcome.unwrap_err());
        }
        assert!(matches!(outcomes[0], GearmanError::Timeout));
        assert!(matches!(outcomes[1], GearmanError::Timeout));
        assert!(matches!(outcomes[2], GearmanError::Network(_)));

        let resp = tokio::time::timeout(
            Duration::from_secs(1),
            sender.send_and_wait(&Context::with_timeout(Duration::from_millis(500)), &echo(b"hi")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resp.remote(), "b:1");
    }

    fn waiter(request: u64, pending: usize) -> (Waiter, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            request,
            answers: vec![PacketType::EchoRes].into(),
            pending,
            tx,
        };
        (waiter, rx)
    }

    fn reply(packet_type: PacketType, addr: &str) -> Response {
        Response::from_parts(packet_type, Vec::new(), Peer::detached(addr))
    }

    #[test]
    fn test_settle_drops_unsolicited() {
        let mut ledger = Ledger::default();
        let (w, mut rx) = waiter(1, 1);
        ledger.waiting.insert(7, w);

        ledger.settle(&reply(PacketType::EchoRes, "a:1"));

        assert!(rx.try_recv().is_err());
        assert!(ledger.waiting.contains_key(&7));
    }

    #[test]
    fn test_settle_skips_stale_ticket() {
        let mut ledger = Ledger::default();
        let (w, mut rx) = waiter(2, 1);
        ledger.waiting.insert(7, w);
        ledger
            .owed
            .insert("a:1".to_string(), VecDeque::from([(7, 1), (7, 2)]));

        ledger.settle(&reply(PacketType::EchoRes, "a:1"));
        assert!(rx.try_recv().is_err());

        ledger.settle(&reply(PacketType::EchoRes, "a:1"));
        assert!(rx.try_recv().is_ok());
        assert!(ledger.owed.is_empty());
        assert!(ledger.waiting.is_empty());
    }

    #[test]
    fn test_error_settles_the_oldest_ticket() {
        let mut ledger = Ledger::default();
        let (w, mut rx) = waiter(3, 1);
        ledger.waiting.insert(7, w);
        ledger
            .owed
            .insert("a:1".to_string(), VecDeque::from([(9, 1), (7, 3)]));

        ledger.settle(&reply(PacketType::Error, "a:1"));
        assert!(rx.try_recv().is_err());

        ledger.settle(&reply(PacketType::Error, "a:1"));
        assert_eq!(rx.try_recv().unwrap().packet_type(), PacketType::Error);
        assert!(ledger.owed.is_empty());
    }
}
