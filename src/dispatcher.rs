//! Dispatcher - owns the peers and routes traffic in both directions.
//!
//! Inbound, every peer's read loop hands decoded responses to the shared
//! [`HandlerRegistry`]. Replies to requests also settle the shared
//! [`Ledger`]. Outbound, a request is either written to one pinned server or
//! broadcast to every live one.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Span;

use crate::error::{GearmanError, Result};
use crate::handler::HandlerRegistry;
use crate::protocol::{PacketType, Response};
use crate::sender::{Ledger, REPLY_PACKETS};
use crate::transport::{Peer, PeerOptions};
use crate::writer::OutboundFrame;

/// Set of connected peers plus the routing table they share.
pub struct Dispatcher {
    peers: Vec<Arc<Peer>>,
    registry: Arc<HandlerRegistry>,
    ledger: Arc<Mutex<Ledger>>,
    options: PeerOptions,
    span: Span,
}

impl Dispatcher {
    /// Create a dispatcher with no peers.
    ///
    /// ERROR packets are logged at warn, then settle the request they
    /// answer like any other reply.
    pub fn new(options: PeerOptions, span: Span) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(&[PacketType::Error], |resp: &Response| {
            if let Some((code, text)) = resp.error() {
                tracing::warn!(server = %resp.remote(), %code, %text, "server error");
            }
        });

        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let settle = ledger.clone();
        registry.register(&REPLY_PACKETS, move |resp: &Response| {
            settle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .settle(resp);
        });

        Self {
            peers: Vec::new(),
            registry,
            ledger,
            options,
            span,
        }
    }

    /// Connect to `addr` and add it to the peer set.
    pub async fn connect(&mut self, addr: &str) -> Result<Arc<Peer>> {
        let peer = Peer::connect(addr, &self.options, self.registry.clone(), self.span.clone())
            .await?;
        tracing::debug!(parent: &self.span, server = %addr, "connected");
        self.peers.push(peer.clone());
        Ok(peer)
    }

    /// Add a peer over an existing byte stream.
    pub fn attach<R, W>(&mut self, addr: &str, reader: R, writer: W) -> Arc<Peer>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let peer = Peer::spawn(
            addr,
            reader,
            writer,
            &self.options,
            self.registry.clone(),
            self.span.clone(),
        );
        self.peers.push(peer.clone());
        peer
    }

    /// Route responses of the given types to `handler`.
    pub fn register<F>(&self, types: &[PacketType], handler: F)
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.registry.register(types, handler);
    }

    #[inline]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// All configured peers, live or closed.
    #[inline]
    pub fn peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    /// Peer for a configured address.
    pub fn peer(&self, addr: &str) -> Option<&Arc<Peer>> {
        self.peers.iter().find(|p| p.addr() == addr)
    }

    #[inline]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Request tickets owed by each peer. Held while writing so tickets and
    /// frames enter a peer in the same order.
    pub(crate) fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve where a request goes: the pinned server, or every live peer.
    pub fn targets(&self, server: Option<&str>) -> Result<Vec<Arc<Peer>>> {
        match server {
            Some(addr) => {
                let peer = self
                    .peer(addr)
                    .ok_or_else(|| GearmanError::UnknownServer(addr.to_string()))?;
                if peer.is_closed() {
                    return Err(GearmanError::Network(format!("{} is closed", addr)));
                }
                Ok(vec![peer.clone()])
            }
            None => {
                let live: Vec<_> = self
                    .peers
                    .iter()
                    .filter(|p| !p.is_closed())
                    .cloned()
                    .collect();
                if live.is_empty() {
                    return Err(GearmanError::Network("no live servers".to_string()));
                }
                Ok(live)
            }
        }
    }

    /// Queue `frame` on each peer without waiting. Returns the peers that
    /// accepted it; a closed peer or a full queue is skipped.
    pub fn write(&self, peers: &[Arc<Peer>], frame: &OutboundFrame) -> Vec<Arc<Peer>> {
        let mut written = Vec::with_capacity(peers.len());
        for peer in peers {
            match peer.write(frame.clone()) {
                Ok(()) => written.push(peer.clone()),
                Err(e) => {
                    tracing::warn!(parent: &self.span, server = %peer.addr(), error = %e, "write failed")
                }
            }
        }
        written
    }

    /// Close every peer. No reconnect is attempted.
    pub fn close(&self) {
        for peer in &self.peers {
            peer.close();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("peers", &self.peers)
            .finish()
    }
}
