//! Transport module - one TCP connection per configured job server.

mod peer;

pub use peer::{Peer, PeerOptions};
