//! Client configuration.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! changes:
//!
//! ```json
//! { "servers": ["10.0.0.1:4730", "10.0.0.2:4730"], "send_timeout_ms": 2000 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GearmanError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::task::{RetryPolicy, DEFAULT_MAX_PENDING_LOOKUPS};
use crate::transport::PeerOptions;
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Default base for the retry window and tick.
///
/// Waits for acknowledgements are bounded only by the caller's [`Context`]
/// and the task's creation timeout.
///
/// [`Context`]: crate::context::Context
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Job server addresses, `host:port`.
    pub servers: Vec<String>,
    /// Base for the retry window and tick when those are unset. Not applied
    /// to acknowledgement waits.
    pub send_timeout_ms: u64,
    /// How long unmatched work packets are kept. Unset = `send_timeout_ms`.
    pub retry_window_ms: Option<u64>,
    /// Poll interval for unmatched work packets. Unset = window / 10.
    pub retry_tick_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    /// Largest payload accepted from a server.
    pub max_payload_size: u32,
    /// Writer queue capacity per server.
    pub channel_capacity: usize,
    /// Upper bound on handles with parked work packets.
    pub max_pending_lookups: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            send_timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
            retry_window_ms: None,
            retry_tick_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_lookups: DEFAULT_MAX_PENDING_LOOKUPS,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(GearmanError::Config("no servers configured".to_string()));
        }
        if let Some(dup) = self
            .servers
            .iter()
            .enumerate()
            .find(|(i, s)| self.servers[..*i].contains(*s))
        {
            return Err(GearmanError::Config(format!("duplicate server {}", dup.1)));
        }
        if self.send_timeout_ms == 0 {
            return Err(GearmanError::Config("send_timeout_ms must be positive".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(GearmanError::Config(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        let retry = self.retry_policy();
        if retry.tick.is_zero() || retry.tick > retry.window {
            return Err(GearmanError::Config(format!(
                "retry tick {:?} must be positive and within the window {:?}",
                retry.tick, retry.window
            )));
        }
        if self.max_pending_lookups == 0 {
            return Err(GearmanError::Config(
                "max_pending_lookups must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(GearmanError::Config("channel_capacity must be positive".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Retry policy with window and tick defaults filled in.
    pub fn retry_policy(&self) -> RetryPolicy {
        let window = self
            .retry_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.send_timeout());
        let tick = self
            .retry_tick_ms
            .map(Duration::from_millis)
            .unwrap_or(window / 10);
        RetryPolicy {
            window,
            tick,
            max_pending_lookups: self.max_pending_lookups,
        }
    }

    pub fn peer_options(&self) -> PeerOptions {
        PeerOptions {
            connect_timeout: self.connect_timeout(),
            max_payload_size: self.max_payload_size,
            channel_capacity: self.channel_capacity,
        }
    }
}
