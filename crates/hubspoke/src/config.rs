use std::time::Duration;

use crate::wire::{FrameCodec, MAX_PAYLOAD_LEN};

/// Configuration for remote connections, both [`dial`](crate::remote::dial)
/// and the serving side.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use hubspoke::RemoteConfig;
///
/// let config = RemoteConfig::new()
///     .keepalive_interval(Duration::from_millis(250))
///     .max_frame_size(1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Idle time after which a keepalive frame is sent.
    pub(crate) keepalive_interval: Duration,
    /// Largest frame payload accepted from the peer.
    pub(crate) max_frame_size: usize,
    /// Upper bound on the whole handshake, including a pending lock window.
    pub(crate) handshake_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteConfig {
    /// Create a new config with defaults.
    ///
    /// `HUBSPOKE_KEEPALIVE_MS` and `HUBSPOKE_MAX_FRAME_SIZE` override the
    /// defaults when set to a valid number. The builder methods override
    /// both.
    pub fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let keepalive_interval = lookup("HUBSPOKE_KEEPALIVE_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(1));
        let max_frame_size = lookup("HUBSPOKE_MAX_FRAME_SIZE")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(16 * 1024 * 1024) // 16 MB
            .min(MAX_PAYLOAD_LEN);

        Self {
            keepalive_interval,
            max_frame_size,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Set the keepalive interval (default: 1s). Zero is ignored.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.keepalive_interval = interval;
        }
        self
    }

    /// Set the largest accepted frame payload (default: 16 MB).
    ///
    /// Clamped to what the frame header can describe.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes.min(MAX_PAYLOAD_LEN);
        self
    }

    /// Set the handshake deadline (default: 10s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn keepalive(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn frame_limit(&self) -> usize {
        self.max_frame_size
    }

    pub fn handshake_deadline(&self) -> Duration {
        self.handshake_timeout
    }

    pub(crate) fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_size)
    }
}
