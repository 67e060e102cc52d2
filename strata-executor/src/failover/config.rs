//! Failover timing.

use std::time::Duration;

/// Heartbeat cadence and the silence that counts as peer loss.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// How often each controller beats.
    pub heartbeat_interval: Duration,
    /// Silence after which the standby declares the active lost.
    pub peer_timeout: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(50),
            peer_timeout: Duration::from_millis(500),
        }
    }
}

impl FailoverConfig {
    /// Create configuration from environment variables.
    ///
    /// - `STRATA_HEARTBEAT_INTERVAL_MS`
    /// - `STRATA_PEER_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            heartbeat_interval: millis("STRATA_HEARTBEAT_INTERVAL_MS")
                .unwrap_or(defaults.heartbeat_interval),
            peer_timeout: millis("STRATA_PEER_TIMEOUT_MS").unwrap_or(defaults.peer_timeout),
        }
    }

    /// Set both timings.
    pub fn with_timing(mut self, heartbeat_interval: Duration, peer_timeout: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self.peer_timeout = peer_timeout.max(heartbeat_interval);
        self
    }
}
