//! Heartbeats between the two controllers and peer-loss detection.

use crate::node::ControllerNode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strata_core::types::ControllerId;
use tokio::task::JoinHandle;

/// Shared heartbeat board of a controller pair.
#[derive(Debug)]
pub struct PeerLink {
    epoch: Instant,
    beats: [AtomicU64; 2],
}

impl PeerLink {
    /// Board on which both controllers have just beaten.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            beats: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    fn now_ms(&self) -> u64 {
        millis(self.epoch.elapsed())
    }

    /// Record a heartbeat from `node`.
    pub fn beat(&self, node: ControllerId) {
        self.beats[node.index()].store(self.now_ms(), Ordering::SeqCst);
    }

    /// Time since `node` last beat.
    pub fn silence(&self, node: ControllerId) -> Duration {
        let last = self.beats[node.index()].load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Whether `node` has been silent for longer than `timeout`.
    pub fn is_stale(&self, node: ControllerId, timeout: Duration) -> bool {
        self.silence(node) > timeout
    }
}

impl Default for PeerLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Beat for `node` every heartbeat interval while it is alive.
pub fn spawn_heartbeat(node: Arc<ControllerNode>, link: Arc<PeerLink>) -> JoinHandle<()> {
    let interval = node.config().failover.heartbeat_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !node.is_crashed() {
                link.beat(node.id());
            }
        }
    })
}

/// Watch the peer of `node` and promote `node` once the peer goes silent.
///
/// Only a standby acts. Promotion runs on a blocking thread since recovery
/// does region I/O.
pub fn spawn_peer_monitor(node: Arc<ControllerNode>, link: Arc<PeerLink>) -> JoinHandle<()> {
    let config = node.config().failover.clone();
    tokio::spawn(async move {
        let peer = node.id().peer();
        let mut ticker = tokio::time::interval(config.heartbeat_interval);
        loop {
            ticker.tick().await;
            if node.is_crashed() || node.coordinator().is_active() {
                continue;
            }
            if !link.is_stale(peer, config.peer_timeout) {
                continue;
            }

            tracing::warn!(
                node = %node.id(),
                %peer,
                silence_ms = millis(link.silence(peer)),
                "Peer heartbeat stale"
            );
            let promoting = Arc::clone(&node);
            match tokio::task::spawn_blocking(move || promoting.coordinator().on_peer_lost()).await
            {
                Ok(Ok(report)) => tracing::info!(node = %node.id(), %report, "Took over from peer"),
                Ok(Err(err)) => tracing::error!(node = %node.id(), error = %err, "Promotion failed"),
                Err(join) => {
                    tracing::error!(node = %node.id(), error = %join, "Promotion task panicked");
                    break;
                }
            }
        }
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_grows_until_beat() {
        let link = PeerLink::new();
        std::thread::sleep(Duration::from_millis(30));
        assert!(link.is_stale(ControllerId::SpA, Duration::from_millis(10)));

        link.beat(ControllerId::SpA);
        assert!(!link.is_stale(ControllerId::SpA, Duration::from_millis(10)));
        assert!(link.is_stale(ControllerId::SpB, Duration::from_millis(10)));
    }

    #[test]
    fn millis_saturate() {
        assert_eq!(millis(Duration::MAX), u64::MAX);
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert!(!PeerLink::new().is_stale(ControllerId::SpA, Duration::MAX));
    }
}
