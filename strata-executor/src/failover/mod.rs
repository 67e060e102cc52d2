//! Failover between the active and standby controller.
//!
//! Only the active controller runs jobs and recovery. When its heartbeat
//! stops, the standby replays the journal, resolves the job the active was
//! running, and takes over the queue.

mod config;
mod coordinator;
mod peer;
mod report;

pub use config::FailoverConfig;
pub use coordinator::{FailoverCoordinator, FailoverState, Role};
pub use peer::{PeerLink, spawn_heartbeat, spawn_peer_monitor};
pub use report::FailoverReport;
