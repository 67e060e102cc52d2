//! Strata Executor - job execution and controller failover.
//!
//! This crate runs on top of `strata-core`:
//! - Job queue with a single serialized worker and channel-resolved waits
//! - Job operations for RAID groups and LUNs
//! - Failover coordinator with an explicit active/standby role
//! - Heartbeat-driven peer-loss detection
//! - Controller pair wiring over one shared region
//! - Tracing subscriber setup

#![warn(missing_docs)]

pub mod config;
pub mod failover;
pub mod job;
pub mod node;
pub mod observability;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::ControllerConfig;
    pub use crate::failover::{
        FailoverConfig, FailoverCoordinator, FailoverReport, FailoverState, PeerLink, Role,
    };
    pub use crate::job::{
        JobError, JobErrorKind, JobLedger, JobQueue, JobQueueConfig, JobRecord, JobRequest,
        JobState, JobStatus, LunRequest, LunSpec, RaidGroupRequest, RaidGroupSpec, WaitOutcome,
    };
    pub use crate::node::{ControllerNode, ControllerPair};
    pub use crate::observability::{LogFormat, TracingConfig, init_tracing};
}
