//! Job queue: accepts configuration requests and runs each one to a
//! terminal state inside a single transaction.
//!
//! ```text
//! submit ──► Queued ──► Running ──┬──► Committed
//!   │                             ├──► Failed
//!   └─ withdraw ─────────────────►└──► RolledBack  (also: lost with the active controller)
//! ```

mod config;
mod ledger;
mod operations;
mod queue;
mod request;

pub use config::JobQueueConfig;
pub use ledger::{JobLedger, JobRecord, JobStatus, WaitOutcome};
pub use queue::JobQueue;
pub use request::{
    JobError, JobErrorKind, JobRequest, JobState, LunRequest, LunSpec, RaidGroupRequest,
    RaidGroupSpec,
};
