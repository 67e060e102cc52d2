//! Role transitions of one controller.

use super::report::FailoverReport;
use crate::job::{JobQueue, JobState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use strata_core::error::{Result, StrataError};
use strata_core::types::ControllerId;

/// Which controller processes jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs jobs and owns recovery.
    Active,
    /// Mirrors the active controller and waits to take over.
    Standby,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

/// Failover state machine.
///
/// ```text
/// StandbyNormal ──peer lost──► StandbyPromoting ──recovered──► ActiveNormal
///       ▲                                                          │
///       └───────────────── rejoin after crash ─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    /// Active, processing jobs.
    ActiveNormal,
    /// Standby, mirroring.
    StandbyNormal,
    /// Standby running recovery before taking over.
    StandbyPromoting,
}

impl FailoverState {
    /// Role implied by the state.
    pub fn role(&self) -> Role {
        match self {
            Self::ActiveNormal => Role::Active,
            Self::StandbyNormal | Self::StandbyPromoting => Role::Standby,
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveNormal => write!(f, "active_normal"),
            Self::StandbyNormal => write!(f, "standby_normal"),
            Self::StandbyPromoting => write!(f, "standby_promoting"),
        }
    }
}

/// Owns the role of one controller and drives promotion.
pub struct FailoverCoordinator {
    node: ControllerId,
    state: RwLock<FailoverState>,
    queue: Arc<JobQueue>,
}

impl FailoverCoordinator {
    /// Coordinator starting in `role`. A standby's queue is paused.
    pub fn new(node: ControllerId, role: Role, queue: Arc<JobQueue>) -> Self {
        let state = match role {
            Role::Active => FailoverState::ActiveNormal,
            Role::Standby => {
                queue.pause();
                FailoverState::StandbyNormal
            }
        };
        Self {
            node,
            state: RwLock::new(state),
            queue,
        }
    }

    /// Current state.
    pub fn state(&self) -> FailoverState {
        *self.state.read()
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.state().role()
    }

    /// Whether this controller is active.
    pub fn is_active(&self) -> bool {
        self.role() == Role::Active
    }

    /// Take over from a lost active controller.
    ///
    /// Replays the journal if it holds a committed transaction, reloads the
    /// object graph from the live region, then resolves every job the lost
    /// controller left running: committed if the replayed payload carries its
    /// number, rolled back otherwise. The queue resumes last. A failed
    /// recovery leaves the controller promoting; calling again retries it.
    pub fn on_peer_lost(&self) -> Result<FailoverReport> {
        let started = Instant::now();
        {
            let mut state = self.state.write();
            if *state == FailoverState::ActiveNormal {
                return Err(StrataError::InvalidFailoverState {
                    node: self.node,
                    operation: "promote",
                    state: state.to_string(),
                });
            }
            *state = FailoverState::StandbyPromoting;
        }
        tracing::warn!(node = %self.node, "Peer lost, promoting");
        self.queue.pause();

        let manager = self.queue.manager();
        let outcome = manager.journal().recover()?;
        manager.reload()?;

        let mut report = FailoverReport::new(self.node, outcome);
        let replayed_job = report.outcome.replayed_job();
        let ledger = self.queue.ledger();
        for job in ledger.running() {
            if replayed_job == Some(job) {
                ledger.finish(job, JobState::Committed, None)?;
                report.add_committed(job);
            } else {
                ledger.finish(job, JobState::RolledBack, None)?;
                report.add_rolled_back(job);
            }
        }
        report.objects = manager.objects().len();

        *self.state.write() = FailoverState::ActiveNormal;
        self.queue.resume();
        report.elapsed = started.elapsed();
        tracing::info!(node = %self.node, %report, "Promotion complete");
        Ok(report)
    }

    /// Rejoin as standby after a crash.
    ///
    /// Reloads the live region so later peer commits can be mirrored on top.
    /// Never replays the journal: the active controller owns recovery.
    pub fn on_peer_restored(&self) -> Result<()> {
        {
            let state = self.state.read();
            if *state == FailoverState::StandbyPromoting {
                return Err(StrataError::InvalidFailoverState {
                    node: self.node,
                    operation: "rejoin",
                    state: state.to_string(),
                });
            }
        }
        self.queue.pause();
        let manager = self.queue.manager();
        manager.journal().hooks().revive();
        manager.reload()?;
        *self.state.write() = FailoverState::StandbyNormal;
        tracing::info!(node = %self.node, objects = manager.objects().len(), "Rejoined as standby");
        Ok(())
    }
}
