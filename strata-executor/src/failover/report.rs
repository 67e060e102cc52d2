//! Failover report types.

use std::time::Duration;
use strata_core::journal::RecoveryOutcome;
use strata_core::types::{ControllerId, JobNumber};

/// Result of a standby taking over.
#[derive(Debug)]
pub struct FailoverReport {
    /// The controller that became active.
    pub node: ControllerId,
    /// What journal recovery found.
    pub outcome: RecoveryOutcome,
    /// In-flight jobs whose transaction was replayed.
    pub committed: Vec<JobNumber>,
    /// In-flight jobs lost before their journal header turned valid.
    pub rolled_back: Vec<JobNumber>,
    /// Visible objects after reloading the live region.
    pub objects: usize,
    /// Time from peer loss to resuming the queue.
    pub elapsed: Duration,
}

impl FailoverReport {
    /// Create an empty report for `node`.
    pub fn new(node: ControllerId, outcome: RecoveryOutcome) -> Self {
        Self {
            node,
            outcome,
            committed: Vec::new(),
            rolled_back: Vec::new(),
            objects: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Add a job resolved as committed.
    pub fn add_committed(&mut self, job: JobNumber) {
        self.committed.push(job);
    }

    /// Add a job resolved as rolled back.
    pub fn add_rolled_back(&mut self, job: JobNumber) {
        self.rolled_back.push(job);
    }

    /// Get total number of in-flight jobs resolved.
    pub fn total_resolved(&self) -> usize {
        self.committed.len() + self.rolled_back.len()
    }

    /// Whether recovery replayed a journaled transaction.
    pub fn replayed(&self) -> bool {
        matches!(self.outcome, RecoveryOutcome::Replayed { .. })
    }
}

impl std::fmt::Display for FailoverReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FailoverReport {{ node: {}, replayed: {}, committed: {}, rolled_back: {}, objects: {} }}",
            self.node,
            self.replayed(),
            self.committed.len(),
            self.rolled_back.len(),
            self.objects
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::types::TransactionId;

    #[test]
    fn failover_report_basic() {
        let mut report = FailoverReport::new(ControllerId::SpB, RecoveryOutcome::Clean);
        report.add_rolled_back(JobNumber::new(4));

        assert_eq!(report.total_resolved(), 1);
        assert!(!report.replayed());
        assert!(report.to_string().contains("rolled_back: 1"));
    }

    #[test]
    fn failover_report_replayed() {
        let mut report = FailoverReport::new(
            ControllerId::SpB,
            RecoveryOutcome::Replayed {
                transaction_id: TransactionId::new(3),
                job: Some(JobNumber::new(7)),
                sequence: 9,
                records_applied: 7,
            },
        );
        report.add_committed(JobNumber::new(7));

        assert!(report.replayed());
        assert_eq!(report.committed, vec![JobNumber::new(7)]);
    }
}
