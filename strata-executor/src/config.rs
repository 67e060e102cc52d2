//! Configuration of one controller.

use crate::failover::FailoverConfig;
use crate::job::JobQueueConfig;
use strata_core::error::Result;
use strata_core::journal::JournalConfig;
use strata_core::transaction::TransactionConfig;

/// Everything a controller needs to start.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Journal and live region geometry.
    pub journal: JournalConfig,
    /// Transaction manager limits.
    pub transactions: TransactionConfig,
    /// Job queue tuning.
    pub jobs: JobQueueConfig,
    /// Heartbeat timing.
    pub failover: FailoverConfig,
}

impl ControllerConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the `STRATA_*` variables of every section.
    ///
    /// # Example
    ///
    /// ```bash
    /// export STRATA_DATA_DIR=/var/lib/strata
    /// export STRATA_JOURNAL_SYNC=true
    /// export STRATA_JOB_MAX_RETRIES=5
    /// export STRATA_PEER_TIMEOUT_MS=2000
    /// ```
    pub fn from_env() -> Self {
        Self {
            journal: JournalConfig::from_env_or_default(),
            transactions: TransactionConfig::default(),
            jobs: JobQueueConfig::from_env(),
            failover: FailoverConfig::from_env(),
        }
    }

    /// Configuration for tests: temporary directory, no syncs.
    pub fn in_memory() -> Self {
        Self {
            journal: JournalConfig::in_memory(),
            ..Self::default()
        }
    }

    /// Set the journal configuration.
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.journal = journal;
        self
    }

    /// Set the transaction configuration.
    pub fn with_transactions(mut self, transactions: TransactionConfig) -> Self {
        self.transactions = transactions;
        self
    }

    /// Set the job queue configuration.
    pub fn with_jobs(mut self, jobs: JobQueueConfig) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the failover configuration.
    pub fn with_failover(mut self, failover: FailoverConfig) -> Self {
        self.failover = failover;
        self
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.journal.validate()
    }
}
