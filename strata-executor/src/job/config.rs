//! Job queue configuration.

use std::time::Duration;

/// Tuning of the job queue and its worker.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Extra attempts after a transient failure. The first attempt is not
    /// counted, so a job runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_backoff: Duration,
    /// Most jobs waiting to run.
    pub max_queue_depth: usize,
    /// How long terminal jobs stay in the ledger.
    pub retention: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            max_queue_depth: 10_240,
            retention: Duration::from_secs(3600),
        }
    }
}

impl JobQueueConfig {
    /// Create configuration from environment variables.
    ///
    /// - `STRATA_JOB_MAX_RETRIES`: retries after a transient failure
    /// - `STRATA_JOB_RETRY_BACKOFF_MS`: pause between attempts
    /// - `STRATA_JOB_QUEUE_DEPTH`: queued jobs accepted before `QueueFull`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_retries = std::env::var("STRATA_JOB_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);

        let retry_backoff = std::env::var("STRATA_JOB_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff);

        let max_queue_depth = std::env::var("STRATA_JOB_QUEUE_DEPTH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_queue_depth);

        Self {
            max_retries,
            retry_backoff,
            max_queue_depth,
            retention: defaults.retention,
        }
    }

    /// Set the retry bound.
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set the queue depth.
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth.max(1);
        self
    }

    /// Set how long finished jobs are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = JobQueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.max_queue_depth, 10_240);
    }

    #[test]
    fn depth_is_at_least_one() {
        let config = JobQueueConfig::default().with_max_queue_depth(0);
        assert_eq!(config.max_queue_depth, 1);
    }
}
