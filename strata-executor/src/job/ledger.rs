//! Job table shared by both controllers.
//!
//! Every job gets a `watch` channel that carries its [`JobStatus`]. Waiters
//! subscribe to it and race the first terminal status against a timer, so a
//! waiter that re-attaches after failover sees the outcome the new active
//! controller resolved.

use super::request::{JobError, JobRequest, JobState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strata_core::error::{Result, StrataError};
use strata_core::types::{ControllerId, JobNumber};
use tokio::sync::watch;

/// Caller-visible status of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    /// Current state.
    pub state: JobState,
    /// Set when the job failed.
    pub error: Option<JobError>,
}

impl JobStatus {
    fn queued() -> Self {
        Self {
            state: JobState::Queued,
            error: None,
        }
    }
}

/// Result of [`JobLedger::wait_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The job reached a terminal state.
    Finished(JobStatus),
    /// The timeout elapsed first. The job keeps running.
    TimedOut,
}

impl WaitOutcome {
    /// Terminal state, if the wait did not time out.
    pub fn state(&self) -> Option<JobState> {
        match self {
            Self::Finished(status) => Some(status.state),
            Self::TimedOut => None,
        }
    }

    /// Error of a failed job.
    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Finished(status) => status.error.as_ref(),
            Self::TimedOut => None,
        }
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The job.
    pub number: JobNumber,
    /// What was requested.
    pub request: JobRequest,
    /// Current state.
    pub state: JobState,
    /// Set when the job failed.
    pub error: Option<JobError>,
    /// Transactions opened for the job so far.
    pub attempts: u32,
    /// Controller that dequeued the job.
    pub executed_by: Option<ControllerId>,
    /// When the job was accepted.
    pub submitted_at: Instant,
    /// When the job reached a terminal state.
    pub finished_at: Option<Instant>,
}

struct LedgerEntry {
    record: JobRecord,
    status: watch::Sender<JobStatus>,
}

/// Peer-mirrored job table and FIFO of queued jobs.
pub struct JobLedger {
    jobs: DashMap<JobNumber, LedgerEntry>,
    queue: Mutex<VecDeque<JobNumber>>,
    next_number: AtomicU64,
    max_depth: usize,
}

impl JobLedger {
    /// Empty ledger accepting at most `max_depth` queued jobs.
    pub fn new(max_depth: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            next_number: AtomicU64::new(1),
            max_depth: max_depth.max(1),
        }
    }

    /// Accept a job and queue it behind every earlier one.
    pub fn enqueue(&self, request: JobRequest) -> Result<JobNumber> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_depth {
            return Err(StrataError::QueueFull {
                depth: self.max_depth,
            });
        }

        let number = JobNumber::new(self.next_number.fetch_add(1, Ordering::SeqCst));
        let (status, _) = watch::channel(JobStatus::queued());
        self.jobs.insert(
            number,
            LedgerEntry {
                record: JobRecord {
                    number,
                    request,
                    state: JobState::Queued,
                    error: None,
                    attempts: 0,
                    executed_by: None,
                    submitted_at: Instant::now(),
                    finished_at: None,
                },
                status,
            },
        );
        queue.push_back(number);
        Ok(number)
    }

    /// Take the oldest queued job and mark it running on `node`.
    pub fn dequeue_next(&self, node: ControllerId) -> Option<(JobNumber, JobRequest)> {
        let mut queue = self.queue.lock();
        while let Some(number) = queue.pop_front() {
            let Some(mut entry) = self.jobs.get_mut(&number) else {
                continue;
            };
            if entry.record.state != JobState::Queued {
                continue;
            }
            entry.record.state = JobState::Running;
            entry.record.executed_by = Some(node);
            entry.status.send_replace(JobStatus {
                state: JobState::Running,
                error: None,
            });
            return Some((number, entry.record.request.clone()));
        }
        None
    }

    /// Count one more transaction opened for `job`.
    pub fn record_attempt(&self, job: JobNumber) -> u32 {
        self.jobs
            .get_mut(&job)
            .map(|mut entry| {
                entry.record.attempts += 1;
                entry.record.attempts
            })
            .unwrap_or(0)
    }

    /// Move `job` to a terminal state and wake its waiters.
    pub fn finish(&self, job: JobNumber, state: JobState, error: Option<JobError>) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(&job)
            .ok_or(StrataError::JobNotFound { job })?;
        entry.record.state = state;
        entry.record.error = error.clone();
        entry.record.finished_at = Some(Instant::now());
        entry.status.send_replace(JobStatus { state, error });
        tracing::info!(%job, %state, "Job finished");
        Ok(())
    }

    /// Withdraw a job that has not started. Running or finished jobs stay.
    pub fn withdraw(&self, job: JobNumber) -> Result<()> {
        let mut queue = self.queue.lock();
        let state = self
            .jobs
            .get(&job)
            .map(|entry| entry.record.state)
            .ok_or(StrataError::JobNotFound { job })?;
        if state != JobState::Queued {
            return Err(StrataError::JobNotCancellable {
                job,
                state: state.to_string(),
            });
        }
        queue.retain(|queued| *queued != job);
        drop(queue);
        self.finish(job, JobState::RolledBack, None)
    }

    /// Snapshot of a job.
    pub fn get(&self, job: JobNumber) -> Option<JobRecord> {
        self.jobs.get(&job).map(|entry| entry.record.clone())
    }

    /// Current status of a job.
    pub fn status(&self, job: JobNumber) -> Option<JobStatus> {
        self.jobs.get(&job).map(|entry| entry.status.borrow().clone())
    }

    /// Jobs marked running, in number order.
    pub fn running(&self) -> Vec<JobNumber> {
        let mut running: Vec<JobNumber> = self
            .jobs
            .iter()
            .filter(|entry| entry.record.state == JobState::Running)
            .map(|entry| *entry.key())
            .collect();
        running.sort();
        running
    }

    /// Number of jobs waiting for the worker.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop terminal jobs finished more than `retention` ago.
    pub fn purge_expired(&self, retention: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| {
            entry
                .record
                .finished_at
                .is_none_or(|finished| finished.elapsed() <= retention)
        });
        let purged = before.saturating_sub(self.jobs.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged finished jobs");
        }
        purged
    }

    /// Wait until `job` finishes or `timeout` elapses.
    ///
    /// Only the calling task waits. A job purged while waited on reports
    /// `JobNotFound`.
    pub async fn wait_for(&self, job: JobNumber, timeout: Duration) -> Result<WaitOutcome> {
        let mut status = self
            .jobs
            .get(&job)
            .map(|entry| entry.status.subscribe())
            .ok_or(StrataError::JobNotFound { job })?;

        match tokio::time::timeout(timeout, status.wait_for(|s| s.state.is_terminal())).await {
            Ok(Ok(finished)) => Ok(WaitOutcome::Finished((*finished).clone())),
            Ok(Err(_)) => Err(StrataError::JobNotFound { job }),
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new(10_240)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::request::{JobErrorKind, LunRequest};

    fn destroy_lun(number: u32) -> JobRequest {
        JobRequest::Lun(LunRequest::Destroy { number })
    }

    #[test]
    fn fifo_order() {
        let ledger = JobLedger::new(8);
        let first = ledger.enqueue(destroy_lun(1)).unwrap();
        let second = ledger.enqueue(destroy_lun(2)).unwrap();

        let (job, _) = ledger.dequeue_next(ControllerId::SpA).unwrap();
        assert_eq!(job, first);
        assert_eq!(ledger.running(), vec![first]);
        assert_eq!(
            ledger.get(first).unwrap().executed_by,
            Some(ControllerId::SpA)
        );

        let (job, _) = ledger.dequeue_next(ControllerId::SpA).unwrap();
        assert_eq!(job, second);
        assert!(ledger.dequeue_next(ControllerId::SpA).is_none());
    }

    #[test]
    fn depth_limit() {
        let ledger = JobLedger::new(1);
        ledger.enqueue(destroy_lun(1)).unwrap();
        let err = ledger.enqueue(destroy_lun(2)).unwrap_err();
        assert_eq!(err.code(), "E402");
    }

    #[test]
    fn withdraw_only_queued() {
        let ledger = JobLedger::new(8);
        let running = ledger.enqueue(destroy_lun(1)).unwrap();
        let queued = ledger.enqueue(destroy_lun(2)).unwrap();
        ledger.dequeue_next(ControllerId::SpA);

        let err = ledger.withdraw(running).unwrap_err();
        assert_eq!(err.code(), "E403");

        ledger.withdraw(queued).unwrap();
        assert_eq!(ledger.status(queued).unwrap().state, JobState::RolledBack);
        assert_eq!(ledger.queued_len(), 0);
        assert!(ledger.dequeue_next(ControllerId::SpA).is_none());
    }

    #[tokio::test]
    async fn wait_resolves_on_finish() {
        let ledger = std::sync::Arc::new(JobLedger::new(8));
        let job = ledger.enqueue(destroy_lun(1)).unwrap();
        ledger.dequeue_next(ControllerId::SpA);

        let finisher = std::sync::Arc::clone(&ledger);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let error = JobError {
                kind: JobErrorKind::NotFound,
                code: "E104".into(),
                message: "no lun 1".into(),
            };
            finisher.finish(job, JobState::Failed, Some(error)).unwrap();
        });

        let outcome = ledger.wait_for(job, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.state(), Some(JobState::Failed));
        assert_eq!(outcome.error().unwrap().kind, JobErrorKind::NotFound);
    }

    #[tokio::test]
    async fn wait_times_out() {
        let ledger = JobLedger::new(8);
        let job = ledger.enqueue(destroy_lun(1)).unwrap();
        let outcome = ledger
            .wait_for(job, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(ledger.status(job).unwrap().state, JobState::Queued);
    }

    #[tokio::test]
    async fn wait_after_finish_returns_immediately() {
        let ledger = JobLedger::new(8);
        let job = ledger.enqueue(destroy_lun(1)).unwrap();
        ledger.withdraw(job).unwrap();

        let outcome = ledger.wait_for(job, Duration::from_millis(1)).await.unwrap();
        assert_eq!(outcome.state(), Some(JobState::RolledBack));
    }

    #[test]
    fn purge_keeps_unfinished() {
        let ledger = JobLedger::new(8);
        let done = ledger.enqueue(destroy_lun(1)).unwrap();
        let pending = ledger.enqueue(destroy_lun(2)).unwrap();
        ledger.withdraw(done).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(ledger.purge_expired(Duration::from_millis(1)), 1);
        assert!(ledger.get(done).is_none());
        assert!(ledger.get(pending).is_some());
    }
}
