//! Serialized job execution.

use super::config::JobQueueConfig;
use super::ledger::{JobLedger, WaitOutcome};
use super::operations;
use super::request::{
    JobError, JobRequest, JobState, LunRequest, LunSpec, RaidGroupRequest, RaidGroupSpec,
};
use crate::instrument_job;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_core::error::{Result, StrataError};
use strata_core::topology::TopologyProvider;
use strata_core::transaction::TransactionManager;
use strata_core::types::{ControllerId, FieldChange, JobNumber};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::instrument;

/// One controller's view of the job ledger plus the single worker that
/// drains it.
///
/// `submit` never blocks on durability. Jobs run one at a time in
/// submission order, each inside one transaction.
pub struct JobQueue {
    node: ControllerId,
    config: JobQueueConfig,
    ledger: Arc<JobLedger>,
    manager: Arc<TransactionManager>,
    topology: Arc<dyn TopologyProvider>,
    paused: AtomicBool,
    shutdown: AtomicBool,
    wake: Notify,
}

impl JobQueue {
    /// Queue of `node` executing through `manager`.
    pub fn new(
        node: ControllerId,
        config: JobQueueConfig,
        ledger: Arc<JobLedger>,
        manager: Arc<TransactionManager>,
        topology: Arc<dyn TopologyProvider>,
    ) -> Self {
        Self {
            node,
            config,
            ledger,
            manager,
            topology,
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// The shared job table.
    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// The transaction manager jobs run through.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Queue tuning.
    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate and enqueue a request.
    pub fn submit(&self, request: JobRequest) -> Result<JobNumber> {
        request.validate()?;
        let operation = request.operation();
        let job = self.ledger.enqueue(request)?;
        tracing::info!(node = %self.node, %job, operation, "Job submitted");
        self.wake.notify_one();
        Ok(job)
    }

    /// Submit a RAID group creation.
    pub fn create_raid_group(&self, spec: RaidGroupSpec) -> Result<JobNumber> {
        self.submit(JobRequest::RaidGroup(RaidGroupRequest::Create(spec)))
    }

    /// Submit a RAID group destruction.
    pub fn destroy_raid_group(&self, number: u32) -> Result<JobNumber> {
        self.submit(JobRequest::RaidGroup(RaidGroupRequest::Destroy { number }))
    }

    /// Submit a RAID group update.
    pub fn update_raid_group(&self, number: u32, changes: Vec<FieldChange>) -> Result<JobNumber> {
        self.submit(JobRequest::RaidGroup(RaidGroupRequest::Update {
            number,
            changes,
        }))
    }

    /// Submit a LUN creation.
    pub fn create_lun(&self, spec: LunSpec) -> Result<JobNumber> {
        self.submit(JobRequest::Lun(LunRequest::Create(spec)))
    }

    /// Submit a LUN destruction.
    pub fn destroy_lun(&self, number: u32) -> Result<JobNumber> {
        self.submit(JobRequest::Lun(LunRequest::Destroy { number }))
    }

    /// Submit a LUN update.
    pub fn update_lun(&self, number: u32, changes: Vec<FieldChange>) -> Result<JobNumber> {
        self.submit(JobRequest::Lun(LunRequest::Update { number, changes }))
    }

    /// Withdraw a job that has not started.
    pub fn withdraw(&self, job: JobNumber) -> Result<()> {
        self.ledger.withdraw(job)?;
        tracing::info!(node = %self.node, %job, "Job withdrawn");
        Ok(())
    }

    /// Wait until `job` finishes or `timeout` elapses.
    pub async fn wait_for(&self, job: JobNumber, timeout: Duration) -> Result<WaitOutcome> {
        self.ledger.wait_for(job, timeout).await
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Stop taking jobs. A job already running finishes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!(node = %self.node, "Job queue paused");
    }

    /// Start taking jobs again.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        tracing::info!(node = %self.node, "Job queue resumed");
    }

    /// Whether the queue is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop the worker for good.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Wake the worker without changing state.
    pub(crate) fn nudge(&self) {
        self.wake.notify_one();
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run the oldest queued job to a terminal state.
    ///
    /// Returns `Ok(None)` when paused or idle. Transient failures are retried
    /// up to `max_retries` times with a fixed backoff; the thread sleeps in
    /// between. If the controller crashes the job stays `Running` for the
    /// peer to resolve and `NodeCrashed` is returned.
    pub fn run_next(&self) -> Result<Option<JobNumber>> {
        if self.is_paused() {
            return Ok(None);
        }
        self.manager.journal().hooks().ensure_alive()?;
        let Some((job, request)) = self.ledger.dequeue_next(self.node) else {
            return Ok(None);
        };
        let _span = instrument_job!(self.node, job, request.operation()).entered();

        let mut retries = 0;
        loop {
            let attempt = self.ledger.record_attempt(job);
            match self.attempt(job, &request) {
                Ok(()) => {
                    self.ledger.finish(job, JobState::Committed, None)?;
                    return Ok(Some(job));
                }
                Err(err @ StrataError::NodeCrashed { .. }) => {
                    tracing::warn!(%job, "Controller crashed while running job");
                    return Err(err);
                }
                Err(err) if err.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    tracing::debug!(
                        %job,
                        attempt,
                        error = %err,
                        backoff_ms = u64::try_from(self.config.retry_backoff.as_millis())
                            .unwrap_or(u64::MAX),
                        "Transient failure, retrying"
                    );
                    std::thread::sleep(self.config.retry_backoff);
                }
                Err(err) => {
                    tracing::warn!(%job, attempt, code = err.code(), error = %err, "Job failed");
                    self.ledger
                        .finish(job, JobState::Failed, Some(JobError::from(&err)))?;
                    return Ok(Some(job));
                }
            }
        }
    }

    /// Run jobs until the queue is empty or paused.
    pub fn run_pending(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_next()?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    fn attempt(&self, job: JobNumber, request: &JobRequest) -> Result<()> {
        let handle = self
            .manager
            .start_job_transaction(request.transaction_kind(), job)?;
        let result = operations::execute(&self.manager, self.topology.as_ref(), handle, request)
            .and_then(|()| self.manager.commit(handle));

        if let Err(cause) = &result {
            match self.manager.abort(handle) {
                Ok(()) => {}
                // Commit already released the transaction, or parked it
                // mid-persist for recovery.
                Err(
                    err @ (StrataError::TransactionNotFound { .. }
                    | StrataError::InvalidTransactionState { .. }),
                ) => {
                    tracing::debug!(
                        %job,
                        transaction_id = %handle,
                        error = %err,
                        "Nothing to abort"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        %job,
                        transaction_id = %handle,
                        error = %err,
                        cause = %cause,
                        "Abort after failed attempt did not complete"
                    );
                }
            }
        }
        result
    }

    /// Drive `run_next` on a blocking thread until shutdown.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.worker_loop())
    }

    #[instrument(name = "job_worker", skip(self), fields(node = %self.node))]
    async fn worker_loop(self: Arc<Self>) {
        tracing::debug!("Worker started");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.ledger.purge_expired(self.config.retention);
            let queue = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || queue.run_next()).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => {}
                Ok(Err(StrataError::NodeCrashed { .. })) => {
                    tracing::debug!("Controller down, worker idle");
                }
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Job worker step failed");
                }
                Err(join) => {
                    tracing::error!(error = %join, "Job worker thread panicked");
                    break;
                }
            }
            // Idle wakeups keep the retention sweep going with no new work.
            let _ = tokio::time::timeout(self.config.retention, self.wake.notified()).await;
        }
        tracing::debug!("Worker stopped");
    }
}
