//! Bounded recorder of transaction lifecycle events.
//!
//! Used to check, after the fact, that transactions on a controller never
//! overlapped and in which order jobs committed.

use crate::types::{JobNumber, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// A lifecycle event of one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Transaction opened.
    Started {
        /// Global event sequence.
        seq: u64,
        /// The transaction.
        transaction_id: TransactionId,
        /// Owning job.
        job: Option<JobNumber>,
    },
    /// Transaction committed.
    Committed {
        /// Global event sequence.
        seq: u64,
        /// The transaction.
        transaction_id: TransactionId,
        /// Owning job.
        job: Option<JobNumber>,
    },
    /// Transaction rolled back.
    Aborted {
        /// Global event sequence.
        seq: u64,
        /// The transaction.
        transaction_id: TransactionId,
        /// Owning job.
        job: Option<JobNumber>,
    },
}

impl TraceEvent {
    /// Transaction the event belongs to.
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::Started { transaction_id, .. }
            | Self::Committed { transaction_id, .. }
            | Self::Aborted { transaction_id, .. } => *transaction_id,
        }
    }

    /// Job the event belongs to.
    pub fn job(&self) -> Option<JobNumber> {
        match self {
            Self::Started { job, .. } | Self::Committed { job, .. } | Self::Aborted { job, .. } => {
                *job
            }
        }
    }
}

/// Thread-safe ring of the most recent transaction events.
#[derive(Debug)]
pub struct TransactionTrace {
    events: RwLock<VecDeque<TraceEvent>>,
    capacity: usize,
    seq: AtomicU64,
}

impl TransactionTrace {
    /// Recorder keeping the last `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn push(&self, event: TraceEvent) {
        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Record a start.
    pub fn started(&self, transaction_id: TransactionId, job: Option<JobNumber>) {
        let seq = self.next_seq();
        self.push(TraceEvent::Started {
            seq,
            transaction_id,
            job,
        });
    }

    /// Record a commit.
    pub fn committed(&self, transaction_id: TransactionId, job: Option<JobNumber>) {
        let seq = self.next_seq();
        self.push(TraceEvent::Committed {
            seq,
            transaction_id,
            job,
        });
    }

    /// Record an abort.
    pub fn aborted(&self, transaction_id: TransactionId, job: Option<JobNumber>) {
        let seq = self.next_seq();
        self.push(TraceEvent::Aborted {
            seq,
            transaction_id,
            job,
        });
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Jobs in commit order.
    pub fn committed_jobs(&self) -> Vec<JobNumber> {
        self.events
            .read()
            .iter()
            .filter(|e| matches!(e, TraceEvent::Committed { .. }))
            .filter_map(TraceEvent::job)
            .collect()
    }

    /// Whether every transaction ended before the next one started.
    pub fn is_serial(&self) -> bool {
        let mut open: Option<TransactionId> = None;
        for event in self.events.read().iter() {
            match event {
                TraceEvent::Started { transaction_id, .. } => {
                    if open.is_some() {
                        return false;
                    }
                    open = Some(*transaction_id);
                }
                TraceEvent::Committed { transaction_id, .. }
                | TraceEvent::Aborted { transaction_id, .. } => {
                    if open != Some(*transaction_id) {
                        return false;
                    }
                    open = None;
                }
            }
        }
        true
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl Default for TransactionTrace {
    fn default() -> Self {
        Self::new(4096)
    }
}
