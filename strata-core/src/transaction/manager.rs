//! The transaction manager: mutations, commit and rollback.

use super::config::TransactionConfig;
use super::record::{
    MutationOp, MutationRecord, Transaction, TransactionKind, TransactionState,
};
use super::trace::TransactionTrace;
use crate::error::{Result, StrataError};
use crate::graph::ObjectGraph;
use crate::journal::{JournalPayload, JournalStore};
use crate::types::{
    FieldChange, JobNumber, LifecycleState, ObjectId, ObjectImage, ObjectKind, ObjectSpec,
    StorageObject, TransactionId,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Owns the in-memory object graph and the single transaction slot.
///
/// At most one transaction is open at a time. Mutations are applied to the
/// graph immediately (so later steps of the same transaction see them) and
/// logged with absolute before/after images, which drive both rollback and
/// the journal payload.
pub struct TransactionManager {
    config: TransactionConfig,
    journal: Arc<JournalStore>,
    graph: RwLock<ObjectGraph>,
    slot: Mutex<Option<Transaction>>,
    replay_pending: AtomicBool,
    trace: TransactionTrace,
    commits: broadcast::Sender<Arc<JournalPayload>>,
}

impl TransactionManager {
    /// Manager with an empty graph.
    pub fn new(journal: Arc<JournalStore>, config: TransactionConfig) -> Self {
        let (commits, _) = broadcast::channel(config.commit_channel_capacity.max(1));
        Self {
            trace: TransactionTrace::new(config.trace_capacity),
            config,
            journal,
            graph: RwLock::new(ObjectGraph::new()),
            slot: Mutex::new(None),
            replay_pending: AtomicBool::new(false),
            commits,
        }
    }

    /// Manager whose graph is loaded from the live region.
    pub fn load(journal: Arc<JournalStore>, config: TransactionConfig) -> Result<Self> {
        let manager = Self::new(journal, config);
        manager.reload()?;
        Ok(manager)
    }

    /// Replace the graph with the live region's contents.
    ///
    /// Any open transaction is dropped without rollback.
    pub fn reload(&self) -> Result<()> {
        let mut slot = self.slot.lock();
        if let Some(stale) = slot.take() {
            tracing::warn!(
                transaction_id = %stale.id,
                state = %stale.state,
                "Dropping transaction on reload"
            );
        }
        self.journal.resync_sequence()?;
        let graph = ObjectGraph::from_images(self.journal.load_live()?);
        let objects = graph.len();
        *self.graph.write() = graph;
        self.replay_pending.store(false, Ordering::SeqCst);
        tracing::info!(node = %self.journal.hooks().node(), objects, "Object graph loaded");
        Ok(())
    }

    /// The journal store commits go through.
    pub fn journal(&self) -> &Arc<JournalStore> {
        &self.journal
    }

    /// Lifecycle events of recent transactions.
    pub fn trace(&self) -> &TransactionTrace {
        &self.trace
    }

    /// Whether a committed transaction still waits for its live apply.
    pub fn replay_pending(&self) -> bool {
        self.replay_pending.load(Ordering::SeqCst)
    }

    /// Receive every committed payload, for mirroring.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<JournalPayload>> {
        self.commits.subscribe()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Visible object by id.
    pub fn lookup(&self, id: ObjectId) -> Option<StorageObject> {
        self.graph.read().visible(id).cloned()
    }

    /// Visible object of `kind` with `number`.
    pub fn lookup_by_number(&self, kind: ObjectKind, number: u32) -> Option<StorageObject> {
        self.graph.read().by_number(kind, number).cloned()
    }

    /// Every visible object in id order.
    pub fn objects(&self) -> Vec<StorageObject> {
        self.graph.read().iter_visible().cloned().collect()
    }

    /// Objects consuming `id`.
    pub fn clients_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.graph.read().clients_of(id)
    }

    /// Objects `id` consumes.
    pub fn consumes_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.graph.read().consumes_of(id)
    }

    /// Copy of the whole graph.
    pub fn snapshot(&self) -> ObjectGraph {
        self.graph.read().clone()
    }

    /// The open transaction, if any.
    pub fn current(&self) -> Option<(TransactionId, TransactionState)> {
        self.slot.lock().as_ref().map(|t| (t.id, t.state))
    }

    // =========================================================================
    // Transaction lifecycle
    // =========================================================================

    /// Open a transaction.
    pub fn start_transaction(&self, kind: TransactionKind) -> Result<TransactionId> {
        self.begin(kind, None)
    }

    /// Open a transaction on behalf of `job`.
    pub fn start_job_transaction(
        &self,
        kind: TransactionKind,
        job: JobNumber,
    ) -> Result<TransactionId> {
        self.begin(kind, Some(job))
    }

    fn begin(&self, kind: TransactionKind, job: Option<JobNumber>) -> Result<TransactionId> {
        self.journal.hooks().ensure_alive()?;
        let mut slot = self.slot.lock();
        if let Some(open) = slot.as_ref() {
            return Err(StrataError::AlreadyOpen { open: open.id });
        }

        if self.replay_pending.load(Ordering::SeqCst) {
            let outcome = self.journal.recover()?;
            self.replay_pending.store(false, Ordering::SeqCst);
            tracing::info!(?outcome, "Deferred live apply completed");
        }

        // Ids share the journal sequence, so a promoted peer continues past
        // every transaction the old active made durable.
        let id = TransactionId::new(self.journal.next_sequence());
        *slot = Some(Transaction::new(id, kind, job));
        self.trace.started(id, job);
        tracing::debug!(transaction_id = %id, %kind, job = ?job, "Transaction started");
        Ok(id)
    }

    fn open_mut<'a>(
        slot: &'a mut Option<Transaction>,
        handle: TransactionId,
        operation: &'static str,
    ) -> Result<&'a mut Transaction> {
        match slot.as_mut() {
            Some(txn) if txn.id == handle => {
                if txn.state == TransactionState::Open {
                    Ok(txn)
                } else {
                    Err(StrataError::InvalidTransactionState {
                        transaction_id: handle,
                        state: txn.state.to_string(),
                        operation,
                    })
                }
            }
            _ => Err(StrataError::TransactionNotFound {
                transaction_id: handle,
            }),
        }
    }

    fn ensure_room(&self, txn: &Transaction, records: usize) -> Result<()> {
        if txn.records.len() + records > self.config.max_records_per_transaction {
            return Err(StrataError::TooManyMutations {
                transaction_id: txn.id,
                max: self.config.max_records_per_transaction,
            });
        }
        Ok(())
    }

    /// Run `f` against the open transaction `handle` and the graph.
    fn mutate<T>(
        &self,
        handle: TransactionId,
        operation: &'static str,
        f: impl FnOnce(&mut Transaction, &mut ObjectGraph) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.slot.lock();
        let txn = Self::open_mut(&mut slot, handle, operation)?;
        let mut graph = self.graph.write();
        f(txn, &mut graph)
    }

    /// Create an object in the open transaction. It is visible as `Creating`
    /// until commit.
    pub fn create_object(&self, handle: TransactionId, spec: ObjectSpec) -> Result<ObjectId> {
        let capacity = self.journal.slot_count();
        self.mutate(handle, "create", |txn, graph| {
            self.ensure_room(txn, 1)?;
            let kind = spec.config.kind();
            if let Some(number) = spec.number {
                if graph.by_number(kind, number).is_some() {
                    return Err(StrataError::DuplicateNumber { kind, number });
                }
            }
            let id = graph
                .lowest_free_id(capacity)
                .ok_or(StrataError::ObjectTableFull { capacity })?;

            graph.install(ObjectImage {
                object: StorageObject {
                    id,
                    number: spec.number,
                    config: spec.config,
                    state: LifecycleState::Creating,
                },
                consumes: Vec::new(),
            });
            txn.records.push(MutationRecord {
                op: MutationOp::Create,
                target: id,
                before: None,
                after: committed_image(graph, id),
            });
            tracing::debug!(transaction_id = %txn.id, object_id = %id, %kind, "Object created");
            Ok(id)
        })
    }

    /// Destroy an object in the open transaction.
    ///
    /// The object's own downstream edges are removed in the same transaction.
    /// Fails with `HasUpstreamEdges` while other objects still consume it.
    pub fn destroy_object(&self, handle: TransactionId, id: ObjectId) -> Result<()> {
        self.mutate(handle, "destroy", |txn, graph| {
            if graph.visible(id).is_none() {
                return Err(StrataError::ObjectNotFound { object_id: id });
            }
            let clients = graph.clients_of(id);
            if !clients.is_empty() {
                return Err(StrataError::HasUpstreamEdges {
                    object_id: id,
                    clients,
                });
            }
            let downstream = graph.consumes_of(id);
            self.ensure_room(txn, downstream.len() + 1)?;

            for to in downstream {
                let before = graph.image(id);
                graph.unlink(id, to);
                txn.records.push(MutationRecord {
                    op: MutationOp::Unlink,
                    target: id,
                    before,
                    after: committed_image(graph, id),
                });
            }

            let before = graph.image(id);
            if let Some(object) = graph.get_mut(id) {
                object.state = LifecycleState::Destroying;
            }
            txn.records.push(MutationRecord {
                op: MutationOp::Destroy,
                target: id,
                before,
                after: None,
            });
            tracing::debug!(transaction_id = %txn.id, object_id = %id, "Object destroyed");
            Ok(())
        })
    }

    /// Apply field changes to an object in the open transaction.
    pub fn update_object(
        &self,
        handle: TransactionId,
        id: ObjectId,
        changes: &[FieldChange],
    ) -> Result<()> {
        self.mutate(handle, "update", |txn, graph| {
            if changes.is_empty() {
                return Err(StrataError::invalid("changes", "no field to update"));
            }
            let mut updated = graph
                .visible(id)
                .cloned()
                .ok_or(StrataError::ObjectNotFound { object_id: id })?;
            for change in changes {
                updated.apply(change)?;
            }
            self.ensure_room(txn, 1)?;

            let before = graph.image(id);
            if let Some(object) = graph.get_mut(id) {
                *object = updated;
            }
            txn.records.push(MutationRecord {
                op: MutationOp::Update,
                target: id,
                before,
                after: committed_image(graph, id),
            });
            tracing::debug!(transaction_id = %txn.id, object_id = %id, changes = changes.len(), "Object updated");
            Ok(())
        })
    }

    /// Record that `from` consumes `to`.
    pub fn link(&self, handle: TransactionId, from: ObjectId, to: ObjectId) -> Result<()> {
        self.mutate(handle, "link", |txn, graph| {
            check_endpoints(graph, from, to)?;
            if graph.has_edge(from, to) {
                return Err(StrataError::InvalidEdge {
                    from,
                    to,
                    cause: "already linked".into(),
                });
            }
            self.ensure_room(txn, 1)?;

            let before = graph.image(from);
            graph.link(from, to);
            txn.records.push(MutationRecord {
                op: MutationOp::Link,
                target: from,
                before,
                after: committed_image(graph, from),
            });
            Ok(())
        })
    }

    /// Remove the edge `from -> to`.
    pub fn unlink(&self, handle: TransactionId, from: ObjectId, to: ObjectId) -> Result<()> {
        self.mutate(handle, "unlink", |txn, graph| {
            if !graph.has_edge(from, to) {
                return Err(StrataError::InvalidEdge {
                    from,
                    to,
                    cause: "not linked".into(),
                });
            }
            self.ensure_room(txn, 1)?;

            let before = graph.image(from);
            graph.unlink(from, to);
            txn.records.push(MutationRecord {
                op: MutationOp::Unlink,
                target: from,
                before,
                after: committed_image(graph, from),
            });
            Ok(())
        })
    }

    /// Make the open transaction durable.
    ///
    /// A failure before the journal header turns valid rolls the transaction
    /// back and returns `PersistenceFailed`. Once the header is valid the
    /// transaction counts as committed even if the live apply fails; that
    /// apply is then re-run before the next transaction starts.
    pub fn commit(&self, handle: TransactionId) -> Result<()> {
        let mut slot = self.slot.lock();
        let txn = Self::open_mut(&mut slot, handle, "commit")?;
        let job = txn.job;

        if txn.records.is_empty() {
            slot.take();
            self.trace.committed(handle, job);
            tracing::debug!(transaction_id = %handle, "Empty transaction committed");
            return Ok(());
        }

        txn.state = TransactionState::Persisting;
        let payload = JournalPayload {
            transaction_id: handle,
            job,
            sequence: handle.as_u64(),
            records: txn.records.clone(),
        };

        let applied = match self.journal.begin_persist(&payload) {
            Ok(()) => self
                .journal
                .apply_to_live(&payload)
                .and_then(|_| self.journal.invalidate_header()),
            Err(err @ StrataError::NodeCrashed { .. }) => return Err(err),
            // The header made it to media even though the step reported an
            // error, so the payload is committed and recovery will replay it.
            Err(err) if self.header_covers(payload.sequence) => Err(err),
            Err(err) => {
                if let Some(txn) = slot.take() {
                    self.rollback(&txn.records);
                }
                self.trace.aborted(handle, job);
                tracing::warn!(transaction_id = %handle, error = %err, "Persist failed, transaction rolled back");
                return Err(StrataError::PersistenceFailed {
                    transaction_id: handle,
                    cause: err.to_string(),
                });
            }
        };
        match applied {
            Err(err @ StrataError::NodeCrashed { .. }) => return Err(err),
            Err(err) => {
                self.replay_pending.store(true, Ordering::SeqCst);
                tracing::warn!(
                    transaction_id = %handle,
                    error = %err,
                    "Live apply failed after journal commit, replay deferred"
                );
            }
            Ok(()) => {}
        }

        self.graph
            .write()
            .finalize(payload.records.iter().map(|r| r.target));
        slot.take();
        self.trace.committed(handle, job);
        tracing::info!(
            transaction_id = %handle,
            job = ?job,
            sequence = payload.sequence,
            records = payload.records.len(),
            "Transaction committed"
        );
        let _ = self.commits.send(Arc::new(payload));
        Ok(())
    }

    /// Whether the journal header is valid for the payload at `sequence`.
    fn header_covers(&self, sequence: u64) -> bool {
        matches!(
            self.journal.header(),
            Ok(Some(header)) if header.is_valid() && header.sequence == sequence
        )
    }

    /// Roll back the open transaction.
    pub fn abort(&self, handle: TransactionId) -> Result<()> {
        let mut slot = self.slot.lock();
        let txn = Self::open_mut(&mut slot, handle, "abort")?;
        let job = txn.job;
        if let Some(txn) = slot.take() {
            self.rollback(&txn.records);
            tracing::info!(
                transaction_id = %handle,
                records = txn.records.len(),
                "Transaction aborted"
            );
        }
        self.trace.aborted(handle, job);
        Ok(())
    }

    fn rollback(&self, records: &[MutationRecord]) {
        let mut graph = self.graph.write();
        for record in records.iter().rev() {
            match &record.before {
                Some(before) => graph.install(before.clone()),
                None => {
                    graph.remove(record.target);
                }
            }
        }
    }

    /// Apply a payload committed by the peer, without touching media.
    pub fn mirror(&self, payload: &JournalPayload) {
        let mut graph = self.graph.write();
        for record in &payload.records {
            match &record.after {
                Some(after) => graph.install(after.clone()),
                None => {
                    graph.remove(record.target);
                }
            }
        }
        tracing::debug!(
            transaction_id = %payload.transaction_id,
            records = payload.records.len(),
            "Mirrored peer commit"
        );
    }
}

fn check_endpoints(graph: &ObjectGraph, from: ObjectId, to: ObjectId) -> Result<()> {
    if from == to {
        return Err(StrataError::InvalidEdge {
            from,
            to,
            cause: "object cannot consume itself".into(),
        });
    }
    for id in [from, to] {
        if graph.visible(id).is_none() {
            return Err(StrataError::ObjectNotFound { object_id: id });
        }
    }
    Ok(())
}

/// Image as it must appear once committed: tentative creations become ready.
fn committed_image(graph: &ObjectGraph, id: ObjectId) -> Option<ObjectImage> {
    graph.image(id).map(|mut image| {
        if image.object.state == LifecycleState::Creating {
            image.object.state = LifecycleState::Ready;
        }
        image
    })
}
