//! Controller bring-up and the two-controller pair.

use crate::config::ControllerConfig;
use crate::failover::{
    FailoverCoordinator, PeerLink, Role, spawn_heartbeat, spawn_peer_monitor,
};
use crate::job::{JobLedger, JobQueue};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::error::Result;
use strata_core::hooks::HookRegistry;
use strata_core::journal::{JournalPayload, JournalStore, MemoryRegion, Region};
use strata_core::topology::TopologyProvider;
use strata_core::transaction::TransactionManager;
use strata_core::types::ControllerId;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// One storage controller: journal store, transaction manager, hooks, job
/// queue and failover coordinator.
pub struct ControllerNode {
    id: ControllerId,
    config: ControllerConfig,
    hooks: Arc<HookRegistry>,
    manager: Arc<TransactionManager>,
    queue: Arc<JobQueue>,
    coordinator: FailoverCoordinator,
}

impl ControllerNode {
    /// Bring up controller `id` on `region`.
    ///
    /// An active controller replays the journal before loading the graph. A
    /// standby only loads the graph and keeps its queue paused.
    pub fn open(
        id: ControllerId,
        role: Role,
        region: Arc<dyn Region>,
        config: ControllerConfig,
        ledger: Arc<JobLedger>,
        topology: Arc<dyn TopologyProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let hooks = Arc::new(HookRegistry::new(id));
        let journal = Arc::new(JournalStore::open_or_format(
            region,
            &config.journal,
            Arc::clone(&hooks),
        )?);

        if role == Role::Active {
            let outcome = journal.recover()?;
            tracing::info!(node = %id, ?outcome, "Boot recovery finished");
        }
        let manager = Arc::new(TransactionManager::load(
            journal,
            config.transactions.clone(),
        )?);
        let queue = Arc::new(JobQueue::new(
            id,
            config.jobs.clone(),
            ledger,
            Arc::clone(&manager),
            topology,
        ));
        let coordinator = FailoverCoordinator::new(id, role, Arc::clone(&queue));

        tracing::info!(node = %id, %role, objects = manager.objects().len(), "Controller up");
        Ok(Self {
            id,
            config,
            hooks,
            manager,
            queue,
            coordinator,
        })
    }

    /// Controller id.
    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Configuration the controller was opened with.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Fault-injection hooks of this controller.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Transaction manager.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Failover coordinator.
    pub fn coordinator(&self) -> &FailoverCoordinator {
        &self.coordinator
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    /// Simulate a controller panic.
    ///
    /// Every later journal step fails, a step paused at a hook aborts, and
    /// the heartbeat stops. Whatever the job queue was running stays
    /// `Running` for the peer to resolve.
    pub fn crash(&self) {
        self.queue.pause();
        self.hooks.crash();
        self.queue.nudge();
        tracing::warn!(node = %self.id, "Controller panic simulated");
    }

    /// Whether the controller is down.
    pub fn is_crashed(&self) -> bool {
        self.hooks.is_crashed()
    }

    /// Apply a payload committed by the peer while standing by.
    fn mirror(&self, payload: &JournalPayload) {
        if self.role() == Role::Standby && !self.is_crashed() {
            self.manager.mirror(payload);
        }
    }
}

/// Two controllers sharing one region, one job ledger and one heartbeat
/// board. `SpA` starts active.
pub struct ControllerPair {
    nodes: [Arc<ControllerNode>; 2],
    ledger: Arc<JobLedger>,
    link: Arc<PeerLink>,
    region: Arc<dyn Region>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerPair {
    /// Pair over a fresh in-memory region.
    pub fn in_memory(config: ControllerConfig, topology: Arc<dyn TopologyProvider>) -> Result<Self> {
        let region: Arc<dyn Region> = Arc::new(MemoryRegion::for_config(&config.journal));
        Self::new(region, config, topology)
    }

    /// Pair over `region`, formatting it if needed.
    pub fn new(
        region: Arc<dyn Region>,
        config: ControllerConfig,
        topology: Arc<dyn TopologyProvider>,
    ) -> Result<Self> {
        let ledger = Arc::new(JobLedger::new(config.jobs.max_queue_depth));
        let active = ControllerNode::open(
            ControllerId::SpA,
            Role::Active,
            Arc::clone(&region),
            config.clone(),
            Arc::clone(&ledger),
            Arc::clone(&topology),
        )?;
        let standby = ControllerNode::open(
            ControllerId::SpB,
            Role::Standby,
            Arc::clone(&region),
            config,
            Arc::clone(&ledger),
            topology,
        )?;

        Ok(Self {
            nodes: [Arc::new(active), Arc::new(standby)],
            ledger,
            link: Arc::new(PeerLink::new()),
            region,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Controller `id`.
    pub fn node(&self, id: ControllerId) -> &Arc<ControllerNode> {
        &self.nodes[id.index()]
    }

    /// The live controller holding the active role.
    pub fn active(&self) -> Option<&Arc<ControllerNode>> {
        self.nodes
            .iter()
            .find(|node| node.role() == Role::Active && !node.is_crashed())
    }

    /// The controller holding the standby role.
    pub fn standby(&self) -> Option<&Arc<ControllerNode>> {
        self.nodes.iter().find(|node| node.role() == Role::Standby)
    }

    /// The shared job ledger.
    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// The shared heartbeat board.
    pub fn link(&self) -> &Arc<PeerLink> {
        &self.link
    }

    /// The shared region.
    pub fn region(&self) -> &Arc<dyn Region> {
        &self.region
    }

    /// Start both job workers and commit mirroring in each direction.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        for node in &self.nodes {
            tasks.push(Arc::clone(node.queue()).spawn_worker());
        }
        for node in &self.nodes {
            let peer = Arc::clone(self.node(node.id().peer()));
            tasks.push(spawn_mirror(Arc::clone(node), peer));
        }
    }

    /// Start heartbeats and peer monitors, so a crashed active controller is
    /// replaced without outside help.
    pub fn start_monitoring(&self) {
        let mut tasks = self.tasks.lock();
        for node in &self.nodes {
            self.link.beat(node.id());
        }
        for node in &self.nodes {
            tasks.push(spawn_heartbeat(Arc::clone(node), Arc::clone(&self.link)));
            tasks.push(spawn_peer_monitor(Arc::clone(node), Arc::clone(&self.link)));
        }
    }

    /// Stop every background task.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.queue().shutdown();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ControllerPair {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward every commit of `from` to `to`.
fn spawn_mirror(from: Arc<ControllerNode>, to: Arc<ControllerNode>) -> JoinHandle<()> {
    let mut commits = from.manager().subscribe();
    tokio::spawn(async move {
        loop {
            match commits.recv().await {
                Ok(payload) => to.mirror(&payload),
                Err(RecvError::Lagged(missed)) => {
                    if to.role() != Role::Standby || to.is_crashed() {
                        continue;
                    }
                    tracing::warn!(node = %to.id(), missed, "Mirror lagged, reloading");
                    if let Err(err) = to.manager().reload() {
                        tracing::error!(node = %to.id(), error = %err, "Mirror reload failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
