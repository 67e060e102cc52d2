//! Heartbeat-driven takeover with no manual promotion.

mod common;

use std::sync::Arc;
use std::time::Duration;
use strata_core::hooks::{HookAction, HookPoint};
use strata_core::types::{ControllerId, ObjectKind};
use strata_executor::failover::{FailoverConfig, FailoverState};
use strata_executor::job::JobState;
use strata_executor::node::ControllerPair;

use common::{commit_group, eventually, finish, test_config, test_topology, wait_hook};

fn monitored_pair() -> ControllerPair {
    let config = test_config().with_failover(
        FailoverConfig::default().with_timing(Duration::from_millis(10), Duration::from_millis(100)),
    );
    let pair = ControllerPair::in_memory(config, test_topology()).unwrap();
    pair.start();
    pair.start_monitoring();
    pair
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healthy_pair_keeps_roles() {
    let pair = monitored_pair();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(pair.active().map(|n| n.id()), Some(ControllerId::SpA));
    assert_eq!(
        pair.node(ControllerId::SpB).coordinator().state(),
        FailoverState::StandbyNormal
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn standby_takes_over_silent_peer() {
    let pair = monitored_pair();
    let spa = Arc::clone(pair.node(ControllerId::SpA));
    let spb = Arc::clone(pair.node(ControllerId::SpB));
    commit_group(spa.queue(), 5, 0).await;

    spa.hooks()
        .add_hook(HookPoint::AfterJournalValid, HookAction::Pause);
    let job = spa.queue().destroy_raid_group(5).unwrap();
    wait_hook(Arc::clone(spa.hooks()), HookPoint::AfterJournalValid).await;
    spa.crash();

    eventually(|| spb.coordinator().state() == FailoverState::ActiveNormal).await;
    assert_eq!(pair.active().map(|n| n.id()), Some(ControllerId::SpB));
    assert_eq!(finish(spb.queue(), job).await, JobState::Committed);
    assert!(
        spb.manager()
            .lookup_by_number(ObjectKind::RaidGroup, 5)
            .is_none()
    );

    commit_group(spb.queue(), 6, 3).await;
    assert_eq!(spb.manager().objects().len(), 4);
}
