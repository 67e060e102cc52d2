//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use strata_core::hooks::{HookPoint, HookRegistry};
use strata_core::journal::JournalConfig;
use strata_core::topology::StaticTopology;
use strata_core::types::{DriveLocation, JobNumber, RaidType};
use strata_executor::config::ControllerConfig;
use strata_executor::job::{JobQueue, JobQueueConfig, JobState, RaidGroupSpec, WaitOutcome};
use strata_executor::node::ControllerPair;

/// Upper bound for every wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Small geometry and quick retries.
pub fn test_config() -> ControllerConfig {
    ControllerConfig::in_memory()
        .with_journal(
            JournalConfig::in_memory()
                .with_journal_capacity(128 * 1024)
                .with_slots(64, 1024),
        )
        .with_jobs(JobQueueConfig::default().with_retries(3, Duration::from_millis(10)))
}

/// Twelve ready drives of 1000 blocks in enclosure `0_0`.
pub fn test_topology() -> Arc<StaticTopology> {
    Arc::new(StaticTopology::with_ready_drives(12, 1000))
}

/// Pair over a fresh in-memory region with workers and mirroring running.
pub fn started_pair(topology: Arc<StaticTopology>) -> ControllerPair {
    let pair = ControllerPair::in_memory(test_config(), topology).unwrap();
    pair.start();
    pair
}

/// RAID 5 over three drives starting at `first_slot`.
pub fn raid5(number: u32, first_slot: u8) -> RaidGroupSpec {
    RaidGroupSpec {
        number,
        raid_type: RaidType::Raid5,
        width: 3,
        drives: (first_slot..first_slot + 3)
            .map(|slot| DriveLocation::new(0, 0, slot))
            .collect(),
        capacity_blocks: 2000,
    }
}

/// Wait for `job` and return its terminal state.
pub async fn finish(queue: &JobQueue, job: JobNumber) -> JobState {
    match queue.wait_for(job, TIMEOUT).await.unwrap() {
        WaitOutcome::Finished(status) => status.state,
        WaitOutcome::TimedOut => panic!("{job} did not finish within {TIMEOUT:?}"),
    }
}

/// Create RAID group `number` through `queue` and wait for the commit.
pub async fn commit_group(queue: &JobQueue, number: u32, first_slot: u8) {
    let job = queue.create_raid_group(raid5(number, first_slot)).unwrap();
    assert_eq!(finish(queue, job).await, JobState::Committed);
}

/// Block on a hook without stalling the async runtime.
pub async fn wait_hook(hooks: Arc<HookRegistry>, point: HookPoint) {
    tokio::task::spawn_blocking(move || hooks.wait_hook(point, TIMEOUT))
        .await
        .unwrap()
        .unwrap();
}

/// Poll `condition` until it holds or the test times out.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
