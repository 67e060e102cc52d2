//! Drive topology, as reported by the discovery layer.

use crate::types::DriveLocation;
use parking_lot::RwLock;
use std::collections::HashMap;

/// What the discovery layer knows about a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    /// Present and usable.
    Ready {
        /// Usable capacity in blocks.
        capacity_blocks: u64,
    },
    /// Present but not usable yet (spinning up, being discovered).
    NotReady,
    /// Not present.
    Missing,
}

/// Source of drive information for job validation.
pub trait TopologyProvider: Send + Sync {
    /// Current state of the drive at `location`.
    fn drive_state(&self, location: &DriveLocation) -> DriveState;
}

/// Fixed, mutable-at-runtime topology.
#[derive(Debug, Default)]
pub struct StaticTopology {
    drives: RwLock<HashMap<DriveLocation, DriveState>>,
}

impl StaticTopology {
    /// Empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topology with `count` ready drives in slots `0..count` of enclosure `0_0`.
    pub fn with_ready_drives(count: u8, capacity_blocks: u64) -> Self {
        let topology = Self::new();
        for slot in 0..count {
            topology.set_drive(
                DriveLocation::new(0, 0, slot),
                DriveState::Ready { capacity_blocks },
            );
        }
        topology
    }

    /// Insert or replace a drive.
    pub fn set_drive(&self, location: DriveLocation, state: DriveState) {
        self.drives.write().insert(location, state);
    }

    /// Forget a drive.
    pub fn remove_drive(&self, location: &DriveLocation) {
        self.drives.write().remove(location);
    }
}

impl TopologyProvider for StaticTopology {
    fn drive_state(&self, location: &DriveLocation) -> DriveState {
        self.drives
            .read()
            .get(location)
            .copied()
            .unwrap_or(DriveState::Missing)
    }
}
