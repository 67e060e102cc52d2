//! Core types for Strata.
//!
//! - `ObjectId`, `TransactionId`, `JobNumber`, `ControllerId`: identifiers
//! - `StorageObject` and its `ObjectConfig`: the configuration being journaled
//! - `ObjectImage`: absolute image of one live-region entry

mod ids;
mod object;

pub use ids::{ControllerId, JobNumber, ObjectId, TransactionId};
pub use object::{
    DriveLocation, FieldChange, LifecycleState, MAX_RAID_WIDTH, ObjectConfig, ObjectImage,
    ObjectKind, ObjectSpec, RaidType, StorageObject,
};
