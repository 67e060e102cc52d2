//! Prelude for convenient imports.
//!
//! ```ignore
//! use strata_core::prelude::*;
//! ```

// Core types
pub use crate::types::{
    ControllerId, DriveLocation, FieldChange, JobNumber, LifecycleState, ObjectConfig, ObjectId,
    ObjectImage, ObjectKind, ObjectSpec, RaidType, StorageObject, TransactionId,
};

// Error handling
pub use crate::error::{Result, StrataError};

// Journal
pub use crate::journal::{
    FileRegion, JournalConfig, JournalPayload, JournalStore, MemoryRegion, RecoveryOutcome, Region,
};

// Transactions
pub use crate::graph::ObjectGraph;
pub use crate::transaction::{
    TransactionConfig, TransactionKind, TransactionManager, TransactionState,
};

// Fault injection and topology
pub use crate::hooks::{HookAction, HookPoint, HookRegistry};
pub use crate::topology::{DriveState, StaticTopology, TopologyProvider};
