//! Strata Core Library
//!
//! Journaled configuration changes for a dual-controller storage array.
//!
//! # Overview
//!
//! Logical storage objects (RAID groups, LUNs, virtual extents) are created,
//! destroyed and updated inside transactions. Every committed transaction is
//! written ahead to a journal before it reaches the live region, so a
//! controller crash at any point leaves the array either exactly before or
//! exactly after the change.
//!
//! # Key Components
//!
//! - **Journal**: two-area write-ahead persistence with crash recovery
//! - **Transaction**: single-writer mutation log with commit and rollback
//! - **Graph**: id-indexed object table with consumer/client edges
//! - **Hooks**: fault injection at every step of the persistence pipeline
//! - **Topology**: drive discovery collaborator
//!
//! # Example
//!
//! ```ignore
//! use strata_core::prelude::*;
//!
//! let txn = manager.start_transaction(TransactionKind::Create)?;
//! let extent = manager.create_object(txn, ObjectSpec::anonymous(config))?;
//! manager.commit(txn)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod hooks;
pub mod journal;
pub mod prelude;
pub mod topology;
pub mod transaction;
pub mod types;

// Re-export key types at crate root for convenience
pub use error::{Result, StrataError};
pub use graph::ObjectGraph;
pub use hooks::{HookAction, HookPoint, HookRegistry};
pub use journal::{JournalConfig, JournalStore, RecoveryOutcome};
pub use transaction::{TransactionKind, TransactionManager};
pub use types::{ControllerId, JobNumber, ObjectId, StorageObject, TransactionId};
