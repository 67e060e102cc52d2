//! Transactions over the object graph.
//!
//! A [`TransactionManager`] holds the single transaction slot. Every mutation
//! is applied to the in-memory graph at once and logged as a
//! [`MutationRecord`]; commit hands the log to the journal store, abort
//! replays the before-images in reverse.

mod config;
mod manager;
mod record;
mod trace;

pub use config::TransactionConfig;
pub use manager::TransactionManager;
pub use record::{
    MutationOp, MutationRecord, Transaction, TransactionKind, TransactionState,
};
pub use trace::{TraceEvent, TransactionTrace};
