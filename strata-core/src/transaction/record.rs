//! Transaction data model.

use crate::types::{JobNumber, ObjectId, ObjectImage, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a transaction is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Creates objects.
    Create,
    /// Destroys objects.
    Destroy,
    /// Updates objects.
    Update,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Destroy => write!(f, "destroy"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Accepting mutations.
    Open,
    /// Being written to the journal; can no longer be aborted.
    Persisting,
    /// Durable and applied.
    Committed,
    /// Rolled back.
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Persisting => write!(f, "persisting"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Kind of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MutationOp {
    /// Object created.
    Create = 0,
    /// Object destroyed.
    Destroy = 1,
    /// Object fields updated.
    Update = 2,
    /// Edge added from the target.
    Link = 3,
    /// Edge removed from the target.
    Unlink = 4,
}

impl TryFrom<u8> for MutationOp {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Create),
            1 => Ok(Self::Destroy),
            2 => Ok(Self::Update),
            3 => Ok(Self::Link),
            4 => Ok(Self::Unlink),
            _ => Err("Unknown mutation op"),
        }
    }
}

/// One entry in a transaction's mutation log.
///
/// Images are absolute: `before` restores the entry on rollback, `after` is
/// what the live region must hold once the transaction is durable. `None`
/// means "no entry".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Kind of mutation.
    pub op: MutationOp,
    /// The object whose live entry changes.
    pub target: ObjectId,
    /// Entry before the mutation.
    pub before: Option<ObjectImage>,
    /// Entry after the mutation.
    pub after: Option<ObjectImage>,
}

/// An in-memory transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Handle.
    pub id: TransactionId,
    /// Purpose.
    pub kind: TransactionKind,
    /// Ordered mutation log.
    pub records: Vec<MutationRecord>,
    /// Lifecycle state.
    pub state: TransactionState,
    /// Owning job, if started on behalf of one.
    pub job: Option<JobNumber>,
}

impl Transaction {
    /// A fresh open transaction.
    pub fn new(id: TransactionId, kind: TransactionKind, job: Option<JobNumber>) -> Self {
        Self {
            id,
            kind,
            records: Vec::new(),
            state: TransactionState::Open,
            job,
        }
    }
}
