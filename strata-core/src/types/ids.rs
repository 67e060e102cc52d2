//! Strongly-typed identifiers for Strata entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a storage object.
///
/// Object ids double as live-region slot indices, so they are small and dense.
/// Id `0` is reserved and never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The reserved, never-allocated id.
    pub const INVALID: Self = Self(0);

    /// Create a new object ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this id may name an object.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj_{}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifier of a transaction. Drawn from the journal sequence, so it stays
/// monotonic across failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Create a transaction ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// User-visible number of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobNumber(u64);

impl JobNumber {
    /// Create a job number from a raw value.
    #[must_use]
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

/// One of the two redundant storage controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerId {
    /// Storage processor A.
    SpA,
    /// Storage processor B.
    SpB,
}

impl ControllerId {
    /// The other controller of the pair.
    #[must_use]
    pub const fn peer(&self) -> Self {
        match self {
            Self::SpA => Self::SpB,
            Self::SpB => Self::SpA,
        }
    }

    /// Index into two-element per-controller tables.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::SpA => 0,
            Self::SpB => 1,
        }
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpA => write!(f, "spa"),
            Self::SpB => write!(f, "spb"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(ObjectId::new(7).to_string(), "obj_7");
        assert_eq!(TransactionId::new(3).to_string(), "txn_3");
        assert_eq!(JobNumber::new(12).to_string(), "job_12");
        assert_eq!(ControllerId::SpB.to_string(), "spb");
    }

    #[test]
    fn reserved_object_id() {
        assert!(!ObjectId::INVALID.is_valid());
        assert!(ObjectId::new(1).is_valid());
    }

    #[test]
    fn controller_peer() {
        assert_eq!(ControllerId::SpA.peer(), ControllerId::SpB);
        assert_eq!(ControllerId::SpB.peer().index(), 0);
    }
}
