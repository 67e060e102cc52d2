//! Error types for Strata.
//!
//! Every error carries the identifiers needed to act on it (object id,
//! transaction id, job number) and a stable code. Codes are grouped:
//!
//! - `E1xx` request validation
//! - `E2xx` transaction manager
//! - `E3xx` journal store
//! - `E4xx` job queue
//! - `E5xx` failover
//! - `E6xx` fault-injection hooks
//! - `E8xx` configuration

use crate::hooks::HookPoint;
use crate::types::{ControllerId, JobNumber, ObjectId, ObjectKind, TransactionId};
use thiserror::Error;

/// The main error type for Strata operations.
#[derive(Error, Debug, Clone)]
pub enum StrataError {
    // =========================================================================
    // Validation Errors (E100-E199)
    // =========================================================================
    /// A request field is structurally invalid.
    #[error("E101: Invalid request field '{field}': {cause}")]
    InvalidRequest {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        cause: String,
    },

    /// A drive referenced by a request does not exist in the topology.
    #[error("E102: Drive {drive} not present in topology")]
    DriveNotFound {
        /// Display form of the drive location.
        drive: String,
    },

    /// Another visible object of the same kind already uses this number.
    #[error("E103: {kind} number {number} already in use")]
    DuplicateNumber {
        /// Object kind.
        kind: ObjectKind,
        /// The user-visible number.
        number: u32,
    },

    /// No visible object of the kind carries this number.
    #[error("E104: No {kind} with number {number}")]
    UnknownNumber {
        /// Object kind.
        kind: ObjectKind,
        /// The user-visible number.
        number: u32,
    },

    // =========================================================================
    // Transaction Errors (E200-E299)
    // =========================================================================
    /// A transaction is already open (single-writer discipline).
    #[error("E201: Transaction {open} is already open")]
    AlreadyOpen {
        /// The transaction currently holding the slot.
        open: TransactionId,
    },

    /// The handle does not name the open transaction.
    #[error("E202: Transaction {transaction_id} not found")]
    TransactionNotFound {
        /// The unknown handle.
        transaction_id: TransactionId,
    },

    /// The transaction is not in a state that permits the operation.
    #[error("E203: Transaction {transaction_id} cannot {operation} while {state}")]
    InvalidTransactionState {
        /// The transaction.
        transaction_id: TransactionId,
        /// Current state, display form.
        state: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The object does not exist or is not visible.
    #[error("E204: Object {object_id} not found")]
    ObjectNotFound {
        /// The missing object.
        object_id: ObjectId,
    },

    /// The object still has clients depending on it.
    #[error("E205: Object {object_id} has upstream edges from {clients:?}")]
    HasUpstreamEdges {
        /// The object that was to be destroyed.
        object_id: ObjectId,
        /// Objects that still consume it.
        clients: Vec<ObjectId>,
    },

    /// The transaction reached its mutation record limit.
    #[error("E206: Transaction {transaction_id} exceeds {max} mutation records")]
    TooManyMutations {
        /// The transaction.
        transaction_id: TransactionId,
        /// Configured maximum.
        max: usize,
    },

    /// No free object id is left in the live region.
    #[error("E207: Object table full ({capacity} slots)")]
    ObjectTableFull {
        /// Number of slots in the live region.
        capacity: u32,
    },

    /// A dependency exists but is not ready yet. Retryable.
    #[error("E208: Dependency {dependency} not ready: {cause}")]
    DependencyNotReady {
        /// Display form of the dependency.
        dependency: String,
        /// What is missing.
        cause: String,
    },

    /// An edge operation referenced a missing or already present edge.
    #[error("E209: Invalid edge {from} -> {to}: {cause}")]
    InvalidEdge {
        /// Consuming object.
        from: ObjectId,
        /// Consumed object.
        to: ObjectId,
        /// Reason.
        cause: String,
    },

    /// The journal write failed; the transaction was rolled back.
    #[error("E210: Persisting transaction {transaction_id} failed: {cause}")]
    PersistenceFailed {
        /// The aborted transaction.
        transaction_id: TransactionId,
        /// Underlying journal error.
        cause: String,
    },

    // =========================================================================
    // Journal Errors (E300-E399)
    // =========================================================================
    /// The underlying region could not be read, written or synced.
    #[error("E301: Journal {operation} failed: {cause}")]
    JournalIo {
        /// The failing step.
        operation: &'static str,
        /// Underlying cause.
        cause: String,
    },

    /// A region holds data that does not decode.
    #[error("E302: {region} region corrupted: {cause}")]
    JournalCorruption {
        /// `journal` or `live`.
        region: &'static str,
        /// Description of the corruption.
        cause: String,
    },

    /// The encoded payload does not fit in the journal area.
    #[error("E303: Journal payload of {size} bytes exceeds capacity {capacity}")]
    PayloadTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Journal area capacity.
        capacity: usize,
    },

    /// The device has never been formatted.
    #[error("E304: Region is not formatted: {cause}")]
    Unformatted {
        /// What was found instead of a header.
        cause: String,
    },

    // =========================================================================
    // Job Errors (E400-E499)
    // =========================================================================
    /// No job with this number is known.
    #[error("E401: Job {job} not found")]
    JobNotFound {
        /// The unknown job.
        job: JobNumber,
    },

    /// The job queue is at capacity.
    #[error("E402: Job queue full ({depth} jobs)")]
    QueueFull {
        /// Configured depth.
        depth: usize,
    },

    /// The job is past the point where it can be withdrawn.
    #[error("E403: Job {job} cannot be withdrawn while {state}")]
    JobNotCancellable {
        /// The job.
        job: JobNumber,
        /// Its current state.
        state: String,
    },

    // =========================================================================
    // Failover Errors (E500-E599)
    // =========================================================================
    /// The controller panicked (simulated) and stopped processing.
    #[error("E501: Controller {node} crashed")]
    NodeCrashed {
        /// The crashed controller.
        node: ControllerId,
    },

    /// The request needs the active role.
    #[error("E502: Controller {node} is not active")]
    NotActive {
        /// The controller that received the request.
        node: ControllerId,
    },

    /// The failover transition is not valid from the current state.
    #[error("E503: Controller {node} cannot {operation} while {state}")]
    InvalidFailoverState {
        /// The controller.
        node: ControllerId,
        /// The rejected operation.
        operation: &'static str,
        /// Current failover state.
        state: String,
    },

    // =========================================================================
    // Hook Errors (E600-E699)
    // =========================================================================
    /// The hook was not reached before the timeout elapsed.
    #[error("E601: Hook {point} not reached within {timeout_ms}ms")]
    HookTimeout {
        /// The awaited point.
        point: HookPoint,
        /// The timeout.
        timeout_ms: u64,
    },

    /// No hook is armed at this point.
    #[error("E602: No hook armed at {point}")]
    HookNotArmed {
        /// The point.
        point: HookPoint,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid configuration '{field}': {cause}")]
    Config {
        /// The offending field.
        field: String,
        /// Reason.
        cause: String,
    },

    /// Encoding or decoding failed.
    #[error("E804: Serialization error: {0}")]
    Serialization(String),
}

impl StrataError {
    /// Get the error code (e.g., "E205").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "E101",
            Self::DriveNotFound { .. } => "E102",
            Self::DuplicateNumber { .. } => "E103",
            Self::UnknownNumber { .. } => "E104",
            Self::AlreadyOpen { .. } => "E201",
            Self::TransactionNotFound { .. } => "E202",
            Self::InvalidTransactionState { .. } => "E203",
            Self::ObjectNotFound { .. } => "E204",
            Self::HasUpstreamEdges { .. } => "E205",
            Self::TooManyMutations { .. } => "E206",
            Self::ObjectTableFull { .. } => "E207",
            Self::DependencyNotReady { .. } => "E208",
            Self::InvalidEdge { .. } => "E209",
            Self::PersistenceFailed { .. } => "E210",
            Self::JournalIo { .. } => "E301",
            Self::JournalCorruption { .. } => "E302",
            Self::PayloadTooLarge { .. } => "E303",
            Self::Unformatted { .. } => "E304",
            Self::JobNotFound { .. } => "E401",
            Self::QueueFull { .. } => "E402",
            Self::JobNotCancellable { .. } => "E403",
            Self::NodeCrashed { .. } => "E501",
            Self::NotActive { .. } => "E502",
            Self::InvalidFailoverState { .. } => "E503",
            Self::HookTimeout { .. } => "E601",
            Self::HookNotArmed { .. } => "E602",
            Self::Config { .. } => "E801",
            Self::Serialization(_) => "E804",
        }
    }

    /// Whether a job may retry the same operation after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DependencyNotReady { .. })
    }

    /// Whether the error is a rejected request that must never be retried.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::DriveNotFound { .. }
                | Self::DuplicateNumber { .. }
                | Self::UnknownNumber { .. }
        )
    }

    /// Shorthand for an [`StrataError::InvalidRequest`].
    pub fn invalid(field: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            cause: cause.into(),
        }
    }

    /// Shorthand for a [`StrataError::JournalIo`] built from an I/O error.
    pub fn io(operation: &'static str, err: impl ToString) -> Self {
        Self::JournalIo {
            operation,
            cause: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let err = StrataError::HasUpstreamEdges {
            object_id: ObjectId::new(4),
            clients: vec![ObjectId::new(9)],
        };
        assert_eq!(err.code(), "E205");
        assert!(err.to_string().starts_with("E205"));

        let err = StrataError::io("sync", "device gone");
        assert_eq!(err.code(), "E301");
        assert!(err.to_string().contains("device gone"));
    }

    #[test]
    fn only_dependency_errors_are_transient() {
        let transient = StrataError::DependencyNotReady {
            dependency: "drive 0_0_4".into(),
            cause: "spinning up".into(),
        };
        assert!(transient.is_transient());
        assert!(!transient.is_validation());

        let structural = StrataError::HasUpstreamEdges {
            object_id: ObjectId::new(1),
            clients: vec![],
        };
        assert!(!structural.is_transient());

        assert!(StrataError::invalid("width", "zero").is_validation());
    }
}
