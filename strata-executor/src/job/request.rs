//! Job requests, states and caller-visible errors.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strata_core::error::{Result, StrataError};
use strata_core::transaction::TransactionKind;
use strata_core::types::{DriveLocation, FieldChange, ObjectKind, RaidType};

/// Parameters of a new RAID group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidGroupSpec {
    /// User-visible RAID group number.
    pub number: u32,
    /// Protection scheme.
    pub raid_type: RaidType,
    /// Number of drives.
    pub width: u16,
    /// Drives in stripe order; one virtual extent is carved from each.
    pub drives: Vec<DriveLocation>,
    /// Exported capacity in blocks.
    pub capacity_blocks: u64,
}

/// Parameters of a new LUN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunSpec {
    /// User-visible LUN number.
    pub number: u32,
    /// Number of the RAID group to bind to.
    pub raid_group: u32,
    /// Size in blocks.
    pub capacity_blocks: u64,
    /// Start inside the RAID group, in blocks.
    pub offset_blocks: u64,
}

/// Operation on a RAID group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RaidGroupRequest {
    /// Create a RAID group and its extents.
    Create(RaidGroupSpec),
    /// Destroy a RAID group and its extents.
    Destroy {
        /// RAID group number.
        number: u32,
    },
    /// Change fields of a RAID group.
    Update {
        /// RAID group number.
        number: u32,
        /// Changes, applied in order.
        changes: Vec<FieldChange>,
    },
}

/// Operation on a LUN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LunRequest {
    /// Bind a new LUN to a RAID group.
    Create(LunSpec),
    /// Destroy a LUN.
    Destroy {
        /// LUN number.
        number: u32,
    },
    /// Change fields of a LUN.
    Update {
        /// LUN number.
        number: u32,
        /// Changes, applied in order.
        changes: Vec<FieldChange>,
    },
}

/// One externally requested configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum JobRequest {
    /// RAID group operation.
    RaidGroup(RaidGroupRequest),
    /// LUN operation.
    Lun(LunRequest),
}

impl JobRequest {
    /// Kind of transaction the request runs in.
    pub fn transaction_kind(&self) -> TransactionKind {
        match self {
            Self::RaidGroup(RaidGroupRequest::Create(_)) | Self::Lun(LunRequest::Create(_)) => {
                TransactionKind::Create
            }
            Self::RaidGroup(RaidGroupRequest::Destroy { .. })
            | Self::Lun(LunRequest::Destroy { .. }) => TransactionKind::Destroy,
            Self::RaidGroup(RaidGroupRequest::Update { .. })
            | Self::Lun(LunRequest::Update { .. }) => TransactionKind::Update,
        }
    }

    /// Kind of the object the request targets.
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Self::RaidGroup(_) => ObjectKind::RaidGroup,
            Self::Lun(_) => ObjectKind::Lun,
        }
    }

    /// Short operation name for logs, e.g. `destroy_raid_group`.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::RaidGroup(RaidGroupRequest::Create(_)) => "create_raid_group",
            Self::RaidGroup(RaidGroupRequest::Destroy { .. }) => "destroy_raid_group",
            Self::RaidGroup(RaidGroupRequest::Update { .. }) => "update_raid_group",
            Self::Lun(LunRequest::Create(_)) => "create_lun",
            Self::Lun(LunRequest::Destroy { .. }) => "destroy_lun",
            Self::Lun(LunRequest::Update { .. }) => "update_lun",
        }
    }

    /// Structural checks that need no object graph.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::RaidGroup(RaidGroupRequest::Create(spec)) => validate_raid_group(spec),
            Self::Lun(LunRequest::Create(spec)) => validate_lun(spec),
            Self::RaidGroup(RaidGroupRequest::Update { changes, .. }) => {
                validate_changes(ObjectKind::RaidGroup, changes)
            }
            Self::Lun(LunRequest::Update { changes, .. }) => {
                validate_changes(ObjectKind::Lun, changes)
            }
            Self::RaidGroup(RaidGroupRequest::Destroy { .. })
            | Self::Lun(LunRequest::Destroy { .. }) => Ok(()),
        }
    }
}

fn validate_raid_group(spec: &RaidGroupSpec) -> Result<()> {
    spec.raid_type
        .check_width(spec.width)
        .map_err(|cause| StrataError::invalid("width", cause))?;
    if spec.drives.len() != spec.width as usize {
        return Err(StrataError::invalid(
            "drives",
            format!("{} drives listed for width {}", spec.drives.len(), spec.width),
        ));
    }
    let mut seen = HashSet::with_capacity(spec.drives.len());
    if let Some(dup) = spec.drives.iter().find(|d| !seen.insert(**d)) {
        return Err(StrataError::invalid("drives", format!("drive {dup} listed twice")));
    }
    if spec.capacity_blocks == 0 {
        return Err(StrataError::invalid("capacity_blocks", "must be non-zero"));
    }
    Ok(())
}

fn validate_lun(spec: &LunSpec) -> Result<()> {
    if spec.capacity_blocks == 0 {
        return Err(StrataError::invalid("capacity_blocks", "must be non-zero"));
    }
    if spec.offset_blocks.checked_add(spec.capacity_blocks).is_none() {
        return Err(StrataError::invalid(
            "offset_blocks",
            "offset plus capacity overflows",
        ));
    }
    Ok(())
}

fn validate_changes(kind: ObjectKind, changes: &[FieldChange]) -> Result<()> {
    if changes.is_empty() {
        return Err(StrataError::invalid("changes", "update carries no changes"));
    }
    for change in changes {
        match (kind, change) {
            (_, FieldChange::Capacity(0)) => {
                return Err(StrataError::invalid("capacity_blocks", "must be non-zero"));
            }
            (_, FieldChange::Number(_) | FieldChange::Capacity(_))
            | (ObjectKind::Lun, FieldChange::Offset(_)) => {}
            _ => {
                return Err(StrataError::invalid(
                    change.field(),
                    format!("not a field of {kind}"),
                ));
            }
        }
    }
    Ok(())
}

/// Lifecycle of a job. `Queued` is initial, the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for the worker.
    Queued,
    /// Its transaction is open or committing.
    Running,
    /// The change is durable.
    Committed,
    /// Nothing happened: withdrawn, or lost with a controller before commit.
    RolledBack,
    /// Rejected by the transaction manager or the journal.
    Failed,
}

impl JobState {
    /// Whether the job has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job failed, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Malformed request or missing resource.
    Validation,
    /// An object the request names does not exist.
    NotFound,
    /// The object still has clients.
    HasUpstreamEdges,
    /// A dependency stayed unready through every retry.
    DependencyNotReady,
    /// The journal could not make the change durable; nothing changed.
    PersistenceFailed,
    /// A capacity limit was hit.
    ResourceExhausted,
    /// Anything else.
    Internal,
}

impl From<&StrataError> for JobErrorKind {
    fn from(err: &StrataError) -> Self {
        match err {
            StrataError::InvalidRequest { .. }
            | StrataError::DriveNotFound { .. }
            | StrataError::DuplicateNumber { .. }
            | StrataError::InvalidEdge { .. } => Self::Validation,
            StrataError::UnknownNumber { .. } | StrataError::ObjectNotFound { .. } => {
                Self::NotFound
            }
            StrataError::HasUpstreamEdges { .. } => Self::HasUpstreamEdges,
            StrataError::DependencyNotReady { .. } => Self::DependencyNotReady,
            StrataError::PersistenceFailed { .. }
            | StrataError::JournalIo { .. }
            | StrataError::JournalCorruption { .. } => Self::PersistenceFailed,
            StrataError::ObjectTableFull { .. }
            | StrataError::TooManyMutations { .. }
            | StrataError::PayloadTooLarge { .. } => Self::ResourceExhausted,
            _ => Self::Internal,
        }
    }
}

/// Error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Caller-facing classification.
    pub kind: JobErrorKind,
    /// Stable code of the underlying error, e.g. `E205`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&StrataError> for JobError {
    fn from(err: &StrataError) -> Self {
        Self {
            kind: JobErrorKind::from(err),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
