//! Storage objects and their configuration.

use super::ids::ObjectId;
use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest RAID group a controller builds.
pub const MAX_RAID_WIDTH: u16 = 16;

/// Kind of a logical storage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A RAID group built over virtual extents.
    RaidGroup,
    /// A LUN carved out of a RAID group.
    Lun,
    /// A drive-backed extent consumed by a RAID group.
    VirtualExtent,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaidGroup => write!(f, "raid_group"),
            Self::Lun => write!(f, "lun"),
            Self::VirtualExtent => write!(f, "virtual_extent"),
        }
    }
}

/// RAID protection scheme of a RAID group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidType {
    /// Striping without redundancy.
    Raid0,
    /// Two-way mirror.
    Raid1,
    /// Striping with a dedicated parity drive.
    Raid3,
    /// Striping with rotating parity.
    Raid5,
    /// Striping with double rotating parity.
    Raid6,
    /// Striped mirrors.
    Raid10,
}

impl RaidType {
    /// Check that `width` drives can form a group of this type.
    pub fn check_width(&self, width: u16) -> std::result::Result<(), String> {
        if width == 0 || width > MAX_RAID_WIDTH {
            return Err(format!("width must be between 1 and {MAX_RAID_WIDTH}"));
        }
        let ok = match self {
            Self::Raid0 => true,
            Self::Raid1 => width == 2,
            Self::Raid3 => width == 5 || width == 9,
            Self::Raid5 => width >= 3,
            Self::Raid6 => width >= 4 && width % 2 == 0,
            Self::Raid10 => width >= 2 && width % 2 == 0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{self} does not support width {width}"))
        }
    }

    /// Number of drives whose capacity holds user data.
    #[must_use]
    pub fn data_drives(&self, width: u16) -> u16 {
        match self {
            Self::Raid0 => width,
            Self::Raid1 => 1,
            Self::Raid3 | Self::Raid5 => width.saturating_sub(1),
            Self::Raid6 => width.saturating_sub(2),
            Self::Raid10 => width / 2,
        }
    }
}

impl fmt::Display for RaidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Raid0 => "0",
            Self::Raid1 => "1",
            Self::Raid3 => "3",
            Self::Raid5 => "5",
            Self::Raid6 => "6",
            Self::Raid10 => "10",
        };
        write!(f, "raid{level}")
    }
}

/// Physical drive address: bus, enclosure, slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DriveLocation {
    /// Back-end bus.
    pub bus: u8,
    /// Enclosure on the bus.
    pub enclosure: u8,
    /// Slot in the enclosure.
    pub slot: u8,
}

impl DriveLocation {
    /// Create a drive location.
    #[must_use]
    pub const fn new(bus: u8, enclosure: u8, slot: u8) -> Self {
        Self {
            bus,
            enclosure,
            slot,
        }
    }
}

impl fmt::Display for DriveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.bus, self.enclosure, self.slot)
    }
}

/// Kind-specific configuration of a storage object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectConfig {
    /// RAID group configuration.
    RaidGroup {
        /// Protection scheme.
        raid_type: RaidType,
        /// Number of drives.
        width: u16,
        /// Exported capacity in blocks.
        capacity_blocks: u64,
        /// Member drives in position order.
        drives: Vec<DriveLocation>,
    },
    /// LUN configuration.
    Lun {
        /// Number of the RAID group the LUN is bound to.
        raid_group: u32,
        /// Capacity in blocks.
        capacity_blocks: u64,
        /// Start offset inside the RAID group.
        offset_blocks: u64,
    },
    /// Virtual extent configuration.
    VirtualExtent {
        /// Backing drive.
        drive: DriveLocation,
        /// Capacity in blocks.
        capacity_blocks: u64,
    },
}

impl ObjectConfig {
    /// Kind of object this configuration describes.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::RaidGroup { .. } => ObjectKind::RaidGroup,
            Self::Lun { .. } => ObjectKind::Lun,
            Self::VirtualExtent { .. } => ObjectKind::VirtualExtent,
        }
    }

    /// Capacity in blocks, whatever the kind.
    #[must_use]
    pub fn capacity_blocks(&self) -> u64 {
        match self {
            Self::RaidGroup {
                capacity_blocks, ..
            }
            | Self::Lun {
                capacity_blocks, ..
            }
            | Self::VirtualExtent {
                capacity_blocks, ..
            } => *capacity_blocks,
        }
    }
}

/// Lifecycle state of an object.
///
/// `Creating` and `Destroying` are tentative and only exist while the
/// transaction that introduced them is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created by the open transaction.
    Creating,
    /// Committed and usable.
    Ready,
    /// Destroyed by the open transaction.
    Destroying,
    /// Gone. Never stored, only reported.
    Destroyed,
}

impl LifecycleState {
    /// Whether lookups should see objects in this state.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        matches!(self, Self::Creating | Self::Ready)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Ready => write!(f, "ready"),
            Self::Destroying => write!(f, "destroying"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A logical storage object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Stable identifier, also the live-region slot.
    pub id: ObjectId,
    /// User-visible number (RAID group / LUN number), if any.
    pub number: Option<u32>,
    /// Kind-specific configuration.
    pub config: ObjectConfig,
    /// Lifecycle state.
    pub state: LifecycleState,
}

impl StorageObject {
    /// Kind of this object.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.config.kind()
    }

    /// Apply one field change in place.
    ///
    /// Fails without modifying the object if the field does not exist for
    /// this kind.
    pub fn apply(&mut self, change: &FieldChange) -> Result<()> {
        let kind = self.kind();
        match (change, &mut self.config) {
            (FieldChange::Number(n), ObjectConfig::RaidGroup { .. } | ObjectConfig::Lun { .. }) => {
                self.number = Some(*n);
            }
            (
                FieldChange::Capacity(blocks),
                ObjectConfig::RaidGroup {
                    capacity_blocks, ..
                }
                | ObjectConfig::Lun {
                    capacity_blocks, ..
                }
                | ObjectConfig::VirtualExtent {
                    capacity_blocks, ..
                },
            ) => {
                if *blocks == 0 {
                    return Err(StrataError::invalid("capacity_blocks", "must be non-zero"));
                }
                *capacity_blocks = *blocks;
            }
            (FieldChange::Offset(blocks), ObjectConfig::Lun { offset_blocks, .. }) => {
                *offset_blocks = *blocks;
            }
            (FieldChange::Drive(location), ObjectConfig::VirtualExtent { drive, .. }) => {
                *drive = *location;
            }
            (FieldChange::RaidGroup(n), ObjectConfig::Lun { raid_group, .. }) => {
                *raid_group = *n;
            }
            _ => {
                return Err(StrataError::invalid(
                    change.field(),
                    format!("not a field of {kind}"),
                ));
            }
        }
        Ok(())
    }
}

/// Declarative description of an object to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// User-visible number, if the kind has one.
    pub number: Option<u32>,
    /// Configuration; determines the kind.
    pub config: ObjectConfig,
}

impl ObjectSpec {
    /// Spec for a numbered object.
    #[must_use]
    pub fn numbered(number: u32, config: ObjectConfig) -> Self {
        Self {
            number: Some(number),
            config,
        }
    }

    /// Spec for an object without a user-visible number.
    #[must_use]
    pub fn anonymous(config: ObjectConfig) -> Self {
        Self {
            number: None,
            config,
        }
    }
}

/// A single field update applied by `update_object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChange {
    /// Renumber a RAID group or LUN.
    Number(u32),
    /// Change capacity in blocks.
    Capacity(u64),
    /// Move a LUN inside its RAID group.
    Offset(u64),
    /// Swap the drive backing a virtual extent.
    Drive(DriveLocation),
    /// Record the number of the RAID group a LUN is carved from.
    RaidGroup(u32),
}

impl FieldChange {
    /// Field name, for error reporting.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Capacity(_) => "capacity_blocks",
            Self::Offset(_) => "offset_blocks",
            Self::Drive(_) => "drive",
            Self::RaidGroup(_) => "raid_group",
        }
    }
}

/// Absolute image of one live-region entry: the object and its downstream edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectImage {
    /// The object.
    pub object: StorageObject,
    /// Objects this one consumes.
    pub consumes: Vec<ObjectId>,
}

impl ObjectImage {
    /// Id of the imaged object.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.object.id
    }
}
