//! Object mutations behind each job request.
//!
//! Each function runs inside a transaction the caller opened and commits.
//! Errors leave the transaction open for the caller to abort.

use super::request::{JobRequest, LunRequest, LunSpec, RaidGroupRequest, RaidGroupSpec};
use strata_core::error::{Result, StrataError};
use strata_core::topology::{DriveState, TopologyProvider};
use strata_core::transaction::TransactionManager;
use strata_core::types::{
    FieldChange, LifecycleState, ObjectConfig, ObjectId, ObjectKind, ObjectSpec, StorageObject,
    TransactionId,
};

/// Perform the mutations of `request` in transaction `handle`.
pub(crate) fn execute(
    manager: &TransactionManager,
    topology: &dyn TopologyProvider,
    handle: TransactionId,
    request: &JobRequest,
) -> Result<()> {
    match request {
        JobRequest::RaidGroup(RaidGroupRequest::Create(spec)) => {
            create_raid_group(manager, topology, handle, spec).map(|_| ())
        }
        JobRequest::RaidGroup(RaidGroupRequest::Destroy { number }) => {
            destroy_raid_group(manager, handle, *number)
        }
        JobRequest::RaidGroup(RaidGroupRequest::Update { number, changes }) => {
            update_raid_group(manager, handle, *number, changes)
        }
        JobRequest::Lun(LunRequest::Create(spec)) => {
            create_lun(manager, handle, spec).map(|_| ())
        }
        JobRequest::Lun(LunRequest::Destroy { number }) => {
            let lun = find(manager, ObjectKind::Lun, *number)?;
            manager.destroy_object(handle, lun.id)
        }
        JobRequest::Lun(LunRequest::Update { number, changes }) => {
            update_lun(manager, handle, *number, changes)
        }
    }
}

fn find(manager: &TransactionManager, kind: ObjectKind, number: u32) -> Result<StorageObject> {
    manager
        .lookup_by_number(kind, number)
        .ok_or(StrataError::UnknownNumber { kind, number })
}

fn check_renumber(
    manager: &TransactionManager,
    object: &StorageObject,
    changes: &[FieldChange],
) -> Result<()> {
    let kind = object.kind();
    for change in changes {
        if let FieldChange::Number(number) = change {
            let taken = manager
                .lookup_by_number(kind, *number)
                .is_some_and(|other| other.id != object.id);
            if taken {
                return Err(StrataError::DuplicateNumber {
                    kind,
                    number: *number,
                });
            }
        }
    }
    Ok(())
}

fn create_raid_group(
    manager: &TransactionManager,
    topology: &dyn TopologyProvider,
    handle: TransactionId,
    spec: &RaidGroupSpec,
) -> Result<ObjectId> {
    if manager
        .lookup_by_number(ObjectKind::RaidGroup, spec.number)
        .is_some()
    {
        return Err(StrataError::DuplicateNumber {
            kind: ObjectKind::RaidGroup,
            number: spec.number,
        });
    }

    let mut smallest = u64::MAX;
    for drive in &spec.drives {
        match topology.drive_state(drive) {
            DriveState::Missing => {
                return Err(StrataError::DriveNotFound {
                    drive: drive.to_string(),
                });
            }
            DriveState::NotReady => {
                return Err(StrataError::DependencyNotReady {
                    dependency: format!("drive {drive}"),
                    cause: "drive is not ready".into(),
                });
            }
            DriveState::Ready { capacity_blocks } => smallest = smallest.min(capacity_blocks),
        }
    }

    let bound: Vec<String> = manager
        .objects()
        .into_iter()
        .filter_map(|object| match object.config {
            ObjectConfig::VirtualExtent { drive, .. } if spec.drives.contains(&drive) => {
                Some(drive.to_string())
            }
            _ => None,
        })
        .collect();
    if !bound.is_empty() {
        return Err(StrataError::invalid(
            "drives",
            format!("already bound to a raid group: {}", bound.join(", ")),
        ));
    }

    let data_drives = u64::from(spec.raid_type.data_drives(spec.width)).max(1);
    let usable = smallest.saturating_mul(data_drives);
    if spec.capacity_blocks > usable {
        return Err(StrataError::invalid(
            "capacity_blocks",
            format!("{} blocks requested, drives hold {usable}", spec.capacity_blocks),
        ));
    }
    let per_extent = spec.capacity_blocks.div_ceil(data_drives);

    let mut extents = Vec::with_capacity(spec.drives.len());
    for drive in &spec.drives {
        let extent = manager.create_object(
            handle,
            ObjectSpec::anonymous(ObjectConfig::VirtualExtent {
                drive: *drive,
                capacity_blocks: per_extent,
            }),
        )?;
        extents.push(extent);
    }

    let group = manager.create_object(
        handle,
        ObjectSpec::numbered(
            spec.number,
            ObjectConfig::RaidGroup {
                raid_type: spec.raid_type,
                width: spec.width,
                capacity_blocks: spec.capacity_blocks,
                drives: spec.drives.clone(),
            },
        ),
    )?;
    for extent in extents {
        manager.link(handle, group, extent)?;
    }

    tracing::debug!(raid_group = spec.number, object_id = %group, "RAID group staged");
    Ok(group)
}

fn destroy_raid_group(manager: &TransactionManager, handle: TransactionId, number: u32) -> Result<()> {
    let group = find(manager, ObjectKind::RaidGroup, number)?;
    let extents = manager.consumes_of(group.id);
    manager.destroy_object(handle, group.id)?;
    for extent in extents {
        manager.destroy_object(handle, extent)?;
    }
    Ok(())
}

fn update_raid_group(
    manager: &TransactionManager,
    handle: TransactionId,
    number: u32,
    changes: &[FieldChange],
) -> Result<()> {
    let group = find(manager, ObjectKind::RaidGroup, number)?;
    check_renumber(manager, &group, changes)?;
    let capacity = changes.iter().rev().find_map(|change| match change {
        FieldChange::Capacity(blocks) => Some(*blocks),
        _ => None,
    });
    if let Some(capacity) = capacity {
        check_group_capacity(manager, &group, capacity)?;
    }

    manager.update_object(handle, group.id, changes)?;

    let renumbered = changes.iter().rev().find_map(|change| match change {
        FieldChange::Number(number) => Some(*number),
        _ => None,
    });
    if let Some(new_number) = renumbered {
        for client in lun_clients(manager, group.id) {
            manager.update_object(handle, client.id, &[FieldChange::RaidGroup(new_number)])?;
        }
        tracing::debug!(raid_group = number, new_number, "RAID group renumbered");
    }
    Ok(())
}

fn lun_clients(manager: &TransactionManager, group: ObjectId) -> Vec<StorageObject> {
    manager
        .clients_of(group)
        .into_iter()
        .filter_map(|client| manager.lookup(client))
        .filter(|client| client.kind() == ObjectKind::Lun)
        .collect()
}

/// `capacity` must fit the group's extents and still hold every bound LUN.
fn check_group_capacity(
    manager: &TransactionManager,
    group: &StorageObject,
    capacity: u64,
) -> Result<()> {
    let ObjectConfig::RaidGroup {
        raid_type, width, ..
    } = group.config
    else {
        return Err(StrataError::invalid("capacity_blocks", "not a raid group"));
    };
    let data_drives = u64::from(raid_type.data_drives(width)).max(1);
    let smallest = manager
        .consumes_of(group.id)
        .into_iter()
        .filter_map(|extent| manager.lookup(extent))
        .map(|extent| extent.config.capacity_blocks())
        .min()
        .unwrap_or(0);
    let usable = smallest.saturating_mul(data_drives);
    if capacity > usable {
        return Err(StrataError::invalid(
            "capacity_blocks",
            format!("{capacity} blocks requested, extents hold {usable}"),
        ));
    }

    let in_use = lun_clients(manager, group.id)
        .into_iter()
        .filter_map(|lun| match lun.config {
            ObjectConfig::Lun {
                capacity_blocks,
                offset_blocks,
                ..
            } => Some(offset_blocks.saturating_add(capacity_blocks)),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    if capacity < in_use {
        return Err(StrataError::invalid(
            "capacity_blocks",
            format!("{capacity} blocks requested, LUNs reach block {in_use}"),
        ));
    }
    Ok(())
}

/// Free `[offset, offset + capacity)` inside `group`, ignoring LUN `skip`.
fn check_lun_range(
    manager: &TransactionManager,
    group: &StorageObject,
    skip: Option<ObjectId>,
    offset: u64,
    capacity: u64,
) -> Result<()> {
    let end = offset
        .checked_add(capacity)
        .ok_or_else(|| StrataError::invalid("offset_blocks", "offset plus capacity overflows"))?;
    let group_capacity = group.config.capacity_blocks();
    if end > group_capacity {
        return Err(StrataError::invalid(
            "capacity_blocks",
            format!("LUN ends at block {end}, raid group holds {group_capacity}"),
        ));
    }

    for client in manager.clients_of(group.id) {
        if Some(client) == skip {
            continue;
        }
        let Some(other) = manager.lookup(client) else {
            continue;
        };
        if let ObjectConfig::Lun {
            capacity_blocks,
            offset_blocks,
            ..
        } = other.config
        {
            let other_end = offset_blocks.saturating_add(capacity_blocks);
            if offset < other_end && offset_blocks < end {
                return Err(StrataError::invalid(
                    "offset_blocks",
                    format!("overlaps LUN {}", other.number.unwrap_or_default()),
                ));
            }
        }
    }
    Ok(())
}

fn create_lun(manager: &TransactionManager, handle: TransactionId, spec: &LunSpec) -> Result<ObjectId> {
    let group = manager
        .lookup_by_number(ObjectKind::RaidGroup, spec.raid_group)
        .ok_or_else(|| StrataError::DependencyNotReady {
            dependency: format!("raid group {}", spec.raid_group),
            cause: "raid group does not exist".into(),
        })?;
    if group.state != LifecycleState::Ready {
        return Err(StrataError::DependencyNotReady {
            dependency: format!("raid group {}", spec.raid_group),
            cause: format!("raid group is {:?}", group.state),
        });
    }
    check_lun_range(manager, &group, None, spec.offset_blocks, spec.capacity_blocks)?;

    let lun = manager.create_object(
        handle,
        ObjectSpec::numbered(
            spec.number,
            ObjectConfig::Lun {
                raid_group: spec.raid_group,
                capacity_blocks: spec.capacity_blocks,
                offset_blocks: spec.offset_blocks,
            },
        ),
    )?;
    manager.link(handle, lun, group.id)?;
    Ok(lun)
}

fn update_lun(
    manager: &TransactionManager,
    handle: TransactionId,
    number: u32,
    changes: &[FieldChange],
) -> Result<()> {
    let lun = find(manager, ObjectKind::Lun, number)?;
    check_renumber(manager, &lun, changes)?;
    let ObjectConfig::Lun {
        raid_group,
        mut capacity_blocks,
        mut offset_blocks,
    } = lun.config
    else {
        return Err(StrataError::UnknownNumber {
            kind: ObjectKind::Lun,
            number,
        });
    };

    for change in changes {
        match change {
            FieldChange::Capacity(blocks) => capacity_blocks = *blocks,
            FieldChange::Offset(blocks) => offset_blocks = *blocks,
            _ => {}
        }
    }
    let group = manager
        .consumes_of(lun.id)
        .into_iter()
        .filter_map(|id| manager.lookup(id))
        .find(|object| object.kind() == ObjectKind::RaidGroup)
        .map_or_else(|| find(manager, ObjectKind::RaidGroup, raid_group), Ok)?;
    check_lun_range(manager, &group, Some(lun.id), offset_blocks, capacity_blocks)?;

    manager.update_object(handle, lun.id, changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::hooks::HookRegistry;
    use strata_core::journal::{JournalConfig, JournalStore, MemoryRegion};
    use strata_core::topology::StaticTopology;
    use strata_core::transaction::{TransactionConfig, TransactionKind};
    use strata_core::types::{ControllerId, DriveLocation, RaidType};

    fn manager() -> TransactionManager {
        let config = JournalConfig::in_memory().with_slots(64, 1024);
        let region = Arc::new(MemoryRegion::for_config(&config));
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        let journal = JournalStore::open_or_format(region, &config, hooks).unwrap();
        TransactionManager::load(Arc::new(journal), TransactionConfig::default()).unwrap()
    }

    fn raid5(number: u32, first_slot: u8) -> RaidGroupSpec {
        RaidGroupSpec {
            number,
            raid_type: RaidType::Raid5,
            width: 3,
            drives: (first_slot..first_slot + 3)
                .map(|slot| DriveLocation::new(0, 0, slot))
                .collect(),
            capacity_blocks: 2000,
        }
    }

    fn run(
        manager: &TransactionManager,
        topology: &dyn TopologyProvider,
        kind: TransactionKind,
        request: JobRequest,
    ) -> Result<()> {
        let handle = manager.start_transaction(kind)?;
        match execute(manager, topology, handle, &request) {
            Ok(()) => manager.commit(handle),
            Err(err) => {
                manager.abort(handle)?;
                Err(err)
            }
        }
    }

    fn create_group(manager: &TransactionManager, topology: &StaticTopology, number: u32) {
        run(
            manager,
            topology,
            TransactionKind::Create,
            JobRequest::RaidGroup(RaidGroupRequest::Create(raid5(number, 0))),
        )
        .unwrap();
    }

    #[test]
    fn raid_group_creates_extents() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);

        let group = manager.lookup_by_number(ObjectKind::RaidGroup, 5).unwrap();
        assert_eq!(group.state, LifecycleState::Ready);
        let extents = manager.consumes_of(group.id);
        assert_eq!(extents.len(), 3);
        for extent in extents {
            let object = manager.lookup(extent).unwrap();
            assert_eq!(object.kind(), ObjectKind::VirtualExtent);
            assert_eq!(object.config.capacity_blocks(), 1000);
        }
    }

    #[test]
    fn raid_group_topology_checks() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(2, 1000);
        let request = JobRequest::RaidGroup(RaidGroupRequest::Create(raid5(5, 0)));

        let err = run(&manager, &topology, TransactionKind::Create, request.clone()).unwrap_err();
        assert_eq!(err.code(), "E102");

        topology.set_drive(DriveLocation::new(0, 0, 2), DriveState::NotReady);
        let err = run(&manager, &topology, TransactionKind::Create, request).unwrap_err();
        assert!(err.is_transient());
        assert!(manager.objects().is_empty());
    }

    #[test]
    fn raid_group_capacity_bound() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 500);
        let err = run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::RaidGroup(RaidGroupRequest::Create(raid5(5, 0))),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    #[test]
    fn drives_cannot_be_shared() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);

        let err = run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::RaidGroup(RaidGroupRequest::Create(raid5(6, 0))),
        )
        .unwrap_err();
        assert!(err.to_string().contains("already bound"));
    }

    #[test]
    fn lun_binds_to_group() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);

        let lun = |number, offset_blocks| {
            JobRequest::Lun(LunRequest::Create(LunSpec {
                number,
                raid_group: 5,
                capacity_blocks: 1000,
                offset_blocks,
            }))
        };
        run(&manager, &topology, TransactionKind::Create, lun(1, 0)).unwrap();

        let overlapping = run(&manager, &topology, TransactionKind::Create, lun(2, 500));
        assert_eq!(overlapping.unwrap_err().code(), "E101");

        let past_end = run(&manager, &topology, TransactionKind::Create, lun(2, 1500));
        assert_eq!(past_end.unwrap_err().code(), "E101");

        run(&manager, &topology, TransactionKind::Create, lun(2, 1000)).unwrap();

        let group = manager.lookup_by_number(ObjectKind::RaidGroup, 5).unwrap();
        assert_eq!(manager.clients_of(group.id).len(), 2);
    }

    #[test]
    fn lun_without_group_is_transient() {
        let manager = manager();
        let topology = StaticTopology::new();
        let err = run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::Lun(LunRequest::Create(LunSpec {
                number: 1,
                raid_group: 9,
                capacity_blocks: 10,
                offset_blocks: 0,
            })),
        )
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn destroy_group_with_lun_fails() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);
        run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::Lun(LunRequest::Create(LunSpec {
                number: 1,
                raid_group: 5,
                capacity_blocks: 10,
                offset_blocks: 0,
            })),
        )
        .unwrap();
        let before = manager.objects();

        let err = run(
            &manager,
            &topology,
            TransactionKind::Destroy,
            JobRequest::RaidGroup(RaidGroupRequest::Destroy { number: 5 }),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E205");
        assert_eq!(manager.objects(), before);

        run(
            &manager,
            &topology,
            TransactionKind::Destroy,
            JobRequest::Lun(LunRequest::Destroy { number: 1 }),
        )
        .unwrap();
        run(
            &manager,
            &topology,
            TransactionKind::Destroy,
            JobRequest::RaidGroup(RaidGroupRequest::Destroy { number: 5 }),
        )
        .unwrap();
        assert!(manager.objects().is_empty());
    }

    #[test]
    fn update_lun_rechecks_range() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);
        run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::Lun(LunRequest::Create(LunSpec {
                number: 1,
                raid_group: 5,
                capacity_blocks: 100,
                offset_blocks: 0,
            })),
        )
        .unwrap();

        let grow = |blocks| {
            JobRequest::Lun(LunRequest::Update {
                number: 1,
                changes: vec![FieldChange::Capacity(blocks)],
            })
        };
        assert!(run(&manager, &topology, TransactionKind::Update, grow(5000)).is_err());
        run(&manager, &topology, TransactionKind::Update, grow(400)).unwrap();

        let lun = manager.lookup_by_number(ObjectKind::Lun, 1).unwrap();
        assert_eq!(lun.config.capacity_blocks(), 400);
    }

    fn create_lun_on(
        manager: &TransactionManager,
        topology: &StaticTopology,
        group: u32,
        capacity_blocks: u64,
    ) {
        run(
            manager,
            topology,
            TransactionKind::Create,
            JobRequest::Lun(LunRequest::Create(LunSpec {
                number: 1,
                raid_group: group,
                capacity_blocks,
                offset_blocks: 0,
            })),
        )
        .unwrap();
    }

    #[test]
    fn renumbered_group_carries_its_luns() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);
        create_lun_on(&manager, &topology, 5, 100);

        run(
            &manager,
            &topology,
            TransactionKind::Update,
            JobRequest::RaidGroup(RaidGroupRequest::Update {
                number: 5,
                changes: vec![FieldChange::Number(7)],
            }),
        )
        .unwrap();
        let lun = manager.lookup_by_number(ObjectKind::Lun, 1).unwrap();
        assert!(matches!(lun.config, ObjectConfig::Lun { raid_group: 7, .. }));

        run(
            &manager,
            &topology,
            TransactionKind::Update,
            JobRequest::Lun(LunRequest::Update {
                number: 1,
                changes: vec![FieldChange::Capacity(400)],
            }),
        )
        .unwrap();
        let lun = manager.lookup_by_number(ObjectKind::Lun, 1).unwrap();
        assert_eq!(lun.config.capacity_blocks(), 400);
    }

    #[test]
    fn raid_group_resize_is_bounded() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(3, 1000);
        create_group(&manager, &topology, 5);
        create_lun_on(&manager, &topology, 5, 1500);

        let resize = |blocks| {
            JobRequest::RaidGroup(RaidGroupRequest::Update {
                number: 5,
                changes: vec![FieldChange::Capacity(blocks)],
            })
        };
        let below_lun = run(&manager, &topology, TransactionKind::Update, resize(10));
        assert_eq!(below_lun.unwrap_err().code(), "E101");
        let past_extents = run(&manager, &topology, TransactionKind::Update, resize(5000));
        assert_eq!(past_extents.unwrap_err().code(), "E101");

        let group = manager.lookup_by_number(ObjectKind::RaidGroup, 5).unwrap();
        assert_eq!(group.config.capacity_blocks(), 2000);

        run(&manager, &topology, TransactionKind::Update, resize(1600)).unwrap();
        let group = manager.lookup_by_number(ObjectKind::RaidGroup, 5).unwrap();
        assert_eq!(group.config.capacity_blocks(), 1600);
    }

    #[test]
    fn renumber_conflict() {
        let manager = manager();
        let topology = StaticTopology::with_ready_drives(6, 1000);
        create_group(&manager, &topology, 5);
        run(
            &manager,
            &topology,
            TransactionKind::Create,
            JobRequest::RaidGroup(RaidGroupRequest::Create(raid5(6, 3))),
        )
        .unwrap();

        let err = run(
            &manager,
            &topology,
            TransactionKind::Update,
            JobRequest::RaidGroup(RaidGroupRequest::Update {
                number: 6,
                changes: vec![FieldChange::Number(5)],
            }),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E103");
    }

    #[test]
    fn unknown_numbers() {
        let manager = manager();
        let topology = StaticTopology::new();
        let err = run(
            &manager,
            &topology,
            TransactionKind::Destroy,
            JobRequest::Lun(LunRequest::Destroy { number: 3 }),
        )
        .unwrap_err();
        assert_eq!(err.code(), "E104");
    }
}
