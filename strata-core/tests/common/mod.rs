//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use strata_core::hooks::HookRegistry;
use strata_core::journal::{FileRegion, JournalConfig, JournalStore};
use strata_core::transaction::{TransactionConfig, TransactionKind, TransactionManager};
use strata_core::types::{ControllerId, DriveLocation, ObjectConfig, ObjectId, ObjectSpec, RaidType};
use strata_core::Result;

/// Small geometry so tests stay fast.
pub fn test_journal_config(dir: &Path) -> JournalConfig {
    JournalConfig::default()
        .with_directory(dir)
        .with_sync(true)
        .with_journal_capacity(64 * 1024)
        .with_slots(64, 1024)
}

/// Open the device file in `dir` as controller `node`, formatting it if needed.
pub fn open_manager(dir: &Path, node: ControllerId) -> TransactionManager {
    let config = test_journal_config(dir);
    let region = Arc::new(FileRegion::open(&config).unwrap());
    let hooks = Arc::new(HookRegistry::new(node));
    let journal = JournalStore::open_or_format(region, &config, hooks).unwrap();
    TransactionManager::load(Arc::new(journal), TransactionConfig::default()).unwrap()
}

/// Create a RAID 5 group over `width` fresh extents in one transaction.
pub fn create_group(tm: &TransactionManager, number: u32, width: u8) -> Result<ObjectId> {
    let drives: Vec<_> = (0..width).map(|slot| DriveLocation::new(0, 0, slot)).collect();
    let txn = tm.start_transaction(TransactionKind::Create)?;

    let mut extents = Vec::new();
    for drive in &drives {
        extents.push(tm.create_object(
            txn,
            ObjectSpec::anonymous(ObjectConfig::VirtualExtent {
                drive: *drive,
                capacity_blocks: 10_000,
            }),
        )?);
    }
    let rg = tm.create_object(
        txn,
        ObjectSpec::numbered(
            number,
            ObjectConfig::RaidGroup {
                raid_type: RaidType::Raid5,
                width: width as u16,
                capacity_blocks: 10_000 * (width as u64 - 1),
                drives,
            },
        ),
    )?;
    for extent in extents {
        tm.link(txn, rg, extent)?;
    }
    tm.commit(txn)?;
    Ok(rg)
}
