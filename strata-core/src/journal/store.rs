//! Journal store: the write-ahead commit protocol over one region.

use super::config::{JournalConfig, LIVE_HEADER_SIZE, RegionLayout};
use super::header::{JOURNAL_HEADER_LEN, JournalHeader, LIVE_HEADER_LEN, LiveHeader};
use super::live::LiveArea;
use super::payload::JournalPayload;
use super::region::Region;
use crate::error::{Result, StrataError};
use crate::hooks::{HookAction, HookPoint, HookRegistry};
use crate::transaction::MutationRecord;
use crate::types::{JobNumber, ObjectId, ObjectImage, TransactionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of [`JournalStore::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The header was not valid; nothing was replayed.
    Clean,
    /// A committed payload was re-applied to the live region.
    Replayed {
        /// The replayed transaction.
        transaction_id: TransactionId,
        /// The job that owned it.
        job: Option<JobNumber>,
        /// Journal sequence of the payload.
        sequence: u64,
        /// Number of mutation records applied.
        records_applied: usize,
    },
}

impl RecoveryOutcome {
    /// Job whose transaction was rolled forward, if any.
    pub fn replayed_job(&self) -> Option<JobNumber> {
        match self {
            Self::Clean => None,
            Self::Replayed { job, .. } => *job,
        }
    }
}

/// Two-area persistence engine.
///
/// A commit runs [`begin_persist`](Self::begin_persist),
/// [`apply_to_live`](Self::apply_to_live) and
/// [`invalidate_header`](Self::invalidate_header) in that order. The journal
/// header is the single source of truth: while it is valid, the payload it
/// covers is committed and [`recover`](Self::recover) re-applies it.
pub struct JournalStore {
    region: Arc<dyn Region>,
    layout: RegionLayout,
    live: LiveArea,
    hooks: Arc<HookRegistry>,
    sequence: AtomicU64,
}

impl JournalStore {
    /// Open a formatted region.
    pub fn open(
        region: Arc<dyn Region>,
        config: &JournalConfig,
        hooks: Arc<HookRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();
        if region.len() < layout.total_len() {
            return Err(StrataError::Config {
                field: "journal".into(),
                cause: format!(
                    "region holds {} bytes, layout needs {}",
                    region.len(),
                    layout.total_len()
                ),
            });
        }

        let mut live_sector = [0u8; LIVE_HEADER_LEN];
        region.read_at(layout.live_header, &mut live_sector)?;
        let live_header = LiveHeader::from_bytes(&live_sector).ok_or_else(|| {
            StrataError::Unformatted {
                cause: "live header does not verify".into(),
            }
        })?;
        if live_header.slot_size as usize != layout.slot_size
            || live_header.slot_count != layout.slot_count
        {
            return Err(StrataError::Config {
                field: "slots".into(),
                cause: format!(
                    "region formatted with {} slots of {} bytes",
                    live_header.slot_count, live_header.slot_size
                ),
            });
        }

        let store = Self {
            live: LiveArea::new(layout),
            region,
            layout,
            hooks,
            sequence: AtomicU64::new(0),
        };
        if let Some(header) = store.header()? {
            store.sequence.store(header.sequence, Ordering::SeqCst);
        }

        tracing::debug!(
            node = %store.hooks.node(),
            slots = layout.slot_count,
            sequence = store.sequence.load(Ordering::SeqCst),
            "Journal store opened"
        );
        Ok(store)
    }

    /// Open a region, formatting it first if it was never formatted.
    pub fn open_or_format(
        region: Arc<dyn Region>,
        config: &JournalConfig,
        hooks: Arc<HookRegistry>,
    ) -> Result<Self> {
        match Self::open(Arc::clone(&region), config, Arc::clone(&hooks)) {
            Err(StrataError::Unformatted { .. }) => {
                Self::format(region.as_ref(), config)?;
                Self::open(region, config, hooks)
            }
            other => other,
        }
    }

    /// Initialize both headers and clear every slot.
    pub fn format(region: &dyn Region, config: &JournalConfig) -> Result<()> {
        config.validate()?;
        let layout = config.layout();
        let live = LiveArea::new(layout);

        for raw in 1..layout.slot_count {
            live.clear(region, ObjectId::new(raw))?;
        }
        let live_header = LiveHeader {
            slot_size: layout.slot_size as u32,
            slot_count: layout.slot_count,
        };
        let mut sector = vec![0u8; LIVE_HEADER_SIZE as usize];
        let encoded = live_header
            .to_bytes()
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        sector[..encoded.len()].copy_from_slice(&encoded);
        region.write_at(layout.live_header, &sector)?;

        write_journal_header(region, &JournalHeader::invalid(0))?;
        region.sync()?;

        tracing::info!(slots = layout.slot_count, "Formatted region");
        Ok(())
    }

    /// The region this store writes to.
    pub fn region(&self) -> &Arc<dyn Region> {
        &self.region
    }

    /// Hooks consulted at each pipeline step.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Number of live-region slots, ids `1..slot_count` are allocatable.
    pub fn slot_count(&self) -> u32 {
        self.layout.slot_count
    }

    /// Reserve the sequence number for the next payload.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Catch the sequence counter up with the header, which another
    /// controller sharing the region may have advanced.
    pub fn resync_sequence(&self) -> Result<u64> {
        if let Some(header) = self.header()? {
            self.sequence.fetch_max(header.sequence, Ordering::SeqCst);
        }
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    /// Read the journal header. `None` means it does not verify.
    pub fn header(&self) -> Result<Option<JournalHeader>> {
        let mut sector = [0u8; JOURNAL_HEADER_LEN];
        self.region.read_at(0, &mut sector)?;
        Ok(JournalHeader::from_bytes(&sector))
    }

    /// Step 1: write the payload, then mark the header valid.
    ///
    /// Once this returns `Ok` the transaction is committed.
    pub fn begin_persist(&self, payload: &JournalPayload) -> Result<()> {
        self.hooks.ensure_alive()?;
        self.hooks.reached(HookPoint::ReturnFailedTransaction)?;

        for record in &payload.records {
            if let Some(after) = &record.after {
                self.live.check_fits(after)?;
            }
        }
        let bytes = payload.to_bytes()?;
        if bytes.len() > self.layout.journal_capacity {
            return Err(StrataError::PayloadTooLarge {
                size: bytes.len(),
                capacity: self.layout.journal_capacity,
            });
        }

        let offset = self.layout.payload_offset();
        if self.hooks.armed(HookPoint::JournalRegionWrite) == Some(HookAction::Crash) {
            self.region.write_at(offset, &bytes[..bytes.len() / 2])?;
        }
        self.hooks.reached(HookPoint::JournalRegionWrite)?;
        self.region.write_at(offset, &bytes)?;
        self.region.sync()?;

        self.hooks.reached(HookPoint::BeforeMarkJournalValid)?;
        write_journal_header(
            self.region.as_ref(),
            &JournalHeader::valid(payload.sequence, &bytes),
        )?;
        self.region.sync()?;
        self.sequence.fetch_max(payload.sequence, Ordering::SeqCst);

        tracing::debug!(
            transaction_id = %payload.transaction_id,
            sequence = payload.sequence,
            bytes = bytes.len(),
            "Journal header marked valid"
        );
        Ok(())
    }

    /// Step 2: write every after-image to the live region.
    ///
    /// Writes are absolute, so applying the same payload twice is harmless.
    /// An error here leaves the header valid and the payload committed.
    pub fn apply_to_live(&self, payload: &JournalPayload) -> Result<usize> {
        self.hooks.ensure_alive()?;
        self.hooks.reached(HookPoint::AfterJournalValid)?;
        self.write_live(payload)
    }

    fn write_live(&self, payload: &JournalPayload) -> Result<usize> {
        self.hooks.ensure_alive()?;

        if self.hooks.armed(HookPoint::LiveRegionWrite) == Some(HookAction::Crash) {
            let torn = payload.records.len().div_ceil(2);
            for record in &payload.records[..torn] {
                self.apply_record(record)?;
            }
        }
        self.hooks.reached(HookPoint::LiveRegionWrite)?;

        for record in &payload.records {
            self.apply_record(record)?;
        }
        self.region.sync()?;
        Ok(payload.records.len())
    }

    fn apply_record(&self, record: &MutationRecord) -> Result<()> {
        match &record.after {
            Some(image) => self.live.write(self.region.as_ref(), image),
            None => self.live.clear(self.region.as_ref(), record.target),
        }
    }

    /// Step 3: mark the header invalid.
    pub fn invalidate_header(&self) -> Result<()> {
        self.hooks.ensure_alive()?;
        self.hooks.reached(HookPoint::BeforeInvalidateHeader)?;
        let sequence = self.sequence.load(Ordering::SeqCst);
        write_journal_header(self.region.as_ref(), &JournalHeader::invalid(sequence))?;
        self.region.sync()
    }

    /// The payload the header currently commits, if any.
    pub fn committed_payload(&self) -> Result<Option<JournalPayload>> {
        let Some(header) = self.header()?.filter(JournalHeader::is_valid) else {
            return Ok(None);
        };

        let len = header.payload_len as usize;
        if len > self.layout.journal_capacity {
            return Err(StrataError::JournalCorruption {
                region: "journal",
                cause: format!("header claims {len} payload bytes"),
            });
        }
        let mut bytes = vec![0u8; len];
        self.region.read_at(self.layout.payload_offset(), &mut bytes)?;
        if crc32fast::hash(&bytes) != header.payload_crc {
            return Err(StrataError::JournalCorruption {
                region: "journal",
                cause: "payload does not match header CRC".into(),
            });
        }

        let payload = JournalPayload::from_bytes(&bytes)?;
        self.sequence.fetch_max(header.sequence, Ordering::SeqCst);
        Ok(Some(payload))
    }

    /// Roll forward a committed payload, or report that there is none.
    ///
    /// Safe to run any number of times, including after a crash in the middle
    /// of a previous recovery.
    pub fn recover(&self) -> Result<RecoveryOutcome> {
        self.hooks.ensure_alive()?;
        let Some(payload) = self.committed_payload()? else {
            tracing::info!(node = %self.hooks.node(), "Journal clean, nothing to replay");
            return Ok(RecoveryOutcome::Clean);
        };

        let records_applied = self.write_live(&payload)?;
        self.invalidate_header()?;

        tracing::info!(
            node = %self.hooks.node(),
            transaction_id = %payload.transaction_id,
            job = ?payload.job,
            sequence = payload.sequence,
            records_applied,
            "Replayed committed transaction"
        );
        Ok(RecoveryOutcome::Replayed {
            transaction_id: payload.transaction_id,
            job: payload.job,
            sequence: payload.sequence,
            records_applied,
        })
    }

    /// Read every live entry.
    pub fn load_live(&self) -> Result<Vec<ObjectImage>> {
        self.live.read_all(self.region.as_ref())
    }
}

fn write_journal_header(region: &dyn Region, header: &JournalHeader) -> Result<()> {
    let bytes = header
        .to_bytes()
        .map_err(|e| StrataError::Serialization(e.to_string()))?;
    region.write_at(0, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryRegion;
    use crate::transaction::MutationOp;
    use crate::types::{ControllerId, DriveLocation, LifecycleState, ObjectConfig, StorageObject};

    fn config() -> JournalConfig {
        JournalConfig::in_memory()
            .with_journal_capacity(16 * 1024)
            .with_slots(32, 512)
    }

    fn store() -> (JournalStore, Arc<MemoryRegion>) {
        let config = config();
        let region = Arc::new(MemoryRegion::for_config(&config));
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        let store = JournalStore::open_or_format(region.clone(), &config, hooks).unwrap();
        (store, region)
    }

    fn extent(id: u32) -> ObjectImage {
        ObjectImage {
            object: StorageObject {
                id: ObjectId::new(id),
                number: None,
                config: ObjectConfig::VirtualExtent {
                    drive: DriveLocation::new(0, 0, id as u8),
                    capacity_blocks: 1 << 20,
                },
                state: LifecycleState::Ready,
            },
            consumes: vec![],
        }
    }

    fn create_payload(store: &JournalStore, ids: &[u32]) -> JournalPayload {
        JournalPayload {
            transaction_id: TransactionId::new(1),
            job: Some(JobNumber::new(5)),
            sequence: store.next_sequence(),
            records: ids
                .iter()
                .map(|id| MutationRecord {
                    op: MutationOp::Create,
                    target: ObjectId::new(*id),
                    before: None,
                    after: Some(extent(*id)),
                })
                .collect(),
        }
    }

    #[test]
    fn unformatted_region_rejected() {
        let config = config();
        let region = Arc::new(MemoryRegion::for_config(&config));
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        let err = JournalStore::open(region, &config, hooks).err().unwrap();
        assert_eq!(err.code(), "E304");
    }

    #[test]
    fn full_commit_leaves_header_invalid() {
        let (store, _) = store();
        let payload = create_payload(&store, &[1, 2]);

        store.begin_persist(&payload).unwrap();
        assert!(store.header().unwrap().unwrap().is_valid());

        store.apply_to_live(&payload).unwrap();
        store.invalidate_header().unwrap();

        assert!(!store.header().unwrap().unwrap().is_valid());
        assert_eq!(store.load_live().unwrap(), vec![extent(1), extent(2)]);
        assert_eq!(store.recover().unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn recover_rolls_forward_valid_header() {
        let (store, _) = store();
        let payload = create_payload(&store, &[4]);
        store.begin_persist(&payload).unwrap();

        let outcome = store.recover().unwrap();
        assert_eq!(
            outcome,
            RecoveryOutcome::Replayed {
                transaction_id: TransactionId::new(1),
                job: Some(JobNumber::new(5)),
                sequence: payload.sequence,
                records_applied: 1,
            }
        );
        assert_eq!(store.load_live().unwrap(), vec![extent(4)]);

        // Second recovery finds nothing
        assert_eq!(store.recover().unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn torn_journal_write_is_discarded() {
        let (store, region) = store();
        store
            .hooks()
            .add_hook(HookPoint::JournalRegionWrite, HookAction::Crash);

        let payload = create_payload(&store, &[1, 2, 3]);
        let err = store.begin_persist(&payload).unwrap_err();
        assert_eq!(err.code(), "E501");

        let config = config();
        let survivor = JournalStore::open(
            region,
            &config,
            Arc::new(HookRegistry::new(ControllerId::SpB)),
        )
        .unwrap();
        assert_eq!(survivor.recover().unwrap(), RecoveryOutcome::Clean);
        assert!(survivor.load_live().unwrap().is_empty());
    }

    #[test]
    fn torn_live_write_is_repaired() {
        let (store, region) = store();
        store
            .hooks()
            .add_hook(HookPoint::LiveRegionWrite, HookAction::Crash);

        let payload = create_payload(&store, &[1, 2, 3, 4]);
        store.begin_persist(&payload).unwrap();
        assert!(store.apply_to_live(&payload).is_err());

        let config = config();
        let survivor = JournalStore::open(
            region,
            &config,
            Arc::new(HookRegistry::new(ControllerId::SpB)),
        )
        .unwrap();
        // Half the entries made it before the crash
        assert_eq!(survivor.load_live().unwrap().len(), 2);

        assert!(matches!(
            survivor.recover().unwrap(),
            RecoveryOutcome::Replayed {
                records_applied: 4,
                ..
            }
        ));
        assert_eq!(survivor.load_live().unwrap().len(), 4);
    }

    #[test]
    fn destroy_clears_slot() {
        let (store, _) = store();
        let create = create_payload(&store, &[7]);
        store.begin_persist(&create).unwrap();
        store.apply_to_live(&create).unwrap();
        store.invalidate_header().unwrap();

        let destroy = JournalPayload {
            transaction_id: TransactionId::new(2),
            job: None,
            sequence: store.next_sequence(),
            records: vec![MutationRecord {
                op: MutationOp::Destroy,
                target: ObjectId::new(7),
                before: Some(extent(7)),
                after: None,
            }],
        };
        store.begin_persist(&destroy).unwrap();
        store.apply_to_live(&destroy).unwrap();
        store.invalidate_header().unwrap();

        assert!(store.load_live().unwrap().is_empty());
    }

    #[test]
    fn oversized_payload_rejected() {
        let config = JournalConfig::in_memory()
            .with_journal_capacity(512)
            .with_slots(64, 512);
        let region = Arc::new(MemoryRegion::for_config(&config));
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        let store = JournalStore::open_or_format(region, &config, hooks).unwrap();

        let payload = create_payload(&store, &(1..20).collect::<Vec<_>>());
        let err = store.begin_persist(&payload).unwrap_err();
        assert_eq!(err.code(), "E303");
        assert!(!store.header().unwrap().unwrap().is_valid());
    }

    #[test]
    fn corrupt_payload_under_valid_header() {
        let (store, region) = store();
        let payload = create_payload(&store, &[1]);
        store.begin_persist(&payload).unwrap();

        region.scribble(store.layout.payload_offset() + 20, &[0xAA, 0xBB]);
        let err = store.recover().unwrap_err();
        assert_eq!(err.code(), "E302");
    }

    #[test]
    fn sequence_survives_reopen() {
        let (store, region) = store();
        let payload = create_payload(&store, &[1]);
        store.begin_persist(&payload).unwrap();
        store.apply_to_live(&payload).unwrap();
        store.invalidate_header().unwrap();

        let reopened = JournalStore::open(
            region,
            &config(),
            Arc::new(HookRegistry::new(ControllerId::SpB)),
        )
        .unwrap();
        assert_eq!(reopened.next_sequence(), payload.sequence + 1);
    }

    #[test]
    fn peer_sharing_region_resyncs_sequence() {
        let (store, region) = store();
        let peer = JournalStore::open(
            region,
            &config(),
            Arc::new(HookRegistry::new(ControllerId::SpB)),
        )
        .unwrap();

        let payload = create_payload(&store, &[1]);
        store.begin_persist(&payload).unwrap();
        store.apply_to_live(&payload).unwrap();
        store.invalidate_header().unwrap();

        assert_eq!(peer.resync_sequence().unwrap(), payload.sequence);
        assert_eq!(peer.next_sequence(), payload.sequence + 1);
    }
}
