//! Journal store configuration and on-device layout.

use crate::error::{Result, StrataError};
use std::path::PathBuf;

/// Size of the journal header sector.
pub const JOURNAL_HEADER_SIZE: u64 = 512;

/// Size of the live-region header sector.
pub const LIVE_HEADER_SIZE: u64 = 4096;

/// Smallest slot that can hold an entry frame plus a minimal image.
pub const MIN_SLOT_SIZE: usize = 256;

/// Configuration of the journal store and its backing region.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the database device file.
    pub directory: PathBuf,
    /// Database device file name.
    pub file_name: String,
    /// Bytes reserved for the journal payload area.
    pub journal_capacity: usize,
    /// Bytes per live-region entry slot.
    pub slot_size: usize,
    /// Number of live-region slots, which bounds the object id space.
    pub slot_count: u32,
    /// Whether every region write is followed by a sync.
    pub sync_on_write: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/tmp/strata/db"),
            file_name: "strata.db".to_string(),
            journal_capacity: 1024 * 1024, // 1 MB
            slot_size: 2048,
            slot_count: 1024,
            sync_on_write: true,
        }
    }
}

impl JournalConfig {
    /// Configuration backed by a fresh temp directory, without syncing.
    pub fn in_memory() -> Self {
        Self {
            directory: std::env::temp_dir().join(format!("strata_db_{}", uuid::Uuid::new_v4())),
            sync_on_write: false,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STRATA_DATA_DIR`: directory of the database device file
    /// - `STRATA_JOURNAL_SYNC`: `true`/`false`, sync after every write
    /// - `STRATA_JOURNAL_CAPACITY`: journal payload area in bytes
    /// - `STRATA_LIVE_SLOTS`: number of live-region slots
    ///
    /// Unparsable values are logged and replaced by defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let directory = std::env::var("STRATA_DATA_DIR")
            .map(|dir| PathBuf::from(dir).join("db"))
            .unwrap_or(defaults.directory);

        Self {
            directory,
            file_name: defaults.file_name,
            journal_capacity: env_parse("STRATA_JOURNAL_CAPACITY", defaults.journal_capacity),
            slot_size: defaults.slot_size,
            slot_count: env_parse("STRATA_LIVE_SLOTS", defaults.slot_count),
            sync_on_write: env_parse("STRATA_JOURNAL_SYNC", defaults.sync_on_write),
        }
    }

    /// Same as `from_env()`, kept for symmetry with the other configs.
    pub fn from_env_or_default() -> Self {
        Self::from_env()
    }

    /// Set the directory.
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// Set sync on write.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Set the journal payload capacity in bytes.
    pub fn with_journal_capacity(mut self, bytes: usize) -> Self {
        self.journal_capacity = bytes;
        self
    }

    /// Set the live-region slot geometry.
    pub fn with_slots(mut self, slot_count: u32, slot_size: usize) -> Self {
        self.slot_count = slot_count;
        self.slot_size = slot_size;
        self
    }

    /// Full path of the device file.
    pub fn device_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Check the geometry before any region is touched.
    pub fn validate(&self) -> Result<()> {
        if self.slot_size < MIN_SLOT_SIZE {
            return Err(StrataError::Config {
                field: "slot_size".into(),
                cause: format!("must be at least {MIN_SLOT_SIZE} bytes"),
            });
        }
        if self.slot_count < 2 {
            return Err(StrataError::Config {
                field: "slot_count".into(),
                cause: "must leave at least one allocatable id".into(),
            });
        }
        if self.journal_capacity < MIN_SLOT_SIZE {
            return Err(StrataError::Config {
                field: "journal_capacity".into(),
                cause: format!("must be at least {MIN_SLOT_SIZE} bytes"),
            });
        }
        Ok(())
    }

    /// Byte layout derived from this configuration.
    pub fn layout(&self) -> RegionLayout {
        let live_header = JOURNAL_HEADER_SIZE + self.journal_capacity as u64;
        RegionLayout {
            journal_capacity: self.journal_capacity,
            live_header,
            slots: live_header + LIVE_HEADER_SIZE,
            slot_size: self.slot_size,
            slot_count: self.slot_count,
        }
    }
}

/// Offsets of the journal and live areas inside one region.
///
/// ```text
/// 0                       journal header (512 B)
/// 512                     journal payload area (journal_capacity)
/// live_header             live header (4 KiB)
/// slots + i * slot_size   entry slot of object id i
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    /// Journal payload capacity.
    pub journal_capacity: usize,
    /// Offset of the live header.
    pub live_header: u64,
    /// Offset of slot 0.
    pub slots: u64,
    /// Bytes per slot.
    pub slot_size: usize,
    /// Number of slots.
    pub slot_count: u32,
}

impl RegionLayout {
    /// Offset of the journal payload area.
    pub const fn payload_offset(&self) -> u64 {
        JOURNAL_HEADER_SIZE
    }

    /// Offset of slot `index`.
    pub const fn slot_offset(&self, index: u32) -> u64 {
        self.slots + index as u64 * self.slot_size as u64
    }

    /// Total bytes the region must hold.
    pub const fn total_len(&self) -> u64 {
        self.slot_offset(self.slot_count)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Unparsable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
