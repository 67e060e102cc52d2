//! Two-area write-ahead persistence for configuration changes.
//!
//! One region (the database device, shared by both controllers) holds a
//! journal area and a live area. A transaction is committed when its payload
//! is in the journal and the journal header says `Valid`; the live area is
//! then brought up to date and the header invalidated.
//!
//! # Commit Order
//!
//! 1. `begin_persist`: write payload, sync, write header `Valid`, sync
//! 2. `apply_to_live`: write every after-image into its slot, sync
//! 3. `invalidate_header`: write header `Invalid`, sync
//!
//! A crash before the header turns valid loses the transaction; a crash after
//! it is repaired by `recover`, which re-runs steps 2 and 3.
//!
//! # Journal Payload Format
//!
//! ```text
//! ┌─────────┬────────┬───────┬──────────┬───────┬───────┬─────────────────────┐
//! │ Length  │ CRC32  │ TxnId │ Sequence │ Job   │ Count │ Records             │
//! │ (4 B)   │ (4 B)  │ (8 B) │ (8 B)    │ (8 B) │ (4 B) │ op, target, images  │
//! └─────────┴────────┴───────┴──────────┴───────┴───────┴─────────────────────┘
//! ```
//!
//! Images are length-prefixed JSON; a zero length means "no entry".
//!
//! # Live Entry Format
//!
//! ```text
//! ┌─────────┬────────┬──────┬────────────┐
//! │ Length  │ CRC32  │ Used │ JSON image │
//! │ (4 B)   │ (4 B)  │ (1 B)│ (var)      │
//! └─────────┴────────┴──────┴────────────┘
//! ```

mod config;
mod header;
mod live;
mod payload;
mod region;
mod store;

pub use config::{
    JOURNAL_HEADER_SIZE, JournalConfig, LIVE_HEADER_SIZE, MIN_SLOT_SIZE, RegionLayout,
};
pub use header::{HeaderState, JournalHeader, LiveHeader};
pub use live::LiveArea;
pub use payload::JournalPayload;
pub use region::{FileRegion, MemoryRegion, Region};
pub use store::{JournalStore, RecoveryOutcome};
