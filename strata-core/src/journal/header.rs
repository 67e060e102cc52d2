//! Journal and live-area headers.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

/// Magic of the journal header sector ("STRJ").
pub const JOURNAL_MAGIC: u32 = 0x5354_524A;

/// Magic of the live header sector ("STRL").
pub const LIVE_MAGIC: u32 = 0x5354_524C;

/// On-media format version.
pub const FORMAT_VERSION: u16 = 1;

/// Encoded journal header size, without sector padding.
pub const JOURNAL_HEADER_LEN: usize = 4 + 2 + 1 + 8 + 8 + 4 + 4 + 4; // 35 bytes

/// Encoded live header size, without sector padding.
pub const LIVE_HEADER_LEN: usize = 4 + 2 + 4 + 4 + 4; // 18 bytes

/// Whether the journal payload is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderState {
    /// Nothing to replay.
    Invalid = 0,
    /// A complete payload is committed and must be replayed after a crash.
    Valid = 1,
}

/// Journal header sector contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    /// Commit state.
    pub state: HeaderState,
    /// Sequence number of the last persisted payload.
    pub sequence: u64,
    /// When the header was written (Unix epoch nanoseconds).
    pub timestamp_ns: u64,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC32 of the payload bytes.
    pub payload_crc: u32,
}

impl JournalHeader {
    /// An empty, invalid header.
    pub fn invalid(sequence: u64) -> Self {
        Self {
            state: HeaderState::Invalid,
            sequence,
            timestamp_ns: current_timestamp_ns(),
            payload_len: 0,
            payload_crc: 0,
        }
    }

    /// A header committing a payload.
    pub fn valid(sequence: u64, payload: &[u8]) -> Self {
        Self {
            state: HeaderState::Valid,
            sequence,
            timestamp_ns: current_timestamp_ns(),
            payload_len: payload.len() as u32,
            payload_crc: crc32fast::hash(payload),
        }
    }

    /// Whether the header commits a payload.
    pub fn is_valid(&self) -> bool {
        self.state == HeaderState::Valid
    }

    /// Serialize the header, CRC last.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(JOURNAL_HEADER_LEN);
        bytes.write_u32::<LittleEndian>(JOURNAL_MAGIC)?;
        bytes.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        bytes.write_u8(self.state as u8)?;
        bytes.write_u64::<LittleEndian>(self.sequence)?;
        bytes.write_u64::<LittleEndian>(self.timestamp_ns)?;
        bytes.write_u32::<LittleEndian>(self.payload_len)?;
        bytes.write_u32::<LittleEndian>(self.payload_crc)?;
        let crc = crc32fast::hash(&bytes);
        bytes.write_u32::<LittleEndian>(crc)?;
        Ok(bytes)
    }

    /// Decode a header sector.
    ///
    /// Returns `None` when the magic, version or CRC does not verify, which
    /// covers never-written sectors and torn header writes alike.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < JOURNAL_HEADER_LEN {
            return None;
        }
        let body = &bytes[..JOURNAL_HEADER_LEN - 4];
        let mut cursor = Cursor::new(bytes);

        if cursor.read_u32::<LittleEndian>().ok()? != JOURNAL_MAGIC {
            return None;
        }
        if cursor.read_u16::<LittleEndian>().ok()? != FORMAT_VERSION {
            return None;
        }
        let state = match cursor.read_u8().ok()? {
            0 => HeaderState::Invalid,
            1 => HeaderState::Valid,
            _ => return None,
        };
        let sequence = cursor.read_u64::<LittleEndian>().ok()?;
        let timestamp_ns = cursor.read_u64::<LittleEndian>().ok()?;
        let payload_len = cursor.read_u32::<LittleEndian>().ok()?;
        let payload_crc = cursor.read_u32::<LittleEndian>().ok()?;
        let stored_crc = cursor.read_u32::<LittleEndian>().ok()?;

        if crc32fast::hash(body) != stored_crc {
            return None;
        }

        Some(Self {
            state,
            sequence,
            timestamp_ns,
            payload_len,
            payload_crc,
        })
    }
}

/// Live header sector contents: the slot geometry the area was formatted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveHeader {
    /// Bytes per slot.
    pub slot_size: u32,
    /// Number of slots.
    pub slot_count: u32,
}

impl LiveHeader {
    /// Serialize the header, CRC last.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(LIVE_HEADER_LEN);
        bytes.write_u32::<LittleEndian>(LIVE_MAGIC)?;
        bytes.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        bytes.write_u32::<LittleEndian>(self.slot_size)?;
        bytes.write_u32::<LittleEndian>(self.slot_count)?;
        let crc = crc32fast::hash(&bytes);
        bytes.write_u32::<LittleEndian>(crc)?;
        Ok(bytes)
    }

    /// Decode a live header sector, `None` if it does not verify.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LIVE_HEADER_LEN {
            return None;
        }
        let body = &bytes[..LIVE_HEADER_LEN - 4];
        let mut cursor = Cursor::new(bytes);

        if cursor.read_u32::<LittleEndian>().ok()? != LIVE_MAGIC {
            return None;
        }
        if cursor.read_u16::<LittleEndian>().ok()? != FORMAT_VERSION {
            return None;
        }
        let slot_size = cursor.read_u32::<LittleEndian>().ok()?;
        let slot_count = cursor.read_u32::<LittleEndian>().ok()?;
        let stored_crc = cursor.read_u32::<LittleEndian>().ok()?;

        if crc32fast::hash(body) != stored_crc {
            return None;
        }
        Some(Self {
            slot_size,
            slot_count,
        })
    }
}

/// Get current timestamp in nanoseconds since Unix epoch.
pub(crate) fn current_timestamp_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_header_decodes() {
        let header = JournalHeader::valid(42, b"payload bytes");
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), JOURNAL_HEADER_LEN);

        let decoded = JournalHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_valid());
        assert_eq!(decoded.payload_crc, crc32fast::hash(b"payload bytes"));
    }

    #[test]
    fn torn_header_reads_as_absent() {
        let mut bytes = JournalHeader::valid(7, b"x").to_bytes().unwrap();
        // Flip the state byte without updating the CRC
        bytes[6] = HeaderState::Invalid as u8;
        assert!(JournalHeader::from_bytes(&bytes).is_none());

        assert!(JournalHeader::from_bytes(&[0u8; 512]).is_none());
        assert!(JournalHeader::from_bytes(&bytes[..10]).is_none());
    }

    #[test]
    fn live_header_geometry() {
        let header = LiveHeader {
            slot_size: 2048,
            slot_count: 1024,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(LiveHeader::from_bytes(&bytes), Some(header));

        let mut corrupt = bytes.clone();
        corrupt[8] ^= 0xFF;
        assert!(LiveHeader::from_bytes(&corrupt).is_none());
    }
}
