//! Live area: one fixed-size entry slot per object id.

use super::config::RegionLayout;
use super::region::Region;
use crate::error::{Result, StrataError};
use crate::types::{ObjectId, ObjectImage};
use byteorder::{ByteOrder, LittleEndian};

/// Entry prefix: image length, image CRC, in-use flag.
pub const ENTRY_PREFIX_SIZE: usize = 4 + 4 + 1;

/// Accessor for the entry slots of a region.
#[derive(Debug, Clone, Copy)]
pub struct LiveArea {
    layout: RegionLayout,
}

impl LiveArea {
    /// Live area with the given layout.
    pub fn new(layout: RegionLayout) -> Self {
        Self { layout }
    }

    /// Largest image the slots can hold.
    pub fn max_image_len(&self) -> usize {
        self.layout.slot_size - ENTRY_PREFIX_SIZE
    }

    /// Reject images that cannot be written to their slot.
    pub fn check_fits(&self, image: &ObjectImage) -> Result<()> {
        self.check_slot(image.id())?;
        let len = serde_json::to_vec(image)?.len();
        if len > self.max_image_len() {
            return Err(StrataError::PayloadTooLarge {
                size: len,
                capacity: self.max_image_len(),
            });
        }
        Ok(())
    }

    fn check_slot(&self, id: ObjectId) -> Result<()> {
        if !id.is_valid() || id.as_u32() >= self.layout.slot_count {
            return Err(StrataError::ObjectNotFound { object_id: id });
        }
        Ok(())
    }

    /// Write `image` into its slot.
    pub fn write(&self, region: &dyn Region, image: &ObjectImage) -> Result<()> {
        let id = image.id();
        self.check_slot(id)?;
        let json = serde_json::to_vec(image)?;
        if json.len() > self.max_image_len() {
            return Err(StrataError::PayloadTooLarge {
                size: json.len(),
                capacity: self.max_image_len(),
            });
        }

        let mut entry = vec![0u8; ENTRY_PREFIX_SIZE + json.len()];
        LittleEndian::write_u32(&mut entry[0..4], json.len() as u32);
        LittleEndian::write_u32(&mut entry[4..8], crc32fast::hash(&json));
        entry[8] = 1;
        entry[ENTRY_PREFIX_SIZE..].copy_from_slice(&json);

        region.write_at(self.layout.slot_offset(id.as_u32()), &entry)
    }

    /// Mark the slot of `id` unused.
    pub fn clear(&self, region: &dyn Region, id: ObjectId) -> Result<()> {
        self.check_slot(id)?;
        region.write_at(
            self.layout.slot_offset(id.as_u32()),
            &[0u8; ENTRY_PREFIX_SIZE],
        )
    }

    /// Read the entry of `id`, `None` if the slot is unused.
    pub fn read(&self, region: &dyn Region, id: ObjectId) -> Result<Option<ObjectImage>> {
        self.check_slot(id)?;
        let offset = self.layout.slot_offset(id.as_u32());

        let mut prefix = [0u8; ENTRY_PREFIX_SIZE];
        region.read_at(offset, &mut prefix)?;
        if prefix[8] == 0 {
            return Ok(None);
        }

        let len = LittleEndian::read_u32(&prefix[0..4]) as usize;
        let stored_crc = LittleEndian::read_u32(&prefix[4..8]);
        if len > self.max_image_len() {
            return Err(corrupt(id, format!("entry length {len} exceeds slot")));
        }

        let mut json = vec![0u8; len];
        region.read_at(offset + ENTRY_PREFIX_SIZE as u64, &mut json)?;
        if crc32fast::hash(&json) != stored_crc {
            return Err(corrupt(id, "CRC mismatch"));
        }

        let image: ObjectImage =
            serde_json::from_slice(&json).map_err(|e| corrupt(id, e))?;
        if image.id() != id {
            return Err(corrupt(id, format!("slot holds {}", image.id())));
        }
        Ok(Some(image))
    }

    /// Read every used slot in id order.
    pub fn read_all(&self, region: &dyn Region) -> Result<Vec<ObjectImage>> {
        let mut images = Vec::new();
        for raw in 1..self.layout.slot_count {
            if let Some(image) = self.read(region, ObjectId::new(raw))? {
                images.push(image);
            }
        }
        Ok(images)
    }
}

fn corrupt(id: ObjectId, cause: impl ToString) -> StrataError {
    StrataError::JournalCorruption {
        region: "live",
        cause: format!("slot {}: {}", id.as_u32(), cause.to_string()),
    }
}
