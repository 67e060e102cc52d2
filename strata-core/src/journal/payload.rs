//! Journal payload: the serialized mutation log of one transaction.

use crate::error::{Result, StrataError};
use crate::transaction::{MutationOp, MutationRecord};
use crate::types::{JobNumber, ObjectId, ObjectImage, TransactionId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Frame prefix: total length and body CRC.
pub const PAYLOAD_PREFIX_SIZE: usize = 4 + 4;

/// Everything needed to roll a transaction forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalPayload {
    /// The transaction being persisted.
    pub transaction_id: TransactionId,
    /// The job that owns the transaction, if any.
    pub job: Option<JobNumber>,
    /// Journal sequence number assigned at persist time.
    pub sequence: u64,
    /// Mutation log in order.
    pub records: Vec<MutationRecord>,
}

impl JournalPayload {
    /// Serialize to a self-verifying frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = self.encode_body()?;
        let total_len = PAYLOAD_PREFIX_SIZE + body.len();

        let mut frame = Vec::with_capacity(total_len);
        write_frame(&mut frame, total_len, &body)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        Ok(frame)
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let io = |e: io::Error| StrataError::Serialization(e.to_string());

        body.write_u64::<LittleEndian>(self.transaction_id.as_u64())
            .map_err(io)?;
        body.write_u64::<LittleEndian>(self.sequence).map_err(io)?;
        body.write_u64::<LittleEndian>(self.job.map_or(0, |j| j.as_u64()))
            .map_err(io)?;
        body.write_u32::<LittleEndian>(self.records.len() as u32)
            .map_err(io)?;

        for record in &self.records {
            body.write_u8(record.op as u8).map_err(io)?;
            body.write_u32::<LittleEndian>(record.target.as_u32())
                .map_err(io)?;
            write_image(&mut body, record.before.as_ref())?;
            write_image(&mut body, record.after.as_ref())?;
        }
        Ok(body)
    }

    /// Decode a frame, verifying length and CRC.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAYLOAD_PREFIX_SIZE {
            return Err(corrupt("payload too small"));
        }
        let mut cursor = Cursor::new(bytes);
        let total_len = cursor.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
        let stored_crc = cursor.read_u32::<LittleEndian>().map_err(io_corrupt)?;

        if total_len < PAYLOAD_PREFIX_SIZE || bytes.len() < total_len {
            return Err(corrupt(format!(
                "payload truncated: expected {} bytes, got {}",
                total_len,
                bytes.len()
            )));
        }

        let body = &bytes[PAYLOAD_PREFIX_SIZE..total_len];
        let computed_crc = crc32fast::hash(body);
        if computed_crc != stored_crc {
            return Err(corrupt(format!(
                "CRC mismatch: expected {}, got {}",
                stored_crc, computed_crc
            )));
        }

        let mut cursor = Cursor::new(body);
        let transaction_id = TransactionId::new(cursor.read_u64::<LittleEndian>().map_err(io_corrupt)?);
        let sequence = cursor.read_u64::<LittleEndian>().map_err(io_corrupt)?;
        let job = match cursor.read_u64::<LittleEndian>().map_err(io_corrupt)? {
            0 => None,
            n => Some(JobNumber::new(n)),
        };
        let count = cursor.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;

        let mut records = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let op = MutationOp::try_from(cursor.read_u8().map_err(io_corrupt)?).map_err(corrupt)?;
            let target = ObjectId::new(cursor.read_u32::<LittleEndian>().map_err(io_corrupt)?);
            let before = read_image(&mut cursor)?;
            let after = read_image(&mut cursor)?;
            records.push(MutationRecord {
                op,
                target,
                before,
                after,
            });
        }

        Ok(Self {
            transaction_id,
            job,
            sequence,
            records,
        })
    }
}

fn write_frame(out: &mut Vec<u8>, total_len: usize, body: &[u8]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(total_len as u32)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(body))?;
    out.write_all(body)
}

fn write_image(out: &mut Vec<u8>, image: Option<&ObjectImage>) -> Result<()> {
    let io = |e: io::Error| StrataError::Serialization(e.to_string());
    match image {
        Some(image) => {
            let json = serde_json::to_vec(image)?;
            out.write_u32::<LittleEndian>(json.len() as u32).map_err(io)?;
            out.write_all(&json).map_err(io)
        }
        None => out.write_u32::<LittleEndian>(0).map_err(io),
    }
}

fn read_image(cursor: &mut Cursor<&[u8]>) -> Result<Option<ObjectImage>> {
    let len = cursor.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(io_corrupt)?;
    let image = serde_json::from_slice(&buf).map_err(|e| corrupt(e.to_string()))?;
    Ok(Some(image))
}

fn corrupt(cause: impl ToString) -> StrataError {
    StrataError::JournalCorruption {
        region: "journal",
        cause: cause.to_string(),
    }
}

fn io_corrupt(err: io::Error) -> StrataError {
    corrupt(err)
}
