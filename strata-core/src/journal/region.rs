//! Byte-addressable persistence media.
//!
//! Both controllers see the same region: on hardware this is the dual-ported
//! database drive, in tests it is a shared [`MemoryRegion`] or a file.

use super::config::JournalConfig;
use crate::error::{Result, StrataError};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access storage shared by the journal and live areas.
pub trait Region: Send + Sync {
    /// Fill `buf` from `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Make previous writes durable.
    fn sync(&self) -> Result<()>;

    /// Size of the region in bytes.
    fn len(&self) -> u64;

    /// Whether the region holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_bounds(len: u64, offset: u64, size: usize) -> Result<()> {
    let end = offset.checked_add(size as u64);
    match end {
        Some(end) if end <= len => Ok(()),
        _ => Err(StrataError::JournalIo {
            operation: "bounds check",
            cause: format!("access of {size} bytes at {offset} exceeds region of {len} bytes"),
        }),
    }
}

/// Volatile region backed by a zero-filled buffer.
pub struct MemoryRegion {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryRegion {
    /// Create a zeroed region of `len` bytes.
    pub fn new(len: u64) -> Self {
        Self {
            bytes: RwLock::new(vec![0u8; len as usize]),
        }
    }

    /// Create a region sized for `config`.
    pub fn for_config(config: &JournalConfig) -> Self {
        Self::new(config.layout().total_len())
    }

    /// Overwrite bytes without bounds policy, for corrupting media in tests.
    pub fn scribble(&self, offset: u64, data: &[u8]) {
        let mut bytes = self.bytes.write();
        let start = offset as usize;
        let end = (start + data.len()).min(bytes.len());
        if start < end {
            bytes[start..end].copy_from_slice(&data[..end - start]);
        }
    }
}

impl Region for MemoryRegion {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        check_bounds(bytes.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        check_bounds(bytes.len() as u64, offset, data.len())?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.read().len() as u64
    }
}

/// File-backed region, exclusively locked while open.
pub struct FileRegion {
    file: Mutex<File>,
    path: PathBuf,
    len: u64,
    sync_on_write: bool,
}

impl FileRegion {
    /// Open or create the device file described by `config`.
    ///
    /// The file is grown to the configured layout and locked exclusively.
    pub fn open(config: &JournalConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.directory)
            .map_err(|e| StrataError::io("create directory", e))?;
        Self::open_path(
            &config.device_path(),
            config.layout().total_len(),
            config.sync_on_write,
        )
    }

    /// Open or create a device file of at least `len` bytes.
    pub fn open_path(path: &Path, len: u64, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StrataError::io("open device", e))?;

        file.try_lock_exclusive()
            .map_err(|e| StrataError::io("lock device", e))?;

        let current = file
            .metadata()
            .map_err(|e| StrataError::io("stat device", e))?
            .len();
        if current < len {
            file.set_len(len)
                .map_err(|e| StrataError::io("grow device", e))?;
        }

        tracing::debug!(path = %path.display(), len, "Opened device file");

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            len: current.max(len),
            sync_on_write,
        })
    }

    /// Path of the device file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Region for FileRegion {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.len, offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StrataError::io("seek", e))?;
        file.read_exact(buf).map_err(|e| StrataError::io("read", e))
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_bounds(self.len, offset, data.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StrataError::io("seek", e))?;
        file.write_all(data)
            .map_err(|e| StrataError::io("write", e))
    }

    fn sync(&self) -> Result<()> {
        if !self.sync_on_write {
            return Ok(());
        }
        self.file
            .lock()
            .sync_data()
            .map_err(|e| StrataError::io("sync", e))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

impl Drop for FileRegion {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&*self.file.get_mut());
    }
}
