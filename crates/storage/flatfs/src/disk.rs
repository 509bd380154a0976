//! Block store
//!
//! Fixed-size block access to a flat image. `FileDisk` backs the image with
//! a host file; `MemDisk` keeps it in memory for tests and tooling.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace};

use crate::error::{FsError, FsResult};
use crate::layout::{BlockId, Geometry, ROOT_BLOCK_LEN};

/// Block device interface for flatfs images
///
/// Every transfer is exactly one block. Indices at or past `num_blocks`
/// and buffers of the wrong length are rejected with `OutOfRange`.
pub trait BlockDevice {
    /// Geometry of the attached image
    fn geometry(&self) -> Geometry;

    /// Read one block
    fn read_block(&mut self, block: BlockId) -> FsResult<Vec<u8>>;

    /// Write one block
    fn write_block(&mut self, block: BlockId, data: &[u8]) -> FsResult<()>;

    /// Flush any cached writes to the backing store
    fn sync(&mut self) -> FsResult<()> {
        Ok(())
    }
}

fn check_access(geometry: &Geometry, block: BlockId, len: Option<usize>) -> FsResult<()> {
    if block.0 >= geometry.num_blocks {
        return Err(FsError::OutOfRange);
    }
    match len {
        Some(n) if n != geometry.block_size as usize => Err(FsError::OutOfRange),
        _ => Ok(()),
    }
}

// ============================================================================
// FILE-BACKED IMAGE
// ============================================================================

/// Image stored in a host file
pub struct FileDisk {
    file: File,
    geometry: Geometry,
}

impl FileDisk {
    /// Create (or truncate) an image file sized for `geometry`
    ///
    /// The contents are all zero; formatting is up to the caller.
    pub fn create<P: AsRef<Path>>(path: P, geometry: Geometry) -> FsResult<Self> {
        geometry.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(geometry.image_len())?;
        debug!(
            "created image {} ({} blocks of {} bytes)",
            path.as_ref().display(),
            geometry.num_blocks,
            geometry.block_size
        );
        Ok(Self { file, geometry })
    }

    /// Open an existing image and read its geometry from block 0
    pub fn open<P: AsRef<Path>>(path: P) -> FsResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut header = [0u8; ROOT_BLOCK_LEN];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FsError::Corrupted("image shorter than the root block"),
            _ => FsError::IoFault(e),
        })?;

        let geometry = Geometry::decode(&header)?;
        geometry
            .validate()
            .map_err(|_| FsError::Corrupted("root block geometry is inconsistent"))?;

        if file.metadata()?.len() < geometry.image_len() {
            return Err(FsError::Corrupted("image shorter than its geometry"));
        }

        debug!(
            "opened image {} ({} blocks of {} bytes)",
            path.as_ref().display(),
            geometry.num_blocks,
            geometry.block_size
        );
        Ok(Self { file, geometry })
    }
}

impl BlockDevice for FileDisk {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read_block(&mut self, block: BlockId) -> FsResult<Vec<u8>> {
        check_access(&self.geometry, block, None)?;
        let mut buf = vec![0u8; self.geometry.block_size as usize];
        self.file.seek(SeekFrom::Start(self.geometry.block_offset(block)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, block: BlockId, data: &[u8]) -> FsResult<()> {
        check_access(&self.geometry, block, Some(data.len()))?;
        trace!("write {}", block);
        self.file.seek(SeekFrom::Start(self.geometry.block_offset(block)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> FsResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY IMAGE
// ============================================================================

/// Image held in memory
#[derive(Clone, Debug)]
pub struct MemDisk {
    data: Vec<u8>,
    geometry: Geometry,
}

impl MemDisk {
    /// Zero-filled image sized for `geometry`
    pub fn new(geometry: Geometry) -> FsResult<Self> {
        geometry.validate()?;
        Ok(Self {
            data: vec![0u8; geometry.image_len() as usize],
            geometry,
        })
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for MemDisk {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read_block(&mut self, block: BlockId) -> FsResult<Vec<u8>> {
        check_access(&self.geometry, block, None)?;
        let start = self.geometry.block_offset(block) as usize;
        Ok(self.data[start..start + self.geometry.block_size as usize].to_vec())
    }

    fn write_block(&mut self, block: BlockId, data: &[u8]) -> FsResult<()> {
        check_access(&self.geometry, block, Some(data.len()))?;
        let start = self.geometry.block_offset(block) as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
