//! Open file handles
//!
//! A handle caches its inode and a mirror of the block under the cursor.
//! Both are refreshed from the image at the start of every read, write and
//! seek, so several handles on one file see each other's growth.
//! Writes go straight through to the image; the mirror only stays dirty if a
//! write fails part-way, in which case `close` pushes it out.

use log::debug;

use crate::dir::{self, EntryKind};
use crate::disk::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::inode::{self, read_inode, write_inode};
use crate::layout::{BlockId, Inode, InodeId};

/// An open regular file
#[derive(Debug)]
pub struct FileHandle {
    inode_id: InodeId,
    inode: Inode,
    pos: u32,
    /// Copy of the block containing `pos`
    buffer: Vec<u8>,
    /// Block the mirror was loaded from, if the cursor sits on an allocated one
    buffer_block: Option<BlockId>,
    dirty: bool,
}

impl FileHandle {
    /// Open `path` relative to `cwd`, creating an empty file if it is missing
    pub fn open<D: BlockDevice + ?Sized>(dev: &mut D, cwd: InodeId, path: &str) -> FsResult<Self> {
        let inode_id = match dir::resolve(dev, cwd, path) {
            Ok((id, EntryKind::File)) => {
                debug!("open '{}' ({})", path, id);
                id
            }
            Ok((_, EntryKind::Directory)) => return Err(FsError::IsADirectory),
            Err(FsError::NotFound) => dir::create_entry(dev, cwd, path, EntryKind::File)?,
            Err(e) => return Err(e),
        };

        let mut handle = Self {
            inode_id,
            inode: read_inode(dev, inode_id)?,
            pos: 0,
            buffer: Vec::new(),
            buffer_block: None,
            dirty: false,
        };
        handle.load_mirror(dev)?;
        Ok(handle)
    }

    pub fn inode_id(&self) -> InodeId {
        self.inode_id
    }

    /// Current content length
    pub fn size(&self) -> u32 {
        self.inode.size
    }

    /// Cursor position
    pub fn position(&self) -> u32 {
        self.pos
    }

    fn block_size(&self) -> usize {
        self.buffer.len()
    }

    /// Reload the mirror for the block under the cursor
    fn load_mirror<D: BlockDevice + ?Sized>(&mut self, dev: &mut D) -> FsResult<()> {
        let block_size = dev.geometry().block_size as usize;
        self.buffer_block = self.inode.direct(self.pos as usize / block_size);
        self.buffer = match self.buffer_block {
            Some(block) => dev.read_block(block)?,
            None => vec![0u8; block_size],
        };
        self.dirty = false;
        Ok(())
    }

    /// Re-read the inode record, and the mirror unless it holds unflushed bytes
    fn refresh<D: BlockDevice + ?Sized>(&mut self, dev: &mut D) -> FsResult<()> {
        self.inode = read_inode(dev, self.inode_id)?;
        if !self.dirty {
            self.load_mirror(dev)?;
        }
        Ok(())
    }

    /// Read `count` bytes at the cursor and advance it
    pub fn read<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, count: usize) -> FsResult<Vec<u8>> {
        self.refresh(dev)?;
        if self.pos as u64 + count as u64 > self.inode.size as u64 {
            return Err(FsError::OutOfRange);
        }

        let in_block = self.pos as usize % self.block_size();
        let from_mirror = count.min(self.block_size() - in_block);
        let mut out = Vec::with_capacity(count);
        out.extend_from_slice(&self.buffer[in_block..in_block + from_mirror]);
        if count > from_mirror {
            let rest = inode::read_content(
                dev,
                &self.inode,
                self.pos + from_mirror as u32,
                count - from_mirror,
            )?;
            out.extend_from_slice(&rest);
        }

        self.advance(dev, count as u32)?;
        Ok(out)
    }

    /// Write `data` at the cursor, growing the file as needed, and advance
    pub fn write<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, data: &[u8]) -> FsResult<()> {
        let end = self.pos as u64 + data.len() as u64;
        if end > dev.geometry().max_file_size() as u64 {
            return Err(FsError::OutOfRange);
        }

        self.refresh(dev)?;
        inode::grow(dev, &mut self.inode, end as u32)?;
        write_inode(dev, self.inode_id, &self.inode)?;
        if self.buffer_block.is_none() {
            self.load_mirror(dev)?;
        }

        let in_block = self.pos as usize % self.block_size();
        let staged = data.len().min(self.block_size() - in_block);
        self.buffer[in_block..in_block + staged].copy_from_slice(&data[..staged]);
        self.dirty = staged > 0;

        inode::write_content(dev, &self.inode, self.pos, data)?;
        self.dirty = false;

        self.advance(dev, data.len() as u32)
    }

    /// Move the cursor to `pos`, which must lie inside the content
    pub fn seek<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, pos: u32) -> FsResult<()> {
        self.inode = read_inode(dev, self.inode_id)?;
        if pos >= self.inode.size {
            return Err(FsError::OutOfRange);
        }
        self.pos = pos;
        self.load_mirror(dev)
    }

    fn advance<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, by: u32) -> FsResult<()> {
        let block_size = self.block_size() as u32;
        let before = self.pos / block_size;
        self.pos += by;
        if self.pos / block_size != before || self.buffer_block.is_none() {
            self.load_mirror(dev)?;
        }
        Ok(())
    }

    /// Release the handle, flushing a mirror left dirty by a failed write
    pub fn close<D: BlockDevice + ?Sized>(self, dev: &mut D) -> FsResult<()> {
        if self.dirty {
            if let Some(block) = self.buffer_block {
                dev.write_block(block, &self.buffer)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::fs::format_device;
    use crate::layout::{Geometry, ROOT_INODE};

    fn formatted() -> MemDisk {
        let mut dev = MemDisk::new(Geometry::derive(32, 512, 16).unwrap()).unwrap();
        format_device(&mut dev).unwrap();
        dev
    }

    #[test]
    fn test_open_creates_empty_file() {
        let mut dev = formatted();
        let handle = FileHandle::open(&mut dev, ROOT_INODE, "new").unwrap();
        assert_eq!(handle.size(), 0);
        assert_eq!(handle.position(), 0);
        let again = FileHandle::open(&mut dev, ROOT_INODE, "/new").unwrap();
        assert_eq!(again.inode_id(), handle.inode_id());
    }

    #[test]
    fn test_open_directory_fails() {
        let mut dev = formatted();
        dir::create_entry(&mut dev, ROOT_INODE, "d", EntryKind::Directory).unwrap();
        assert!(matches!(FileHandle::open(&mut dev, ROOT_INODE, "d"), Err(FsError::IsADirectory)));
        assert!(matches!(FileHandle::open(&mut dev, ROOT_INODE, "."), Err(FsError::IsADirectory)));
    }

    #[test]
    fn test_write_read_across_blocks() {
        let mut dev = formatted();
        let mut handle = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        let payload: Vec<u8> = (0..100u8).collect();
        handle.write(&mut dev, &payload).unwrap();
        assert_eq!(handle.size(), 100);
        assert_eq!(handle.position(), 100);

        handle.seek(&mut dev, 0).unwrap();
        assert_eq!(handle.read(&mut dev, 100).unwrap(), payload);

        handle.seek(&mut dev, 30).unwrap();
        assert_eq!(handle.read(&mut dev, 4).unwrap(), vec![30, 31, 32, 33]);
        assert_eq!(handle.read(&mut dev, 2).unwrap(), vec![34, 35]);
        handle.close(&mut dev).unwrap();

        let mut reopened = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        assert_eq!(reopened.read(&mut dev, 100).unwrap(), payload);
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut dev = formatted();
        let mut handle = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        handle.write(&mut dev, b"hello world").unwrap();
        handle.seek(&mut dev, 6).unwrap();
        handle.write(&mut dev, b"there").unwrap();
        assert_eq!(handle.size(), 11);
        handle.seek(&mut dev, 0).unwrap();
        assert_eq!(handle.read(&mut dev, 11).unwrap(), b"hello there");
    }

    #[test]
    fn test_read_and_seek_bounds() {
        let mut dev = formatted();
        let mut handle = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        handle.write(&mut dev, b"hello\0").unwrap();
        handle.seek(&mut dev, 0).unwrap();
        assert!(matches!(handle.read(&mut dev, 7), Err(FsError::OutOfRange)));
        assert!(matches!(handle.seek(&mut dev, 6), Err(FsError::OutOfRange)));
        handle.seek(&mut dev, 5).unwrap();
        assert_eq!(handle.read(&mut dev, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_two_handles_share_blocks() {
        let mut dev = formatted();
        let before = crate::bitmap::free_block_count(&mut dev).unwrap();
        let mut first = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        let mut second = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        assert_eq!(crate::bitmap::free_block_count(&mut dev).unwrap(), before - 1);

        first.write(&mut dev, &[1u8; 40]).unwrap();
        second.write(&mut dev, &[2u8; 40]).unwrap();
        // The second handle grows from the record the first one wrote
        assert_eq!(crate::bitmap::free_block_count(&mut dev).unwrap(), before - 2);
        let inode = read_inode(&mut dev, first.inode_id()).unwrap();
        assert_eq!(inode.size, 40);
        assert_eq!(inode.data_blocks(), 2);

        first.seek(&mut dev, 0).unwrap();
        assert_eq!(first.read(&mut dev, 40).unwrap(), vec![2u8; 40]);
        first.close(&mut dev).unwrap();
        second.close(&mut dev).unwrap();
    }

    #[test]
    fn test_handle_sees_growth_from_another() {
        let mut dev = formatted();
        let mut reader = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        let mut writer = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        writer.write(&mut dev, b"abcdef").unwrap();

        assert_eq!(reader.read(&mut dev, 3).unwrap(), b"abc");
        reader.seek(&mut dev, 5).unwrap();
        assert_eq!(reader.read(&mut dev, 1).unwrap(), b"f");
        assert_eq!(reader.size(), 6);
    }

    #[test]
    fn test_write_limit() {
        let mut dev = formatted();
        let mut handle = FileHandle::open(&mut dev, ROOT_INODE, "f").unwrap();
        // 5 direct blocks of 32 bytes
        handle.write(&mut dev, &[7u8; 160]).unwrap();
        assert!(matches!(handle.write(&mut dev, &[1]), Err(FsError::OutOfRange)));
        assert_eq!(handle.size(), 160);
    }
}
