//! Mounted volumes and the loaded-image session
//!
//! `Volume` ties a block device to a current directory. `FileSystem` owns at
//! most one file-backed volume at a time and is what applications hold.

use std::path::Path;

use flatfs_path as path;
use log::{debug, warn};

use crate::bitmap;
use crate::dir::{self, DirEntry, Directory, EntryKind};
use crate::disk::{BlockDevice, FileDisk};
use crate::error::{FsError, FsResult};
use crate::file::FileHandle;
use crate::inode::{read_inode, write_inode};
use crate::layout::{BlockId, Geometry, Inode, InodeId, ROOT_INODE};

/// Lay down an empty file system on `dev`
///
/// Writes the root block, clears the bitmap and inode table, marks every
/// metadata block in use and creates the root directory (`.` and `..` both
/// pointing at inode 0).
pub fn format_device<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<()> {
    let geometry = dev.geometry();
    geometry.validate()?;

    dev.write_block(BlockId(0), &geometry.encode())?;

    let zero = vec![0u8; geometry.block_size as usize];
    for block in 1..geometry.root_dir_block().0 {
        dev.write_block(BlockId(block), &zero)?;
    }
    bitmap::mark_range_allocated(dev, BlockId(0), geometry.metadata_blocks())?;

    let root = Directory::new(ROOT_INODE, ROOT_INODE).encode();
    let mut data = zero;
    data[..root.len()].copy_from_slice(&root);
    dev.write_block(geometry.root_dir_block(), &data)?;
    write_inode(dev, ROOT_INODE, &Inode::new_directory(root.len() as u32, geometry.root_dir_block()))?;

    debug!(
        "formatted: block_size={} blocks={} bitmap={} inode_table={} inodes={}",
        geometry.block_size,
        geometry.num_blocks,
        geometry.num_free_bitmap_blocks,
        geometry.num_inode_table_blocks,
        geometry.inode_capacity()
    );
    dev.sync()
}

/// Summary of one entry, as returned by `stat`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub inode: InodeId,
    pub kind: EntryKind,
    /// Content length in bytes
    pub size: u32,
    /// Allocated data blocks
    pub blocks: u32,
}

/// A formatted image attached to a block device
pub struct Volume<D: BlockDevice> {
    dev: D,
    cwd: InodeId,
    /// Normalized absolute path of `cwd`
    cwd_path: String,
}

impl<D: BlockDevice> Volume<D> {
    /// Attach to an already formatted device
    pub fn mount(mut dev: D) -> FsResult<Self> {
        let root = read_inode(&mut dev, ROOT_INODE)?;
        if root.is_free() {
            return Err(FsError::Corrupted("root inode is empty"));
        }
        Ok(Self {
            dev,
            cwd: ROOT_INODE,
            cwd_path: String::from("/"),
        })
    }

    /// Format the device, then attach to it
    pub fn format(mut dev: D) -> FsResult<Self> {
        format_device(&mut dev)?;
        Self::mount(dev)
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    /// Create a directory
    pub fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let id = dir::create_entry(&mut self.dev, self.cwd, path, EntryKind::Directory)?;
        debug!("mkdir '{}' -> {}", path, id);
        Ok(())
    }

    /// Change the current directory
    pub fn change_directory(&mut self, path: &str) -> FsResult<()> {
        match dir::resolve(&mut self.dev, self.cwd, path)? {
            (id, EntryKind::Directory) => {
                self.cwd = id;
                self.cwd_path = path::normalize(&path::join(&self.cwd_path, path));
                Ok(())
            }
            (_, EntryKind::File) => Err(FsError::NotADirectory),
        }
    }

    /// Current directory: `/` at the root, `/a/b/` elsewhere
    pub fn current_path(&self) -> String {
        path::as_directory(&self.cwd_path)
    }

    /// Names in the current directory, each followed by a newline
    pub fn list(&mut self) -> FsResult<String> {
        let listing = dir::read_directory(&mut self.dev, self.cwd)?;
        let mut out = String::new();
        for name in listing.names() {
            out.push_str(name);
            out.push('\n');
        }
        Ok(out)
    }

    /// Entries of the directory at `path`
    pub fn list_dir(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        match dir::resolve(&mut self.dev, self.cwd, path)? {
            (id, EntryKind::Directory) => Ok(dir::read_directory(&mut self.dev, id)?.entries),
            (_, EntryKind::File) => Err(FsError::NotADirectory),
        }
    }

    pub fn stat(&mut self, path: &str) -> FsResult<Metadata> {
        let (id, kind) = dir::resolve(&mut self.dev, self.cwd, path)?;
        let inode = read_inode(&mut self.dev, id)?;
        Ok(Metadata {
            inode: id,
            kind,
            size: inode.size,
            blocks: inode.data_blocks(),
        })
    }

    /// Open a file, creating it when missing
    pub fn open(&mut self, path: &str) -> FsResult<FileHandle> {
        FileHandle::open(&mut self.dev, self.cwd, path)
    }

    pub fn read(&mut self, handle: &mut FileHandle, count: usize) -> FsResult<Vec<u8>> {
        handle.read(&mut self.dev, count)
    }

    pub fn write(&mut self, handle: &mut FileHandle, data: &[u8]) -> FsResult<()> {
        handle.write(&mut self.dev, data)
    }

    pub fn seek(&mut self, handle: &mut FileHandle, pos: u32) -> FsResult<()> {
        handle.seek(&mut self.dev, pos)
    }

    pub fn close(&mut self, handle: FileHandle) -> FsResult<()> {
        handle.close(&mut self.dev)
    }

    pub fn free_block_count(&mut self) -> FsResult<u32> {
        bitmap::free_block_count(&mut self.dev)
    }

    pub fn free_inode_count(&mut self) -> FsResult<u32> {
        bitmap::free_inode_count(&mut self.dev)
    }

    /// Geometry as currently stored in block 0
    pub fn root_block(&mut self) -> FsResult<Geometry> {
        let block = self.dev.read_block(BlockId(0))?;
        Geometry::decode(&block)
    }

    pub fn sync(&mut self) -> FsResult<()> {
        self.dev.sync()
    }
}

/// Session holding at most one loaded image
#[derive(Default)]
pub struct FileSystem {
    volume: Option<Volume<FileDisk>>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and format an image file, leaving it loaded
    pub fn format<P: AsRef<Path>>(
        &mut self,
        image: P,
        block_size: u32,
        num_blocks: u32,
        num_inodes: u32,
    ) -> FsResult<()> {
        let geometry = Geometry::derive(block_size, num_blocks, num_inodes)?;
        if self.is_loaded() {
            self.unload()?;
        }
        let disk = FileDisk::create(image.as_ref(), geometry)?;
        self.volume = Some(Volume::format(disk)?);
        Ok(())
    }

    /// Load an image file, unloading any image already loaded
    pub fn load<P: AsRef<Path>>(&mut self, image: P) -> FsResult<()> {
        if self.is_loaded() {
            warn!("load {}: replacing the loaded image", image.as_ref().display());
            self.unload()?;
        }
        let volume = Volume::mount(FileDisk::open(image.as_ref())?)?;
        debug!("loaded {}", image.as_ref().display());
        self.volume = Some(volume);
        Ok(())
    }

    /// Flush and release the loaded image
    pub fn unload(&mut self) -> FsResult<()> {
        let mut volume = self.volume.take().ok_or(FsError::NotLoaded)?;
        volume.sync()?;
        debug!("unloaded image");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.volume.is_some()
    }

    fn volume(&mut self) -> FsResult<&mut Volume<FileDisk>> {
        self.volume.as_mut().ok_or(FsError::NotLoaded)
    }

    pub fn mkdir(&mut self, path: &str) -> FsResult<()> {
        self.volume()?.mkdir(path)
    }

    pub fn change_directory(&mut self, path: &str) -> FsResult<()> {
        self.volume()?.change_directory(path)
    }

    pub fn current_path(&mut self) -> FsResult<String> {
        Ok(self.volume()?.current_path())
    }

    pub fn list(&mut self) -> FsResult<String> {
        self.volume()?.list()
    }

    pub fn list_dir(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.volume()?.list_dir(path)
    }

    pub fn stat(&mut self, path: &str) -> FsResult<Metadata> {
        self.volume()?.stat(path)
    }

    pub fn open(&mut self, path: &str) -> FsResult<FileHandle> {
        self.volume()?.open(path)
    }

    pub fn read(&mut self, handle: &mut FileHandle, count: usize) -> FsResult<Vec<u8>> {
        self.volume()?.read(handle, count)
    }

    pub fn write(&mut self, handle: &mut FileHandle, data: &[u8]) -> FsResult<()> {
        self.volume()?.write(handle, data)
    }

    pub fn seek(&mut self, handle: &mut FileHandle, pos: u32) -> FsResult<()> {
        self.volume()?.seek(handle, pos)
    }

    pub fn close(&mut self, handle: FileHandle) -> FsResult<()> {
        self.volume()?.close(handle)
    }

    pub fn free_block_count(&mut self) -> FsResult<u32> {
        self.volume()?.free_block_count()
    }

    pub fn free_inode_count(&mut self) -> FsResult<u32> {
        self.volume()?.free_inode_count()
    }

    pub fn root_block(&mut self) -> FsResult<Geometry> {
        self.volume()?.root_block()
    }

    pub fn sync(&mut self) -> FsResult<()> {
        self.volume()?.sync()
    }
}
