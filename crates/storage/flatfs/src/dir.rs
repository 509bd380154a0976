//! Directory operations
//!
//! A directory is an ordinary inode whose content is:
//!
//! ```text
//! offset 0:  entry count (u32)
//! offset 4:  packed entries, in insertion order
//!
//! entry:     inode (u32) | tag (u8, 'F' or 'D') | L (u8) | name bytes | NUL
//!            L counts the name plus its terminator, so an entry is 6 + L bytes
//! ```
//!
//! Every directory starts with `.` (itself) and `..` (its parent; the root
//! points at itself).

use flatfs_path as path;
use log::debug;

use crate::bitmap;
use crate::disk::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::inode::{self, read_inode, write_inode};
use crate::layout::{read_u32, write_u32, Inode, InodeId, ROOT_INODE};

/// Fixed part of an entry: inode, tag, length byte
const ENTRY_HEADER_LEN: usize = 6;
/// Entry count prefix
const COUNT_LEN: usize = 4;

const TAG_FILE: u8 = b'F';
const TAG_DIRECTORY: u8 = b'D';

/// Entry type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn tag(self) -> u8 {
        match self {
            EntryKind::File => TAG_FILE,
            EntryKind::Directory => TAG_DIRECTORY,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_FILE => Some(EntryKind::File),
            TAG_DIRECTORY => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// One directory entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeId,
    pub kind: EntryKind,
    pub name: String,
}

impl DirEntry {
    /// Build an entry whose name fits the one-byte length field
    ///
    /// Names must be 1..=254 bytes without NUL; `.` and `..` are accepted.
    pub fn new(inode: InodeId, kind: EntryKind, name: &str) -> FsResult<Self> {
        if name.is_empty() || name.len() > path::MAX_NAME || name.contains('\0') {
            return Err(FsError::InvalidName);
        }
        Ok(Self {
            inode,
            kind,
            name: String::from(name),
        })
    }

    /// Bytes this entry occupies on disk
    pub fn encoded_len(&self) -> usize {
        ENTRY_HEADER_LEN + self.name.len() + 1
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        debug_assert!(self.name.len() <= path::MAX_NAME);
        out.extend_from_slice(&self.inode.0.to_ne_bytes());
        out.push(self.kind.tag());
        out.push((self.name.len() + 1) as u8);
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
    }

    /// Decode one entry from the front of `bytes`, returning it and its length
    pub fn decode(bytes: &[u8]) -> FsResult<(Self, usize)> {
        if bytes.len() < ENTRY_HEADER_LEN {
            return Err(FsError::Corrupted("truncated directory entry"));
        }
        let inode = InodeId(read_u32(bytes, 0));
        let kind = EntryKind::from_tag(bytes[4]).ok_or(FsError::Corrupted("unknown entry tag"))?;
        let name_len = bytes[5] as usize;
        if name_len == 0 {
            return Err(FsError::Corrupted("entry name without terminator"));
        }

        let end = ENTRY_HEADER_LEN + name_len;
        if bytes.len() < end {
            return Err(FsError::Corrupted("truncated directory entry"));
        }
        if bytes[end - 1] != 0 {
            return Err(FsError::Corrupted("entry name not null-terminated"));
        }
        let name = std::str::from_utf8(&bytes[ENTRY_HEADER_LEN..end - 1])
            .map_err(|_| FsError::Corrupted("entry name is not UTF-8"))?;

        let entry =
            Self::new(inode, kind, name).map_err(|_| FsError::Corrupted("entry name is not storable"))?;
        Ok((entry, end))
    }
}

/// Decoded directory content
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    pub entries: Vec<DirEntry>,
}

impl Directory {
    /// Content of a fresh directory
    pub fn new(itself: InodeId, parent: InodeId) -> Self {
        Self {
            entries: vec![
                DirEntry {
                    inode: itself,
                    kind: EntryKind::Directory,
                    name: String::from("."),
                },
                DirEntry {
                    inode: parent,
                    kind: EntryKind::Directory,
                    name: String::from(".."),
                },
            ],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = COUNT_LEN + self.entries.iter().map(DirEntry::encoded_len).sum::<usize>();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(self.entries.len() as u32).to_ne_bytes());
        for entry in &self.entries {
            entry.encode_into(&mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() < COUNT_LEN {
            return Err(FsError::Corrupted("directory shorter than its count"));
        }
        let count = read_u32(bytes, 0) as usize;
        let mut entries = Vec::new();
        let mut offset = COUNT_LEN;

        for _ in 0..count {
            let (entry, used) = DirEntry::decode(&bytes[offset..])?;
            entries.push(entry);
            offset += used;
        }
        if offset != bytes.len() {
            return Err(FsError::Corrupted("directory size does not match its entries"));
        }
        Ok(Self { entries })
    }

    /// Byte-exact name lookup
    pub fn lookup(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name.as_bytes() == name.as_bytes())
    }

    /// Names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

/// Read and decode a directory inode
pub fn read_directory<D: BlockDevice + ?Sized>(dev: &mut D, dir: InodeId) -> FsResult<Directory> {
    let inode = read_inode(dev, dir)?;
    let content = inode::read_all(dev, &inode)?;
    Directory::decode(&content)
}

/// Find `name` in directory `dir`
pub fn lookup<D: BlockDevice + ?Sized>(dev: &mut D, dir: InodeId, name: &str) -> FsResult<Option<DirEntry>> {
    Ok(read_directory(dev, dir)?.lookup(name).cloned())
}

/// Walk `path` from `start` (or from the root when absolute)
///
/// `.` and `..` follow the stored entries. Empty components are skipped, so
/// `"/"` and `""` resolve to the starting directory.
pub fn resolve<D: BlockDevice + ?Sized>(
    dev: &mut D,
    start: InodeId,
    path: &str,
) -> FsResult<(InodeId, EntryKind)> {
    let mut current = if path::is_absolute(path) { ROOT_INODE } else { start };
    let mut kind = EntryKind::Directory;

    for component in path::components(path) {
        if kind != EntryKind::Directory {
            return Err(FsError::NotADirectory);
        }
        let entry = lookup(dev, current, component)?.ok_or(FsError::NotFound)?;
        current = entry.inode;
        kind = entry.kind;
    }
    Ok((current, kind))
}

/// Create a file or directory at `path`, relative to `cwd`
///
/// The child's content and inode are written before the parent learns about
/// it, so a failure part-way leaves unreferenced allocations and never an
/// entry pointing at an unwritten inode.
pub fn create_entry<D: BlockDevice + ?Sized>(
    dev: &mut D,
    cwd: InodeId,
    path: &str,
    kind: EntryKind,
) -> FsResult<InodeId> {
    if path.is_empty() {
        return Err(FsError::InvalidName);
    }
    let (parent_path, name) = path::split(path);
    if name.is_empty() || name == "." || name == ".." {
        // "/", "." and ".." always exist
        return Err(FsError::AlreadyExists);
    }
    if !path::is_valid_name(name) {
        return Err(FsError::InvalidName);
    }

    let (parent, parent_kind) = resolve(dev, cwd, parent_path)?;
    if parent_kind != EntryKind::Directory {
        return Err(FsError::NotADirectory);
    }
    let mut parent_inode = read_inode(dev, parent)?;
    let siblings = Directory::decode(&inode::read_all(dev, &parent_inode)?)?;
    if siblings.lookup(name).is_some() {
        return Err(FsError::AlreadyExists);
    }

    // Child: inode slot, first block, content, then the record itself
    let child = bitmap::allocate_inode(dev)?;
    let block = bitmap::allocate_block(dev)?;
    let content = match kind {
        EntryKind::Directory => Directory::new(child, parent).encode(),
        EntryKind::File => Vec::new(),
    };
    let mut data = vec![0u8; dev.geometry().block_size as usize];
    data[..content.len()].copy_from_slice(&content);
    dev.write_block(block, &data)?;
    let child_inode = match kind {
        EntryKind::Directory => Inode::new_directory(content.len() as u32, block),
        EntryKind::File => Inode::new_file(block),
    };
    write_inode(dev, child, &child_inode)?;

    // Parent: append entry, bump count, persist inode
    let entry = DirEntry::new(child, kind, name)?;
    let mut encoded = Vec::with_capacity(entry.encoded_len());
    entry.encode_into(&mut encoded);

    let append_at = parent_inode.size;
    inode::grow(dev, &mut parent_inode, append_at + encoded.len() as u32)?;
    inode::write_content(dev, &parent_inode, append_at, &encoded)?;

    let mut count = [0u8; COUNT_LEN];
    write_u32(&mut count, 0, siblings.entries.len() as u32 + 1);
    inode::write_content(dev, &parent_inode, 0, &count)?;
    write_inode(dev, parent, &parent_inode)?;

    debug!("created {:?} '{}' as {} in {}", kind, name, child, parent);
    Ok(child)
}
