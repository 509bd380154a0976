//! flatfs - a minimal inode file system in a single image file
//!
//! A flat image is divided into fixed-size blocks. Block 0 records the
//! geometry, a bitmap tracks which blocks are in use, and a fixed table of
//! 32-byte inodes describes files and directories. Directories are files
//! whose content is a packed list of named entries.
//!
//! ## Disk Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Block 0        root block                    │
//! │                block_size, num_blocks, B, T  │
//! ├──────────────────────────────────────────────┤
//! │ Blocks 1..B    free bitmap (LSB first)       │
//! ├──────────────────────────────────────────────┤
//! │ Blocks B+1..B+T inode table                  │
//! │                size + 5 direct + 2 reserved  │
//! ├──────────────────────────────────────────────┤
//! │ Block B+T+1    root directory data           │
//! ├──────────────────────────────────────────────┤
//! │ Blocks B+T+2.. file and directory data       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Limits
//!
//! | Item | Limit |
//! |------|-------|
//! | File size | 5 × block size (direct blocks only) |
//! | Name length | 254 bytes |
//! | Inodes | T × block size / 32 |
//!
//! Nothing is ever freed: there is no unlink, rename or truncate.
//!
//! ## Usage
//!
//! ```no_run
//! use flatfs::FileSystem;
//!
//! let mut fs = FileSystem::new();
//! fs.format("disk.img", 128, 4096, 80)?;
//! fs.mkdir("docs")?;
//! let mut file = fs.open("docs/readme")?;
//! fs.write(&mut file, b"hello\0")?;
//! fs.close(file)?;
//! fs.unload()?;
//! # Ok::<(), flatfs::FsError>(())
//! ```

pub mod bitmap;
pub mod dir;
pub mod disk;
pub mod error;
pub mod file;
pub mod fs;
pub mod inode;
pub mod layout;


pub use dir::{DirEntry, Directory, EntryKind};
pub use disk::{BlockDevice, FileDisk, MemDisk};
pub use error::{FsError, FsResult};
pub use file::FileHandle;
pub use fs::{format_device, FileSystem, Metadata, Volume};
pub use layout::{BlockId, Geometry, Inode, InodeId, ROOT_INODE};
