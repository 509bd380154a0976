//! flatfs on-disk structures
//!
//! The root block geometry, block/inode identifiers and the fixed-size inode
//! record. `Geometry` is the single place where byte offsets are computed.
//!
//! All integers are 4-byte unsigned values in native byte order.

use std::fmt;

use crate::error::{FsError, FsResult};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Bytes of the root block record (four u32 fields)
pub const ROOT_BLOCK_LEN: usize = 16;

/// Inode record size: size + 7 block pointers
pub const INODE_SIZE: usize = 32;

/// Total block pointers in an inode
pub const BLOCK_POINTERS: usize = 7;

/// Directly referenced blocks (the remaining two slots are the reserved
/// single- and double-indirect pointers)
pub const DIRECT_POINTERS: usize = 5;

/// Root directory inode (always index 0)
pub const ROOT_INODE: InodeId = InodeId(0);

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Absolute block index inside the image
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.0)
    }
}

/// Index into the inode table
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(pub u32);

impl InodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inode {}", self.0)
    }
}

// ============================================================================
// GEOMETRY (ROOT BLOCK)
// ============================================================================

/// Disk geometry, stored at block 0
///
/// ```text
/// block 0:            root block (this record, zero padded)
/// blocks 1..B:        free bitmap
/// blocks B+1..B+T:    inode table
/// block B+T+1:        root directory's first data block
/// blocks B+T+2..N-1:  free data blocks
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Block size in bytes
    pub block_size: u32,
    /// Total blocks in the image
    pub num_blocks: u32,
    /// Blocks holding the free bitmap (B)
    pub num_free_bitmap_blocks: u32,
    /// Blocks holding the inode table (T)
    pub num_inode_table_blocks: u32,
}

impl Geometry {
    /// Derive the layout for a new image
    ///
    /// `B = num_blocks / block_size / 8` and `T = num_inodes / (block_size / 32)`,
    /// both truncating. Inputs that truncate to a bitmap too small for
    /// `num_blocks`, or to an empty inode table, are rejected.
    pub fn derive(block_size: u32, num_blocks: u32, num_inodes: u32) -> FsResult<Self> {
        if (block_size as usize) < ROOT_BLOCK_LEN {
            return Err(FsError::InvalidGeometry("block size smaller than the root block"));
        }
        if block_size as usize % INODE_SIZE != 0 {
            return Err(FsError::InvalidGeometry("block size not a multiple of the inode size"));
        }

        let geometry = Self {
            block_size,
            num_blocks,
            num_free_bitmap_blocks: num_blocks / block_size / 8,
            num_inode_table_blocks: num_inodes / (block_size / INODE_SIZE as u32),
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check internal consistency of a geometry (derived or read from disk)
    pub fn validate(&self) -> FsResult<()> {
        if (self.block_size as usize) < ROOT_BLOCK_LEN || self.block_size as usize % INODE_SIZE != 0 {
            return Err(FsError::InvalidGeometry("bad block size"));
        }
        if self.num_inode_table_blocks == 0 {
            return Err(FsError::InvalidGeometry("no room for the root inode"));
        }
        // u128 so a garbage root block cannot overflow the checks
        let bitmap_bits = self.num_free_bitmap_blocks as u128 * self.block_size as u128 * 8;
        if bitmap_bits < self.num_blocks as u128 {
            return Err(FsError::InvalidGeometry("bitmap does not cover every block"));
        }
        let metadata = 2 + self.num_free_bitmap_blocks as u64 + self.num_inode_table_blocks as u64;
        if metadata > self.num_blocks as u64 {
            return Err(FsError::InvalidGeometry("metadata does not fit in the image"));
        }
        if self.num_inode_table_blocks as u64 * self.inodes_per_block() as u64 > u32::MAX as u64 {
            return Err(FsError::InvalidGeometry("inode table exceeds the inode number space"));
        }
        Ok(())
    }

    /// Parse the root block record from the start of block 0
    pub fn decode(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() < ROOT_BLOCK_LEN {
            return Err(FsError::Corrupted("root block truncated"));
        }
        Ok(Self {
            block_size: read_u32(bytes, 0),
            num_blocks: read_u32(bytes, 4),
            num_free_bitmap_blocks: read_u32(bytes, 8),
            num_inode_table_blocks: read_u32(bytes, 12),
        })
    }

    /// Encode a full root block (record + zero padding)
    pub fn encode(&self) -> Vec<u8> {
        let mut block = vec![0u8; self.block_size as usize];
        write_u32(&mut block, 0, self.block_size);
        write_u32(&mut block, 4, self.num_blocks);
        write_u32(&mut block, 8, self.num_free_bitmap_blocks);
        write_u32(&mut block, 12, self.num_inode_table_blocks);
        block
    }

    /// Byte offset of a block in the image
    pub fn block_offset(&self, block: BlockId) -> u64 {
        block.0 as u64 * self.block_size as u64
    }

    /// Image length in bytes
    pub fn image_len(&self) -> u64 {
        self.num_blocks as u64 * self.block_size as u64
    }

    /// First bitmap block
    pub fn bitmap_start(&self) -> BlockId {
        BlockId(1)
    }

    /// First inode table block
    pub fn inode_table_start(&self) -> BlockId {
        BlockId(1 + self.num_free_bitmap_blocks)
    }

    /// Root directory's first data block
    pub fn root_dir_block(&self) -> BlockId {
        BlockId(1 + self.num_free_bitmap_blocks + self.num_inode_table_blocks)
    }

    /// Blocks reserved at format time: root, bitmap, inode table, root directory
    pub fn metadata_blocks(&self) -> u32 {
        1 + self.num_free_bitmap_blocks + self.num_inode_table_blocks + 1
    }

    /// Inode records per block
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size / INODE_SIZE as u32
    }

    /// Number of inode records in the table
    pub fn inode_capacity(&self) -> u32 {
        self.num_inode_table_blocks * self.inodes_per_block()
    }

    /// Block and in-block byte offset of an inode record
    pub fn inode_location(&self, inode: InodeId) -> FsResult<(BlockId, usize)> {
        if inode.0 >= self.inode_capacity() {
            return Err(FsError::OutOfRange);
        }
        let byte = inode.0 as u64 * INODE_SIZE as u64;
        let block = self.inode_table_start().0 + (byte / self.block_size as u64) as u32;
        Ok((BlockId(block), (byte % self.block_size as u64) as usize))
    }

    /// Largest content an inode can address through its direct pointers
    pub fn max_file_size(&self) -> u32 {
        DIRECT_POINTERS as u32 * self.block_size
    }
}

// ============================================================================
// INODE
// ============================================================================

/// Inode record (32 bytes on disk)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inode {
    /// Content length in bytes
    pub size: u32,
    /// 5 direct pointers, then single-indirect and double-indirect (reserved)
    pub blocks: [u32; BLOCK_POINTERS],
}

impl Inode {
    /// Inode for content living in one freshly allocated block
    pub fn with_block(size: u32, block: BlockId) -> Self {
        let mut inode = Self::default();
        inode.size = size;
        inode.blocks[0] = block.0;
        inode
    }

    /// Empty file owning one data block
    pub fn new_file(block: BlockId) -> Self {
        Self::with_block(0, block)
    }

    /// Directory whose initial `.`/`..` content (`content_len` bytes) lives in `block`
    pub fn new_directory(content_len: u32, block: BlockId) -> Self {
        Self::with_block(content_len, block)
    }

    /// A record is free iff every field is zero
    pub fn is_free(&self) -> bool {
        self.size == 0 && self.blocks.iter().all(|&b| b == 0)
    }

    /// Direct block backing the `n`th block of content, if allocated
    pub fn direct(&self, n: usize) -> Option<BlockId> {
        match self.blocks.get(n) {
            Some(&b) if n < DIRECT_POINTERS && b != 0 => Some(BlockId(b)),
            _ => None,
        }
    }

    /// Number of allocated direct blocks
    pub fn data_blocks(&self) -> u32 {
        self.blocks[..DIRECT_POINTERS].iter().filter(|&&b| b != 0).count() as u32
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut blocks = [0u32; BLOCK_POINTERS];
        for (i, slot) in blocks.iter_mut().enumerate() {
            *slot = read_u32(bytes, 4 + i * 4);
        }
        Self {
            size: read_u32(bytes, 0),
            blocks,
        }
    }

    pub fn encode_into(&self, out: &mut [u8]) {
        write_u32(out, 0, self.size);
        for (i, &b) in self.blocks.iter().enumerate() {
            write_u32(out, 4 + i * 4, b);
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

// ============================================================================
// COMPILE-TIME CHECKS
// ============================================================================

const _: () = assert!(INODE_SIZE == 4 + BLOCK_POINTERS * 4);
const _: () = assert!(ROOT_BLOCK_LEN <= INODE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_reference_geometry() {
        let g = Geometry::derive(128, 4096, 80).unwrap();
        assert_eq!(g.num_free_bitmap_blocks, 4);
        assert_eq!(g.num_inode_table_blocks, 20);
        assert_eq!(g.inode_capacity(), 80);
        assert_eq!(g.metadata_blocks(), 26);
        assert_eq!(g.inode_table_start(), BlockId(5));
        assert_eq!(g.root_dir_block(), BlockId(25));
        assert_eq!(g.max_file_size(), 640);
    }

    #[test]
    fn test_derive_truncates() {
        // 4000 / 128 / 8 = 3 bitmap blocks, which only cover 3072 blocks
        assert!(matches!(Geometry::derive(128, 4000, 81), Err(FsError::InvalidGeometry(_))));

        // 81 inodes truncate to 20 table blocks
        let g = Geometry::derive(128, 4096, 81).unwrap();
        assert_eq!(g.num_free_bitmap_blocks, 4);
        assert_eq!(g.num_inode_table_blocks, 20);
        assert_eq!(g.inode_capacity(), 80);

        // Fewer inodes than fit in one block leave no table at all
        assert!(matches!(Geometry::derive(128, 4096, 3), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_validate_huge_counts() {
        let g = Geometry {
            block_size: 128,
            num_blocks: 64,
            num_free_bitmap_blocks: u32::MAX,
            num_inode_table_blocks: 1,
        };
        assert!(matches!(g.validate(), Err(FsError::InvalidGeometry(_))));

        let g = Geometry {
            block_size: u32::MAX - 31,
            num_blocks: u32::MAX,
            num_free_bitmap_blocks: u32::MAX,
            num_inode_table_blocks: u32::MAX,
        };
        assert!(matches!(g.validate(), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_derive_rejects_bad_block_size() {
        assert!(matches!(Geometry::derive(8, 4096, 80), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(Geometry::derive(100, 4096, 80), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(Geometry::derive(0, 4096, 80), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_derive_rejects_too_small_image() {
        assert!(matches!(Geometry::derive(128, 10, 80), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(Geometry::derive(128, 4096, 0), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_geometry_encode_decode() {
        let g = Geometry::derive(64, 1024, 16).unwrap();
        let block = g.encode();
        assert_eq!(block.len(), 64);
        assert!(block[ROOT_BLOCK_LEN..].iter().all(|&b| b == 0));
        assert_eq!(Geometry::decode(&block).unwrap(), g);
    }

    #[test]
    fn test_inode_location() {
        let g = Geometry::derive(128, 4096, 80).unwrap();
        assert_eq!(g.inode_location(InodeId(0)).unwrap(), (BlockId(5), 0));
        assert_eq!(g.inode_location(InodeId(3)).unwrap(), (BlockId(5), 96));
        assert_eq!(g.inode_location(InodeId(4)).unwrap(), (BlockId(6), 0));
        assert_eq!(g.inode_location(InodeId(79)).unwrap(), (BlockId(24), 96));
        assert!(matches!(g.inode_location(InodeId(80)), Err(FsError::OutOfRange)));
    }

    #[test]
    fn test_inode_free_predicate() {
        assert!(Inode::default().is_free());
        // An empty file still owns its first block, so it is occupied
        let file = Inode::with_block(0, BlockId(30));
        assert!(!file.is_free());
        assert_eq!(file.direct(0), Some(BlockId(30)));
        assert_eq!(file.direct(1), None);
        assert_eq!(file.data_blocks(), 1);
    }

    #[test]
    fn test_inode_encode_layout() {
        let mut inode = Inode::with_block(21, BlockId(25));
        inode.blocks[4] = 99;
        let mut raw = [0u8; INODE_SIZE];
        inode.encode_into(&mut raw);
        assert_eq!(&raw[0..4], &21u32.to_ne_bytes());
        assert_eq!(&raw[4..8], &25u32.to_ne_bytes());
        assert_eq!(&raw[20..24], &99u32.to_ne_bytes());
        assert_eq!(Inode::decode(&raw), inode);
    }
}
