//! Block and inode allocation
//!
//! Blocks are tracked by the free bitmap: bit `i` lives in byte `i / 8` of
//! the bitmap region at bit position `i % 8` (least significant first), and
//! a set bit means "in use". Inodes carry no bitmap; a record is free when
//! all of its fields are zero.
//!
//! Both scans are first-fit from index 0, so allocation is deterministic.

use log::trace;

use crate::disk::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::{BlockId, Geometry, Inode, InodeId, INODE_SIZE};

/// Bitmap block and in-block (byte, mask) holding the bit for `block`
fn bit_location(geometry: &Geometry, block: BlockId) -> (BlockId, usize, u8) {
    let bits_per_block = geometry.block_size as u64 * 8;
    let bitmap_block = geometry.bitmap_start().0 + (block.0 as u64 / bits_per_block) as u32;
    let bit_in_block = block.0 as u64 % bits_per_block;
    (BlockId(bitmap_block), (bit_in_block / 8) as usize, 1 << (bit_in_block % 8))
}

/// Lowest-indexed block whose bit is clear, if any
pub fn first_free_block<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<Option<BlockId>> {
    let geometry = dev.geometry();
    let bits_per_block = geometry.block_size as u64 * 8;

    for i in 0..geometry.num_free_bitmap_blocks {
        let bitmap = dev.read_block(BlockId(geometry.bitmap_start().0 + i))?;
        for (byte_idx, &byte) in bitmap.iter().enumerate() {
            if byte == 0xFF {
                continue;
            }
            let index = i as u64 * bits_per_block + byte_idx as u64 * 8 + byte.trailing_ones() as u64;
            if index >= geometry.num_blocks as u64 {
                return Ok(None);
            }
            return Ok(Some(BlockId(index as u32)));
        }
    }
    Ok(None)
}

/// Whether the bitmap marks `block` as in use
pub fn is_block_allocated<D: BlockDevice + ?Sized>(dev: &mut D, block: BlockId) -> FsResult<bool> {
    let geometry = dev.geometry();
    if block.0 >= geometry.num_blocks {
        return Err(FsError::OutOfRange);
    }
    let (bitmap_block, byte, mask) = bit_location(&geometry, block);
    let bitmap = dev.read_block(bitmap_block)?;
    Ok(bitmap[byte] & mask != 0)
}

/// Set the bit for one block, rewriting only the bitmap block that holds it
pub fn mark_block_allocated<D: BlockDevice + ?Sized>(dev: &mut D, block: BlockId) -> FsResult<()> {
    mark_range_allocated(dev, block, 1)
}

/// Set the bits for `count` consecutive blocks starting at `start`
pub fn mark_range_allocated<D: BlockDevice + ?Sized>(
    dev: &mut D,
    start: BlockId,
    count: u32,
) -> FsResult<()> {
    if count == 0 {
        return Ok(());
    }
    let geometry = dev.geometry();
    let end = start.0 as u64 + count as u64;
    if end > geometry.num_blocks as u64 {
        return Err(FsError::OutOfRange);
    }

    let mut current: Option<(BlockId, Vec<u8>)> = None;
    for index in start.0..end as u32 {
        let (bitmap_block, byte, mask) = bit_location(&geometry, BlockId(index));
        let reload = match &current {
            Some((held, _)) => *held != bitmap_block,
            None => true,
        };
        if reload {
            if let Some((held, data)) = current.take() {
                dev.write_block(held, &data)?;
            }
            current = Some((bitmap_block, dev.read_block(bitmap_block)?));
        }
        if let Some((_, data)) = current.as_mut() {
            data[byte] |= mask;
        }
    }
    if let Some((held, data)) = current {
        dev.write_block(held, &data)?;
    }
    Ok(())
}

/// Claim the first free block and zero its contents
pub fn allocate_block<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<BlockId> {
    let block = first_free_block(dev)?.ok_or(FsError::NoSpace)?;
    mark_block_allocated(dev, block)?;

    let zero = vec![0u8; dev.geometry().block_size as usize];
    dev.write_block(block, &zero)?;

    trace!("allocated {}", block);
    Ok(block)
}

/// Number of blocks whose bit is clear
pub fn free_block_count<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<u32> {
    let geometry = dev.geometry();
    let bits_per_block = geometry.block_size as u64 * 8;
    let mut used: u64 = 0;

    for i in 0..geometry.num_free_bitmap_blocks {
        let bitmap = dev.read_block(BlockId(geometry.bitmap_start().0 + i))?;
        let base = i as u64 * bits_per_block;
        for (byte_idx, &byte) in bitmap.iter().enumerate() {
            let first_bit = base + byte_idx as u64 * 8;
            if first_bit >= geometry.num_blocks as u64 {
                break;
            }
            let valid = (geometry.num_blocks as u64 - first_bit).min(8) as u32;
            let mask = if valid == 8 { 0xFF } else { (1u8 << valid) - 1 };
            used += (byte & mask).count_ones() as u64;
        }
    }
    Ok(geometry.num_blocks - used as u32)
}

/// Decoded inode records of one inode table block, with their ids
fn inode_records<D: BlockDevice + ?Sized>(
    dev: &mut D,
    table_block: u32,
) -> FsResult<Vec<(InodeId, Inode)>> {
    let geometry = dev.geometry();
    let data = dev.read_block(BlockId(geometry.inode_table_start().0 + table_block))?;
    let first = table_block * geometry.inodes_per_block();
    Ok(data
        .chunks_exact(INODE_SIZE)
        .enumerate()
        .map(|(i, raw)| (InodeId(first + i as u32), Inode::decode(raw)))
        .collect())
}

/// Lowest-indexed free inode record, if any
pub fn first_free_inode<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<Option<InodeId>> {
    let geometry = dev.geometry();
    for table_block in 0..geometry.num_inode_table_blocks {
        if let Some((id, _)) = inode_records(dev, table_block)?.into_iter().find(|(_, inode)| inode.is_free()) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Pick the first free inode
///
/// Nothing is written here: the record becomes occupied when the caller
/// stores a non-zero inode into it.
pub fn allocate_inode<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<InodeId> {
    let inode = first_free_inode(dev)?.ok_or(FsError::NoSpace)?;
    trace!("allocated {}", inode);
    Ok(inode)
}

/// Number of free inode records
pub fn free_inode_count<D: BlockDevice + ?Sized>(dev: &mut D) -> FsResult<u32> {
    let geometry = dev.geometry();
    let mut used = 0u32;
    for table_block in 0..geometry.num_inode_table_blocks {
        used += inode_records(dev, table_block)?.iter().filter(|(_, inode)| !inode.is_free()).count() as u32;
    }
    Ok(geometry.inode_capacity() - used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    fn disk() -> MemDisk {
        // 64-byte blocks: 512 bits per bitmap block, 2 inodes per table block
        MemDisk::new(Geometry::derive(64, 1024, 8).unwrap()).unwrap()
    }

    #[test]
    fn test_bit_order_is_lsb_first() {
        let mut dev = disk();
        mark_block_allocated(&mut dev, BlockId(0)).unwrap();
        mark_block_allocated(&mut dev, BlockId(9)).unwrap();
        let bitmap = dev.read_block(BlockId(1)).unwrap();
        assert_eq!(bitmap[0], 0b0000_0001);
        assert_eq!(bitmap[1], 0b0000_0010);
    }

    #[test]
    fn test_first_free_block_first_fit() {
        let mut dev = disk();
        assert_eq!(first_free_block(&mut dev).unwrap(), Some(BlockId(0)));
        mark_range_allocated(&mut dev, BlockId(0), 13).unwrap();
        assert_eq!(first_free_block(&mut dev).unwrap(), Some(BlockId(13)));
        mark_block_allocated(&mut dev, BlockId(14)).unwrap();
        assert_eq!(first_free_block(&mut dev).unwrap(), Some(BlockId(13)));
    }

    #[test]
    fn test_range_spans_bitmap_blocks() {
        let mut dev = disk();
        // Blocks 510..514 straddle bitmap blocks 1 and 2
        mark_range_allocated(&mut dev, BlockId(510), 4).unwrap();
        for b in 510..514 {
            assert!(is_block_allocated(&mut dev, BlockId(b)).unwrap());
        }
        assert!(!is_block_allocated(&mut dev, BlockId(509)).unwrap());
        assert!(!is_block_allocated(&mut dev, BlockId(514)).unwrap());
        assert_eq!(free_block_count(&mut dev).unwrap(), 1020);
    }

    #[test]
    fn test_range_out_of_bounds() {
        let mut dev = disk();
        assert!(matches!(
            mark_range_allocated(&mut dev, BlockId(1020), 5),
            Err(FsError::OutOfRange)
        ));
        assert!(matches!(is_block_allocated(&mut dev, BlockId(1024)), Err(FsError::OutOfRange)));
    }

    #[test]
    fn test_allocate_block_zeroes_and_exhausts() {
        let mut dev = disk();
        dev.write_block(BlockId(1000), &[0xEE; 64]).unwrap();
        mark_range_allocated(&mut dev, BlockId(0), 1000).unwrap();

        assert_eq!(allocate_block(&mut dev).unwrap(), BlockId(1000));
        assert!(dev.read_block(BlockId(1000)).unwrap().iter().all(|&b| b == 0));

        mark_range_allocated(&mut dev, BlockId(1001), 23).unwrap();
        assert_eq!(free_block_count(&mut dev).unwrap(), 0);
        assert_eq!(first_free_block(&mut dev).unwrap(), None);
        assert!(matches!(allocate_block(&mut dev), Err(FsError::NoSpace)));
    }

    fn partial_bitmap() -> MemDisk {
        // 600 blocks: second bitmap block only partly meaningful
        let geometry = Geometry {
            block_size: 64,
            num_blocks: 600,
            num_free_bitmap_blocks: 2,
            num_inode_table_blocks: 4,
        };
        geometry.validate().unwrap();
        MemDisk::new(geometry).unwrap()
    }

    #[test]
    fn test_bit_location_large_blocks() {
        let geometry = Geometry {
            block_size: 1 << 29,
            num_blocks: u32::MAX,
            num_free_bitmap_blocks: 1,
            num_inode_table_blocks: 1,
        };
        // 2^32 bits per bitmap block, so every block maps into the first one
        assert_eq!(bit_location(&geometry, BlockId(0)), (BlockId(1), 0, 1));
        assert_eq!(
            bit_location(&geometry, BlockId(u32::MAX - 1)),
            (BlockId(1), (u32::MAX as usize - 1) / 8, 1 << 6)
        );
    }

    #[test]
    fn test_bits_past_num_blocks_are_ignored() {
        let mut dev = partial_bitmap();
        let mut tail = vec![0u8; 64];
        tail[11] = 0xFF;
        tail[12] = 0xFF;
        dev.write_block(BlockId(2), &tail).unwrap();
        // Blocks 600..615 would live in bytes 11..12 of bitmap block 2, past the image
        assert_eq!(free_block_count(&mut dev).unwrap(), 600);

        let mut dev = partial_bitmap();
        mark_range_allocated(&mut dev, BlockId(0), 600).unwrap();
        assert_eq!(free_block_count(&mut dev).unwrap(), 0);
        assert_eq!(first_free_block(&mut dev).unwrap(), None);
    }

    #[test]
    fn test_inode_first_fit() {
        let mut dev = disk();
        assert_eq!(free_inode_count(&mut dev).unwrap(), 8);
        assert_eq!(allocate_inode(&mut dev).unwrap(), InodeId(0));

        // Occupy inodes 0..3 by writing non-zero records
        let table = dev.geometry().inode_table_start();
        let mut block = vec![0u8; 64];
        Inode::with_block(0, BlockId(40)).encode_into(&mut block[0..32]);
        Inode::with_block(0, BlockId(41)).encode_into(&mut block[32..64]);
        dev.write_block(table, &block).unwrap();
        let mut next = vec![0u8; 64];
        Inode::with_block(0, BlockId(42)).encode_into(&mut next[0..32]);
        dev.write_block(BlockId(table.0 + 1), &next).unwrap();

        assert_eq!(first_free_inode(&mut dev).unwrap(), Some(InodeId(3)));
        assert_eq!(free_inode_count(&mut dev).unwrap(), 5);
    }

    #[test]
    fn test_inode_exhaustion() {
        let mut dev = disk();
        let geometry = dev.geometry();
        let mut block = vec![0u8; 64];
        Inode::with_block(0, BlockId(40)).encode_into(&mut block[0..32]);
        Inode::with_block(0, BlockId(41)).encode_into(&mut block[32..64]);
        for i in 0..geometry.num_inode_table_blocks {
            dev.write_block(BlockId(geometry.inode_table_start().0 + i), &block).unwrap();
        }
        assert_eq!(free_inode_count(&mut dev).unwrap(), 0);
        assert!(matches!(allocate_inode(&mut dev), Err(FsError::NoSpace)));
    }
}
