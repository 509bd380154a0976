//! Inode table access and content I/O
//!
//! Content of an inode is the concatenation of its direct blocks, truncated
//! to `size`. Blocks are allocated on growth only; nothing is ever freed.

use log::trace;

use crate::bitmap;
use crate::disk::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::{BlockId, Inode, InodeId, DIRECT_POINTERS, INODE_SIZE};

/// Read one inode record
pub fn read_inode<D: BlockDevice + ?Sized>(dev: &mut D, id: InodeId) -> FsResult<Inode> {
    let (block, offset) = dev.geometry().inode_location(id)?;
    let data = dev.read_block(block)?;
    Ok(Inode::decode(&data[offset..offset + INODE_SIZE]))
}

/// Store one inode record, preserving its neighbours in the same block
pub fn write_inode<D: BlockDevice + ?Sized>(dev: &mut D, id: InodeId, inode: &Inode) -> FsResult<()> {
    let (block, offset) = dev.geometry().inode_location(id)?;
    let mut data = dev.read_block(block)?;
    inode.encode_into(&mut data[offset..offset + INODE_SIZE]);
    dev.write_block(block, &data)
}

/// Walk the direct blocks covering `[offset, offset + len)` and hand each
/// piece to `f` as (block, offset in block, chunk length, offset in caller buffer)
fn for_each_span<D, F>(dev: &mut D, inode: &Inode, offset: u32, len: usize, mut f: F) -> FsResult<()>
where
    D: BlockDevice + ?Sized,
    F: FnMut(&mut D, BlockId, usize, usize, usize) -> FsResult<()>,
{
    let block_size = dev.geometry().block_size as usize;
    let mut done = 0usize;
    let mut pos = offset as usize;

    while done < len {
        let n = pos / block_size;
        let in_block = pos % block_size;
        let chunk = (block_size - in_block).min(len - done);
        let block = inode
            .direct(n)
            .ok_or(FsError::Corrupted("inode size exceeds its allocated blocks"))?;
        f(dev, block, in_block, chunk, done)?;
        done += chunk;
        pos += chunk;
    }
    Ok(())
}

/// Read `len` bytes of content starting at `offset`
pub fn read_content<D: BlockDevice + ?Sized>(
    dev: &mut D,
    inode: &Inode,
    offset: u32,
    len: usize,
) -> FsResult<Vec<u8>> {
    if offset as u64 + len as u64 > inode.size as u64 {
        return Err(FsError::OutOfRange);
    }
    let mut out = vec![0u8; len];
    for_each_span(dev, inode, offset, len, |dev, block, in_block, chunk, done| {
        let data = dev.read_block(block)?;
        out[done..done + chunk].copy_from_slice(&data[in_block..in_block + chunk]);
        Ok(())
    })?;
    Ok(out)
}

/// Read all content of an inode
pub fn read_all<D: BlockDevice + ?Sized>(dev: &mut D, inode: &Inode) -> FsResult<Vec<u8>> {
    read_content(dev, inode, 0, inode.size as usize)
}

/// Extend `size` to at least `new_len`, allocating any missing direct blocks
///
/// Only the in-memory inode is updated; the caller persists it.
pub fn grow<D: BlockDevice + ?Sized>(dev: &mut D, inode: &mut Inode, new_len: u32) -> FsResult<()> {
    let geometry = dev.geometry();
    if new_len > geometry.max_file_size() {
        return Err(FsError::OutOfRange);
    }
    if new_len <= inode.size {
        return Ok(());
    }

    let needed = ((new_len as u64 + geometry.block_size as u64 - 1) / geometry.block_size as u64) as usize;
    for n in 0..needed.min(DIRECT_POINTERS) {
        if inode.blocks[n] == 0 {
            let block = bitmap::allocate_block(dev)?;
            trace!("grow: direct {} -> {}", n, block);
            inode.blocks[n] = block.0;
        }
    }
    inode.size = new_len;
    Ok(())
}

/// Overwrite content in place; the range must already be within `size`
pub fn write_content<D: BlockDevice + ?Sized>(
    dev: &mut D,
    inode: &Inode,
    offset: u32,
    data: &[u8],
) -> FsResult<()> {
    if offset as u64 + data.len() as u64 > inode.size as u64 {
        return Err(FsError::OutOfRange);
    }
    for_each_span(dev, inode, offset, data.len(), |dev, block, in_block, chunk, done| {
        let mut buf = dev.read_block(block)?;
        buf[in_block..in_block + chunk].copy_from_slice(&data[done..done + chunk]);
        dev.write_block(block, &buf)
    })
}
