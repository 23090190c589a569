/*
 * Copyright 2026 sfs contributors
 *
 * This file is part of sfs.
 *
 * sfs is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * sfs is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * sfs. If not, see <https://www.gnu.org/licenses/>.
 */

//! Inode records, the one-block write-back cache that fronts the inode
//! table, and the per-inode direct block map.

use crate::block::{zeroed_block, BlockBuf, BlockDevice, BLOCK_SIZE};
use crate::errno::{CorruptReason, Error, Result};
use crate::fs::Core;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Number of direct block pointers addressable by an inode.
pub const DIRECT_BLOCKS: usize = 12;
/// Slots reserved for a future singly- and doubly-indirect pointer. Present
/// in the on-disk layout for forward compatibility; neither is implemented.
const RESERVED_BLOCK_SLOTS: usize = 2;
const BLOCK_POINTER_SLOTS: usize = DIRECT_BLOCKS + RESERVED_BLOCK_SLOTS;

/// The inumber of the root directory.
pub const ROOT_INUMBER: u64 = 1;
/// The null inode: no inode has this inumber.
pub const NULL_INUMBER: u64 = 0;

bitflags::bitflags! {
    /// The POSIX mode bits stored in an inode, file-type bits included.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mode: u32 {
        const IFMT   = libc::S_IFMT as u32;
        const IFDIR  = libc::S_IFDIR as u32;
        const IFREG  = libc::S_IFREG as u32;
        const IRWXU  = 0o700;
        const IRUSR  = 0o400;
        const IWUSR  = 0o200;
        const IXUSR  = 0o100;
        const IRWXG  = 0o070;
        const IRGRP  = 0o040;
        const IWGRP  = 0o020;
        const IXGRP  = 0o010;
        const IRWXO  = 0o007;
        const IROTH  = 0o004;
        const IWOTH  = 0o002;
        const IXOTH  = 0o001;
    }
}

impl Mode {
    /// Whether the directory file-type bit is set.
    pub fn is_directory(self) -> bool {
        (self.bits() & Self::IFMT.bits()) == Self::IFDIR.bits()
    }

    /// The `rwxrwxrwx` (plus setuid/setgid/sticky, if ever used) bits, with
    /// the file-type bits masked off.
    pub fn permission_bits(self) -> u32 {
        self.bits() & !Self::IFMT.bits()
    }
}

/// The on-disk inode record: fixed 8-byte fields in declaration order,
/// followed by the block pointer array, followed by the 4-byte fields —
/// ordered so the `repr(C)` layout needs no padding (spec.md §6 requires a
/// fixed-size record with natural alignment).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, FromZeroes, AsBytes)]
struct Record {
    inumber: u64,
    atime: u64,
    mtime: u64,
    ctime: u64,
    /// File size in bytes while the inode is live. While the inode sits on
    /// the free list, this field is overloaded to hold the inumber of the
    /// next free inode (0 = end of list) — see spec.md §3.
    size_or_next_free: u64,
    block_pointers: [u64; BLOCK_POINTER_SLOTS],
    mode: u32,
    uid: u32,
    gid: u32,
    links: u32,
}

/// The size of one inode record on disk.
pub const RECORD_SIZE: usize = std::mem::size_of::<Record>();

/// An inode: per-file metadata plus its direct block pointers.
#[derive(Clone, Copy, Debug)]
pub struct Inode(Record);

impl Inode {
    /// Builds a zeroed inode for `inumber`, ready for the caller to
    /// initialize before writing it back (spec.md §4.4).
    pub fn zeroed(inumber: u64) -> Self {
        let mut record = Record::new_zeroed();
        record.inumber = inumber;
        Self(record)
    }

    pub fn inumber(&self) -> u64 {
        self.0.inumber
    }

    pub fn mode(&self) -> Mode {
        Mode::from_bits_truncate(self.0.mode)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.0.mode = mode.bits();
    }

    pub fn is_directory(&self) -> bool {
        self.mode().is_directory()
    }

    pub fn uid(&self) -> u32 {
        self.0.uid
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.0.uid = uid;
    }

    pub fn gid(&self) -> u32 {
        self.0.gid
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.0.gid = gid;
    }

    pub fn links(&self) -> u32 {
        self.0.links
    }

    pub fn set_links(&mut self, links: u32) {
        self.0.links = links;
    }

    pub fn atime(&self) -> u64 {
        self.0.atime
    }

    pub fn set_atime(&mut self, t: u64) {
        self.0.atime = t;
    }

    pub fn mtime(&self) -> u64 {
        self.0.mtime
    }

    pub fn set_mtime(&mut self, t: u64) {
        self.0.mtime = t;
    }

    pub fn ctime(&self) -> u64 {
        self.0.ctime
    }

    pub fn set_ctime(&mut self, t: u64) {
        self.0.ctime = t;
    }

    /// The file's size in bytes. Only meaningful for a live inode.
    pub fn size(&self) -> u64 {
        self.0.size_or_next_free
    }

    pub fn set_size(&mut self, size: u64) {
        self.0.size_or_next_free = size;
    }

    /// The inumber of the next free inode in the free-inode list. Only
    /// meaningful for a free inode (spec.md §4.4).
    pub fn next_free(&self) -> u64 {
        self.0.size_or_next_free
    }

    pub fn set_next_free(&mut self, next: u64) {
        self.0.size_or_next_free = next;
    }

    pub fn block_pointer(&self, iblock: usize) -> u64 {
        self.0.block_pointers[iblock]
    }

    pub fn set_block_pointer(&mut self, iblock: usize, block: u64) {
        self.0.block_pointers[iblock] = block;
    }

    /// Direct block pointers that are actually in use, for `st_blocks`.
    pub fn allocated_direct_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.block_pointers[..DIRECT_BLOCKS]
            .iter()
            .copied()
            .filter(|&b| b != NULL_INUMBER)
    }
}

/// Maps an inumber to its `(block, slot)` position in the inode table.
fn locate(inumber: u64, inodes_per_block: u64) -> (u64, usize) {
    let index = inumber - 1;
    let block = 1 + index / inodes_per_block;
    let slot = (index % inodes_per_block) as usize;
    (block, slot)
}

/// The single-entry write-back cache described in spec.md §4.3.
///
/// Caches exactly one inode-table block. A miss flushes the dirty entry (if
/// any) before loading the new block, so a multi-step operation that stays
/// within one inode-table block never round-trips to disk until it either
/// touches a different block, the filesystem closes, or directory iteration
/// forces a flush.
#[derive(Debug)]
pub(crate) struct InodeCache {
    dirty: bool,
    /// The currently cached inode-table block number. `0` is a safe "nothing
    /// cached" sentinel: block 0 is the superblock and is never part of the
    /// inode table.
    cached_block: u64,
    payload: BlockBuf,
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            dirty: false,
            cached_block: 0,
            payload: zeroed_block(),
        }
    }

    fn ensure_loaded(&mut self, dev: &mut BlockDevice, block: u64) -> Result<()> {
        if self.cached_block != block {
            self.flush(dev)?;
            self.payload = dev.read(block)?;
            self.cached_block = block;
        }
        Ok(())
    }

    pub fn flush(&mut self, dev: &mut BlockDevice) -> Result<()> {
        if self.dirty {
            dev.write(self.cached_block, &self.payload)?;
            self.dirty = false;
        }
        Ok(())
    }
}

fn inodes_per_block() -> u64 {
    BLOCK_SIZE / RECORD_SIZE as u64
}

impl Core {
    /// Reads the inode at `inumber`, flushing and reloading the cache on a
    /// miss.
    pub(crate) fn read_inode(&mut self, inumber: u64) -> Result<Inode> {
        let (block, slot) = locate(inumber, inodes_per_block());
        self.inode_cache.ensure_loaded(&mut self.device, block)?;
        let off = slot * RECORD_SIZE;
        let record = Record::read_from(&self.inode_cache.payload[off..off + RECORD_SIZE])
            .expect("a slot always fits within its block");
        Ok(Inode(record))
    }

    /// Writes `inode` back into its table slot, via the cache.
    pub(crate) fn write_inode(&mut self, inode: &Inode) -> Result<()> {
        let (block, slot) = locate(inode.inumber(), inodes_per_block());
        self.inode_cache.ensure_loaded(&mut self.device, block)?;
        let off = slot * RECORD_SIZE;
        inode
            .0
            .write_to(&mut self.inode_cache.payload[off..off + RECORD_SIZE])
            .expect("a slot always fits within its block");
        self.inode_cache.dirty = true;
        Ok(())
    }

    /// Validates a direct block pointer against the data region: strictly
    /// past the inode table, strictly before the end of the disk.
    fn validate_block_pointer(&self, block: u64) -> Result<()> {
        let last_inode_table_block = self.superblock.inode_table_blocks();
        if block <= last_inode_table_block || block >= self.superblock.blocks() {
            return Err(Error::CorruptState(CorruptReason::BlockPointerOutOfRange {
                block,
            }));
        }
        Ok(())
    }

    /// Reads logical block `iblock` of `inumber`'s content. A hole (a zero
    /// pointer) reads as a zeroed block, not an error (spec.md §4.6).
    pub(crate) fn block_map_read(&mut self, inumber: u64, iblock: u64) -> Result<BlockBuf> {
        if iblock as usize >= DIRECT_BLOCKS {
            return Err(Error::CorruptState(CorruptReason::IndirectUnsupported { iblock }));
        }
        let inode = self.read_inode(inumber)?;
        let ptr = inode.block_pointer(iblock as usize);
        if ptr == NULL_INUMBER {
            return Ok(zeroed_block());
        }
        self.validate_block_pointer(ptr)?;
        self.device.read(ptr)
    }

    /// Writes logical block `iblock` of `inumber`'s content, allocating a
    /// fresh physical block on first touch.
    pub(crate) fn block_map_write(&mut self, inumber: u64, iblock: u64, data: &BlockBuf) -> Result<()> {
        if iblock as usize >= DIRECT_BLOCKS {
            return Err(Error::CorruptState(CorruptReason::IndirectUnsupported { iblock }));
        }
        let mut inode = self.read_inode(inumber)?;
        let mut ptr = inode.block_pointer(iblock as usize);
        if ptr == NULL_INUMBER {
            ptr = self.allocate_block()?;
            inode.set_block_pointer(iblock as usize, ptr);
            self.write_inode(&inode)?;
        } else {
            self.validate_block_pointer(ptr)?;
        }
        self.device.write(ptr, data)
    }

    /// Frees the physical block backing logical block `iblock`, if any, and
    /// clears the pointer slot.
    ///
    /// The original implementation left the slot dangling after the free,
    /// which risks a double-free on a later `deallocate` walking the same
    /// pointer; this clears it, per the REDESIGN FLAG in spec.md §9.
    pub(crate) fn block_map_remove(&mut self, inumber: u64, iblock: u64) -> Result<()> {
        if iblock as usize >= DIRECT_BLOCKS {
            return Err(Error::CorruptState(CorruptReason::IndirectUnsupported { iblock }));
        }
        let mut inode = self.read_inode(inumber)?;
        let ptr = inode.block_pointer(iblock as usize);
        if ptr != NULL_INUMBER {
            self.free_block(ptr)?;
            inode.set_block_pointer(iblock as usize, NULL_INUMBER);
            self.write_inode(&inode)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_size_has_no_padding() {
        // 5 u64 fields + 14 pointer slots (all u64) + 4 u32 fields.
        assert_eq!(RECORD_SIZE, (5 + BLOCK_POINTER_SLOTS) * 8 + 4 * 4);
    }

    #[test]
    fn mode_reports_directory_bit() {
        let mode = Mode::IFDIR | Mode::IRWXU;
        assert!(mode.is_directory());
        assert_eq!(mode.permission_bits(), 0o700);
    }

    #[test]
    fn zeroed_inode_has_null_pointers() {
        let inode = Inode::zeroed(5);
        assert_eq!(inode.inumber(), 5);
        assert_eq!(inode.allocated_direct_blocks().count(), 0);
    }
}
