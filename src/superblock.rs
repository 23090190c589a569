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

//! The superblock: an in-memory copy of block 0, written through on every
//! mutation.

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::errno::Result;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The literal signature stamped into a formatted disk's block 0.
pub const SIGNATURE: [u8; 16] = *b"SFS_IS_THE_BEST\0";

/// The block number the superblock always lives at.
pub const SUPERBLOCK_BLOCK: u64 = 0;

/// The on-disk layout of the superblock: fixed 8-byte little-endian unsigned
/// integers in declaration order, as specified in spec.md §6.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, FromZeroes, AsBytes)]
struct Record {
    signature: [u8; 16],
    create_time: u64,
    block_size: u64,
    inode_table_blocks: u64,
    inodes: u64,
    blocks: u64,
    free_blocks_head: u64,
    free_inode_head: u64,
}

/// An in-memory copy of block 0.
#[derive(Debug)]
pub struct Superblock {
    record: Record,
}

impl Superblock {
    /// Reads block 0 from `dev` and parses it as a superblock, regardless of
    /// whether its signature is valid — callers check [`Superblock::is_valid`]
    /// themselves, since an invalid signature is the trigger for formatting,
    /// not an error in its own right.
    pub fn read(dev: &mut BlockDevice) -> Result<Self> {
        let block = dev.read(SUPERBLOCK_BLOCK)?;
        let record = Record::read_from_prefix(&block[..]).expect("block is large enough");
        Ok(Self {
            record,
        })
    }

    /// Builds a fresh superblock for a newly formatted disk. Does not persist
    /// it; call [`Superblock::persist`] once the inode table and free lists
    /// have been laid out.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        create_time: u64,
        inode_table_blocks: u64,
        inodes: u64,
        blocks: u64,
        free_blocks_head: u64,
        free_inode_head: u64,
    ) -> Self {
        Self {
            record: Record {
                signature: SIGNATURE,
                create_time,
                block_size: BLOCK_SIZE,
                inode_table_blocks,
                inodes,
                blocks,
                free_blocks_head,
                free_inode_head,
            },
        }
    }

    /// Whether the signature matches the literal in spec.md §3.
    pub fn is_valid(&self) -> bool {
        self.record.signature == SIGNATURE
    }

    pub fn block_size(&self) -> u64 {
        self.record.block_size
    }

    pub fn inode_table_blocks(&self) -> u64 {
        self.record.inode_table_blocks
    }

    pub fn inodes(&self) -> u64 {
        self.record.inodes
    }

    pub fn blocks(&self) -> u64 {
        self.record.blocks
    }

    pub fn free_blocks_head(&self) -> u64 {
        self.record.free_blocks_head
    }

    pub fn set_free_blocks_head(&mut self, head: u64) {
        self.record.free_blocks_head = head;
    }

    pub fn free_inode_head(&self) -> u64 {
        self.record.free_inode_head
    }

    pub fn set_free_inode_head(&mut self, head: u64) {
        self.record.free_inode_head = head;
    }

    /// Writes this superblock back to block 0. The spec's "write through on
    /// mutation" contract means this is called after every field update, not
    /// batched.
    pub fn persist(&self, dev: &mut BlockDevice) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE as usize];
        self.record
            .write_to_prefix(&mut block[..])
            .expect("block is large enough");
        dev.write(SUPERBLOCK_BLOCK, &block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_superblock_has_valid_signature() {
        let sb = Superblock::new(0, 4, 12, 2048, 100, 2);
        assert!(sb.is_valid());
    }

    #[test]
    fn round_trips_through_a_block() {
        use tempfile::tempfile;
        let file = tempfile().unwrap();
        file.set_len(BLOCK_SIZE).unwrap();
        let mut dev = BlockDevice::new(file);

        let sb = Superblock::new(123, 4, 12, 2048, 500, 2);
        sb.persist(&mut dev).unwrap();

        let reread = Superblock::read(&mut dev).unwrap();
        assert!(reread.is_valid());
        assert_eq!(reread.inode_table_blocks(), 4);
        assert_eq!(reread.inodes(), 12);
        assert_eq!(reread.blocks(), 2048);
        assert_eq!(reread.free_blocks_head(), 500);
        assert_eq!(reread.free_inode_head(), 2);
    }

    #[test]
    fn unformatted_block_is_invalid() {
        use tempfile::tempfile;
        let file = tempfile().unwrap();
        file.set_len(BLOCK_SIZE).unwrap();
        let mut dev = BlockDevice::new(file);
        let sb = Superblock::read(&mut dev).unwrap();
        assert!(!sb.is_valid());
    }
}
