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

//! The free-block allocator: a singly linked list of index blocks, each
//! holding a next-node pointer plus a bitmap-free list of block numbers
//! (spec.md §4.5).

use crate::block::{zeroed_block, BlockBuf, BLOCK_SIZE};
use crate::errno::{Error, Result};
use crate::fs::Core;
use crate::inode::NULL_INUMBER;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Number of 8-byte slots in one index block.
pub const SLOTS_PER_INDEX_BLOCK: usize = (BLOCK_SIZE / 8) as usize;
/// Slots available for free-block numbers once slot 0 is reserved for the
/// next-node pointer.
pub const USABLE_SLOTS_PER_INDEX: usize = SLOTS_PER_INDEX_BLOCK - 1;

/// A free-block index node, viewed as 64 8-byte slots: slot 0 is the next
/// node's block number (0 = end of chain), the rest are free block numbers
/// (0 = empty slot).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
struct IndexNode {
    slots: [u64; SLOTS_PER_INDEX_BLOCK],
}

impl IndexNode {
    fn next(&self) -> u64 {
        self.slots[0]
    }

    fn set_next(&mut self, next: u64) {
        self.slots[0] = next;
    }
}

impl Core {
    fn read_index_node(&mut self, block_num: u64) -> Result<IndexNode> {
        let buf = self.device.read(block_num)?;
        Ok(IndexNode::read_from(&buf[..]).expect("an index node is exactly one block"))
    }

    fn write_index_node(&mut self, block_num: u64, node: &IndexNode) -> Result<()> {
        let mut buf: BlockBuf = zeroed_block();
        node.write_to(&mut buf[..]).expect("an index node is exactly one block");
        self.device.write(block_num, &buf)
    }

    /// Hands back a free block number, or [`Error::OutOfBlocks`] if the list
    /// is exhausted.
    pub(crate) fn allocate_block(&mut self) -> Result<u64> {
        let head = self.superblock.free_blocks_head();
        if head == NULL_INUMBER {
            return Err(Error::OutOfBlocks);
        }
        let mut node = self.read_index_node(head)?;
        for slot in 1..SLOTS_PER_INDEX_BLOCK {
            if node.slots[slot] != NULL_INUMBER {
                let block = node.slots[slot];
                node.slots[slot] = NULL_INUMBER;
                self.write_index_node(head, &node)?;
                return Ok(block);
            }
        }
        // The index node holds no free blocks: repurpose it as the
        // allocated block itself, and advance the head to the next node.
        self.superblock.set_free_blocks_head(node.next());
        self.superblock.persist(&mut self.device)?;
        Ok(head)
    }

    /// Returns `block_num` to the free list.
    ///
    /// Double-free is not detected, matching spec.md §4.5 — a block already
    /// on the free list that is freed again will simply be linked in twice.
    pub(crate) fn free_block(&mut self, block_num: u64) -> Result<()> {
        let head = self.superblock.free_blocks_head();
        if head == NULL_INUMBER {
            self.device.write(block_num, &zeroed_block())?;
            self.superblock.set_free_blocks_head(block_num);
            self.superblock.persist(&mut self.device)?;
            return Ok(());
        }
        let mut current = head;
        loop {
            let mut node = self.read_index_node(current)?;
            if let Some(slot) = (1..SLOTS_PER_INDEX_BLOCK).find(|&i| node.slots[i] == NULL_INUMBER) {
                node.slots[slot] = block_num;
                self.write_index_node(current, &node)?;
                return Ok(());
            }
            let next = node.next();
            if next == NULL_INUMBER {
                // No node in the chain has room: append `block_num` as a new
                // tail, linked from `current`'s next-pointer.
                node.set_next(block_num);
                self.write_index_node(current, &node)?;
                self.device.write(block_num, &zeroed_block())?;
                return Ok(());
            }
            current = next;
        }
    }

    /// Walks the free-block chain and counts every reachable block: each
    /// index node counts as one (it is itself a free block, merely
    /// repurposed to hold the list), plus every non-null slot it carries.
    pub(crate) fn free_block_count(&mut self) -> Result<u64> {
        let mut count = 0;
        let mut current = self.superblock.free_blocks_head();
        while current != NULL_INUMBER {
            let node = self.read_index_node(current)?;
            count += 1 + node.slots[1..].iter().filter(|&&s| s != NULL_INUMBER).count() as u64;
            current = node.next();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Core;
    use crate::superblock::Superblock;
    use std::collections::HashMap;
    use tempfile::tempfile;

    /// Builds a bare `Core` whose free-block list is a single index node at
    /// `index_block`, chaining `free_blocks` as its usable slots.
    fn core_with_free_list(total_blocks: u64, index_block: u64, free_blocks: &[u64]) -> Core {
        let file = tempfile().unwrap();
        file.set_len(total_blocks * BLOCK_SIZE).unwrap();
        let mut core = Core::for_test(file);
        let mut node = IndexNode {
            slots: [0; SLOTS_PER_INDEX_BLOCK],
        };
        for (i, &b) in free_blocks.iter().enumerate() {
            node.slots[1 + i] = b;
        }
        core.write_index_node(index_block, &node).unwrap();
        core.superblock = Superblock::new(0, 1, 0, total_blocks, index_block, 0);
        core
    }

    #[test]
    fn allocate_drains_slots_before_repurposing_node() {
        let mut core = core_with_free_list(32, 10, &[20, 21]);
        let mut seen = HashMap::new();
        for _ in 0..2 {
            let b = core.allocate_block().unwrap();
            *seen.entry(b).or_insert(0) += 1;
        }
        assert_eq!(seen.remove(&20), Some(1));
        assert_eq!(seen.remove(&21), Some(1));
        // Third allocation repurposes the now-empty index node itself.
        let b = core.allocate_block().unwrap();
        assert_eq!(b, 10);
        assert_eq!(core.superblock.free_blocks_head(), 0);
    }

    #[test]
    fn free_then_allocate_round_trips() {
        let mut core = core_with_free_list(32, 10, &[]);
        core.free_block(15).unwrap();
        let b = core.allocate_block().unwrap();
        assert_eq!(b, 15);
    }

    #[test]
    fn out_of_blocks_when_list_exhausted() {
        let mut core = core_with_free_list(32, 10, &[]);
        // Drain the sole node by repurposing it.
        let b = core.allocate_block().unwrap();
        assert_eq!(b, 10);
        assert!(matches!(core.allocate_block(), Err(Error::OutOfBlocks)));
    }
}
