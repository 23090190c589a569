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

//! The free-inode allocator: a singly linked list threaded through the
//! overloaded `size`/`next_free` field of each free inode (spec.md §4.4).

use crate::errno::{Error, Result};
use crate::fs::Core;
use crate::inode::{Inode, DIRECT_BLOCKS, NULL_INUMBER};

impl Core {
    /// Pops the head of the free-inode list and hands it back, still zeroed
    /// apart from its inumber. Callers are responsible for initializing mode,
    /// ownership, and timestamps before the inode becomes reachable.
    pub(crate) fn allocate_inode(&mut self) -> Result<Inode> {
        let head = self.superblock.free_inode_head();
        if head == NULL_INUMBER {
            return Err(Error::OutOfInodes);
        }
        let inode = self.read_inode(head)?;
        let next = inode.next_free();
        self.superblock.set_free_inode_head(next);
        self.superblock.persist(&mut self.device)?;
        Ok(Inode::zeroed(head))
    }

    /// Frees every direct block `inode` still points to, then pushes it back
    /// onto the free-inode list as the new head.
    pub(crate) fn deallocate_inode(&mut self, inode: Inode) -> Result<()> {
        let inumber = inode.inumber();
        for iblock in 0..DIRECT_BLOCKS as u64 {
            self.block_map_remove(inumber, iblock)?;
        }
        let mut freed = Inode::zeroed(inumber);
        freed.set_next_free(self.superblock.free_inode_head());
        self.write_inode(&freed)?;
        self.superblock.set_free_inode_head(inumber);
        self.superblock.persist(&mut self.device)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use crate::inode::Mode;
    use crate::superblock::Superblock;
    use tempfile::tempfile;

    /// Builds a `Core` whose inode table is `table_blocks` blocks, with every
    /// slot already threaded into the free list starting at inumber 1.
    fn core_with_free_inodes(table_blocks: u64, inodes: u64) -> Core {
        let file = tempfile().unwrap();
        file.set_len((table_blocks + 1 + 64) * BLOCK_SIZE).unwrap();
        let mut core = Core::for_test(file);
        for slot in 1..=inodes {
            let mut inode = Inode::zeroed(slot);
            let next = if slot < inodes { slot + 1 } else { 0 };
            inode.set_next_free(next);
            core.write_inode(&inode).unwrap();
        }
        core.superblock = Superblock::new(0, table_blocks, inodes, table_blocks + 1 + 64, 0, 1);
        core
    }

    #[test]
    fn allocate_walks_the_free_list_in_order() {
        let mut core = core_with_free_inodes(1, 4);
        let first = core.allocate_inode().unwrap();
        let second = core.allocate_inode().unwrap();
        assert_eq!(first.inumber(), 1);
        assert_eq!(second.inumber(), 2);
        assert_eq!(core.superblock.free_inode_head(), 3);
    }

    #[test]
    fn out_of_inodes_when_list_exhausted() {
        let mut core = core_with_free_inodes(1, 1);
        let inode = core.allocate_inode().unwrap();
        assert_eq!(inode.inumber(), 1);
        assert!(matches!(core.allocate_inode(), Err(Error::OutOfInodes)));
    }

    #[test]
    fn deallocate_frees_blocks_and_returns_to_head() {
        let mut core = core_with_free_inodes(1, 2);
        let mut inode = core.allocate_inode().unwrap();
        inode.set_mode(Mode::IFREG | Mode::IRUSR | Mode::IWUSR);
        inode.set_links(1);
        core.write_inode(&inode).unwrap();
        core.block_map_write(inode.inumber(), 0, &[7u8; BLOCK_SIZE as usize]).unwrap();

        core.deallocate_inode(inode).unwrap();
        assert_eq!(core.superblock.free_inode_head(), inode.inumber());
        let reread = core.read_inode(inode.inumber()).unwrap();
        assert_eq!(reread.allocated_direct_blocks().count(), 0);
    }
}
