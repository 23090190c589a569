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

//! File byte-range read and write: offset/size decomposition onto logical
//! blocks, with partial-block read-modify-write (spec.md §4.9).

use crate::block::BLOCK_SIZE;
use crate::errno::Result;
use crate::fs::{now_secs, Core};

/// The `[first_block, last_block]` range and the byte slice `[a, b)` each
/// block contributes, per spec.md §4.9's offset decomposition.
struct Span {
    first_block: u64,
    last_block: u64,
    first_offset: u64,
    last_len: u64,
}

fn span_of(offset: u64, size: u64) -> Span {
    let first_block = offset / BLOCK_SIZE;
    let first_offset = offset % BLOCK_SIZE;
    let end = offset + size;
    let (last_block, last_len) = if end % BLOCK_SIZE == 0 && end > 0 {
        (end / BLOCK_SIZE - 1, BLOCK_SIZE)
    } else {
        (end / BLOCK_SIZE, end % BLOCK_SIZE)
    };
    Span {
        first_block,
        last_block,
        first_offset,
        last_len,
    }
}

impl Span {
    fn slice_for(&self, iblock: u64) -> (usize, usize) {
        let a = if iblock == self.first_block { self.first_offset } else { 0 };
        let b = if iblock == self.last_block { self.last_len } else { BLOCK_SIZE };
        (a as usize, b as usize)
    }
}

impl Core {
    /// Reads `buf.len()` bytes of `inumber`'s content starting at `offset`,
    /// zero-filling any sparse holes. Always fills the whole buffer or
    /// fails — there is no partial-progress return (spec.md §4.9).
    pub(crate) fn file_read(&mut self, inumber: u64, offset: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut inode = self.read_inode(inumber)?;
        inode.set_atime(now_secs());
        self.write_inode(&inode)?;

        let span = span_of(offset, buf.len() as u64);
        let mut cursor = 0usize;
        for iblock in span.first_block..=span.last_block {
            let (a, b) = span.slice_for(iblock);
            let block = self.block_map_read(inumber, iblock)?;
            let len = b - a;
            buf[cursor..cursor + len].copy_from_slice(&block[a..b]);
            cursor += len;
        }
        Ok(())
    }

    /// Writes `buf` into `inumber`'s content starting at `offset`, extending
    /// the file and allocating fresh blocks on first touch as needed.
    pub(crate) fn file_write(&mut self, inumber: u64, offset: u64, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut inode = self.read_inode(inumber)?;
        let size_before = inode.size();
        let new_size = size_before.max(offset + buf.len() as u64);
        let now = now_secs();
        if new_size > size_before {
            inode.set_size(new_size);
            inode.set_ctime(now);
        }
        inode.set_mtime(now);
        self.write_inode(&inode)?;

        let span = span_of(offset, buf.len() as u64);
        let mut cursor = 0usize;
        for iblock in span.first_block..=span.last_block {
            let (a, b) = span.slice_for(iblock);
            let len = b - a;
            if a == 0 && b == BLOCK_SIZE as usize {
                let mut block = crate::block::zeroed_block();
                block.copy_from_slice(&buf[cursor..cursor + len]);
                self.block_map_write(inumber, iblock, &block)?;
            } else {
                let mut block = self.block_map_read(inumber, iblock)?;
                block[a..b].copy_from_slice(&buf[cursor..cursor + len]);
                self.block_map_write(inumber, iblock, &block)?;
            }
            cursor += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::{Inode, Mode, ROOT_INUMBER};
    use crate::superblock::Superblock;
    use tempfile::tempfile;

    fn core_with_file() -> Core {
        let file = tempfile().unwrap();
        file.set_len(4096 * BLOCK_SIZE).unwrap();
        let mut core = Core::for_test(file);
        core.superblock = Superblock::new(0, 4, 64, 4096, 0, 0);
        for b in (5..4096).rev() {
            core.free_block(b).unwrap();
        }
        let mut inode = Inode::zeroed(ROOT_INUMBER);
        inode.set_mode(Mode::IFREG | Mode::IRUSR | Mode::IWUSR);
        inode.set_links(1);
        core.write_inode(&inode).unwrap();
        core
    }

    #[test]
    fn write_then_read_round_trips_within_one_block() {
        let mut core = core_with_file();
        core.file_write(ROOT_INUMBER, 0, b"hello world").unwrap();
        let mut buf = [0u8; 11];
        core.file_read(ROOT_INUMBER, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn sparse_write_zero_fills_the_hole() {
        let mut core = core_with_file();
        core.file_write(ROOT_INUMBER, 1000, b"X").unwrap();
        let mut buf = [0u8; 1001];
        core.file_read(ROOT_INUMBER, 0, &mut buf).unwrap();
        assert_eq!(&buf[..1000], &[0u8; 1000][..]);
        assert_eq!(buf[1000], b'X');
        let inode = core.read_inode(ROOT_INUMBER).unwrap();
        assert_eq!(inode.size(), 1001);
    }

    #[test]
    fn sequential_writes_concatenate() {
        let mut core = core_with_file();
        core.file_write(ROOT_INUMBER, 0, b"AAA").unwrap();
        core.file_write(ROOT_INUMBER, 3, b"BBB").unwrap();
        let mut buf = [0u8; 6];
        core.file_read(ROOT_INUMBER, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"AAABBB");
    }

    #[test]
    fn write_spanning_multiple_blocks_round_trips() {
        let mut core = core_with_file();
        let data: Vec<u8> = (0..(BLOCK_SIZE * 3) as usize).map(|i| (i % 251) as u8).collect();
        core.file_write(ROOT_INUMBER, 100, &data).unwrap();
        let mut buf = vec![0u8; data.len()];
        core.file_read(ROOT_INUMBER, 100, &mut buf).unwrap();
        assert_eq!(buf, data);
    }
}
