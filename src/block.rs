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

//! Fixed-size positional I/O against the backing diskfile.
//!
//! This is the only module that ever touches the file descriptor directly.
//! Every higher layer addresses the disk by block number.

use crate::errno::Result;
use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
};

/// The size in bytes of a single disk block.
pub const BLOCK_SIZE: u64 = 512;

/// A single zeroed-or-filled block buffer.
pub type BlockBuf = [u8; BLOCK_SIZE as usize];

/// Returns a block buffer filled with zero bytes.
pub const fn zeroed_block() -> BlockBuf {
    [0u8; BLOCK_SIZE as usize]
}

/// Fixed-size, positional block I/O against an open backing file.
#[derive(Debug)]
pub struct BlockDevice {
    file: File,
}

impl BlockDevice {
    /// Wraps an already-open backing file.
    pub fn new(file: File) -> Self {
        Self {
            file,
        }
    }

    /// Returns the total number of blocks the backing file can hold.
    pub fn block_count(&mut self) -> Result<u64> {
        let len = self.file.seek(SeekFrom::End(0))?;
        Ok(len / BLOCK_SIZE)
    }

    /// Reads `block_num`, returning its contents.
    ///
    /// A block that was never written (a short read against a sparse file,
    /// or past the current end of a file that is growing in-process) is
    /// reported the same way a successful read of an all-zero block would
    /// be: the hole is zero-filled in place. Only a genuine I/O failure
    /// propagates as [`crate::errno::Error::Io`].
    pub fn read(&mut self, block_num: u64) -> Result<BlockBuf> {
        let mut buf = zeroed_block();
        self.file.seek(SeekFrom::Start(block_num * BLOCK_SIZE))?;
        match self.file.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                buf.fill(0);
                Ok(buf)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `buf` to `block_num` in full, or fails.
    pub fn write(&mut self, block_num: u64, buf: &BlockBuf) -> Result<()> {
        self.file.seek(SeekFrom::Start(block_num * BLOCK_SIZE))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Flushes any OS-level buffering of the backing file to storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    fn disk_of(blocks: u64) -> BlockDevice {
        let file = tempfile().unwrap();
        file.set_len(blocks * BLOCK_SIZE).unwrap();
        BlockDevice::new(file)
    }

    #[test]
    fn read_of_never_written_block_is_zero() {
        let mut dev = disk_of(4);
        let buf = dev.read(2).unwrap();
        assert_eq!(buf, zeroed_block());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut dev = disk_of(4);
        let mut buf = zeroed_block();
        buf[..5].copy_from_slice(b"hello");
        dev.write(1, &buf).unwrap();
        let read_back = dev.read(1).unwrap();
        assert_eq!(read_back, buf);
    }

    #[test]
    fn block_count_matches_preallocated_size() {
        let mut dev = disk_of(2048);
        assert_eq!(dev.block_count().unwrap(), 2048);
    }
}
