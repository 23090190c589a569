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

//! The error taxonomy shared by every layer of the core, from block I/O up to
//! the FUSE adapter.
//!
//! Internal errors (those with no direct POSIX meaning) are logged at the
//! point [`Error::as_errno`] collapses them to `-EIO`, since that is the last
//! point in the call chain that still has the original cause in hand.

use std::fmt;

/// A result carrying an [`Error`] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the core storage engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path component, directory entry, or open handle's target does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A path component exceeds [`crate::dir::MAX_NAME_LEN`] bytes.
    #[error("file name too long")]
    NameTooLong,
    /// `O_EXCL` was set and the target already exists.
    #[error("file already exists")]
    AlreadyExists,
    /// The free-inode list is exhausted.
    #[error("out of inodes")]
    OutOfInodes,
    /// The free-block list is exhausted.
    #[error("out of blocks")]
    OutOfBlocks,
    /// A file-descriptor-pool handle does not name a live slot.
    #[error("invalid handle")]
    InvalidHandle,
    /// A block pointer or allocator chain referenced a block number outside
    /// its valid range.
    #[error("corrupt filesystem state: {0}")]
    CorruptState(CorruptReason),
    /// A positional read or write against the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The operation requires functionality the engine deliberately does not
    /// implement (indirect blocks, nested directories).
    #[error("operation not supported")]
    Unsupported,
    /// `open_disk` was called with `maybe_format = false` against a disk
    /// whose superblock signature does not match.
    #[error("disk is not formatted")]
    NotFormatted,
}

/// The reason a [`Error::CorruptState`] was raised, kept as data so callers
/// that just want to log it don't have to re-derive the message.
#[derive(Debug, Clone, Copy)]
pub enum CorruptReason {
    /// A direct block pointer fell outside `(inode_table_blocks, blocks)`.
    BlockPointerOutOfRange { block: u64 },
    /// `iblock` named a logical block beyond the direct-block range.
    IndirectUnsupported { iblock: u64 },
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockPointerOutOfRange { block } => {
                write!(f, "block pointer {block} outside the valid data range")
            }
            Self::IndirectUnsupported { iblock } => {
                write!(f, "logical block {iblock} requires indirect addressing")
            }
        }
    }
}

impl Error {
    /// Projects this error onto the negative `errno` value the FUSE adapter
    /// hands back to the kernel (spec §7).
    ///
    /// Variants with no POSIX-visible meaning collapse to `EIO`, matching the
    /// "internal `-1`" return the core uses everywhere but at the FUSE
    /// boundary; the original cause is logged here since this is the last
    /// place that still has it.
    pub fn as_errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::AlreadyExists => libc::EEXIST,
            Self::OutOfInodes => libc::EDQUOT,
            Self::Unsupported => libc::EIO,
            Self::OutOfBlocks | Self::InvalidHandle | Self::NotFormatted => {
                log::error!("{self}");
                libc::EIO
            }
            Self::CorruptState(reason) => {
                log::error!("corrupt filesystem state: {reason}");
                libc::EIO
            }
            Self::Io(e) => {
                log::error!("I/O error against the backing file: {e}");
                libc::EIO
            }
        }
    }
}
