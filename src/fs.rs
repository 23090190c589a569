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

//! Filesystem lifecycle: opening (with optional formatting) and closing, and
//! `Core`, the explicit owned-state bundle that replaces the original's
//! opaque pointers (spec.md §9).

use crate::alloc_block::{SLOTS_PER_INDEX_BLOCK, USABLE_SLOTS_PER_INDEX};
use crate::block::{zeroed_block, BlockDevice, BLOCK_SIZE};
use crate::errno::{Error, Result};
use crate::fd::FdPool;
use crate::inode::{Inode, InodeCache, Mode, ROOT_INUMBER, RECORD_SIZE};
use crate::superblock::Superblock;
use std::collections::HashMap;
use std::fs::File;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, used for every on-disk timestamp.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The in-process, single-owner bundle of everything the engine needs: the
/// open backing file, the superblock, the one-block inode cache, and the
/// file-descriptor pool.
///
/// Every method that mutates filesystem state lives in an `impl Core` block
/// local to the module that owns that piece of state (`inode.rs`,
/// `alloc_inode.rs`, `alloc_block.rs`, `dir.rs`, `file_io.rs`) — this struct
/// is intentionally just the storage the rest of the crate closes over.
#[derive(Debug)]
pub struct Core {
    pub(crate) device: BlockDevice,
    pub(crate) superblock: Superblock,
    pub(crate) inode_cache: InodeCache,
    pub(crate) fd_pool: FdPool,
    /// Open-reference counts per inumber, kept separate from the on-disk
    /// hard-link count (spec.md §9 REDESIGN FLAG: "Link-count protocol for
    /// open files"). An inode is only deallocated once both its hard-link
    /// count and its open-reference count reach zero.
    pub(crate) open_refs: HashMap<u64, u32>,
}

impl Core {
    fn bump_open_ref(&mut self, inumber: u64) {
        *self.open_refs.entry(inumber).or_insert(0) += 1;
    }

    /// Drops one open reference, returning the remaining count.
    fn drop_open_ref(&mut self, inumber: u64) -> u32 {
        match self.open_refs.get_mut(&inumber) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                self.open_refs.remove(&inumber);
                0
            }
            None => 0,
        }
    }

    fn open_ref_count(&self, inumber: u64) -> u32 {
        self.open_refs.get(&inumber).copied().unwrap_or(0)
    }

    /// Deallocates `inumber` if it is no longer reachable by any hard link
    /// or open handle.
    pub(crate) fn maybe_deallocate(&mut self, inode: Inode) -> Result<()> {
        if inode.links() == 0 && self.open_ref_count(inode.inumber()) == 0 {
            self.deallocate_inode(inode)
        } else {
            self.write_inode(&inode)
        }
    }
}

/// Computes the number of index blocks needed to account for every data
/// block exactly once, per spec.md §4.2 step 4.
fn index_blocks_needed(data_blocks: u64) -> u64 {
    // Each index block accounts for itself plus `USABLE_SLOTS_PER_INDEX`
    // data blocks; solve for the smallest chain covering `data_blocks`.
    data_blocks.div_ceil(USABLE_SLOTS_PER_INDEX as u64 + 1)
}

/// Formats `blocks` worth of backing disk in place: zeroes the inode table,
/// writes the root directory inode, threads the free-inode list, builds the
/// free-block index chain, and persists the superblock (spec.md §4.2).
///
/// `core` is constructed with a placeholder superblock by the caller; this
/// only relies on `core.device` and `core.inode_cache`, both of which work
/// independently of the superblock's contents, so the real superblock can be
/// built and installed once every other structure is on disk.
fn format(core: &mut Core, blocks: u64, uid: u32, gid: u32) -> Result<Superblock> {
    if blocks < 3 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "disk must hold at least 3 blocks",
        )));
    }
    let inode_table_blocks = std::cmp::max(1, (blocks - 1) / 16);
    let inodes_per_block = BLOCK_SIZE / RECORD_SIZE as u64;
    let inodes = inode_table_blocks * inodes_per_block;

    // Step 2: zero every inode block, then write the root inode.
    for block in 1..=inode_table_blocks {
        core.device.write(block, &zeroed_block())?;
    }
    let now = now_secs();
    let mut root = Inode::zeroed(ROOT_INUMBER);
    root.set_mode(Mode::IFDIR | Mode::IRWXU | Mode::IRGRP | Mode::IXGRP | Mode::IROTH | Mode::IXOTH);
    root.set_uid(uid);
    root.set_gid(gid);
    root.set_links(1);
    root.set_size(0);
    root.set_atime(now);
    root.set_mtime(now);
    root.set_ctime(now);
    core.write_inode(&root)?;

    // Step 3: thread the remaining inode slots into the free-inode list. The
    // list runs all the way through the last table slot, with that tail
    // holding 0 (spec.md §4.2 step 3).
    for slot in (ROOT_INUMBER + 1)..=inodes {
        let mut free = Inode::zeroed(slot);
        let next = if slot < inodes {
            slot + 1
        } else {
            0
        };
        free.set_next_free(next);
        core.write_inode(&free)?;
    }
    core.inode_cache.flush(&mut core.device)?;
    let free_inode_head = if inodes >= ROOT_INUMBER + 1 {
        ROOT_INUMBER + 1
    } else {
        0
    };

    // Step 4: build the free-block index chain over every remaining block.
    let data_start = inode_table_blocks + 1;
    let data_blocks = blocks - data_start;
    let index_blocks = index_blocks_needed(data_blocks);
    let mut remaining: Vec<u64> = ((data_start + index_blocks)..blocks).collect();
    let mut free_blocks_head = 0u64;
    for i in (0..index_blocks).rev() {
        let node_block = data_start + i;
        let mut slots = [0u64; SLOTS_PER_INDEX_BLOCK];
        slots[0] = free_blocks_head;
        let take = remaining.len().min(USABLE_SLOTS_PER_INDEX);
        for (j, b) in remaining.drain(remaining.len() - take..).enumerate() {
            slots[1 + j] = b;
        }
        let mut buf = zeroed_block();
        for (j, v) in slots.iter().enumerate() {
            buf[j * 8..(j + 1) * 8].copy_from_slice(&v.to_le_bytes());
        }
        core.device.write(node_block, &buf)?;
        free_blocks_head = node_block;
    }

    let sb = Superblock::new(now, inode_table_blocks, inodes, blocks, free_blocks_head, free_inode_head);
    sb.persist(&mut core.device)?;
    Ok(sb)
}

/// Opens (or formats) a disk.
///
/// If the signature does not match and `maybe_format` is true, the disk is
/// formatted in place. If it does not match and `maybe_format` is false,
/// this returns [`Error::NotFormatted`] rather than silently formatting —
/// resolving the Open Question in spec.md §9.
pub fn open_disk(file: File, maybe_format: bool, uid: u32, gid: u32) -> Result<Core> {
    let mut device = BlockDevice::new(file);
    let read_superblock = Superblock::read(&mut device)?;
    let mut core = Core {
        device,
        superblock: Superblock::new(0, 1, 0, 0, 0, 0),
        inode_cache: InodeCache::new(),
        fd_pool: FdPool::new(),
        open_refs: HashMap::new(),
    };
    core.superblock = if read_superblock.is_valid() {
        read_superblock
    } else if maybe_format {
        let blocks = core.device.block_count()?;
        format(&mut core, blocks, uid, gid)?
    } else {
        return Err(Error::NotFormatted);
    };
    Ok(core)
}

impl Core {
    /// Flushes the inode cache (if dirty) and persists the superblock.
    pub fn close(mut self) -> Result<()> {
        self.inode_cache.flush(&mut self.device)?;
        self.superblock.persist(&mut self.device)?;
        self.device.sync()
    }

    /// A read-only view of the on-disk layout, for callers that need to
    /// inspect formatting results directly.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Reads an arbitrary inode by number, bypassing the FD pool. Exists for
    /// tests and tooling that need to inspect inode state without an open
    /// file handle.
    pub fn debug_read_inode(&mut self, inumber: u64) -> Result<Inode> {
        self.read_inode(inumber)
    }
}

/// The process-wide handle the FUSE adapter and tests drive: a single
/// `Mutex<Core>`, acquired for the full duration of every public operation
/// and released on every return path, matching the single process-wide lock
/// in spec.md §5.
pub struct FileSystem {
    core: Mutex<Core>,
}

impl FileSystem {
    pub fn new(core: Core) -> Self {
        Self {
            core: Mutex::new(core),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consumes the handle and runs the close sequence on the underlying
    /// `Core`.
    pub fn close(self) -> Result<()> {
        self.core.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()).close()
    }
}

/// Everything `getattr` needs to answer a `stat`, derived from an [`Inode`]
/// rather than stored separately (spec.md §3 additions).
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inumber: u64,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub links: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// 512-byte sectors actually allocated, independent of `BLOCK_SIZE`.
    pub blocks: u64,
}

impl From<Inode> for Attr {
    fn from(inode: Inode) -> Self {
        let blocks = inode.allocated_direct_blocks().count() as u64 * (BLOCK_SIZE / 512);
        Self {
            inumber: inode.inumber(),
            mode: inode.mode(),
            uid: inode.uid(),
            gid: inode.gid(),
            links: inode.links(),
            size: inode.size(),
            atime: inode.atime(),
            mtime: inode.mtime(),
            ctime: inode.ctime(),
            blocks,
        }
    }
}

/// The root directory's fixed inumber, exposed so the FUSE adapter can
/// recognize the one path component this flat filesystem supports.
pub use crate::inode::ROOT_INUMBER as ROOT;

fn check_name_len(name: &str) -> Result<()> {
    if name.len() > crate::dir::MAX_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

impl FileSystem {
    /// Resolves a root-level file name to its inumber.
    pub fn lookup(&self, name: &str) -> Result<u64> {
        check_name_len(name)?;
        self.lock()
            .dir_lookup(ROOT_INUMBER, name)?
            .ok_or(Error::NotFound)
    }

    /// `stat`-equivalent metadata for an inumber already known to the
    /// caller (typically from [`FileSystem::lookup`] or a live handle).
    pub fn getattr(&self, inumber: u64) -> Result<Attr> {
        Ok(self.lock().read_inode(inumber)?.into())
    }

    /// Creates a new root-level file, or opens it in place if it already
    /// exists and `excl` is not set.
    pub fn create(&self, name: &str, mode: Mode, uid: u32, gid: u32, excl: bool, flags: i32) -> Result<(u64, Attr)> {
        check_name_len(name)?;
        let mut core = self.lock();
        if let Some(existing) = core.dir_lookup(ROOT_INUMBER, name)? {
            if excl {
                return Err(Error::AlreadyExists);
            }
            core.bump_open_ref(existing);
            let inode = core.read_inode(existing)?;
            let handle = core.fd_pool.allocate(existing, flags);
            return Ok((handle, inode.into()));
        }

        let mut inode = core.allocate_inode()?;
        let now = now_secs();
        inode.set_mode((mode & !Mode::IFMT) | Mode::IFREG);
        inode.set_uid(uid);
        inode.set_gid(gid);
        inode.set_links(0);
        inode.set_size(0);
        inode.set_atime(now);
        inode.set_mtime(now);
        inode.set_ctime(now);
        core.write_inode(&inode)?;
        core.dir_link(ROOT_INUMBER, name, inode.inumber())?;

        core.bump_open_ref(inode.inumber());
        let handle = core.fd_pool.allocate(inode.inumber(), flags);
        let inode = core.read_inode(inode.inumber())?;
        Ok((handle, inode.into()))
    }

    /// Opens an existing root-level file.
    pub fn open(&self, name: &str, flags: i32) -> Result<(u64, Attr)> {
        check_name_len(name)?;
        let inumber = {
            let mut core = self.lock();
            core.dir_lookup(ROOT_INUMBER, name)?.ok_or(Error::NotFound)?
        };
        self.open_ino(inumber, flags)
    }

    /// Opens an already-resolved inumber directly, for callers (the FUSE
    /// adapter) that already hold it from an earlier `lookup`.
    pub fn open_ino(&self, inumber: u64, flags: i32) -> Result<(u64, Attr)> {
        let mut core = self.lock();
        let inode = core.read_inode(inumber)?;
        core.bump_open_ref(inumber);
        let handle = core.fd_pool.allocate(inumber, flags);
        Ok((handle, inode.into()))
    }

    /// Releases a file handle obtained from [`FileSystem::create`] or
    /// [`FileSystem::open`], deallocating the inode if this was its last
    /// open reference and it has already been unlinked.
    pub fn release(&self, handle: u64) -> Result<()> {
        let mut core = self.lock();
        let (inumber, _flags) = core.fd_pool.get(handle)?;
        core.fd_pool.free(handle)?;
        core.drop_open_ref(inumber);
        let inode = core.read_inode(inumber)?;
        core.maybe_deallocate(inode)
    }

    /// Reads through a live handle.
    pub fn read(&self, handle: u64, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut core = self.lock();
        let (inumber, _flags) = core.fd_pool.get(handle)?;
        core.file_read(inumber, offset, buf)
    }

    /// Writes through a live handle.
    pub fn write(&self, handle: u64, offset: u64, buf: &[u8]) -> Result<()> {
        let mut core = self.lock();
        let (inumber, _flags) = core.fd_pool.get(handle)?;
        core.file_write(inumber, offset, buf)
    }

    /// Tombstones a root-level directory entry, deallocating its inode once
    /// no hard link or open handle references it.
    pub fn unlink(&self, name: &str) -> Result<()> {
        check_name_len(name)?;
        self.lock().dir_unlink(ROOT_INUMBER, name).map(|_| ())
    }

    /// Lists every live entry in the root directory.
    pub fn readdir(&self) -> Result<Vec<(String, u64)>> {
        let mut core = self.lock();
        let mut out = Vec::new();
        for outcome in core.dir_iter(ROOT_INUMBER) {
            match outcome {
                crate::dir::DirEntryOutcome::Yielded { name, inumber } => out.push((name, inumber)),
                crate::dir::DirEntryOutcome::Done => break,
                crate::dir::DirEntryOutcome::Error(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Allocates a directory handle. Only the root is a valid directory in
    /// this flat hierarchy (spec.md §9).
    pub fn opendir(&self, inumber: u64) -> Result<u64> {
        if inumber != ROOT_INUMBER {
            return Err(Error::NotFound);
        }
        let mut core = self.lock();
        Ok(core.fd_pool.allocate(inumber, 0))
    }

    /// Releases a directory handle obtained from [`FileSystem::opendir`].
    pub fn releasedir(&self, handle: u64) -> Result<()> {
        self.lock().fd_pool.free(handle)
    }

    /// Counts currently-free data blocks by walking the free-block chain.
    /// Intended for tests and diagnostics, not the hot path.
    pub fn free_block_count(&self) -> Result<u64> {
        self.lock().free_block_count()
    }
}

#[cfg(test)]
impl Core {
    /// Builds a `Core` for unit tests that exercise a single leaf module in
    /// isolation, with a placeholder superblock the test overwrites.
    pub(crate) fn for_test(file: File) -> Self {
        Self {
            device: BlockDevice::new(file),
            superblock: Superblock::new(0, 1, 0, 0, 0, 0),
            inode_cache: InodeCache::new(),
            fd_pool: FdPool::new(),
            open_refs: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    fn disk(blocks: u64) -> File {
        let file = tempfile().unwrap();
        file.set_len(blocks * BLOCK_SIZE).unwrap();
        file
    }

    #[test]
    fn format_computes_inode_table_blocks_for_one_mib_disk() {
        let file = disk(2048);
        let core = open_disk(file, true, 0, 0).unwrap();
        assert_eq!(core.superblock.inode_table_blocks(), 127);
        assert!(core.superblock.is_valid());
    }

    #[test]
    fn unformatted_disk_without_format_flag_errors() {
        let file = disk(2048);
        let err = open_disk(file, false, 0, 0).unwrap_err();
        assert!(matches!(err, Error::NotFormatted));
    }

    #[test]
    fn free_block_reachability_matches_formula() {
        let file = disk(2048);
        let mut core = open_disk(file, true, 0, 0).unwrap();
        let reserved = 1 + core.superblock.inode_table_blocks();
        let mut reachable = 0u64;
        let mut allocated = vec![];
        loop {
            match core.allocate_block() {
                Ok(b) => {
                    reachable += 1;
                    allocated.push(b);
                }
                Err(Error::OutOfBlocks) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(reachable, 2048 - reserved);
        for b in allocated {
            core.free_block(b).unwrap();
        }
    }

    #[test]
    fn root_inode_is_a_directory() {
        let file = disk(2048);
        let mut core = open_disk(file, true, 0o22, 0o22).unwrap();
        let root = core.read_inode(ROOT_INUMBER).unwrap();
        assert!(root.is_directory());
        assert_eq!(root.links(), 1);
        assert_eq!(root.size(), 0);
    }

    fn mounted_fs() -> FileSystem {
        let core = open_disk(disk(2048), true, 1000, 1000).unwrap();
        FileSystem::new(core)
    }

    #[test]
    fn create_write_read_release_reopen_round_trips() {
        let fs = mounted_fs();
        let (fh, attr) = fs.create("a.txt", Mode::IRUSR | Mode::IWUSR, 1000, 1000, true, libc::O_RDWR).unwrap();
        assert_eq!(attr.size, 0);
        fs.write(fh, 0, b"hello world").unwrap();
        fs.release(fh).unwrap();

        let (fh2, attr2) = fs.open("a.txt", libc::O_RDONLY).unwrap();
        assert_eq!(attr2.links, 1);
        let mut buf = [0u8; 11];
        fs.read(fh2, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
        fs.release(fh2).unwrap();
    }

    #[test]
    fn create_excl_twice_fails() {
        let fs = mounted_fs();
        fs.create("a", Mode::IRUSR, 0, 0, true, 0).unwrap();
        let err = fs.create("a", Mode::IRUSR, 0, 0, true, 0).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[test]
    fn create_after_tombstone_reuse_still_excl_checks() {
        let fs = mounted_fs();
        let (fh, _) = fs.create("a", Mode::IRUSR, 0, 0, true, 0).unwrap();
        fs.release(fh).unwrap();
        fs.unlink("a").unwrap();
        fs.create("a", Mode::IRUSR, 0, 0, true, 0).unwrap();
        let err = fs.create("a", Mode::IRUSR, 0, 0, true, 0).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[test]
    fn unlink_while_open_keeps_file_readable_until_release() {
        let fs = mounted_fs();
        let (fh, _) = fs.create("a", Mode::IRUSR | Mode::IWUSR, 0, 0, true, libc::O_RDWR).unwrap();
        fs.write(fh, 0, b"still here").unwrap();
        fs.unlink("a").unwrap();
        assert!(matches!(fs.lookup("a"), Err(Error::NotFound)));

        let mut buf = [0u8; 10];
        fs.read(fh, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"still here");
        fs.release(fh).unwrap();
    }

    #[test]
    fn readdir_lists_every_live_entry() {
        let fs = mounted_fs();
        for name in ["a", "b", "c"] {
            let (fh, _) = fs.create(name, Mode::IRUSR, 0, 0, true, 0).unwrap();
            fs.release(fh).unwrap();
        }
        let mut names: Vec<String> = fs.readdir().unwrap().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn opendir_rejects_non_root() {
        let fs = mounted_fs();
        assert!(matches!(fs.opendir(999), Err(Error::NotFound)));
        assert!(fs.opendir(ROOT_INUMBER).is_ok());
    }
}
