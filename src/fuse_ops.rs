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

//! The `fuser::Filesystem` adapter: translates kernel callbacks into calls
//! against [`crate::fs::FileSystem`]'s operation vocabulary (spec.md §4.14).
//!
//! Every callback here is thin by design: resolve a path component (this
//! engine only ever has one level below the root), call into the core under
//! its single lock, and map the result onto a `fuser` reply. None of the
//! on-disk logic lives in this module.

use crate::fs::{Attr, FileSystem, ROOT};
use crate::inode::Mode;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request,
};
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);

fn epoch_plus(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn to_file_attr(attr: Attr) -> FileAttr {
    let kind = if attr.mode.is_directory() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: attr.inumber,
        size: attr.size,
        blocks: attr.blocks,
        atime: epoch_plus(attr.atime),
        mtime: epoch_plus(attr.mtime),
        ctime: epoch_plus(attr.ctime),
        crtime: epoch_plus(attr.ctime),
        kind,
        perm: attr.mode.permission_bits() as u16,
        nlink: attr.links,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: crate::block::BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// Adapts the kernel-facing `fuser::Filesystem` trait onto a
/// [`crate::fs::FileSystem`]. Holds no state of its own beyond the handle —
/// every operation acquires and releases the core's lock within a single
/// callback, never across one.
pub struct SfsFuse {
    fs: FileSystem,
}

impl SfsFuse {
    pub fn new(fs: FileSystem) -> Self {
        Self {
            fs,
        }
    }
}

fn name_str(name: &OsStr) -> Option<&str> {
    name.to_str()
}

impl Filesystem for SfsFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name_str(name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.lookup(name).and_then(|ino| self.fs.getattr(ino)) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(attr), 0),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.fs.getattr(ino) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(attr)),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let requested_mode = Mode::from_bits_truncate(mode & 0o7777);
        let excl = flags & libc::O_EXCL != 0;
        match self.fs.create(name, requested_mode, req.uid(), req.gid(), excl, flags) {
            Ok((fh, attr)) => reply.created(&TTL, &to_file_attr(attr), 0, fh, flags as u32),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.fs.open_ino(ino, flags) {
            Ok((fh, _attr)) => reply.opened(fh, 0),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let mut buf = vec![0u8; size as usize];
        match self.fs.read(fh, offset as u64, &mut buf) {
            Ok(()) => reply.data(&buf),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.fs.write(fh, offset as u64, data) {
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if parent != ROOT {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.unlink(name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.fs.opendir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        match self.fs.releasedir(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        if ino != ROOT {
            reply.error(libc::ENOENT);
            return;
        }
        let entries = match self.fs.readdir() {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.as_errno());
                return;
            }
        };
        let synthetic = [(".".to_string(), ROOT), ("..".to_string(), ROOT)];
        let all = synthetic.into_iter().chain(entries);
        for (i, (name, inumber)) in all.enumerate().skip(offset as usize) {
            let kind = if inumber == ROOT { FileType::Directory } else { FileType::RegularFile };
            if reply.add(inumber, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        // Nested directories are a non-goal (spec.md §1): the hierarchy is
        // a flat root, so there is nothing for mkdir to do but refuse.
        reply.error(libc::ENOSYS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOSYS);
    }
}
