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

//! CLI entry point: parse arguments, open the backing diskfile, wire the
//! logger, and hand control to the FUSE session loop (spec.md §4.13).

use clap::Parser;
use fuser::MountOption;
use log::LevelFilter;
use sfs::fs::{self, FileSystem};
use sfs::fuse_ops::SfsFuse;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "sfs", about = "A FUSE filesystem backed by a single preallocated diskfile")]
struct Args {
    /// Format the diskfile if its signature does not match, instead of
    /// refusing to mount.
    #[arg(short = 'f', long)]
    format: bool,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity (errors only).
    #[arg(short, long)]
    quiet: bool,

    /// The preallocated backing file.
    diskfile: PathBuf,

    /// An existing directory to mount the filesystem at.
    mountpoint: PathBuf,
}

fn level_from_args(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn run(args: Args) -> sfs::Result<()> {
    let level = level_from_args(args.verbose, args.quiet);
    if sfs::logger::FileLogger::init("sfs.log", level).is_err() {
        eprintln!("warning: could not open sfs.log, logging to nothing");
    }

    log::info!("opening backing file {:?}", args.diskfile);
    let file = OpenOptions::new().read(true).write(true).open(&args.diskfile)?;
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let core = fs::open_disk(file, args.format, uid, gid)?;
    let filesystem = FileSystem::new(core);

    log::info!("mounting at {:?}", args.mountpoint);
    let options = vec![MountOption::FSName("sfs".to_string()), MountOption::DefaultPermissions];
    fuser::mount2(SfsFuse::new(filesystem), &args.mountpoint, &options)?;
    log::info!("unmounted cleanly");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            eprintln!("sfs: fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
