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

//! A line-buffered `log::Log` implementation writing to `sfs.log` in the
//! working directory (spec.md §6).

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

/// Writes every log record as one line to a file, flushing immediately so a
/// crash does not lose the tail of the log.
pub struct FileLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl FileLogger {
    /// Opens (creating or appending to) `path` and installs this as the
    /// global logger.
    pub fn init(path: &str, level: LevelFilter) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let logger = Self {
            file: Mutex::new(file),
            level,
        };
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(logger)).ok();
        Ok(())
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] {}: {}\n",
            level_tag(record.level()),
            record.target(),
            record.args()
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_a_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfs.log");
        let path_str = path.to_str().unwrap();

        let logger = FileLogger {
            file: Mutex::new(OpenOptions::new().create(true).append(true).open(path_str).unwrap()),
            level: LevelFilter::Info,
        };
        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("sfs")
                .args(format_args!("mounted at /mnt"))
                .build(),
        );

        let mut contents = String::new();
        File::open(path_str).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("mounted at /mnt"));
        assert!(contents.contains("INFO"));
    }

    #[test]
    fn below_level_records_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfs.log");
        let path_str = path.to_str().unwrap();

        let logger = FileLogger {
            file: Mutex::new(OpenOptions::new().create(true).append(true).open(path_str).unwrap()),
            level: LevelFilter::Warn,
        };
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("sfs")
                .args(format_args!("should not appear"))
                .build(),
        );

        let mut contents = String::new();
        File::open(path_str).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.is_empty());
    }
}
