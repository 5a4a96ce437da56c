// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Positional file I/O and advisory locking.
//!
//! Thin wrappers around the platform primitives that translate failures
//! into `ReedError::IoError` with operation and path context. Reads and
//! writes are positional (no shared file cursor); whole-file advisory
//! locks come from `fs2`.

use crate::error::{io_error, ReedResult};
use fs2::FileExt as LockExt;
use std::fs::File;
use std::os::unix::fs::FileExt;

#[cfg(test)]
mod fileio_test;

/// Reads exactly `buf.len()` bytes at `offset`.
///
/// ## Error Conditions
/// - Returns `ReedError::IoError` on short reads (end of file) or OS errors;
///   interrupted reads are retried by the underlying loop.
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64, path: &str) -> ReedResult<()> {
    file.read_exact_at(buf, offset)
        .map_err(|e| io_error("read", path, e.to_string()))
}

/// Reads up to `buf.len()` bytes at `offset`, stopping at end of file.
///
/// ## Output
/// - `usize`: number of bytes actually read (0 at or past end of file)
pub fn read_at_most(file: &File, buf: &mut [u8], offset: u64, path: &str) -> ReedResult<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error("read", path, e.to_string())),
        }
    }
    Ok(done)
}

/// Writes the whole buffer at `offset`.
pub fn write_all_at(file: &File, buf: &[u8], offset: u64, path: &str) -> ReedResult<()> {
    file.write_all_at(buf, offset)
        .map_err(|e| io_error("write", path, e.to_string()))
}

/// Takes the whole-file advisory lock.
///
/// ## Input
/// - `exclusive`: writer lock when true, shared reader lock otherwise
/// - `nonblocking`: fail immediately instead of waiting for the holder
///
/// ## Error Conditions
/// - Returns `ReedError::IoError` when the lock cannot be acquired; with
///   `nonblocking` this includes the would-block case.
pub fn lock_file(file: &File, exclusive: bool, nonblocking: bool, path: &str) -> ReedResult<()> {
    let result = match (exclusive, nonblocking) {
        (true, false) => LockExt::lock_exclusive(file),
        (true, true) => LockExt::try_lock_exclusive(file),
        (false, false) => LockExt::lock_shared(file),
        (false, true) => LockExt::try_lock_shared(file),
    };
    result.map_err(|e| io_error("lock", path, e.to_string()))
}

/// Releases the whole-file advisory lock.
pub fn unlock_file(file: &File, path: &str) -> ReedResult<()> {
    LockExt::unlock(file).map_err(|e| io_error("unlock", path, e.to_string()))
}

/// Flushes file contents and metadata to the device.
pub fn sync_file(file: &File, path: &str) -> ReedResult<()> {
    file.sync_all()
        .map_err(|e| io_error("sync", path, e.to_string()))
}

/// Returns the current size of the file in bytes.
pub fn file_size(file: &File, path: &str) -> ReedResult<u64> {
    let meta = file
        .metadata()
        .map_err(|e| io_error("stat", path, e.to_string()))?;
    Ok(meta.len())
}

/// Extends or truncates the file to `size` bytes.
pub fn set_file_size(file: &File, size: u64, path: &str) -> ReedResult<()> {
    file.set_len(size)
        .map_err(|e| io_error("truncate", path, e.to_string()))
}
