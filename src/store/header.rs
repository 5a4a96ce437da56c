// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! On-disk file header of the record store.
//!
//! ## Layout (256 bytes)
//! ```text
//! Offset | Size | Field
//! -------|------|---------------------------------------------
//! 0      | 24   | magic string, NUL padded
//! 24     | 1    | format version
//! 25     | 1    | flags (bit 0: open, bit 1: fatal)
//! 26     | 1    | apow (record alignment = 2^apow)
//! 27     | 1    | fpow (free pool capacity = 2^fpow)
//! 28     | 1    | option bits (bit 0: large, 1: deflate, 2: xz)
//! 29     | 3    | padding, zeroed
//! 32     | 8    | bnum: bucket count (LE)
//! 40     | 8    | rnum: record count (LE)
//! 48     | 8    | fsiz: logical file size (LE)
//! 56     | 8    | frec: offset of the first record (LE)
//! 64     | 192  | opaque window (first 64 bytes reserved by the
//!        |      | B+ tree layer, remainder caller-available)
//! ```
//! The bucket array follows at offset 256, then the serialised free-block
//! pool region, then the record region starting at `frec` (aligned to
//! 2^apow).

use crate::error::{meta_corrupted, ReedResult};
use crate::vnum::{get_u64_le, put_u64_le};

/// Total header size in bytes.
pub const HEADER_SIZE: usize = 256;

/// Magic bytes identifying a reedtree database file.
pub const MAGIC: &[u8] = b"ReedTree database\n";

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

/// Offset of the opaque window inside the header.
pub const OPAQUE_OFF: usize = 64;

/// Size of the opaque window.
pub const OPAQUE_SIZE: usize = 192;

// Field offsets.
pub const VERSION_OFF: usize = 24;
pub const FLAGS_OFF: usize = 25;
pub const APOW_OFF: usize = 26;
pub const FPOW_OFF: usize = 27;
pub const OPTS_OFF: usize = 28;
pub const BNUM_OFF: usize = 32;
pub const RNUM_OFF: usize = 40;
pub const FSIZ_OFF: usize = 48;
pub const FREC_OFF: usize = 56;

/// Flag bit: the file is (or was, after a crash) open for writing.
pub const FLAG_OPEN: u8 = 1;
/// Flag bit: a fatal error was recorded against the file.
pub const FLAG_FATAL: u8 = 2;

/// Option bit: 8-byte bucket slots for files beyond 4 GiB of extents.
pub const OPT_LARGE: u8 = 1;
/// Option bit: Deflate record-value compression.
pub const OPT_DEFLATE: u8 = 2;
/// Option bit: XZ record-value compression.
pub const OPT_XZ: u8 = 4;

/// Parsed fixed header fields.
///
/// The opaque window is not part of this struct; it is read and written in
/// place through the header map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u8,
    pub flags: u8,
    pub apow: u8,
    pub fpow: u8,
    pub opts: u8,
    pub bnum: u64,
    pub rnum: u64,
    pub fsiz: u64,
    pub frec: u64,
}

impl FileHeader {
    /// Serialises the header into its 256-byte on-disk form.
    ///
    /// The opaque window is zeroed; callers that preserve caller data write
    /// it separately.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..MAGIC.len()].copy_from_slice(MAGIC);
        bytes[VERSION_OFF] = self.version;
        bytes[FLAGS_OFF] = self.flags;
        bytes[APOW_OFF] = self.apow;
        bytes[FPOW_OFF] = self.fpow;
        bytes[OPTS_OFF] = self.opts;
        put_u64_le(&mut bytes, BNUM_OFF, self.bnum);
        put_u64_le(&mut bytes, RNUM_OFF, self.rnum);
        put_u64_le(&mut bytes, FSIZ_OFF, self.fsiz);
        put_u64_le(&mut bytes, FREC_OFF, self.frec);
        bytes
    }

    /// Parses and validates a header from its on-disk form.
    ///
    /// ## Error Conditions
    /// - Returns `ReedError::MetaCorrupted` on a short buffer, wrong magic,
    ///   unknown format version or an impossible bucket count
    pub fn from_bytes(bytes: &[u8]) -> ReedResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(meta_corrupted(format!(
                "header must be {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(meta_corrupted("magic mismatch, not a reedtree file"));
        }
        let version = bytes[VERSION_OFF];
        if version != FORMAT_VERSION {
            return Err(meta_corrupted(format!(
                "unsupported format version {}",
                version
            )));
        }
        let header = Self {
            version,
            flags: bytes[FLAGS_OFF],
            apow: bytes[APOW_OFF],
            fpow: bytes[FPOW_OFF],
            opts: bytes[OPTS_OFF],
            bnum: get_u64_le(bytes, BNUM_OFF).unwrap_or(0),
            rnum: get_u64_le(bytes, RNUM_OFF).unwrap_or(0),
            fsiz: get_u64_le(bytes, FSIZ_OFF).unwrap_or(0),
            frec: get_u64_le(bytes, FREC_OFF).unwrap_or(0),
        };
        if header.bnum < 1 {
            return Err(meta_corrupted("bucket count must be positive"));
        }
        Ok(header)
    }

    /// Width of one bucket slot in bytes (4, or 8 with the large option).
    pub fn bucket_width(&self) -> usize {
        if self.opts & OPT_LARGE != 0 {
            8
        } else {
            4
        }
    }

    /// Record alignment in bytes.
    pub fn align(&self) -> u64 {
        1u64 << self.apow
    }
}
