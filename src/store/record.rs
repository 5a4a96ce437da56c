// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! On-disk record layout of the record store.
//!
//! ## Record layout
//! ```text
//! magic 0xc8 (1) | secondary hash (1) | left link (4|8) | right link (4|8)
//! | padsize (1) | ksiz vnum | vsiz vnum | key | value | padding
//! ```
//! Child links hold record offsets right-shifted by the alignment power;
//! a zero link means no child. A freed extent is stamped with
//! `magic 0xb0 (1) | extent size u32 LE` so file-order iteration can walk
//! across holes.

use crate::error::{meta_corrupted, ReedResult};
use crate::vnum::{read_vnum32, write_vnum32};

/// Magic byte opening a live record.
pub const RECORD_MAGIC: u8 = 0xc8;

/// Magic byte opening a freed extent.
pub const FREE_MAGIC: u8 = 0xb0;

/// Size of the freed-extent stamp (magic + u32 length).
pub const FREE_STAMP_SIZE: usize = 5;

/// Upper bound of an encoded record header, used to size header reads.
pub const HEADER_READ_SIZE: usize = 48;

/// Byte offset of the left link inside a record (fixed for in-place
/// patching; the right link follows at `2 + link width`).
pub const LEFT_LINK_OFF: u64 = 2;

/// Child side within the bucket search tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Parsed fixed part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Stored secondary hash byte.
    pub hash: u8,
    /// Left child offset (unshifted), 0 if none.
    pub left: u64,
    /// Right child offset (unshifted), 0 if none.
    pub right: u64,
    /// Padding after the value, in bytes.
    pub psiz: u8,
    /// Key length.
    pub ksiz: u32,
    /// Stored value length (compressed length when a codec is active).
    pub vsiz: u32,
    /// Offset of the key bytes from the record start.
    pub body_off: u64,
}

impl RecordHeader {
    /// Total extent size of the record including padding.
    pub fn total_size(&self) -> u64 {
        self.body_off + self.ksiz as u64 + self.vsiz as u64 + self.psiz as u64
    }

    /// Offset of the value bytes from the record start.
    pub fn value_off(&self) -> u64 {
        self.body_off + self.ksiz as u64
    }

    /// Child offset on the given side.
    pub fn child(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Width of one link field in bytes.
pub fn link_width(large: bool) -> usize {
    if large {
        8
    } else {
        4
    }
}

/// Byte offset of a link field inside a record.
pub fn link_field_off(side: Side, large: bool) -> u64 {
    match side {
        Side::Left => LEFT_LINK_OFF,
        Side::Right => LEFT_LINK_OFF + link_width(large) as u64,
    }
}

/// Encodes a link field (offset right-shifted by the alignment power).
pub fn encode_link(off: u64, large: bool, apow: u8) -> Vec<u8> {
    let shifted = off >> apow;
    if large {
        shifted.to_le_bytes().to_vec()
    } else {
        (shifted as u32).to_le_bytes().to_vec()
    }
}

fn decode_link(bytes: &[u8], large: bool, apow: u8) -> u64 {
    let shifted = if large {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(raw)
    } else {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        u32::from_le_bytes(raw) as u64
    };
    shifted << apow
}

/// Serialises a complete record, padding included.
///
/// ## Input
/// - `hash`: secondary hash byte
/// - `left` / `right`: child offsets (unshifted)
/// - `psiz`: padding to append after the value
/// - `key` / `value`: body bytes (the value already codec-encoded)
#[allow(clippy::too_many_arguments)]
pub fn encode_record(
    hash: u8,
    left: u64,
    right: u64,
    psiz: u8,
    key: &[u8],
    value: &[u8],
    large: bool,
    apow: u8,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_READ_SIZE + key.len() + value.len() + psiz as usize);
    buf.push(RECORD_MAGIC);
    buf.push(hash);
    buf.extend_from_slice(&encode_link(left, large, apow));
    buf.extend_from_slice(&encode_link(right, large, apow));
    buf.push(psiz);
    write_vnum32(&mut buf, key.len() as u32);
    write_vnum32(&mut buf, value.len() as u32);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf.resize(buf.len() + psiz as usize, 0);
    buf
}

/// Parses the fixed part of a record from a header-sized chunk.
///
/// ## Input
/// - `bytes`: at least the record's header bytes, starting at the magic
///
/// ## Error Conditions
/// - Returns `ReedError::MetaCorrupted` on a wrong magic byte or a
///   truncated header chunk
pub fn parse_record_header(bytes: &[u8], large: bool, apow: u8) -> ReedResult<RecordHeader> {
    let w = link_width(large);
    let fixed = 2 + 2 * w + 1;
    if bytes.len() < fixed {
        return Err(meta_corrupted("record header truncated"));
    }
    if bytes[0] != RECORD_MAGIC {
        return Err(meta_corrupted(format!(
            "record magic mismatch: 0x{:02x}",
            bytes[0]
        )));
    }
    let hash = bytes[1];
    let left = decode_link(&bytes[2..2 + w], large, apow);
    let right = decode_link(&bytes[2 + w..2 + 2 * w], large, apow);
    let psiz = bytes[2 + 2 * w];
    let mut pos = fixed;
    let (ksiz, width) = read_vnum32(&bytes[pos..])
        .ok_or_else(|| meta_corrupted("record key size truncated"))?;
    pos += width;
    let (vsiz, width) = read_vnum32(&bytes[pos..])
        .ok_or_else(|| meta_corrupted("record value size truncated"))?;
    pos += width;
    Ok(RecordHeader {
        hash,
        left,
        right,
        psiz,
        ksiz,
        vsiz,
        body_off: pos as u64,
    })
}

/// Stamp written over the head of a freed extent.
pub fn encode_free_stamp(size: u32) -> [u8; FREE_STAMP_SIZE] {
    let mut stamp = [0u8; FREE_STAMP_SIZE];
    stamp[0] = FREE_MAGIC;
    stamp[1..5].copy_from_slice(&size.to_le_bytes());
    stamp
}

/// Reads the extent size out of a freed-extent stamp.
pub fn parse_free_stamp(bytes: &[u8]) -> ReedResult<u32> {
    if bytes.len() < FREE_STAMP_SIZE || bytes[0] != FREE_MAGIC {
        return Err(meta_corrupted("free block stamp invalid"));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[1..5]);
    Ok(u32::from_le_bytes(raw))
}
