// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tree metadata persisted in the store's opaque window.
//!
//! The first 64 bytes of the opaque window carry the page geometry and the
//! live counters; a transaction snapshot is a copy of these bytes. All
//! fields are little-endian.
//!
//! ```text
//! Offset | Size | Field
//! -------|------|-----------------------------
//! 0      | 4    | lmemb: leaf member target
//! 4      | 4    | nmemb: node member target
//! 8      | 8    | root page id
//! 16     | 8    | first leaf id
//! 24     | 8    | last leaf id
//! 32     | 8    | lnum: leaf count
//! 40     | 8    | nnum: node count
//! 48     | 8    | rnum: record count
//! 56     | 8    | reserved, zero
//! ```

use crate::error::{meta_corrupted, ReedResult};
use crate::vnum::{get_u64_le, put_u32_le, put_u64_le};

/// Size of the serialised metadata block.
pub const META_SIZE: usize = 64;

/// In-memory tree metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeMeta {
    pub lmemb: u32,
    pub nmemb: u32,
    pub root: u64,
    pub first: u64,
    pub last: u64,
    pub lnum: u64,
    pub nnum: u64,
    pub rnum: u64,
}

impl TreeMeta {
    /// Serialises the metadata into its opaque-window form.
    pub fn dump(&self) -> [u8; META_SIZE] {
        let mut bytes = [0u8; META_SIZE];
        put_u32_le(&mut bytes, 0, self.lmemb);
        put_u32_le(&mut bytes, 4, self.nmemb);
        put_u64_le(&mut bytes, 8, self.root);
        put_u64_le(&mut bytes, 16, self.first);
        put_u64_le(&mut bytes, 24, self.last);
        put_u64_le(&mut bytes, 32, self.lnum);
        put_u64_le(&mut bytes, 40, self.nnum);
        put_u64_le(&mut bytes, 48, self.rnum);
        bytes
    }

    /// Reads metadata back from the opaque window.
    pub fn load(bytes: &[u8]) -> ReedResult<Self> {
        if bytes.len() < META_SIZE {
            return Err(meta_corrupted("opaque metadata window too small"));
        }
        let lmemb = crate::vnum::get_u32_le(bytes, 0)
            .ok_or_else(|| meta_corrupted("metadata truncated"))?;
        let nmemb = crate::vnum::get_u32_le(bytes, 4)
            .ok_or_else(|| meta_corrupted("metadata truncated"))?;
        let read = |off| get_u64_le(bytes, off).ok_or_else(|| meta_corrupted("metadata truncated"));
        Ok(Self {
            lmemb,
            nmemb,
            root: read(8)?,
            first: read(16)?,
            last: read(24)?,
            lnum: read(32)?,
            nnum: read(40)?,
            rnum: read(48)?,
        })
    }
}
