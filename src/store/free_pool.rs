// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! In-memory pool of freed record extents.
//!
//! The pool indexes holes in the record region by size so overwrites and
//! new records can reuse space instead of growing the file. It is kept
//! sorted by (size, offset) for best-fit binary search, holds at most
//! `2^fpow` entries, and is serialised into a fixed header-adjacent region
//! at close. Entries never overlap and never have size zero.

use crate::error::{meta_corrupted, ReedResult};
use crate::vnum::{read_vnum64, write_vnum64};

/// One freed extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub off: u64,
    pub size: u32,
}

/// Size-sorted pool of freed extents with bounded capacity.
#[derive(Debug)]
pub struct FreePool {
    // Sorted by (size, off).
    blocks: Vec<FreeBlock>,
    capacity: usize,
}

impl FreePool {
    /// Creates an empty pool holding at most `2^fpow` entries.
    pub fn new(fpow: u8) -> Self {
        Self {
            blocks: Vec::new(),
            capacity: 1usize << fpow.min(24),
        }
    }

    /// Number of pooled extents.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Takes the smallest extent of at least `size` bytes.
    ///
    /// ## Input
    /// - `size`: requested extent size (already alignment-rounded)
    ///
    /// ## Output
    /// - `Some(block)`: the whole pooled extent, removed from the pool;
    ///   the caller stamps any surplus on disk and releases it back, so a
    ///   split never leaves an unmarked hole in the record region
    /// - `None`: no block is large enough
    ///
    /// ## Performance
    /// - O(log n) search, O(n) removal
    pub fn allocate(&mut self, size: u32) -> Option<FreeBlock> {
        if size == 0 {
            return None;
        }
        let idx = self.blocks.partition_point(|b| b.size < size);
        if idx >= self.blocks.len() {
            return None;
        }
        Some(self.blocks.remove(idx))
    }

    /// Returns an extent to the pool.
    ///
    /// When the pool would exceed its capacity it is compacted: adjacent
    /// extents merge, and if still over capacity the smallest entries are
    /// dropped (their space stays unreachable until the next optimise run).
    pub fn release(&mut self, off: u64, size: u32) {
        if size == 0 {
            return;
        }
        self.insert_sorted(FreeBlock { off, size });
        if self.blocks.len() > self.capacity {
            self.compact();
        }
    }

    fn insert_sorted(&mut self, block: FreeBlock) {
        let idx = self
            .blocks
            .partition_point(|b| (b.size, b.off) < (block.size, block.off));
        self.blocks.insert(idx, block);
    }

    /// Merges adjacent extents and trims the pool back to capacity.
    fn compact(&mut self) {
        self.blocks.sort_unstable_by_key(|b| b.off);
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            if let Some(last) = merged.last_mut() {
                let contiguous = last.off + last.size as u64 == block.off;
                if contiguous {
                    if let Some(sum) = last.size.checked_add(block.size) {
                        last.size = sum;
                        continue;
                    }
                }
            }
            merged.push(block);
        }
        merged.sort_unstable_by_key(|b| (b.size, b.off));
        let excess = merged.len().saturating_sub(self.capacity);
        if excess > 0 {
            merged.drain(..excess);
        }
        self.blocks = merged;
    }

    /// Serialises the pool into at most `region_size` bytes.
    ///
    /// Entries are written sorted by offset as (delta-offset, size) vnum
    /// pairs and terminated by a zero delta; entries that do not fit are
    /// dropped.
    pub fn serialize(&self, region_size: usize) -> Vec<u8> {
        let mut sorted = self.blocks.clone();
        sorted.sort_unstable_by_key(|b| b.off);
        let mut buf = Vec::with_capacity(region_size.min(4096));
        let mut prev = 0u64;
        for block in &sorted {
            let mut entry = Vec::with_capacity(12);
            write_vnum64(&mut entry, block.off - prev);
            write_vnum64(&mut entry, block.size as u64);
            if buf.len() + entry.len() + 1 > region_size {
                break;
            }
            buf.extend_from_slice(&entry);
            prev = block.off;
        }
        buf.push(0);
        buf
    }

    /// Restores a pool from its serialised form.
    ///
    /// ## Error Conditions
    /// - Returns `ReedError::MetaCorrupted` on truncated or zero-sized
    ///   entries
    pub fn deserialize(bytes: &[u8], fpow: u8) -> ReedResult<Self> {
        let mut pool = Self::new(fpow);
        let mut rest = bytes;
        let mut prev = 0u64;
        loop {
            let (delta, width) =
                read_vnum64(rest).ok_or_else(|| meta_corrupted("free pool region truncated"))?;
            rest = &rest[width..];
            if delta == 0 {
                break;
            }
            let (size, width) =
                read_vnum64(rest).ok_or_else(|| meta_corrupted("free pool region truncated"))?;
            rest = &rest[width..];
            if size == 0 || size > u32::MAX as u64 {
                return Err(meta_corrupted("free pool entry with impossible size"));
            }
            let off = prev + delta;
            pool.insert_sorted(FreeBlock {
                off,
                size: size as u32,
            });
            prev = off;
        }
        Ok(pool)
    }

    #[cfg(test)]
    pub(crate) fn blocks(&self) -> &[FreeBlock] {
        &self.blocks
    }
}
