// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Ordered B+ tree layer over the record store.
//!
//! Leaf and node pages are serialised as store records; an LRU cache pair
//! holds hot pages with dirty write-back; cursors give ordered traversal
//! with per-occurrence granularity over duplicated keys; transactions
//! snapshot the metadata window and roll back by purging dirty pages.

pub mod cache;
mod cursor;
mod meta;
pub mod page;
mod tree;

pub use cursor::{CurPutMode, Cursor, TreeIter};
pub use tree::{
    Btree, BtreeOptions, DupMode, DEFAULT_LCNUM, DEFAULT_LMEMB, DEFAULT_NCNUM, DEFAULT_NMEMB,
    MIN_LMEMB, MIN_NMEMB,
};

#[cfg(test)]
mod cursor_test;
#[cfg(test)]
mod meta_test;
