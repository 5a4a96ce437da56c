// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! reedtree - embedded single-file B+ tree key-value store.
//!
//! An ordered key-value database persisted to one file. Keys and values
//! are arbitrary byte strings; ordering comes from a pluggable comparator
//! (lexical by default). Duplicated keys keep a per-key value list,
//! cursors traverse every occurrence in order, and a transaction can
//! atomically commit or roll back a batch of mutations.
//!
//! ## Architecture
//!
//! - **store**: hash-indexed record store over a single file (header with
//!   opaque window, memory-mapped bucket array, free-block pool, aligned
//!   records with optional value compression)
//! - **btree**: leaf/node pages serialised as store records, LRU page
//!   caches with dirty write-back, split propagation along a descent
//!   history stack, ordered cursors, snapshot-rollback transactions
//! - **compare**: comparator capability with lexical, decimal and
//!   fixed-width integer builtins
//! - **codec**: Deflate and XZ record-value compression
//! - **vnum / fileio / error**: byte encoding, positional I/O with
//!   advisory locking, and the `ReedResult` error pattern
//!
//! ## Quick Start
//!
//! ```no_run
//! use reedtree::{Btree, OpenMode};
//!
//! let db = Btree::new();
//! db.open("data.rtd".as_ref(), OpenMode::writer_create())?;
//! db.put(b"hop", b"1")?;
//! db.put(b"step", b"2")?;
//! for entry in db.iter() {
//!     let (key, value) = entry?;
//!     println!("{}={}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
//! }
//! db.close()?;
//! # Ok::<(), reedtree::ReedError>(())
//! ```

pub mod btree;
pub mod codec;
pub mod compare;
pub mod error;
pub mod fileio;
pub mod store;
pub mod vnum;

// Re-export the commonly used types.
pub use btree::{Btree, BtreeOptions, CurPutMode, Cursor, DupMode, TreeIter};
pub use codec::Codec;
pub use compare::KeyComparator;
pub use error::{ErrorCode, ReedError, ReedResult};
pub use store::OpenMode;
