// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! B+ tree page objects and their record-store serialisation.
//!
//! Leaves hold the ordered key/value records (with an extra-value list for
//! duplicated keys); internal nodes hold an heir child and the ordered
//! separator entries. Pages are persisted as records of the underlying
//! store: a leaf's store key is its id in lowercase hex, a node's is `#`
//! followed by the id minus the node-id base, keeping the two keyspaces
//! disjoint.
//!
//! ## Serialised forms
//! ```text
//! leaf: prev vnum | next vnum
//!       | [ksiz vnum, vsiz vnum, extra-count vnum,
//!          key, value, (vsiz vnum, value) * extra-count]*
//! node: heir vnum | [pid vnum, ksiz vnum, key]*
//! ```

use crate::error::{meta_corrupted, ReedResult};
use crate::vnum::{read_vnum32, read_vnum64, write_vnum32, write_vnum64};

/// Base of internal-node ids; leaf ids stay below, so an id identifies its
/// page kind.
pub const NODE_ID_BASE: u64 = (1u64 << 48) + 1;

/// Maximum depth of the descent history stack.
pub const LEVEL_MAX: usize = 64;

/// Serialised-size threshold that triggers the auxiliary leaf split rule.
pub const LEAF_DATA_MAX: usize = 32768;

/// Whether an id denotes an internal node.
pub fn is_node_id(id: u64) -> bool {
    id > NODE_ID_BASE
}

/// One leaf record: a key, its primary value and any duplicate values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRec {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Extra values of a duplicated key, oldest first.
    pub rest: Vec<Vec<u8>>,
}

impl LeafRec {
    /// Number of values stored under this key.
    pub fn value_count(&self) -> usize {
        1 + self.rest.len()
    }
}

/// Leaf page: ordered records plus the sibling chain.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub id: u64,
    pub prev: u64,
    pub next: u64,
    pub dirty: bool,
    pub recs: Vec<LeafRec>,
}

impl Leaf {
    /// Creates an empty dirty leaf.
    pub fn new(id: u64, prev: u64, next: u64) -> Self {
        Self {
            id,
            prev,
            next,
            dirty: true,
            recs: Vec::new(),
        }
    }

    /// Store key of a leaf id (lowercase hex).
    pub fn store_key(id: u64) -> String {
        format!("{:x}", id)
    }

    /// Payload bytes of the leaf, sibling ids included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        write_vnum64(&mut buf, self.prev);
        write_vnum64(&mut buf, self.next);
        for rec in &self.recs {
            write_vnum32(&mut buf, rec.key.len() as u32);
            write_vnum32(&mut buf, rec.value.len() as u32);
            write_vnum32(&mut buf, rec.rest.len() as u32);
            buf.extend_from_slice(&rec.key);
            buf.extend_from_slice(&rec.value);
            for extra in &rec.rest {
                write_vnum32(&mut buf, extra.len() as u32);
                buf.extend_from_slice(extra);
            }
        }
        buf
    }

    /// Rebuilds a clean leaf from its payload bytes.
    ///
    /// ## Error Conditions
    /// - Returns `ReedError::MetaCorrupted` on truncated records or
    ///   trailing bytes
    pub fn deserialize(id: u64, bytes: &[u8]) -> ReedResult<Self> {
        let corrupt = || meta_corrupted(format!("leaf {:x} payload damaged", id));
        let mut rest = bytes;
        let (prev, width) = read_vnum64(rest).ok_or_else(corrupt)?;
        rest = &rest[width..];
        let (next, width) = read_vnum64(rest).ok_or_else(corrupt)?;
        rest = &rest[width..];
        let mut recs = Vec::new();
        while !rest.is_empty() {
            let (ksiz, width) = read_vnum32(rest).ok_or_else(corrupt)?;
            rest = &rest[width..];
            let (vsiz, width) = read_vnum32(rest).ok_or_else(corrupt)?;
            rest = &rest[width..];
            let (extra_count, width) = read_vnum32(rest).ok_or_else(corrupt)?;
            rest = &rest[width..];
            if rest.len() < ksiz as usize + vsiz as usize {
                return Err(corrupt());
            }
            let key = rest[..ksiz as usize].to_vec();
            rest = &rest[ksiz as usize..];
            let value = rest[..vsiz as usize].to_vec();
            rest = &rest[vsiz as usize..];
            let mut extras = Vec::with_capacity(extra_count as usize);
            for _ in 0..extra_count {
                let (esiz, width) = read_vnum32(rest).ok_or_else(corrupt)?;
                rest = &rest[width..];
                if rest.len() < esiz as usize {
                    return Err(corrupt());
                }
                extras.push(rest[..esiz as usize].to_vec());
                rest = &rest[esiz as usize..];
            }
            recs.push(LeafRec {
                key,
                value,
                rest: extras,
            });
        }
        Ok(Self {
            id,
            prev,
            next,
            dirty: false,
            recs,
        })
    }

    /// Serialised body size (keys and values, headers excluded), used by
    /// the auxiliary split rule.
    pub fn data_size(&self) -> usize {
        let mut sum = 0;
        for rec in &self.recs {
            sum += rec.key.len() + rec.value.len();
            for extra in &rec.rest {
                sum += extra.len();
            }
        }
        sum
    }
}

/// One separator entry of an internal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdx {
    /// Child page id for keys at or beyond `key`.
    pub pid: u64,
    pub key: Vec<u8>,
}

/// Internal node page: heir child plus ordered separator entries.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: u64,
    pub dirty: bool,
    /// Child for keys before the first separator.
    pub heir: u64,
    pub idxs: Vec<NodeIdx>,
}

impl Node {
    pub fn new(id: u64, heir: u64) -> Self {
        Self {
            id,
            dirty: true,
            heir,
            idxs: Vec::new(),
        }
    }

    /// Store key of a node id (`#` prefix keeps it apart from leaf keys).
    pub fn store_key(id: u64) -> String {
        format!("#{:x}", id - NODE_ID_BASE)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        write_vnum64(&mut buf, self.heir);
        for idx in &self.idxs {
            write_vnum64(&mut buf, idx.pid);
            write_vnum32(&mut buf, idx.key.len() as u32);
            buf.extend_from_slice(&idx.key);
        }
        buf
    }

    pub fn deserialize(id: u64, bytes: &[u8]) -> ReedResult<Self> {
        let corrupt = || meta_corrupted(format!("node #{:x} payload damaged", id - NODE_ID_BASE));
        let mut rest = bytes;
        let (heir, width) = read_vnum64(rest).ok_or_else(corrupt)?;
        rest = &rest[width..];
        let mut idxs = Vec::new();
        while !rest.is_empty() {
            let (pid, width) = read_vnum64(rest).ok_or_else(corrupt)?;
            rest = &rest[width..];
            let (ksiz, width) = read_vnum32(rest).ok_or_else(corrupt)?;
            rest = &rest[width..];
            if rest.len() < ksiz as usize {
                return Err(corrupt());
            }
            idxs.push(NodeIdx {
                pid,
                key: rest[..ksiz as usize].to_vec(),
            });
            rest = &rest[ksiz as usize..];
        }
        Ok(Self {
            id,
            dirty: false,
            heir,
            idxs,
        })
    }
}
