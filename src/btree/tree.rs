// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! B+ tree database object.
//!
//! Orders arbitrary byte keys through a pluggable comparator, stores leaf
//! and node pages as records of the underlying record store, and keeps hot
//! pages in two LRU caches with dirty write-back. Splits propagate upwards
//! along the history stack recorded by the latest descent, so no parent
//! pointers exist anywhere. A transaction snapshots the metadata window
//! and relies on dirty pages staying cached until commit.
//!
//! Duplicate keys live inside their leaf record as an extra-value list;
//! deletion never merges leaves (delete-heavy files are rebuilt with
//! `optimize`).

use crate::btree::cache::{LruMap, CACHE_OUT_BATCH};
use crate::btree::cursor::CursorState;
use crate::btree::meta::{TreeMeta, META_SIZE};
use crate::btree::page::{
    is_node_id, Leaf, LeafRec, Node, NodeIdx, LEAF_DATA_MAX, LEVEL_MAX, NODE_ID_BASE,
};
use crate::codec::Codec;
use crate::compare::KeyComparator;
use crate::error::{
    internal, invalid_state, meta_corrupted, no_record, rename_error, unlink_error, ReedError,
    ReedResult,
};
use crate::store::header::{OPT_DEFLATE, OPT_LARGE, OPT_XZ};
use crate::store::{OpenMode, PutMode, RecordStore, StoreOptions};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

/// Default target number of members in each leaf.
pub const DEFAULT_LMEMB: u32 = 128;
/// Minimum leaf member target.
pub const MIN_LMEMB: u32 = 4;
/// Default target number of members in each node.
pub const DEFAULT_NMEMB: u32 = 256;
/// Minimum node member target.
pub const MIN_NMEMB: u32 = 4;
/// Default leaf cache capacity.
pub const DEFAULT_LCNUM: usize = 1024;
/// Default node cache capacity.
pub const DEFAULT_NCNUM: usize = 512;

/// Sequence for unique optimise scratch files within the process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Tuning of a B+ tree database, applied when the file is created.
#[derive(Debug, Clone)]
pub struct BtreeOptions {
    /// Target member count of a leaf page (minimum 4).
    pub lmemb: u32,
    /// Target member count of a node page (minimum 4).
    pub nmemb: u32,
    /// Bucket array size of the record store.
    pub bnum: u64,
    /// Record alignment power of the record store.
    pub apow: u8,
    /// Free pool capacity power of the record store.
    pub fpow: u8,
    /// 8-byte bucket slots for very large files.
    pub large: bool,
    /// Page compression.
    pub codec: Codec,
}

impl Default for BtreeOptions {
    fn default() -> Self {
        Self {
            lmemb: DEFAULT_LMEMB,
            nmemb: DEFAULT_NMEMB,
            bnum: crate::store::DEFAULT_BNUM,
            apow: crate::store::DEFAULT_APOW,
            fpow: crate::store::DEFAULT_FPOW,
            large: false,
            codec: Codec::None,
        }
    }
}

impl BtreeOptions {
    fn normalised(&self) -> Self {
        Self {
            lmemb: self.lmemb.max(MIN_LMEMB),
            nmemb: self.nmemb.max(MIN_NMEMB),
            ..self.clone()
        }
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            bnum: self.bnum,
            apow: self.apow,
            fpow: self.fpow,
            large: self.large,
            codec: self.codec,
        }
    }
}

/// Behaviour of `put` when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupMode {
    /// Replace the primary value.
    Overwrite,
    /// Leave the record unchanged and fail with `ErrorCode::Keep`.
    Keep,
    /// Append to the primary value.
    Cat,
    /// Append the new value to the record's extra-value list.
    DupForward,
    /// Push the current primary onto the extras and make the new value the
    /// primary.
    DupBackward,
}

/// Embedded single-file B+ tree key-value store.
///
/// ## Thread Safety
/// All state sits behind one method mutex, so every API call is atomic
/// with respect to the others on the same object; the object is `Send +
/// Sync` and can be shared between threads. Queries also go through the
/// mutex because they promote cache entries.
///
/// ## Example Usage
/// ```no_run
/// use reedtree::{Btree, OpenMode};
///
/// let db = Btree::new();
/// db.open("data.rtd".as_ref(), OpenMode::writer_create())?;
/// db.put(b"hop", b"1")?;
/// assert_eq!(db.get(b"hop")?, b"1");
/// db.close()?;
/// # Ok::<(), reedtree::ReedError>(())
/// ```
pub struct Btree {
    core: Mutex<TreeCore>,
}

impl Default for Btree {
    fn default() -> Self {
        Self::new()
    }
}

impl Btree {
    /// Creates a closed database object with default tuning.
    pub fn new() -> Self {
        Self {
            core: Mutex::new(TreeCore::new()),
        }
    }

    /// Takes the method mutex. A poisoned mutex means a previous call
    /// panicked mid-mutation and the in-memory state is unreliable, so
    /// this reports through the fatal hook instead of returning.
    pub(crate) fn lock(&self) -> MutexGuard<'_, TreeCore> {
        self.core
            .lock()
            .unwrap_or_else(|_| crate::error::fatal("method mutex poisoned"))
    }

    /// Applies tuning parameters. Legal only before `open`.
    pub fn tune(&self, options: BtreeOptions) -> ReedResult<()> {
        let mut core = self.lock();
        if core.open {
            return Err(invalid_state("tune", "database already open"));
        }
        core.opts = options.normalised();
        Ok(())
    }

    /// Sets the page cache capacities. Legal only before `open`.
    pub fn set_cache(&self, lcnum: usize, ncnum: usize) -> ReedResult<()> {
        let mut core = self.lock();
        if core.open {
            return Err(invalid_state("set_cache", "database already open"));
        }
        if lcnum > 0 {
            core.lcnum = lcnum.max(LEVEL_MAX);
        }
        if ncnum > 0 {
            core.ncnum = ncnum.max(LEVEL_MAX);
        }
        Ok(())
    }

    /// Sets the key comparator. Legal only before `open`.
    ///
    /// The comparator must match the one the file was created with;
    /// ordering is not recorded in the file.
    pub fn set_comparator(&self, cmp: KeyComparator) -> ReedResult<()> {
        let mut core = self.lock();
        if core.open {
            return Err(invalid_state("set_comparator", "database already open"));
        }
        core.cmp = cmp;
        Ok(())
    }

    /// Opens a database file.
    ///
    /// A fresh writable file is seeded with one empty leaf and the
    /// metadata block; an existing file has its metadata validated and
    /// loaded (stored `lmemb`/`nmemb` win over tuned values).
    ///
    /// ## Error Conditions
    /// - `ReedError::InvalidState` when already open
    /// - `ReedError::MetaCorrupted` when the stored metadata is impossible
    /// - `ReedError::IoError` on open or lock failure
    pub fn open(&self, path: &Path, mode: OpenMode) -> ReedResult<()> {
        let mut core = self.lock();
        if core.open {
            return Err(invalid_state("open", "database already open"));
        }
        core.open_impl(path, mode)
    }

    /// Closes the database, flushing every dirty page and the metadata.
    ///
    /// An open transaction is aborted first.
    pub fn close(&self) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_open("close")?;
        core.close_impl()
    }

    /// Stores a record, replacing the value of an existing key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> ReedResult<()> {
        self.put_with(key, value, DupMode::Overwrite)
    }

    /// Stores a record, keeping an existing key unchanged.
    pub fn put_keep(&self, key: &[u8], value: &[u8]) -> ReedResult<()> {
        self.put_with(key, value, DupMode::Keep)
    }

    /// Concatenates to the primary value of a record.
    pub fn put_cat(&self, key: &[u8], value: &[u8]) -> ReedResult<()> {
        self.put_with(key, value, DupMode::Cat)
    }

    /// Stores an additional value under a key (appended to its list).
    pub fn put_dup(&self, key: &[u8], value: &[u8]) -> ReedResult<()> {
        self.put_with(key, value, DupMode::DupForward)
    }

    /// Stores an additional value under a key at the front of its list.
    pub fn put_dup_back(&self, key: &[u8], value: &[u8]) -> ReedResult<()> {
        self.put_with(key, value, DupMode::DupBackward)
    }

    /// Stores a record under an explicit duplicate policy.
    pub fn put_with(&self, key: &[u8], value: &[u8], dmode: DupMode) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("put")?;
        core.put_impl(key, value, dmode)
    }

    /// Removes one value of a record: the first extra becomes the new
    /// primary, the record disappears with its last value.
    pub fn out(&self, key: &[u8]) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("out")?;
        core.out_impl(key, false)
    }

    /// Removes a record with all its values.
    pub fn out_list(&self, key: &[u8]) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("out_list")?;
        core.out_impl(key, true)
    }

    /// Retrieves the primary value of a record.
    ///
    /// ## Error Conditions
    /// - `ReedError::NoRecord` when the key is absent
    pub fn get(&self, key: &[u8]) -> ReedResult<Vec<u8>> {
        let mut core = self.lock();
        core.require_open("get")?;
        core.get_impl(key)
    }

    /// Retrieves every value of a record, primary first.
    pub fn get_list(&self, key: &[u8]) -> ReedResult<Vec<Vec<u8>>> {
        let mut core = self.lock();
        core.require_open("get_list")?;
        core.get_list_impl(key)
    }

    /// Number of values stored under a key.
    pub fn vnum(&self, key: &[u8]) -> ReedResult<usize> {
        let mut core = self.lock();
        core.require_open("vnum")?;
        core.vnum_impl(key)
    }

    /// Size of the primary value of a record.
    pub fn vsiz(&self, key: &[u8]) -> ReedResult<usize> {
        let mut core = self.lock();
        core.require_open("vsiz")?;
        core.find_rec(key, |rec| rec.value.len())
    }

    /// Flushes dirty pages and metadata, then fsyncs the device.
    pub fn sync(&self) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("sync")?;
        if core.tran {
            return Err(invalid_state("sync", "transaction in progress"));
        }
        core.memsync_impl(true)
    }

    /// Flushes dirty pages and metadata to the OS without forcing the
    /// device.
    pub fn memsync(&self, phys: bool) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("memsync")?;
        core.memsync_impl(phys)
    }

    /// Begins a transaction: flushes caches, then snapshots the metadata
    /// window. Fails while another transaction is open.
    pub fn tran_begin(&self) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("tran_begin")?;
        if core.tran {
            return Err(invalid_state("tran_begin", "transaction already open"));
        }
        core.memsync_impl(false)?;
        let snapshot = core.meta_snapshot()?;
        core.rbopaque = Some(snapshot);
        core.tran = true;
        Ok(())
    }

    /// Commits the open transaction.
    pub fn tran_commit(&self) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("tran_commit")?;
        if !core.tran {
            return Err(invalid_state("tran_commit", "no transaction open"));
        }
        core.rbopaque = None;
        core.tran = false;
        core.memsync_impl(false)
    }

    /// Aborts the open transaction: dirty pages are discarded and the
    /// metadata snapshot reinstated.
    pub fn tran_abort(&self) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("tran_abort")?;
        if !core.tran {
            return Err(invalid_state("tran_abort", "no transaction open"));
        }
        core.abort_impl()
    }

    /// Rebuilds the database file compactly, preserving order and
    /// duplicate lists. Optional new tuning applies to the rebuilt file.
    pub fn optimize(&self, options: Option<BtreeOptions>) -> ReedResult<()> {
        let mut core = self.lock();
        core.require_writer("optimize")?;
        if core.tran {
            return Err(invalid_state("optimize", "transaction in progress"));
        }
        core.optimize_impl(options)
    }

    /// Number of records (duplicate values counted individually).
    pub fn rnum(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("rnum")?;
        Ok(core.meta.rnum)
    }

    /// Number of leaf pages.
    pub fn lnum(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("lnum")?;
        Ok(core.meta.lnum)
    }

    /// Number of node pages.
    pub fn nnum(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("nnum")?;
        Ok(core.meta.nnum)
    }

    /// Logical database file size.
    pub fn fsiz(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("fsiz")?;
        Ok(core.store.as_ref().map(|s| s.fsiz()).unwrap_or(0))
    }

    /// Bucket array size of the underlying store.
    pub fn bnum(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("bnum")?;
        Ok(core.store.as_ref().map(|s| s.bnum()).unwrap_or(0))
    }

    /// Record alignment of the underlying store in bytes.
    pub fn align(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("align")?;
        Ok(core.store.as_ref().map(|s| s.align()).unwrap_or(0))
    }

    /// Free pool capacity of the underlying store.
    pub fn fbpmax(&self) -> ReedResult<u64> {
        let core = self.lock();
        core.require_open("fbpmax")?;
        Ok(core.store.as_ref().map(|s| s.fbpmax()).unwrap_or(0))
    }

    /// Raw option bits of the underlying store.
    pub fn opts(&self) -> ReedResult<u8> {
        let core = self.lock();
        core.require_open("opts")?;
        Ok(core.store.as_ref().map(|s| s.opts()).unwrap_or(0))
    }

    /// Whether the root page is an internal node.
    pub fn root_is_node(&self) -> ReedResult<bool> {
        let core = self.lock();
        core.require_open("root_is_node")?;
        Ok(is_node_id(core.meta.root))
    }

    /// Database file path.
    pub fn path(&self) -> ReedResult<PathBuf> {
        let core = self.lock();
        core.require_open("path")?;
        core.store
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .ok_or_else(|| internal("store missing while open"))
    }

    /// Whether the connection is writable.
    pub fn writable(&self) -> ReedResult<bool> {
        let core = self.lock();
        core.require_open("writable")?;
        Ok(core.wmode)
    }
}

// == INTERNAL STATE ==

pub(crate) struct TreeCore {
    pub(crate) open: bool,
    pub(crate) wmode: bool,
    pub(crate) opts: BtreeOptions,
    pub(crate) cmp: KeyComparator,
    pub(crate) lcnum: usize,
    pub(crate) ncnum: usize,
    pub(crate) store: Option<RecordStore>,
    pub(crate) meta: TreeMeta,
    pub(crate) leaves: LruMap<Leaf>,
    pub(crate) nodes: LruMap<Node>,
    pub(crate) hist: Vec<u64>,
    pub(crate) hleaf: u64,
    pub(crate) lleaf: u64,
    pub(crate) tran: bool,
    pub(crate) rbopaque: Option<[u8; META_SIZE]>,
    pub(crate) omode: Option<OpenMode>,
}

/// Binary-searches the ordered records of a leaf.
///
/// Returns the insertion position and whether the key is present there.
pub(crate) fn leaf_search_pos(
    recs: &[LeafRec],
    cmp: &KeyComparator,
    key: &[u8],
) -> (usize, bool) {
    let pos = recs.partition_point(|rec| cmp.compare(key, &rec.key) == Ordering::Greater);
    let found = pos < recs.len() && cmp.compare(key, &recs[pos].key) == Ordering::Equal;
    (pos, found)
}

fn node_add_idx(node: &mut Node, cmp: &KeyComparator, pid: u64, key: Vec<u8>) {
    // Equal separators occur with heavy duplication; the new entry goes
    // after them, matching the descent rule that the last separator at or
    // below the key wins.
    let pos = node
        .idxs
        .partition_point(|idx| cmp.compare(&key, &idx.key) != Ordering::Less);
    node.idxs.insert(pos, NodeIdx { pid, key });
    node.dirty = true;
}

impl TreeCore {
    fn new() -> Self {
        Self {
            open: false,
            wmode: false,
            opts: BtreeOptions::default(),
            cmp: KeyComparator::default(),
            lcnum: DEFAULT_LCNUM,
            ncnum: DEFAULT_NCNUM,
            store: None,
            meta: TreeMeta::default(),
            leaves: LruMap::new(),
            nodes: LruMap::new(),
            hist: Vec::with_capacity(LEVEL_MAX),
            hleaf: 0,
            lleaf: 0,
            tran: false,
            rbopaque: None,
            omode: None,
        }
    }

    pub(crate) fn require_open(&self, operation: &str) -> ReedResult<()> {
        if !self.open {
            return Err(invalid_state(operation, "database not open"));
        }
        Ok(())
    }

    pub(crate) fn require_writer(&self, operation: &str) -> ReedResult<()> {
        self.require_open(operation)?;
        if !self.wmode {
            return Err(invalid_state(operation, "database opened read-only"));
        }
        Ok(())
    }

    fn store_mut(&mut self) -> ReedResult<&mut RecordStore> {
        self.store
            .as_mut()
            .ok_or_else(|| internal("store missing while open"))
    }

    // == OPEN / CLOSE ==

    fn open_impl(&mut self, path: &Path, mode: OpenMode) -> ReedResult<()> {
        let store_opts = self.opts.store_options();
        let mut store = RecordStore::open(path, mode, &store_opts)?;
        self.leaves.clear();
        self.nodes.clear();
        self.hist.clear();
        if mode.writer && store.rnum() < 1 {
            // Fresh file: one empty leaf is the whole tree.
            self.meta = TreeMeta {
                lmemb: self.opts.lmemb,
                nmemb: self.opts.nmemb,
                root: 1,
                first: 1,
                last: 1,
                lnum: 1,
                nnum: 0,
                rnum: 0,
            };
            self.leaves.insert(1, Leaf::new(1, 0, 0));
            store.write_opaque(&self.meta.dump())?;
        }
        let window: Vec<u8> = store.read_opaque().to_vec();
        let meta = TreeMeta::load(&window)?;
        if meta.lmemb < MIN_LMEMB
            || meta.nmemb < MIN_NMEMB
            || meta.root < 1
            || meta.first < 1
            || meta.last < 1
            || meta.lnum < 1
        {
            let _ = store.close();
            self.leaves.clear();
            return Err(meta_corrupted("tree metadata out of range"));
        }
        self.meta = meta;
        self.store = Some(store);
        self.open = true;
        self.wmode = mode.writer;
        self.omode = Some(mode);
        self.hleaf = 0;
        self.lleaf = 0;
        self.tran = false;
        self.rbopaque = None;
        Ok(())
    }

    fn close_impl(&mut self) -> ReedResult<()> {
        let mut result = Ok(());
        if self.tran {
            if let Err(e) = self.abort_impl() {
                result = Err(e);
            }
        }
        for id in self.leaves.ids() {
            if let Err(e) = self.evict_leaf(id) {
                result = Err(e);
            }
        }
        for id in self.nodes.ids() {
            if let Err(e) = self.evict_node(id) {
                result = Err(e);
            }
        }
        if self.wmode {
            if let Err(e) = self.dump_meta() {
                result = Err(e);
            }
        }
        self.open = false;
        self.wmode = false;
        self.hleaf = 0;
        self.lleaf = 0;
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                result = Err(e);
            }
        }
        result
    }

    // == METADATA ==

    fn dump_meta(&mut self) -> ReedResult<()> {
        let bytes = self.meta.dump();
        self.store_mut()?.write_opaque(&bytes)
    }

    fn load_meta(&mut self) -> ReedResult<()> {
        let window: Vec<u8> = self
            .store
            .as_ref()
            .ok_or_else(|| internal("store missing while open"))?
            .read_opaque()
            .to_vec();
        self.meta = TreeMeta::load(&window)?;
        Ok(())
    }

    fn meta_snapshot(&self) -> ReedResult<[u8; META_SIZE]> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| internal("store missing while open"))?;
        let mut snapshot = [0u8; META_SIZE];
        snapshot.copy_from_slice(&store.read_opaque()[..META_SIZE]);
        Ok(snapshot)
    }

    // == PAGE LIFECYCLE ==

    pub(crate) fn load_leaf(&mut self, id: u64) -> ReedResult<()> {
        if self.leaves.get_mut(id).is_some() {
            return Ok(());
        }
        let key = Leaf::store_key(id);
        let payload = self
            .store_mut()?
            .get(key.as_bytes())
            .map_err(|_| internal(format!("leaf {:x} missing from the store", id)))?;
        let leaf = Leaf::deserialize(id, &payload)?;
        self.leaves.insert(id, leaf);
        Ok(())
    }

    pub(crate) fn leaf_mut(&mut self, id: u64) -> ReedResult<&mut Leaf> {
        self.load_leaf(id)?;
        self.leaves
            .peek_mut(id)
            .ok_or_else(|| internal("leaf vanished from the cache"))
    }

    fn save_leaf(&mut self, id: u64) -> ReedResult<()> {
        let (key, payload) = {
            let leaf = self
                .leaves
                .peek(id)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            if !leaf.dirty {
                return Ok(());
            }
            (Leaf::store_key(id), leaf.serialize())
        };
        self.store_mut()?
            .put(key.as_bytes(), &payload, PutMode::Overwrite)?;
        if let Some(leaf) = self.leaves.peek_mut(id) {
            leaf.dirty = false;
        }
        Ok(())
    }

    fn evict_leaf(&mut self, id: u64) -> ReedResult<()> {
        self.save_leaf(id)?;
        self.leaves.remove(id);
        Ok(())
    }

    fn load_node(&mut self, id: u64) -> ReedResult<()> {
        if self.nodes.get_mut(id).is_some() {
            return Ok(());
        }
        let key = Node::store_key(id);
        let payload = self
            .store_mut()?
            .get(key.as_bytes())
            .map_err(|_| internal(format!("node {} missing from the store", key)))?;
        let node = Node::deserialize(id, &payload)?;
        self.nodes.insert(id, node);
        Ok(())
    }

    fn node_mut(&mut self, id: u64) -> ReedResult<&mut Node> {
        self.load_node(id)?;
        self.nodes
            .peek_mut(id)
            .ok_or_else(|| internal("node vanished from the cache"))
    }

    fn save_node(&mut self, id: u64) -> ReedResult<()> {
        let (key, payload) = {
            let node = self
                .nodes
                .peek(id)
                .ok_or_else(|| internal("node vanished from the cache"))?;
            if !node.dirty {
                return Ok(());
            }
            (Node::store_key(id), node.serialize())
        };
        self.store_mut()?
            .put(key.as_bytes(), &payload, PutMode::Overwrite)?;
        if let Some(node) = self.nodes.peek_mut(id) {
            node.dirty = false;
        }
        Ok(())
    }

    fn evict_node(&mut self, id: u64) -> ReedResult<()> {
        self.save_node(id)?;
        self.nodes.remove(id);
        Ok(())
    }

    fn new_leaf(&mut self, prev: u64, next: u64) -> u64 {
        self.meta.lnum += 1;
        let id = self.meta.lnum;
        self.leaves.insert(id, Leaf::new(id, prev, next));
        id
    }

    fn new_node(&mut self, heir: u64) -> u64 {
        self.meta.nnum += 1;
        let id = self.meta.nnum + NODE_ID_BASE;
        self.nodes.insert(id, Node::new(id, heir));
        id
    }

    // == CACHE POLICY ==

    /// Evicts a batch of cold pages once a cache runs past its capacity.
    /// Never called inside a transaction, so transactional dirty pages
    /// cannot reach the file before commit.
    fn cache_adjust(&mut self) -> ReedResult<()> {
        if self.leaves.len() > self.lcnum {
            for id in self.leaves.eldest(CACHE_OUT_BATCH) {
                self.evict_leaf(id)?;
            }
        }
        if self.nodes.len() > self.ncnum {
            for id in self.nodes.eldest(CACHE_OUT_BATCH) {
                self.evict_node(id)?;
            }
        }
        Ok(())
    }

    /// Drops every dirty page without saving it (transaction abort).
    fn cache_purge(&mut self) {
        for id in self.leaves.ids() {
            if self.leaves.peek(id).map(|l| l.dirty).unwrap_or(false) {
                self.leaves.remove(id);
            }
        }
        for id in self.nodes.ids() {
            if self.nodes.peek(id).map(|n| n.dirty).unwrap_or(false) {
                self.nodes.remove(id);
            }
        }
    }

    pub(crate) fn memsync_impl(&mut self, phys: bool) -> ReedResult<()> {
        for id in self.leaves.ids() {
            self.save_leaf(id)?;
        }
        for id in self.nodes.ids() {
            self.save_node(id)?;
        }
        self.dump_meta()?;
        self.store_mut()?.sync(phys)
    }

    fn abort_impl(&mut self) -> ReedResult<()> {
        self.cache_purge();
        let snapshot = self
            .rbopaque
            .take()
            .ok_or_else(|| internal("transaction snapshot missing"))?;
        self.store_mut()?.write_opaque(&snapshot)?;
        self.load_meta()?;
        self.tran = false;
        self.hleaf = 0;
        self.lleaf = 0;
        Ok(())
    }

    // == SEARCH ==

    /// Descends from the root to the leaf responsible for `key`, recording
    /// every visited node id in the history stack.
    pub(crate) fn search_leaf(&mut self, key: &[u8]) -> ReedResult<u64> {
        let cmp = self.cmp.clone();
        self.hist.clear();
        self.hleaf = 0;
        let mut pid = self.meta.root;
        while is_node_id(pid) {
            if self.hist.len() >= LEVEL_MAX {
                return Err(meta_corrupted("tree deeper than the history stack"));
            }
            self.load_node(pid)?;
            self.hist.push(pid);
            let node = self
                .nodes
                .get_mut(pid)
                .ok_or_else(|| internal("node vanished from the cache"))?;
            if node.idxs.is_empty() {
                return Err(internal(format!("node {} has no separators", pid)));
            }
            let pos = node
                .idxs
                .partition_point(|idx| cmp.compare(key, &idx.key) != Ordering::Less);
            pid = if pos == 0 {
                node.heir
            } else {
                node.idxs[pos - 1].pid
            };
        }
        if self.lleaf == pid {
            self.hleaf = pid;
        }
        self.lleaf = pid;
        Ok(pid)
    }

    /// Tries to reuse the hot leaf without re-descending.
    ///
    /// Mirrors the original's fast path: load failures fall back to a full
    /// search instead of surfacing, since the hint may be stale after an
    /// abort.
    fn hist_leaf(&mut self, key: &[u8]) -> Option<u64> {
        let id = self.hleaf;
        if id < 1 {
            return None;
        }
        let cmp = self.cmp.clone();
        if self.load_leaf(id).is_err() {
            return None;
        }
        let leaf = self.leaves.peek(id)?;
        if leaf.recs.len() < 2 {
            return None;
        }
        match cmp.compare(key, &leaf.recs[0].key) {
            Ordering::Equal => return Some(id),
            Ordering::Less => return None,
            Ordering::Greater => {}
        }
        let last = leaf.recs.last()?;
        if cmp.compare(key, &last.key) != Ordering::Greater || leaf.next < 1 {
            Some(id)
        } else {
            None
        }
    }

    /// Leaf responsible for `key`, by hot-leaf shortcut or full descent;
    /// the leaf is loaded on return.
    fn target_leaf(&mut self, key: &[u8]) -> ReedResult<u64> {
        if self.hleaf > 0 {
            if let Some(id) = self.hist_leaf(key) {
                return Ok(id);
            }
        }
        let pid = self.search_leaf(key)?;
        self.load_leaf(pid)?;
        Ok(pid)
    }

    // == MUTATION ==

    fn leaf_add_rec(
        &mut self,
        leaf_id: u64,
        dmode: DupMode,
        key: &[u8],
        value: &[u8],
    ) -> ReedResult<()> {
        let cmp = self.cmp.clone();
        let mut added = 0u64;
        {
            let leaf = self.leaf_mut(leaf_id)?;
            let (pos, found) = leaf_search_pos(&leaf.recs, &cmp, key);
            if found {
                let rec = &mut leaf.recs[pos];
                match dmode {
                    DupMode::Keep => return Err(ReedError::KeepExisting),
                    DupMode::Overwrite => rec.value = value.to_vec(),
                    DupMode::Cat => rec.value.extend_from_slice(value),
                    DupMode::DupForward => {
                        rec.rest.push(value.to_vec());
                        added = 1;
                    }
                    DupMode::DupBackward => {
                        let old = std::mem::replace(&mut rec.value, value.to_vec());
                        rec.rest.insert(0, old);
                        added = 1;
                    }
                }
            } else {
                leaf.recs.insert(
                    pos,
                    LeafRec {
                        key: key.to_vec(),
                        value: value.to_vec(),
                        rest: Vec::new(),
                    },
                );
                added = 1;
            }
            leaf.dirty = true;
        }
        self.meta.rnum += added;
        Ok(())
    }

    pub(crate) fn put_impl(&mut self, key: &[u8], value: &[u8], dmode: DupMode) -> ReedResult<()> {
        let leaf_id = self.target_leaf(key)?;
        self.leaf_add_rec(leaf_id, dmode, key, value)?;
        let needs_split = {
            let lmemb = self.meta.lmemb as usize;
            let leaf = self
                .leaves
                .peek(leaf_id)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            let count = leaf.recs.len();
            count > lmemb
                || (count > MIN_LMEMB as usize
                    && count % 32 == 0
                    && leaf.data_size() >= LEAF_DATA_MAX)
        };
        if needs_split {
            self.split_leaf(leaf_id)?;
        }
        if !self.tran {
            self.cache_adjust()?;
        }
        Ok(())
    }

    /// Moves the upper half of an overflowing leaf into a new sibling and
    /// pushes the separator up the recorded descent path, splitting nodes
    /// (and finally the root) as needed.
    fn split_leaf(&mut self, leaf_id: u64) -> ReedResult<()> {
        self.hleaf = 0;
        let old_next = self.leaf_mut(leaf_id)?.next;
        let new_id = self.new_leaf(leaf_id, old_next);
        if old_next > 0 {
            // Rewire the old successor before touching any records, so a
            // load failure leaves the leaf contents untouched.
            let next_leaf = self.leaf_mut(old_next)?;
            next_leaf.prev = new_id;
            next_leaf.dirty = true;
        }
        let upper = {
            let leaf = self.leaf_mut(leaf_id)?;
            let mid = leaf.recs.len() / 2;
            let upper = leaf.recs.split_off(mid);
            leaf.next = new_id;
            leaf.dirty = true;
            upper
        };
        let sep_key = upper
            .first()
            .map(|rec| rec.key.clone())
            .ok_or_else(|| internal("leaf split produced no upper half"))?;
        {
            let new_leaf = self
                .leaves
                .peek_mut(new_id)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            new_leaf.recs = upper;
        }
        if self.meta.last == leaf_id {
            self.meta.last = new_id;
        }

        let cmp = self.cmp.clone();
        let mut heir = leaf_id;
        let mut pid = new_id;
        let mut sep = sep_key;
        loop {
            let parent_id = match self.hist.pop() {
                None => {
                    // The root itself split: a new root points at both halves.
                    let root_id = self.new_node(heir);
                    let node = self
                        .nodes
                        .peek_mut(root_id)
                        .ok_or_else(|| internal("node vanished from the cache"))?;
                    node.idxs.push(NodeIdx { pid, key: sep });
                    node.dirty = true;
                    self.meta.root = root_id;
                    break;
                }
                Some(parent_id) => parent_id,
            };
            let overflow = {
                let nmemb = self.meta.nmemb as usize;
                let node = self.node_mut(parent_id)?;
                node_add_idx(node, &cmp, pid, sep);
                node.idxs.len() > nmemb
            };
            if !overflow {
                break;
            }
            let (mid_pid, mid_key, upper_idxs) = {
                let node = self.node_mut(parent_id)?;
                let mid = node.idxs.len() / 2;
                let mut tail = node.idxs.split_off(mid);
                let median = tail.remove(0);
                node.dirty = true;
                (median.pid, median.key, tail)
            };
            let new_node_id = self.new_node(mid_pid);
            {
                let new_node = self
                    .nodes
                    .peek_mut(new_node_id)
                    .ok_or_else(|| internal("node vanished from the cache"))?;
                new_node.idxs = upper_idxs;
            }
            heir = parent_id;
            pid = new_node_id;
            sep = mid_key;
        }
        Ok(())
    }

    fn out_impl(&mut self, key: &[u8], whole_record: bool) -> ReedResult<()> {
        let leaf_id = self.target_leaf(key)?;
        let cmp = self.cmp.clone();
        let removed;
        {
            let leaf = self.leaf_mut(leaf_id)?;
            let (pos, found) = leaf_search_pos(&leaf.recs, &cmp, key);
            if !found {
                return Err(no_record());
            }
            let rec = &mut leaf.recs[pos];
            if whole_record {
                removed = rec.value_count() as u64;
                leaf.recs.remove(pos);
            } else if !rec.rest.is_empty() {
                rec.value = rec.rest.remove(0);
                removed = 1;
            } else {
                leaf.recs.remove(pos);
                removed = 1;
            }
            leaf.dirty = true;
        }
        self.meta.rnum -= removed;
        if !self.tran {
            self.cache_adjust()?;
        }
        Ok(())
    }

    // == QUERIES ==

    fn find_rec<F, T>(&mut self, key: &[u8], pick: F) -> ReedResult<T>
    where
        F: FnOnce(&LeafRec) -> T,
    {
        let leaf_id = self.target_leaf(key)?;
        let cmp = self.cmp.clone();
        let result = {
            let leaf = self.leaf_mut(leaf_id)?;
            let (pos, found) = leaf_search_pos(&leaf.recs, &cmp, key);
            if !found {
                return Err(no_record());
            }
            pick(&leaf.recs[pos])
        };
        if !self.tran {
            self.cache_adjust()?;
        }
        Ok(result)
    }

    pub(crate) fn get_impl(&mut self, key: &[u8]) -> ReedResult<Vec<u8>> {
        self.find_rec(key, |rec| rec.value.clone())
    }

    fn get_list_impl(&mut self, key: &[u8]) -> ReedResult<Vec<Vec<u8>>> {
        self.find_rec(key, |rec| {
            let mut values = Vec::with_capacity(rec.value_count());
            values.push(rec.value.clone());
            values.extend(rec.rest.iter().cloned());
            values
        })
    }

    fn vnum_impl(&mut self, key: &[u8]) -> ReedResult<usize> {
        self.find_rec(key, |rec| rec.value_count())
    }

    // == OPTIMISE ==

    fn optimize_impl(&mut self, options: Option<BtreeOptions>) -> ReedResult<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| internal("store missing while open"))?;
        let path = store.path().to_path_buf();
        let path_str = path.to_string_lossy().to_string();
        let current = BtreeOptions {
            lmemb: self.meta.lmemb,
            nmemb: self.meta.nmemb,
            bnum: store.bnum(),
            apow: store.align().trailing_zeros() as u8,
            fpow: store.fbpmax().trailing_zeros() as u8,
            large: store.opts() & OPT_LARGE != 0,
            codec: if store.opts() & OPT_DEFLATE != 0 {
                Codec::Deflate
            } else if store.opts() & OPT_XZ != 0 {
                Codec::Xz
            } else {
                Codec::None
            },
        };
        let target_opts = options.unwrap_or(current);
        let seq = TMP_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        let tmp_path = PathBuf::from(format!(
            "{}.tmp.{}.{}",
            path_str,
            std::process::id(),
            seq
        ));

        let target = Btree::new();
        target.tune(target_opts)?;
        target.set_comparator(self.cmp.clone())?;
        target.open(&tmp_path, OpenMode::writer_truncate())?;
        let copy_result = self.copy_all_into(&target);
        let close_result = target.close();
        if let Err(e) = copy_result.and(close_result) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        self.close_impl()?;
        std::fs::remove_file(&path).map_err(|e| unlink_error(&path_str, e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| rename_error(&path_str, e.to_string()))?;
        let mut reopen_mode = self.omode.unwrap_or_else(OpenMode::writer);
        reopen_mode.create = false;
        reopen_mode.truncate = false;
        self.open_impl(&path, reopen_mode)
    }

    /// Streams every (key, value) occurrence in order into another tree
    /// with forward duplication, preserving duplicate lists.
    fn copy_all_into(&mut self, target: &Btree) -> ReedResult<()> {
        let mut cursor = CursorState::default();
        let mut positioned = self.cur_first(&mut cursor)?;
        while positioned {
            let (key, value) = self.cur_rec(&cursor)?;
            target.put_dup(&key, &value)?;
            positioned = self.cur_next(&mut cursor)?;
        }
        Ok(())
    }
}
