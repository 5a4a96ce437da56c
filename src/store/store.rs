// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Record store engine.
//!
//! Maps variable-length keys to variable-length payloads inside a single
//! file. Keys are routed to a bucket by a fast multiplicative hash; records
//! sharing a bucket form an on-disk binary search tree ordered by a stored
//! secondary hash byte and the raw key bytes (bigger to the left). Freed
//! extents go through the free-block pool and are stamped on disk so
//! file-order iteration can step over them.

use crate::codec::Codec;
use crate::error::{internal, invalid_state, io_error, meta_corrupted, no_record, ReedError, ReedResult};
use crate::fileio;
use crate::store::free_pool::FreePool;
use crate::store::header::{
    FileHeader, FLAG_OPEN, FORMAT_VERSION, FREC_OFF, FSIZ_OFF, HEADER_SIZE, OPAQUE_OFF,
    OPAQUE_SIZE, OPT_DEFLATE, OPT_LARGE, OPT_XZ, RNUM_OFF,
};
use crate::store::record::{
    encode_free_stamp, encode_link, encode_record, link_field_off, link_width,
    parse_free_stamp, parse_record_header, RecordHeader, Side, FREE_MAGIC, FREE_STAMP_SIZE,
    HEADER_READ_SIZE, RECORD_MAGIC,
};
use crate::vnum::{get_u32_le, get_u64_le, put_u64_le};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Default bucket count.
pub const DEFAULT_BNUM: u64 = 16381;
/// Default alignment power (records align to 256 bytes).
pub const DEFAULT_APOW: u8 = 8;
/// Default free-pool power (1024 entries).
pub const DEFAULT_FPOW: u8 = 10;
/// One-byte padding field caps the alignment power.
const APOW_MAX: u8 = 8;
const FPOW_MAX: u8 = 20;
/// Pending asynchronous appends are flushed beyond this count.
const ASYNC_FLUSH_LIMIT: usize = 1024;

/// Tuning applied when a store file is created.
///
/// An existing file keeps the parameters it was created with; tuning is
/// read back from the header at open.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bucket array size.
    pub bnum: u64,
    /// Record alignment = 2^apow bytes, apow in [0, 8].
    pub apow: u8,
    /// Free pool capacity = 2^fpow entries.
    pub fpow: u8,
    /// 8-byte bucket slots for very large files.
    pub large: bool,
    /// Record-value compression.
    pub codec: Codec,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            bnum: DEFAULT_BNUM,
            apow: DEFAULT_APOW,
            fpow: DEFAULT_FPOW,
            large: false,
            codec: Codec::None,
        }
    }
}

impl StoreOptions {
    fn normalised(&self) -> Self {
        Self {
            bnum: self.bnum.max(1),
            apow: self.apow.min(APOW_MAX),
            fpow: self.fpow.min(FPOW_MAX),
            large: self.large,
            codec: self.codec,
        }
    }

    fn opts_bits(&self) -> u8 {
        let mut bits = 0;
        if self.large {
            bits |= OPT_LARGE;
        }
        match self.codec {
            Codec::None => {}
            Codec::Deflate => bits |= OPT_DEFLATE,
            Codec::Xz => bits |= OPT_XZ,
        }
        bits
    }
}

/// Connection mode of a store or database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub writer: bool,
    pub create: bool,
    pub truncate: bool,
    pub no_lock: bool,
    pub lock_nonblocking: bool,
}

impl OpenMode {
    /// Shared read-only connection.
    pub fn reader() -> Self {
        Self {
            writer: false,
            create: false,
            truncate: false,
            no_lock: false,
            lock_nonblocking: false,
        }
    }

    /// Exclusive writer connection.
    pub fn writer() -> Self {
        Self {
            writer: true,
            create: false,
            truncate: false,
            no_lock: false,
            lock_nonblocking: false,
        }
    }

    /// Writer that creates the file when missing.
    pub fn writer_create() -> Self {
        Self {
            create: true,
            ..Self::writer()
        }
    }

    /// Writer that discards any existing content.
    pub fn writer_truncate() -> Self {
        Self {
            create: true,
            truncate: true,
            ..Self::writer()
        }
    }
}

/// Duplicate-key behaviour of `RecordStore::put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Replace the stored value.
    Overwrite,
    /// Fail with `ErrorCode::Keep` when the key exists.
    Keep,
    /// Append to the stored value.
    Cat,
    /// Queue the write in memory; flushed on any conflicting access.
    Async,
}

#[derive(Debug)]
enum HeaderMap {
    Ro(Mmap),
    Rw(MmapMut),
}

impl HeaderMap {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Ro(m) => m.as_ref(),
            Self::Rw(m) => m.as_ref(),
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Ro(_) => None,
            Self::Rw(m) => Some(m.as_mut()),
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match self {
            Self::Ro(_) => Ok(()),
            Self::Rw(m) => m.flush(),
        }
    }
}

/// Link that leads to a record: either a bucket slot or a parent record's
/// child field.
#[derive(Debug, Clone, Copy)]
enum ParentLink {
    Bucket(u64),
    Record { off: u64, side: Side },
}

struct ChainSearch {
    parent: ParentLink,
    off: u64,
    header: Option<RecordHeader>,
}

/// Hash-indexed record store over a single file.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    path_str: String,
    file: File,
    map: HeaderMap,
    msiz: usize,
    writer: bool,
    locked: bool,
    // Geometry, cached from the header.
    bnum: u64,
    apow: u8,
    fpow: u8,
    opts: u8,
    large: bool,
    align: u64,
    frec: u64,
    // Live counters, written back on sync and close.
    rnum: u64,
    fsiz: u64,
    codec: Codec,
    pool: FreePool,
    async_buf: HashMap<u64, Vec<(Vec<u8>, Vec<u8>)>>,
    async_count: usize,
    iter_off: Option<u64>,
}

impl RecordStore {
    /// Opens (or creates) a store file.
    ///
    /// ## Input
    /// - `path`: database file path
    /// - `mode`: connection mode; creation and truncation need a writer
    /// - `options`: tuning used only when the file is created
    ///
    /// ## Error Conditions
    /// - `ReedError::IoError` when the file or lock cannot be acquired
    /// - `ReedError::MetaCorrupted` when an existing header fails validation
    pub fn open(path: &Path, mode: OpenMode, options: &StoreOptions) -> ReedResult<Self> {
        let path_str = path.to_string_lossy().to_string();
        let file = if mode.writer {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(mode.create)
                .open(path)
                .map_err(|e| io_error("open", &path_str, e.to_string()))?
        } else {
            File::open(path).map_err(|e| io_error("open", &path_str, e.to_string()))?
        };
        let mut locked = false;
        if !mode.no_lock {
            fileio::lock_file(&file, mode.writer, mode.lock_nonblocking, &path_str)?;
            locked = true;
        }
        let size = fileio::file_size(&file, &path_str)?;
        if mode.writer && (mode.truncate || size == 0) {
            Self::format_file(&file, &options.normalised(), &path_str)?;
        }

        let mut head_bytes = [0u8; HEADER_SIZE];
        fileio::read_exact_at(&file, &mut head_bytes, 0, &path_str)?;
        let header = FileHeader::from_bytes(&head_bytes)?;
        let width = header.bucket_width();
        let msiz = HEADER_SIZE + (header.bnum as usize) * width;
        let real_size = fileio::file_size(&file, &path_str)?;
        if header.frec < msiz as u64
            || header.fsiz < header.frec
            || real_size < header.frec
            || header.fsiz > real_size
        {
            return Err(meta_corrupted("header geometry inconsistent with file"));
        }

        let map = if mode.writer {
            let m = unsafe { MmapOptions::new().len(msiz).map_mut(&file) }
                .map_err(|e| io_error("mmap", &path_str, e.to_string()))?;
            HeaderMap::Rw(m)
        } else {
            let m = unsafe { MmapOptions::new().len(msiz).map(&file) }
                .map_err(|e| io_error("mmap", &path_str, e.to_string()))?;
            HeaderMap::Ro(m)
        };

        let codec = if header.opts & OPT_DEFLATE != 0 {
            Codec::Deflate
        } else if header.opts & OPT_XZ != 0 {
            Codec::Xz
        } else {
            Codec::None
        };

        let pool = if mode.writer {
            let region = (header.frec - msiz as u64) as usize;
            let mut bytes = vec![0u8; region];
            fileio::read_exact_at(&file, &mut bytes, msiz as u64, &path_str)?;
            FreePool::deserialize(&bytes, header.fpow)?
        } else {
            FreePool::new(header.fpow)
        };

        let mut store = Self {
            path: path.to_path_buf(),
            path_str,
            file,
            map,
            msiz,
            writer: mode.writer,
            locked,
            bnum: header.bnum,
            apow: header.apow,
            fpow: header.fpow,
            opts: header.opts,
            large: header.opts & OPT_LARGE != 0,
            align: header.align(),
            frec: header.frec,
            rnum: header.rnum,
            fsiz: header.fsiz,
            codec,
            pool,
            async_buf: HashMap::new(),
            async_count: 0,
            iter_off: None,
        };
        if store.writer {
            if let Some(bytes) = store.map.bytes_mut() {
                bytes[crate::store::header::FLAGS_OFF] |= FLAG_OPEN;
            }
        }
        Ok(store)
    }

    /// Lays down a fresh header, bucket array and free-pool region.
    fn format_file(file: &File, options: &StoreOptions, path: &str) -> ReedResult<()> {
        let width = if options.large { 8 } else { 4 };
        let msiz = HEADER_SIZE as u64 + options.bnum * width;
        let fbp_region = (1u64 << options.fpow) * 8;
        let align = 1u64 << options.apow;
        let frec = (msiz + fbp_region + align - 1) & !(align - 1);
        let header = FileHeader {
            version: FORMAT_VERSION,
            flags: 0,
            apow: options.apow,
            fpow: options.fpow,
            opts: options.opts_bits(),
            bnum: options.bnum,
            rnum: 0,
            fsiz: frec,
            frec,
        };
        fileio::set_file_size(file, 0, path)?;
        fileio::write_all_at(file, &header.to_bytes(), 0, path)?;
        fileio::set_file_size(file, frec, path)?;
        Ok(())
    }

    /// Closes the store, persisting counters and the free pool.
    pub fn close(mut self) -> ReedResult<()> {
        let mut result = Ok(());
        if self.writer {
            if let Err(e) = self.flush_async() {
                result = Err(e);
            }
            let region = (self.frec - self.msiz as u64) as usize;
            let pool_bytes = self.pool.serialize(region);
            if let Err(e) = fileio::write_all_at(&self.file, &pool_bytes, self.msiz as u64, &self.path_str)
            {
                result = Err(e);
            }
            self.write_header_counts();
            if let Some(bytes) = self.map.bytes_mut() {
                bytes[crate::store::header::FLAGS_OFF] &= !FLAG_OPEN;
            }
            if let Err(e) = self
                .map
                .flush()
                .map_err(|e| io_error("msync", &self.path_str, e.to_string()))
            {
                result = Err(e);
            }
            if let Err(e) = fileio::sync_file(&self.file, &self.path_str) {
                result = Err(e);
            }
        }
        if self.locked {
            if let Err(e) = fileio::unlock_file(&self.file, &self.path_str) {
                result = Err(e);
            }
        }
        result
    }

    // == ACCESSORS ==

    /// Number of live records.
    pub fn rnum(&self) -> u64 {
        self.rnum
    }

    /// Logical file size in bytes.
    pub fn fsiz(&self) -> u64 {
        self.fsiz
    }

    /// Bucket array size.
    pub fn bnum(&self) -> u64 {
        self.bnum
    }

    /// Record alignment in bytes.
    pub fn align(&self) -> u64 {
        self.align
    }

    /// Free pool capacity.
    pub fn fbpmax(&self) -> u64 {
        1u64 << self.fpow
    }

    /// Raw option bits.
    pub fn opts(&self) -> u8 {
        self.opts
    }

    /// Whether the connection can mutate the file.
    pub fn writable(&self) -> bool {
        self.writer
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the caller-reserved opaque window.
    pub fn read_opaque(&self) -> &[u8] {
        &self.map.bytes()[OPAQUE_OFF..OPAQUE_OFF + OPAQUE_SIZE]
    }

    /// Overwrites the front of the opaque window.
    ///
    /// ## Error Conditions
    /// - `ReedError::InvalidState` on a read-only connection or oversized
    ///   input
    pub fn write_opaque(&mut self, bytes: &[u8]) -> ReedResult<()> {
        if bytes.len() > OPAQUE_SIZE {
            return Err(invalid_state("write_opaque", "opaque data too large"));
        }
        let map = self
            .map
            .bytes_mut()
            .ok_or_else(|| invalid_state("write_opaque", "store opened read-only"))?;
        map[OPAQUE_OFF..OPAQUE_OFF + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    // == RECORD OPERATIONS ==

    /// Stores a record.
    ///
    /// ## Input
    /// - `key` / `value`: arbitrary byte strings up to 4 GiB
    /// - `mode`: duplicate-key behaviour
    ///
    /// ## Behaviour
    /// - Overwrite rewrites in place when the new image fits the old extent
    ///   (with at most 255 bytes of padding), otherwise the old extent is
    ///   released to the free pool and a new one allocated
    /// - Async queues the write; the queue drains on any conflicting access
    ///   or beyond an internal limit
    pub fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> ReedResult<()> {
        if !self.writer {
            return Err(invalid_state("put", "store opened read-only"));
        }
        if key.len() > u32::MAX as usize || value.len() > u32::MAX as usize {
            return Err(invalid_state("put", "key or value exceeds 4 GiB"));
        }
        if let PutMode::Async = mode {
            let bidx = self.bucket_index(key);
            self.async_buf
                .entry(bidx)
                .or_default()
                .push((key.to_vec(), value.to_vec()));
            self.async_count += 1;
            if self.async_count >= ASYNC_FLUSH_LIMIT {
                self.flush_async()?;
            }
            return Ok(());
        }
        self.flush_async()?;
        self.put_sync(key, value, mode)
    }

    fn put_sync(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> ReedResult<()> {
        let hash = second_hash(key);
        let found = self.search_chain(key, hash)?;
        match found.off {
            0 => {
                let vbytes = self.codec.compress(value)?;
                let raw = encode_record(hash, 0, 0, 0, key, &vbytes, self.large, self.apow);
                let off = self.place_record(raw)?;
                self.patch_link(found.parent, off)?;
                self.rnum += 1;
                Ok(())
            }
            off => {
                let header = found
                    .header
                    .ok_or_else(|| internal("chain search lost a record header"))?;
                let new_value = match mode {
                    PutMode::Keep => return Err(ReedError::KeepExisting),
                    PutMode::Overwrite => value.to_vec(),
                    PutMode::Cat => {
                        let mut old = self.read_value(&header, off)?;
                        old.extend_from_slice(value);
                        old
                    }
                    PutMode::Async => unreachable!("async handled by put"),
                };
                let vbytes = self.codec.compress(&new_value)?;
                let mut raw = encode_record(
                    hash,
                    header.left,
                    header.right,
                    0,
                    key,
                    &vbytes,
                    self.large,
                    self.apow,
                );
                let cap = header.total_size();
                let raw_len = raw.len() as u64;
                if raw_len <= cap && cap - raw_len <= u8::MAX as u64 {
                    let psiz = (cap - raw_len) as u8;
                    raw[self.psiz_field()] = psiz;
                    raw.resize(cap as usize, 0);
                    fileio::write_all_at(&self.file, &raw, off, &self.path_str)
                } else {
                    let new_off = self.place_record(raw)?;
                    self.patch_link(found.parent, new_off)?;
                    self.free_extent(off, cap);
                    Ok(())
                }
            }
        }
    }

    /// Retrieves the value of a record.
    ///
    /// ## Error Conditions
    /// - `ReedError::NoRecord` when the key is absent
    pub fn get(&mut self, key: &[u8]) -> ReedResult<Vec<u8>> {
        self.flush_async()?;
        let hash = second_hash(key);
        let found = self.search_chain(key, hash)?;
        match (found.off, found.header) {
            (0, _) | (_, None) => Err(no_record()),
            (off, Some(header)) => self.read_value(&header, off),
        }
    }

    /// Returns the uncompressed value size of a record.
    pub fn vsiz(&mut self, key: &[u8]) -> ReedResult<u32> {
        self.flush_async()?;
        let hash = second_hash(key);
        let found = self.search_chain(key, hash)?;
        match (found.off, found.header) {
            (0, _) | (_, None) => Err(no_record()),
            (off, Some(header)) => {
                if self.codec.is_active() {
                    Ok(self.read_value(&header, off)?.len() as u32)
                } else {
                    Ok(header.vsiz)
                }
            }
        }
    }

    /// Removes a record, unlinking it from its bucket tree and releasing
    /// the extent to the free pool.
    pub fn out(&mut self, key: &[u8]) -> ReedResult<()> {
        if !self.writer {
            return Err(invalid_state("out", "store opened read-only"));
        }
        self.flush_async()?;
        let hash = second_hash(key);
        let found = self.search_chain(key, hash)?;
        let (off, header) = match (found.off, found.header) {
            (0, _) | (_, None) => return Err(no_record()),
            (off, Some(header)) => (off, header),
        };
        let replacement = match (header.left, header.right) {
            (0, 0) => 0,
            (left, 0) => left,
            (0, right) => right,
            (left, right) => {
                // Graft the right subtree onto the rightmost node of the
                // left subtree.
                let mut graft_off = left;
                loop {
                    let node = self.read_record_header(graft_off)?;
                    if node.right == 0 {
                        break;
                    }
                    graft_off = node.right;
                }
                self.write_link(graft_off, Side::Right, right)?;
                left
            }
        };
        self.patch_link(found.parent, replacement)?;
        self.free_extent(off, header.total_size());
        self.rnum -= 1;
        Ok(())
    }

    // == ITERATION ==

    /// Starts a file-order scan over all live records.
    pub fn iter_init(&mut self) -> ReedResult<()> {
        self.flush_async()?;
        self.iter_off = Some(self.frec);
        Ok(())
    }

    /// Returns the next record of the scan, or `None` at the end.
    ///
    /// Records come back in file order, not key order; freed extents are
    /// stepped over by their stamps.
    pub fn iter_next(&mut self) -> ReedResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.flush_async()?;
        let mut off = match self.iter_off {
            Some(off) => off,
            None => return Err(invalid_state("iter_next", "iterator not initialised")),
        };
        while off < self.fsiz {
            let mut chunk = [0u8; HEADER_READ_SIZE];
            let got = fileio::read_at_most(&self.file, &mut chunk, off, &self.path_str)?;
            if got == 0 {
                break;
            }
            match chunk[0] {
                FREE_MAGIC => {
                    let size = parse_free_stamp(&chunk[..got.min(FREE_STAMP_SIZE)])?;
                    if size == 0 {
                        return Err(meta_corrupted("zero-sized free block"));
                    }
                    off += size as u64;
                }
                RECORD_MAGIC => {
                    let header = parse_record_header(&chunk[..got], self.large, self.apow)?;
                    let key = self.read_bytes(off + header.body_off, header.ksiz as usize)?;
                    let value = self.read_value(&header, off)?;
                    self.iter_off = Some(off + header.total_size());
                    return Ok(Some((key, value)));
                }
                other => {
                    return Err(meta_corrupted(format!(
                        "unknown extent magic 0x{:02x} at offset {}",
                        other, off
                    )));
                }
            }
        }
        self.iter_off = Some(self.fsiz);
        Ok(None)
    }

    // == SYNC ==

    /// Flushes pending writes and the header; with `phys` also fsyncs.
    pub fn sync(&mut self, phys: bool) -> ReedResult<()> {
        if !self.writer {
            return Err(invalid_state("sync", "store opened read-only"));
        }
        self.flush_async()?;
        self.write_header_counts();
        self.map
            .flush()
            .map_err(|e| io_error("msync", &self.path_str, e.to_string()))?;
        if phys {
            fileio::sync_file(&self.file, &self.path_str)?;
        }
        Ok(())
    }

    // == INTERNALS ==

    fn write_header_counts(&mut self) {
        let rnum = self.rnum;
        let fsiz = self.fsiz;
        let frec = self.frec;
        if let Some(bytes) = self.map.bytes_mut() {
            put_u64_le(bytes, RNUM_OFF, rnum);
            put_u64_le(bytes, FSIZ_OFF, fsiz);
            put_u64_le(bytes, FREC_OFF, frec);
        }
    }

    fn flush_async(&mut self) -> ReedResult<()> {
        if self.async_count == 0 {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.async_buf);
        self.async_count = 0;
        for (_bucket, entries) in pending {
            for (key, value) in entries {
                self.put_sync(&key, &value, PutMode::Overwrite)?;
            }
        }
        Ok(())
    }

    fn bucket_index(&self, key: &[u8]) -> u64 {
        bucket_hash(key) % self.bnum
    }

    fn psiz_field(&self) -> usize {
        2 + 2 * link_width(self.large)
    }

    fn bucket_get(&self, bidx: u64) -> ReedResult<u64> {
        let w = link_width(self.large);
        let pos = HEADER_SIZE + bidx as usize * w;
        let bytes = self.map.bytes();
        let shifted = if self.large {
            get_u64_le(bytes, pos).ok_or_else(|| meta_corrupted("bucket slot out of range"))?
        } else {
            get_u32_le(bytes, pos).ok_or_else(|| meta_corrupted("bucket slot out of range"))? as u64
        };
        Ok(shifted << self.apow)
    }

    fn bucket_set(&mut self, bidx: u64, off: u64) -> ReedResult<u64> {
        let w = link_width(self.large);
        let large = self.large;
        let apow = self.apow;
        let pos = HEADER_SIZE + bidx as usize * w;
        let bytes = self
            .map
            .bytes_mut()
            .ok_or_else(|| invalid_state("bucket_set", "store opened read-only"))?;
        let encoded = encode_link(off, large, apow);
        bytes[pos..pos + w].copy_from_slice(&encoded);
        Ok(off)
    }

    fn read_bytes(&self, off: u64, len: usize) -> ReedResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        fileio::read_exact_at(&self.file, &mut buf, off, &self.path_str)?;
        Ok(buf)
    }

    fn read_record_header(&self, off: u64) -> ReedResult<RecordHeader> {
        if off < self.frec || off >= self.fsiz {
            return Err(meta_corrupted(format!(
                "record offset {} outside the record region",
                off
            )));
        }
        let want = HEADER_READ_SIZE.min((self.fsiz - off) as usize);
        let mut chunk = [0u8; HEADER_READ_SIZE];
        fileio::read_exact_at(&self.file, &mut chunk[..want], off, &self.path_str)?;
        parse_record_header(&chunk[..want], self.large, self.apow)
    }

    fn read_value(&self, header: &RecordHeader, off: u64) -> ReedResult<Vec<u8>> {
        let raw = self.read_bytes(off + header.value_off(), header.vsiz as usize)?;
        self.codec.decompress(&raw)
    }

    /// Walks the bucket tree for `key`, returning the matching record (if
    /// any) and the link that points (or would point) to it.
    fn search_chain(&self, key: &[u8], hash: u8) -> ReedResult<ChainSearch> {
        let bidx = self.bucket_index(key);
        let mut parent = ParentLink::Bucket(bidx);
        let mut off = self.bucket_get(bidx)?;
        while off != 0 {
            let header = self.read_record_header(off)?;
            let rkey = self.read_bytes(off + header.body_off, header.ksiz as usize)?;
            match (hash, key).cmp(&(header.hash, rkey.as_slice())) {
                std::cmp::Ordering::Greater => {
                    parent = ParentLink::Record {
                        off,
                        side: Side::Left,
                    };
                    off = header.left;
                }
                std::cmp::Ordering::Less => {
                    parent = ParentLink::Record {
                        off,
                        side: Side::Right,
                    };
                    off = header.right;
                }
                std::cmp::Ordering::Equal => {
                    return Ok(ChainSearch {
                        parent,
                        off,
                        header: Some(header),
                    });
                }
            }
        }
        Ok(ChainSearch {
            parent,
            off: 0,
            header: None,
        })
    }

    /// Pads a raw record image to alignment and writes it into a pooled or
    /// appended extent. Returns the extent offset.
    ///
    /// A pooled block larger than the request is split: the surplus gets a
    /// fresh free stamp so file-order iteration can still walk across it,
    /// then goes back to the pool.
    fn place_record(&mut self, mut raw: Vec<u8>) -> ReedResult<u64> {
        let size = (raw.len() as u64 + self.align - 1) & !(self.align - 1);
        let psiz = (size - raw.len() as u64) as u8;
        let field = self.psiz_field();
        raw[field] = psiz;
        raw.resize(size as usize, 0);
        let block = if size <= u32::MAX as u64 {
            self.pool.allocate(size as u32)
        } else {
            None
        };
        let off = match block {
            Some(block) => {
                if block.size as u64 > size {
                    let surplus_off = block.off + size;
                    let surplus_size = block.size - size as u32;
                    let stamp = encode_free_stamp(surplus_size);
                    fileio::write_all_at(&self.file, &stamp, surplus_off, &self.path_str)?;
                    self.pool.release(surplus_off, surplus_size);
                }
                block.off
            }
            None => {
                let off = self.fsiz;
                self.fsiz += size;
                off
            }
        };
        fileio::write_all_at(&self.file, &raw, off, &self.path_str)?;
        Ok(off)
    }

    fn patch_link(&mut self, parent: ParentLink, target: u64) -> ReedResult<()> {
        match parent {
            ParentLink::Bucket(bidx) => {
                self.bucket_set(bidx, target)?;
                Ok(())
            }
            ParentLink::Record { off, side } => self.write_link(off, side, target),
        }
    }

    fn write_link(&mut self, record_off: u64, side: Side, target: u64) -> ReedResult<()> {
        let encoded = encode_link(target, self.large, self.apow);
        let pos = record_off + link_field_off(side, self.large);
        fileio::write_all_at(&self.file, &encoded, pos, &self.path_str)
    }

    fn free_extent(&mut self, off: u64, size: u64) {
        if size > u32::MAX as u64 {
            return;
        }
        let stamp = encode_free_stamp(size as u32);
        // Best effort: a failed stamp only degrades later iteration.
        let _ = fileio::write_all_at(&self.file, &stamp, off, &self.path_str);
        self.pool.release(off, size as u32);
    }
}

/// Primary bucket hash: multiplicative byte fold.
fn bucket_hash(key: &[u8]) -> u64 {
    let mut hash: u64 = 751;
    for &c in key {
        hash = hash.wrapping_mul(37).wrapping_add(c as u64);
    }
    hash
}

/// Secondary hash stored on each record, ordering bucket trees.
fn second_hash(key: &[u8]) -> u8 {
    (crc32fast::hash(key) & 0xff) as u8
}
