// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Ordered cursors over the B+ tree.
//!
//! A cursor is a `(leaf id, key index, value index)` triple. Movement
//! works by nudging an index and normalising: out-of-range value indices
//! wrap to the neighbouring record, out-of-range key indices follow the
//! sibling chain, and an exhausted chain parks the cursor off the end
//! (leaf id 0). Duplicate values are visited individually.

use crate::btree::page::LeafRec;
use crate::btree::tree::{leaf_search_pos, Btree, TreeCore};
use crate::error::{internal, no_record, ErrorCode, ReedResult};
use std::cmp::Ordering;

/// Where a cursor `put` places the value relative to the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurPutMode {
    /// Overwrite the value at the cursor.
    Current,
    /// Insert before the value at the cursor.
    Before,
    /// Insert after the value at the cursor.
    After,
}

/// Raw cursor position; id 0 means off either end.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CursorState {
    pub id: u64,
    pub kidx: i64,
    pub vidx: i64,
}

impl CursorState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl TreeCore {
    pub(crate) fn cur_first(&mut self, st: &mut CursorState) -> ReedResult<bool> {
        st.id = self.meta.first;
        st.kidx = 0;
        st.vidx = 0;
        self.cur_adjust(st, true)
    }

    pub(crate) fn cur_last(&mut self, st: &mut CursorState) -> ReedResult<bool> {
        st.id = self.meta.last;
        st.kidx = i64::MAX;
        st.vidx = i64::MAX;
        self.cur_adjust(st, false)
    }

    pub(crate) fn cur_next(&mut self, st: &mut CursorState) -> ReedResult<bool> {
        if st.id < 1 {
            st.reset();
            return Ok(false);
        }
        st.vidx = st.vidx.saturating_add(1);
        self.cur_adjust(st, true)
    }

    pub(crate) fn cur_prev(&mut self, st: &mut CursorState) -> ReedResult<bool> {
        if st.id < 1 {
            st.reset();
            return Ok(false);
        }
        st.vidx = st.vidx.saturating_sub(1);
        self.cur_adjust(st, false)
    }

    /// Positions the cursor at (or around) `key`.
    ///
    /// On an exact match the cursor lands on the first occurrence going
    /// forward, the last going backward. Otherwise it lands on the
    /// insertion-point record and, when the key falls past it in the
    /// movement direction, steps once to the neighbouring occurrence.
    pub(crate) fn cur_jump(
        &mut self,
        st: &mut CursorState,
        key: &[u8],
        forward: bool,
    ) -> ReedResult<bool> {
        let pid = match self.search_leaf(key) {
            Ok(pid) => pid,
            Err(e) => {
                st.reset();
                return Err(e);
            }
        };
        if let Err(e) = self.load_leaf(pid) {
            st.reset();
            return Err(e);
        }
        let cmp = self.cmp.clone();
        let (pos, found, recs_len) = {
            let leaf = self
                .leaves
                .peek(pid)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            let (pos, found) = leaf_search_pos(&leaf.recs, &cmp, key);
            (pos, found, leaf.recs.len())
        };
        if recs_len == 0 {
            st.id = pid;
            st.kidx = 0;
            st.vidx = 0;
            return if forward {
                self.cur_next(st)
            } else {
                self.cur_prev(st)
            };
        }
        if found {
            st.id = pid;
            st.kidx = pos as i64;
            if forward {
                st.vidx = 0;
            } else {
                let vnum = self.rec_value_count(pid, pos)?;
                st.vidx = vnum - 1;
            }
            return Ok(true);
        }
        let mut ri = pos;
        if ri > 0 && ri >= recs_len {
            ri = recs_len - 1;
        }
        st.id = pid;
        st.kidx = ri as i64;
        let (order, vnum) = {
            let leaf = self
                .leaves
                .peek(pid)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            let rec = &leaf.recs[ri];
            (cmp.compare(key, &rec.key), rec.value_count() as i64)
        };
        if forward {
            if order == Ordering::Less {
                st.vidx = 0;
                return Ok(true);
            }
            st.vidx = vnum - 1;
            self.cur_next(st)
        } else {
            if order == Ordering::Greater {
                st.vidx = vnum - 1;
                return Ok(true);
            }
            st.vidx = 0;
            self.cur_prev(st)
        }
    }

    fn rec_value_count(&mut self, leaf_id: u64, pos: usize) -> ReedResult<i64> {
        let leaf = self
            .leaves
            .peek(leaf_id)
            .ok_or_else(|| internal("leaf vanished from the cache"))?;
        Ok(leaf
            .recs
            .get(pos)
            .map(|rec| rec.value_count() as i64)
            .unwrap_or(1))
    }

    /// Normalises an out-of-range position in the given direction.
    ///
    /// Returns false (with the state zeroed) once the cursor walks off
    /// either end of the sibling chain.
    pub(crate) fn cur_adjust(&mut self, st: &mut CursorState, forward: bool) -> ReedResult<bool> {
        loop {
            if st.id < 1 {
                st.reset();
                return Ok(false);
            }
            self.load_leaf(st.id)?;
            let (knum, prev, next) = {
                let leaf = self
                    .leaves
                    .peek(st.id)
                    .ok_or_else(|| internal("leaf vanished from the cache"))?;
                (leaf.recs.len() as i64, leaf.prev, leaf.next)
            };
            if st.kidx < 0 {
                if forward {
                    st.kidx = 0;
                    st.vidx = 0;
                } else {
                    st.id = prev;
                    st.kidx = i64::MAX;
                    st.vidx = i64::MAX;
                }
            } else if st.kidx >= knum {
                if forward {
                    st.id = next;
                    st.kidx = 0;
                    st.vidx = 0;
                } else {
                    // knum of 0 leaves kidx negative and the previous
                    // branch moves to the prior leaf.
                    st.kidx = knum - 1;
                    st.vidx = i64::MAX;
                }
            } else {
                let vnum = {
                    let leaf = self
                        .leaves
                        .peek(st.id)
                        .ok_or_else(|| internal("leaf vanished from the cache"))?;
                    leaf.recs[st.kidx as usize].value_count() as i64
                };
                if st.vidx < 0 {
                    if forward {
                        st.vidx = 0;
                    } else {
                        st.kidx -= 1;
                        st.vidx = i64::MAX;
                    }
                } else if st.vidx >= vnum {
                    if forward {
                        st.kidx += 1;
                        st.vidx = 0;
                        if st.kidx >= knum {
                            st.id = next;
                            st.kidx = 0;
                            st.vidx = 0;
                        } else {
                            return Ok(true);
                        }
                    } else {
                        st.vidx = vnum - 1;
                        return Ok(true);
                    }
                } else {
                    return Ok(true);
                }
            }
        }
    }

    pub(crate) fn cur_put(
        &mut self,
        st: &mut CursorState,
        value: &[u8],
        mode: CurPutMode,
    ) -> ReedResult<()> {
        if st.id < 1 {
            return Err(no_record());
        }
        self.load_leaf(st.id)?;
        let mut added = 0u64;
        {
            let leaf = self
                .leaves
                .peek_mut(st.id)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            if st.kidx < 0 || st.kidx as usize >= leaf.recs.len() {
                return Err(no_record());
            }
            let rec = &mut leaf.recs[st.kidx as usize];
            let vnum = rec.value_count() as i64;
            if st.vidx < 0 || st.vidx >= vnum {
                return Err(no_record());
            }
            match mode {
                CurPutMode::Current => {
                    if st.vidx == 0 {
                        rec.value = value.to_vec();
                    } else {
                        rec.rest[st.vidx as usize - 1] = value.to_vec();
                    }
                }
                CurPutMode::Before => {
                    if st.vidx == 0 {
                        let old = std::mem::replace(&mut rec.value, value.to_vec());
                        rec.rest.insert(0, old);
                    } else {
                        rec.rest.insert(st.vidx as usize - 1, value.to_vec());
                    }
                    added = 1;
                }
                CurPutMode::After => {
                    rec.rest.insert(st.vidx as usize, value.to_vec());
                    st.vidx += 1;
                    added = 1;
                }
            }
            leaf.dirty = true;
        }
        self.meta.rnum += added;
        Ok(())
    }

    /// Deletes the value occurrence at the cursor and advances forward.
    pub(crate) fn cur_out(&mut self, st: &mut CursorState) -> ReedResult<bool> {
        if st.id < 1 {
            return Err(no_record());
        }
        self.load_leaf(st.id)?;
        {
            let leaf = self
                .leaves
                .peek_mut(st.id)
                .ok_or_else(|| internal("leaf vanished from the cache"))?;
            if st.kidx < 0 || st.kidx as usize >= leaf.recs.len() {
                return Err(no_record());
            }
            let rec = &mut leaf.recs[st.kidx as usize];
            let vnum = rec.value_count() as i64;
            if st.vidx < 0 || st.vidx >= vnum {
                return Err(no_record());
            }
            if vnum > 1 {
                if st.vidx == 0 {
                    rec.value = rec.rest.remove(0);
                } else {
                    rec.rest.remove(st.vidx as usize - 1);
                }
            } else {
                leaf.recs.remove(st.kidx as usize);
            }
            leaf.dirty = true;
        }
        self.meta.rnum -= 1;
        self.cur_adjust(st, true)
    }

    /// Key and value at the cursor.
    pub(crate) fn cur_rec(&mut self, st: &CursorState) -> ReedResult<(Vec<u8>, Vec<u8>)> {
        if st.id < 1 {
            return Err(no_record());
        }
        self.load_leaf(st.id)?;
        let leaf = self
            .leaves
            .peek(st.id)
            .ok_or_else(|| internal("leaf vanished from the cache"))?;
        let rec: &LeafRec = leaf
            .recs
            .get(st.kidx.max(0) as usize)
            .filter(|_| st.kidx >= 0)
            .ok_or_else(no_record)?;
        let value = if st.vidx == 0 {
            rec.value.clone()
        } else if st.vidx > 0 {
            rec.rest
                .get(st.vidx as usize - 1)
                .cloned()
                .ok_or_else(no_record)?
        } else {
            return Err(no_record());
        };
        Ok((rec.key.clone(), value))
    }
}

/// Ordered cursor over a B+ tree database.
///
/// Movement methods fail with `ErrorCode::NoRecord` once the cursor walks
/// off either end; accessor methods fail the same way while the cursor is
/// unpositioned.
pub struct Cursor<'a> {
    tree: &'a Btree,
    st: CursorState,
}

impl Btree {
    /// Creates an unpositioned cursor.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            tree: self,
            st: CursorState::default(),
        }
    }

    /// Iterates every (key, value) occurrence in ascending key order.
    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter {
            cursor: self.cursor(),
            started: false,
            finished: false,
        }
    }
}

impl<'a> Cursor<'a> {
    /// Moves to the first record.
    pub fn first(&mut self) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_first")?;
        if core.cur_first(&mut self.st)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Moves to the last record.
    pub fn last(&mut self) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_last")?;
        if core.cur_last(&mut self.st)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Moves to the front of the records matching `key`, or to the first
    /// record after it.
    pub fn jump(&mut self, key: &[u8]) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_jump")?;
        if core.cur_jump(&mut self.st, key, true)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Moves to the rear of the records matching `key`, or to the last
    /// record before it.
    pub fn jump_back(&mut self, key: &[u8]) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_jump_back")?;
        if core.cur_jump(&mut self.st, key, false)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Moves to the next value occurrence.
    pub fn next(&mut self) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_next")?;
        if core.cur_next(&mut self.st)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Moves to the previous value occurrence.
    pub fn prev(&mut self) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_open("cursor_prev")?;
        if core.cur_prev(&mut self.st)? {
            Ok(())
        } else {
            Err(no_record())
        }
    }

    /// Writes a value at (or around) the cursor.
    pub fn put(&mut self, value: &[u8], mode: CurPutMode) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_writer("cursor_put")?;
        core.cur_put(&mut self.st, value, mode)
    }

    /// Deletes the value occurrence at the cursor and advances forward.
    ///
    /// Deleting the final occurrence leaves the cursor unpositioned; the
    /// deletion itself still succeeds.
    pub fn out(&mut self) -> ReedResult<()> {
        let mut core = self.tree.lock();
        core.require_writer("cursor_out")?;
        core.cur_out(&mut self.st)?;
        Ok(())
    }

    /// Key of the record at the cursor.
    pub fn key(&self) -> ReedResult<Vec<u8>> {
        Ok(self.rec()?.0)
    }

    /// Value occurrence at the cursor.
    pub fn value(&self) -> ReedResult<Vec<u8>> {
        Ok(self.rec()?.1)
    }

    /// Key and value occurrence at the cursor.
    pub fn rec(&self) -> ReedResult<(Vec<u8>, Vec<u8>)> {
        let mut core = self.tree.lock();
        core.require_open("cursor_rec")?;
        core.cur_rec(&self.st)
    }
}

/// Iterator adaptor over a cursor, yielding each (key, value) occurrence.
pub struct TreeIter<'a> {
    cursor: Cursor<'a>,
    started: bool,
    finished: bool,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = ReedResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let moved = if self.started {
            self.cursor.next()
        } else {
            self.started = true;
            self.cursor.first()
        };
        match moved {
            Ok(()) => Some(self.cursor.rec()),
            Err(e) if e.code() == ErrorCode::NoRecord => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
