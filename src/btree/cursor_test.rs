// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::btree::{Btree, BtreeOptions, CurPutMode};
    use crate::error::ErrorCode;
    use crate::store::OpenMode;
    use std::path::PathBuf;

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("cursor.rtd")
    }

    fn open_small(dir: &tempfile::TempDir) -> Btree {
        let db = Btree::new();
        db.tune(BtreeOptions {
            lmemb: 4,
            nmemb: 4,
            bnum: 64,
            apow: 4,
            fpow: 6,
            ..BtreeOptions::default()
        })
        .unwrap();
        db.open(&db_path(dir), OpenMode::writer_create()).unwrap();
        db
    }

    #[test]
    fn test_first_then_next_yields_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put(b"c", b"3").unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();

        let mut cursor = db.cursor();
        cursor.first().unwrap();
        assert_eq!(cursor.key().unwrap(), b"a");
        cursor.next().unwrap();
        assert_eq!(cursor.key().unwrap(), b"b");
        cursor.next().unwrap();
        assert_eq!(cursor.key().unwrap(), b"c");
        assert_eq!(cursor.next().unwrap_err().code(), ErrorCode::NoRecord);
        assert_eq!(cursor.key().unwrap_err().code(), ErrorCode::NoRecord);
        db.close().unwrap();
    }

    #[test]
    fn test_last_then_prev_walks_backward() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        for key in ["a", "b", "c", "d"] {
            db.put(key.as_bytes(), b"x").unwrap();
        }
        let mut cursor = db.cursor();
        cursor.last().unwrap();
        let mut keys = vec![cursor.key().unwrap()];
        while cursor.prev().is_ok() {
            keys.push(cursor.key().unwrap());
        }
        assert_eq!(keys, vec![b"d", b"c", b"b", b"a"]);
        db.close().unwrap();
    }

    #[test]
    fn test_duplicates_visited_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put(b"a", b"before").unwrap();
        db.put_dup(b"k", b"v1").unwrap();
        db.put_dup(b"k", b"v2").unwrap();
        db.put_dup(b"k", b"v3").unwrap();
        db.put(b"z", b"after").unwrap();

        let mut cursor = db.cursor();
        cursor.jump(b"k").unwrap();
        let mut values = Vec::new();
        while let Ok((key, value)) = cursor.rec() {
            if key != b"k" {
                break;
            }
            values.push(value);
            if cursor.next().is_err() {
                break;
            }
        }
        assert_eq!(values, vec![b"v1", b"v2", b"v3"]);
        db.close().unwrap();
    }

    #[test]
    fn test_jump_lands_on_insertion_point() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        for key in ["b", "d", "f"] {
            db.put(key.as_bytes(), b"x").unwrap();
        }
        let mut cursor = db.cursor();

        // Exact match.
        cursor.jump(b"d").unwrap();
        assert_eq!(cursor.key().unwrap(), b"d");

        // Between records: the next key forward.
        cursor.jump(b"c").unwrap();
        assert_eq!(cursor.key().unwrap(), b"d");

        // Before the first record.
        cursor.jump(b"a").unwrap();
        assert_eq!(cursor.key().unwrap(), b"b");

        // Past the last record.
        assert_eq!(cursor.jump(b"x").unwrap_err().code(), ErrorCode::NoRecord);
        db.close().unwrap();
    }

    #[test]
    fn test_jump_back_steps_to_previous_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        for key in ["b", "d", "f"] {
            db.put(key.as_bytes(), b"x").unwrap();
        }
        db.put_dup(b"d", b"second").unwrap();
        let mut cursor = db.cursor();

        // Exact match lands on the last occurrence.
        cursor.jump_back(b"d").unwrap();
        assert_eq!(cursor.key().unwrap(), b"d");
        assert_eq!(cursor.value().unwrap(), b"second");

        // Between records: the previous key.
        cursor.jump_back(b"e").unwrap();
        assert_eq!(cursor.key().unwrap(), b"d");

        // Before the first record.
        assert_eq!(
            cursor.jump_back(b"a").unwrap_err().code(),
            ErrorCode::NoRecord
        );

        // Past the last record.
        cursor.jump_back(b"z").unwrap();
        assert_eq!(cursor.key().unwrap(), b"f");
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_put_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put(b"k", b"v1").unwrap();

        let mut cursor = db.cursor();
        cursor.jump(b"k").unwrap();
        cursor.put(b"v0", CurPutMode::Before).unwrap();
        cursor.put(b"v2", CurPutMode::After).unwrap();
        assert_eq!(
            db.get_list(b"k").unwrap(),
            vec![b"v0".to_vec(), b"v1".to_vec(), b"v2".to_vec()]
        );
        assert_eq!(db.rnum().unwrap(), 3);
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_put_current_overwrites_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put_dup(b"k", b"v1").unwrap();
        db.put_dup(b"k", b"v2").unwrap();

        let mut cursor = db.cursor();
        cursor.jump(b"k").unwrap();
        cursor.next().unwrap();
        cursor.put(b"v2-new", CurPutMode::Current).unwrap();
        assert_eq!(
            db.get_list(b"k").unwrap(),
            vec![b"v1".to_vec(), b"v2-new".to_vec()]
        );
        assert_eq!(db.rnum().unwrap(), 2);
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_out_advances_forward() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put_dup(b"k", b"v1").unwrap();
        db.put_dup(b"k", b"v2").unwrap();
        db.put(b"m", b"tail").unwrap();

        let mut cursor = db.cursor();
        cursor.first().unwrap();
        cursor.out().unwrap();
        // v1 is gone; the cursor sits on the next occurrence.
        assert_eq!(cursor.value().unwrap(), b"v2");
        cursor.out().unwrap();
        assert_eq!(cursor.key().unwrap(), b"m");
        cursor.out().unwrap();
        assert_eq!(cursor.rec().unwrap_err().code(), ErrorCode::NoRecord);
        assert_eq!(db.rnum().unwrap(), 0);
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_crosses_leaf_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        for i in 0..64u32 {
            db.put(format!("{:03}", i).as_bytes(), b"x").unwrap();
        }
        assert!(db.lnum().unwrap() > 4);

        let mut cursor = db.cursor();
        cursor.first().unwrap();
        let mut count = 1;
        while cursor.next().is_ok() {
            count += 1;
        }
        assert_eq!(count, 64);

        cursor.last().unwrap();
        count = 1;
        while cursor.prev().is_ok() {
            count += 1;
        }
        assert_eq!(count, 64);
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        let mut cursor = db.cursor();
        assert_eq!(cursor.first().unwrap_err().code(), ErrorCode::NoRecord);
        assert_eq!(cursor.last().unwrap_err().code(), ErrorCode::NoRecord);
        assert_eq!(cursor.jump(b"k").unwrap_err().code(), ErrorCode::NoRecord);
        assert_eq!(cursor.rec().unwrap_err().code(), ErrorCode::NoRecord);
        db.close().unwrap();
    }

    #[test]
    fn test_iter_yields_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put(b"a", b"1").unwrap();
        db.put_dup(b"b", b"2").unwrap();
        db.put_dup(b"b", b"3").unwrap();
        db.put(b"c", b"4").unwrap();

        let entries: Vec<(Vec<u8>, Vec<u8>)> =
            db.iter().map(|entry| entry.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"b".to_vec(), b"3".to_vec()),
                (b"c".to_vec(), b"4".to_vec()),
            ]
        );
        db.close().unwrap();
    }

    #[test]
    fn test_cursor_put_requires_writer() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_small(&dir);
        db.put(b"k", b"v").unwrap();
        db.close().unwrap();

        let db = Btree::new();
        db.open(&db_path(&dir), OpenMode::reader()).unwrap();
        let mut cursor = db.cursor();
        cursor.first().unwrap();
        assert_eq!(
            cursor.put(b"x", CurPutMode::Current).unwrap_err().code(),
            ErrorCode::Invalid
        );
        assert_eq!(cursor.out().unwrap_err().code(), ErrorCode::Invalid);
        db.close().unwrap();
    }
}
