// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;
    use crate::fileio::*;
    use std::fs::OpenOptions;

    fn scratch_file() -> (tempfile::TempDir, std::fs::File, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        let path_str = path.to_string_lossy().to_string();
        (dir, file, path_str)
    }

    #[test]
    fn test_positional_write_read() {
        let (_dir, file, path) = scratch_file();
        write_all_at(&file, b"hello", 0, &path).unwrap();
        write_all_at(&file, b"world", 100, &path).unwrap();

        let mut buf = [0u8; 5];
        read_exact_at(&file, &mut buf, 100, &path).unwrap();
        assert_eq!(&buf, b"world");
        read_exact_at(&file, &mut buf, 0, &path).unwrap();
        assert_eq!(&buf, b"hello");

        // The gap reads back as zeroes.
        let mut gap = [1u8; 4];
        read_exact_at(&file, &mut gap, 5, &path).unwrap();
        assert_eq!(gap, [0u8; 4]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let (_dir, file, path) = scratch_file();
        write_all_at(&file, b"abc", 0, &path).unwrap();
        let mut buf = [0u8; 8];
        let err = read_exact_at(&file, &mut buf, 0, &path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
    }

    #[test]
    fn test_read_at_most_stops_at_eof() {
        let (_dir, file, path) = scratch_file();
        write_all_at(&file, b"abcdef", 0, &path).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(read_at_most(&file, &mut buf, 2, &path).unwrap(), 4);
        assert_eq!(&buf[..4], b"cdef");
        assert_eq!(read_at_most(&file, &mut buf, 6, &path).unwrap(), 0);
        assert_eq!(read_at_most(&file, &mut buf, 100, &path).unwrap(), 0);
    }

    #[test]
    fn test_file_size_and_set_len() {
        let (_dir, file, path) = scratch_file();
        assert_eq!(file_size(&file, &path).unwrap(), 0);
        set_file_size(&file, 4096, &path).unwrap();
        assert_eq!(file_size(&file, &path).unwrap(), 4096);
    }

    #[test]
    fn test_exclusive_lock_excludes_other_handle() {
        let (_dir, file, path) = scratch_file();
        lock_file(&file, true, false, &path).unwrap();

        let other = OpenOptions::new().read(true).open(&path).unwrap();
        let err = lock_file(&other, false, true, &path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);

        unlock_file(&file, &path).unwrap();
        lock_file(&other, false, true, &path).unwrap();
        unlock_file(&other, &path).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let (_dir, file, path) = scratch_file();
        let other = OpenOptions::new().read(true).open(&path).unwrap();
        lock_file(&file, false, false, &path).unwrap();
        lock_file(&other, false, true, &path).unwrap();
        unlock_file(&other, &path).unwrap();
        unlock_file(&file, &path).unwrap();
    }

    #[test]
    fn test_sync_succeeds() {
        let (_dir, file, path) = scratch_file();
        write_all_at(&file, b"durable", 0, &path).unwrap();
        sync_file(&file, &path).unwrap();
    }
}
