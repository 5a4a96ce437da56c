// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::vnum::*;

    fn roundtrip64(num: u64) -> usize {
        let mut buf = Vec::new();
        write_vnum64(&mut buf, num);
        let (decoded, width) = read_vnum64(&buf).unwrap();
        assert_eq!(decoded, num);
        assert_eq!(width, buf.len());
        width
    }

    #[test]
    fn test_vnum64_zero() {
        let mut buf = Vec::new();
        write_vnum64(&mut buf, 0);
        assert_eq!(buf, vec![0]);
        assert_eq!(read_vnum64(&buf), Some((0, 1)));
    }

    #[test]
    fn test_vnum64_known_encodings() {
        // 300 = 44 + 2*128: continuation byte is the complement of 44.
        let mut buf = Vec::new();
        write_vnum64(&mut buf, 300);
        assert_eq!(buf, vec![!44u8, 2]);

        // 128 = 0 + 1*128.
        buf.clear();
        write_vnum64(&mut buf, 128);
        assert_eq!(buf, vec![0xff, 1]);
    }

    #[test]
    fn test_vnum64_boundaries() {
        assert_eq!(roundtrip64(1), 1);
        assert_eq!(roundtrip64(127), 1);
        assert_eq!(roundtrip64(128), 2);
        assert_eq!(roundtrip64(16383), 2);
        assert_eq!(roundtrip64(16384), 3);
        assert_eq!(roundtrip64(u32::MAX as u64), 5);
        assert_eq!(roundtrip64(u64::MAX), VNUM64_MAX_LEN);
    }

    #[test]
    fn test_vnum64_truncated() {
        let mut buf = Vec::new();
        write_vnum64(&mut buf, u64::MAX);
        // Strip the terminator: decoding must fail instead of inventing one.
        buf.pop();
        assert_eq!(read_vnum64(&buf), None);
        assert_eq!(read_vnum64(&[]), None);
    }

    #[test]
    fn test_vnum64_trailing_bytes_ignored() {
        let mut buf = Vec::new();
        write_vnum64(&mut buf, 300);
        let width = buf.len();
        buf.extend_from_slice(b"tail");
        assert_eq!(read_vnum64(&buf), Some((300, width)));
    }

    #[test]
    fn test_vnum32_range_check() {
        let mut buf = Vec::new();
        write_vnum32(&mut buf, u32::MAX);
        assert_eq!(read_vnum32(&buf), Some((u32::MAX, 5)));

        buf.clear();
        write_vnum64(&mut buf, u32::MAX as u64 + 1);
        assert_eq!(read_vnum32(&buf), None);
    }

    #[test]
    fn test_vnum_sequence() {
        // Page codecs concatenate vnums back to back.
        let mut buf = Vec::new();
        let values = [0u64, 5, 127, 128, 300, 1 << 20, 1 << 48];
        for v in values {
            write_vnum64(&mut buf, v);
        }
        let mut rest = buf.as_slice();
        for v in values {
            let (decoded, width) = read_vnum64(rest).unwrap();
            assert_eq!(decoded, v);
            rest = &rest[width..];
        }
        assert!(rest.is_empty());
    }

    #[test]
    fn test_fixed_width_helpers() {
        let mut buf = vec![0u8; 16];
        put_u32_le(&mut buf, 2, 0xdead_beef);
        put_u64_le(&mut buf, 8, 0x0123_4567_89ab_cdef);
        assert_eq!(get_u32_le(&buf, 2), Some(0xdead_beef));
        assert_eq!(get_u64_le(&buf, 8), Some(0x0123_4567_89ab_cdef));
        assert_eq!(get_u32_le(&buf, 14), None);
        assert_eq!(get_u64_le(&buf, 9), None);
    }
}
