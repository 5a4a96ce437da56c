// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::store::record::*;

    #[test]
    fn test_record_roundtrip_small_links() {
        let apow = 8;
        let encoded = encode_record(
            0xa7,
            0x100,
            0x4200,
            3,
            b"alpha",
            b"beta-value",
            false,
            apow,
        );
        let header = parse_record_header(&encoded, false, apow).unwrap();
        assert_eq!(header.hash, 0xa7);
        assert_eq!(header.left, 0x100);
        assert_eq!(header.right, 0x4200);
        assert_eq!(header.psiz, 3);
        assert_eq!(header.ksiz, 5);
        assert_eq!(header.vsiz, 10);
        assert_eq!(encoded.len() as u64, header.total_size());

        let key_start = header.body_off as usize;
        let val_start = header.value_off() as usize;
        assert_eq!(&encoded[key_start..key_start + 5], b"alpha");
        assert_eq!(&encoded[val_start..val_start + 10], b"beta-value");
        // Padding is zeroed.
        assert!(encoded[val_start + 10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_record_roundtrip_large_links() {
        let apow = 4;
        let off = 0x1_2345_6780u64;
        let encoded = encode_record(1, off, 0, 0, b"k", b"v", true, apow);
        let header = parse_record_header(&encoded, true, apow).unwrap();
        assert_eq!(header.left, off);
        assert_eq!(header.right, 0);
    }

    #[test]
    fn test_link_shift_loses_nothing_on_aligned_offsets() {
        // Offsets are always multiples of the alignment, so the shift is
        // lossless.
        let apow = 8;
        for off in [0u64, 256, 512, 1 << 20, (1 << 32) + 256] {
            let bytes = encode_link(off, false, apow);
            let encoded = encode_record(0, off, off, 0, b"", b"", false, apow);
            let header = parse_record_header(&encoded, false, apow).unwrap();
            assert_eq!(header.left, off);
            assert_eq!(bytes.len(), 4);
        }
    }

    #[test]
    fn test_link_field_offsets() {
        assert_eq!(link_field_off(Side::Left, false), 2);
        assert_eq!(link_field_off(Side::Right, false), 6);
        assert_eq!(link_field_off(Side::Left, true), 2);
        assert_eq!(link_field_off(Side::Right, true), 10);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut encoded = encode_record(0, 0, 0, 0, b"k", b"v", false, 8);
        encoded[0] = 0x00;
        assert!(parse_record_header(&encoded, false, 8).is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let encoded = encode_record(0, 0, 0, 0, b"k", b"v", false, 8);
        assert!(parse_record_header(&encoded[..4], false, 8).is_err());
    }

    #[test]
    fn test_free_stamp_roundtrip() {
        let stamp = encode_free_stamp(4096);
        assert_eq!(stamp[0], FREE_MAGIC);
        assert_eq!(parse_free_stamp(&stamp).unwrap(), 4096);
        assert!(parse_free_stamp(&stamp[..3]).is_err());
        let mut bad = stamp;
        bad[0] = RECORD_MAGIC;
        assert!(parse_free_stamp(&bad).is_err());
    }

    #[test]
    fn test_header_fits_read_chunk() {
        // Worst case: large links and maximal vnum widths.
        let encoded = encode_record(
            0xff,
            u64::MAX >> 8 << 8,
            u64::MAX >> 8 << 8,
            255,
            &vec![0u8; 1],
            &vec![0u8; 1],
            true,
            0,
        );
        let header = parse_record_header(&encoded, true, 0).unwrap();
        assert!(header.body_off <= HEADER_READ_SIZE as u64);
    }
}
