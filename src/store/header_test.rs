// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;
    use crate::store::header::*;

    fn sample_header() -> FileHeader {
        FileHeader {
            version: FORMAT_VERSION,
            flags: FLAG_OPEN,
            apow: 8,
            fpow: 10,
            opts: OPT_DEFLATE,
            bnum: 16381,
            rnum: 42,
            fsiz: 131072,
            frec: 65792,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_magic_is_checked() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] = b'X';
        let err = FileHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Meta);
    }

    #[test]
    fn test_version_is_checked() {
        let mut bytes = sample_header().to_bytes();
        bytes[VERSION_OFF] = FORMAT_VERSION + 1;
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_zero_bnum_rejected() {
        let mut header = sample_header();
        header.bnum = 0;
        let bytes = header.to_bytes();
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let bytes = sample_header().to_bytes();
        assert!(FileHeader::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_bucket_width_follows_large_option() {
        let mut header = sample_header();
        assert_eq!(header.bucket_width(), 4);
        header.opts |= OPT_LARGE;
        assert_eq!(header.bucket_width(), 8);
    }

    #[test]
    fn test_alignment() {
        let mut header = sample_header();
        assert_eq!(header.align(), 256);
        header.apow = 0;
        assert_eq!(header.align(), 1);
    }

    #[test]
    fn test_opaque_window_zeroed_in_serialised_form() {
        let bytes = sample_header().to_bytes();
        assert!(bytes[OPAQUE_OFF..OPAQUE_OFF + OPAQUE_SIZE]
            .iter()
            .all(|&b| b == 0));
    }
}
