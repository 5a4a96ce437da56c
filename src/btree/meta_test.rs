// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::btree::meta::{TreeMeta, META_SIZE};
    use crate::btree::page::NODE_ID_BASE;

    fn sample_meta() -> TreeMeta {
        TreeMeta {
            lmemb: 128,
            nmemb: 256,
            root: NODE_ID_BASE + 2,
            first: 1,
            last: 9,
            lnum: 9,
            nnum: 2,
            rnum: 1000,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = sample_meta();
        let bytes = meta.dump();
        assert_eq!(bytes.len(), META_SIZE);
        assert_eq!(TreeMeta::load(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_meta_layout_is_little_endian() {
        let meta = sample_meta();
        let bytes = meta.dump();
        assert_eq!(&bytes[0..4], &128u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &256u32.to_le_bytes());
        assert_eq!(&bytes[48..56], &1000u64.to_le_bytes());
        // Reserved tail stays zero.
        assert!(bytes[56..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_meta_short_buffer_rejected() {
        let bytes = sample_meta().dump();
        assert!(TreeMeta::load(&bytes[..META_SIZE - 1]).is_err());
    }

    #[test]
    fn test_meta_load_from_larger_window() {
        // The opaque window is longer than the metadata block; trailing
        // caller bytes are ignored.
        let meta = sample_meta();
        let mut window = vec![0u8; 192];
        window[..META_SIZE].copy_from_slice(&meta.dump());
        window[META_SIZE] = 0xaa;
        assert_eq!(TreeMeta::load(&window).unwrap(), meta);
    }
}
