// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::store::free_pool::{FreeBlock, FreePool};

    #[test]
    fn test_allocate_from_empty_pool() {
        let mut pool = FreePool::new(4);
        assert_eq!(pool.allocate(64), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_exact_fit_consumes_block() {
        let mut pool = FreePool::new(4);
        pool.release(1024, 256);
        assert_eq!(pool.allocate(256), Some(FreeBlock { off: 1024, size: 256 }));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_best_fit_picks_smallest_sufficient() {
        let mut pool = FreePool::new(4);
        pool.release(4096, 512);
        pool.release(1024, 128);
        pool.release(2048, 256);
        assert_eq!(pool.allocate(256), Some(FreeBlock { off: 2048, size: 256 }));
        // The 128 block is too small for 256; next is 512.
        assert_eq!(pool.allocate(256), Some(FreeBlock { off: 4096, size: 512 }));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_caller_side_split_reinserts_surplus() {
        let mut pool = FreePool::new(4);
        pool.release(1024, 512);
        let block = pool.allocate(128).unwrap();
        assert_eq!(block, FreeBlock { off: 1024, size: 512 });
        // The store keeps the front and returns the surplus.
        pool.release(block.off + 128, block.size - 128);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.blocks()[0], FreeBlock { off: 1152, size: 384 });
        assert_eq!(
            pool.allocate(384),
            Some(FreeBlock { off: 1152, size: 384 })
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn test_zero_size_release_ignored() {
        let mut pool = FreePool::new(4);
        pool.release(512, 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_overflow_merges_adjacent() {
        // Capacity 2^1 = 2 entries.
        let mut pool = FreePool::new(1);
        pool.release(1000, 100);
        pool.release(1100, 100);
        // Third insert exceeds capacity; 1000+1100 merge into one block.
        pool.release(5000, 50);
        assert_eq!(pool.len(), 2);
        assert!(pool
            .blocks()
            .iter()
            .any(|b| *b == FreeBlock { off: 1000, size: 200 }));
    }

    #[test]
    fn test_overflow_drops_smallest() {
        let mut pool = FreePool::new(1);
        pool.release(1000, 100);
        pool.release(5000, 300);
        // Nothing merges; the smallest entry (64 bytes) is dropped.
        pool.release(9000, 64);
        assert_eq!(pool.len(), 2);
        assert!(pool.blocks().iter().all(|b| b.size >= 100));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut pool = FreePool::new(6);
        pool.release(768, 256);
        pool.release(4096, 512);
        pool.release(2048, 128);
        let bytes = pool.serialize(512);
        let restored = FreePool::deserialize(&bytes, 6).unwrap();
        assert_eq!(restored.len(), 3);
        let mut blocks = restored.blocks().to_vec();
        blocks.sort_unstable_by_key(|b| b.off);
        assert_eq!(
            blocks,
            vec![
                FreeBlock { off: 768, size: 256 },
                FreeBlock { off: 2048, size: 128 },
                FreeBlock { off: 4096, size: 512 },
            ]
        );
    }

    #[test]
    fn test_serialize_respects_region_size() {
        let mut pool = FreePool::new(10);
        for i in 0..100u64 {
            pool.release(10_000 + i * 512, 256);
        }
        // A tiny region keeps only what fits plus the terminator.
        let bytes = pool.serialize(16);
        assert!(bytes.len() <= 16);
        let restored = FreePool::deserialize(&bytes, 10).unwrap();
        assert!(restored.len() < 100);
    }

    #[test]
    fn test_deserialize_empty_region() {
        let pool = FreePool::deserialize(&[0], 4).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_deserialize_truncated_fails() {
        assert!(FreePool::deserialize(&[], 4).is_err());
        // Delta present but size missing.
        let mut bytes = Vec::new();
        crate::vnum::write_vnum64(&mut bytes, 512);
        assert!(FreePool::deserialize(&bytes, 4).is_err());
    }
}
