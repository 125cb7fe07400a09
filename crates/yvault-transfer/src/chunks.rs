//! Fixed-size chunk arithmetic
//!
//! A plaintext of length L is split into `ceil(L / chunk_size)` chunks,
//! numbered from 1. Each chunk is sealed on its own and grows by exactly
//! `overhead` bytes, so every sealed chunk but the last is
//! `chunk_size + overhead` long and the sealed chunks sit back-to-back in
//! one backend object.
//!
//! ```text
//! chunk_size=5 overhead=2 total=19
//!   chunk 1 -> [0,6]
//!   chunk 2 -> [7,13]
//!   chunk 3 -> [14,18]  eof
//! ```

use serde::{Deserialize, Serialize};
use yvault_core::config::TransferConfig;

/// Inclusive byte range of one sealed chunk inside a backend object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
    /// The range reaches the last byte of the object
    pub eof: bool,
}

impl ChunkRange {
    /// Number of bytes in the range.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Plaintext bytes per chunk
    pub chunk_size: u64,
    /// Bytes added by sealing (nonce + tag)
    pub overhead: u64,
}

impl ChunkLayout {
    pub const fn new(chunk_size: u64, overhead: u64) -> Self {
        Self {
            chunk_size,
            overhead,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.chunk_size, config.overhead)
    }

    /// Length of a full sealed chunk.
    pub fn sealed_size(&self) -> u64 {
        self.chunk_size.saturating_add(self.overhead)
    }

    /// Number of chunks for `plaintext_len` bytes. An empty file still
    /// occupies one (empty) chunk so that it has something to complete.
    pub fn chunk_count(&self, plaintext_len: u64) -> u32 {
        let count = plaintext_len.div_ceil(self.chunk_size.max(1)).max(1);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Sealed length of a whole object of `plaintext_len` bytes.
    pub fn ciphertext_len(&self, plaintext_len: u64) -> u64 {
        u64::from(self.chunk_count(plaintext_len))
            .saturating_mul(self.overhead)
            .saturating_add(plaintext_len)
    }

    /// Byte range of sealed chunk `chunk` (1-indexed) in an object of
    /// `total_len` bytes. `None` when the chunk lies past the end.
    pub fn read_boundaries(&self, chunk: u32, total_len: u64) -> Option<ChunkRange> {
        if chunk == 0 || total_len == 0 {
            return None;
        }
        let start = u64::from(chunk - 1).checked_mul(self.sealed_size())?;
        if start > total_len - 1 {
            return None;
        }
        let mut end = start.saturating_add(self.sealed_size() - 1);
        let mut eof = false;
        if end >= total_len - 1 {
            end = total_len - 1;
            eof = true;
        }
        Some(ChunkRange { start, end, eof })
    }

    /// Half-open plaintext range `[start, end)` that chunk `chunk` covers in a
    /// file of `plaintext_len` bytes. `None` past the last chunk.
    pub fn plaintext_bounds(&self, chunk: u32, plaintext_len: u64) -> Option<(u64, u64)> {
        if chunk == 0 || chunk > self.chunk_count(plaintext_len) {
            return None;
        }
        let start = u64::from(chunk - 1).checked_mul(self.chunk_size)?;
        let end = start.saturating_add(self.chunk_size).min(plaintext_len);
        Some((start.min(end), end))
    }

    /// Exact sealed length of chunk `chunk` of a `plaintext_len` byte file.
    pub fn sealed_len_of(&self, chunk: u32, plaintext_len: u64) -> Option<u64> {
        let (start, end) = self.plaintext_bounds(chunk, plaintext_len)?;
        (end - start).checked_add(self.overhead)
    }

    /// Plaintext bytes carried by a sealed chunk of `sealed_len` bytes.
    pub fn plaintext_len_of(&self, sealed_len: u64) -> u64 {
        sealed_len.saturating_sub(self.overhead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SMALL: ChunkLayout = ChunkLayout::new(5, 2);

    #[test]
    fn test_boundaries_small_example() {
        let ranges: Vec<_> = (1..=3)
            .map(|n| SMALL.read_boundaries(n, 19).unwrap())
            .collect();
        assert_eq!(
            ranges,
            vec![
                ChunkRange { start: 0, end: 6, eof: false },
                ChunkRange { start: 7, end: 13, eof: false },
                ChunkRange { start: 14, end: 18, eof: true },
            ]
        );
        assert!(SMALL.read_boundaries(4, 19).is_none());
    }

    #[test]
    fn test_exact_multiple_sets_eof_on_last_full_chunk() {
        // two full chunks, 14 sealed bytes
        let last = SMALL.read_boundaries(2, 14).unwrap();
        assert_eq!(last, ChunkRange { start: 7, end: 13, eof: true });
        assert!(!SMALL.read_boundaries(1, 14).unwrap().eof);
    }

    #[test]
    fn test_huge_chunk_size_does_not_overflow() {
        let huge = ChunkLayout::new(u64::MAX - 8, 40);
        assert_eq!(huge.sealed_size(), u64::MAX);
        assert_eq!(
            huge.read_boundaries(1, 100),
            Some(ChunkRange { start: 0, end: 99, eof: true })
        );
        assert!(huge.read_boundaries(3, 100).is_none());
        assert!(huge.read_boundaries(u32::MAX, u64::MAX).is_none());
        assert_eq!(huge.plaintext_bounds(1, 10), Some((0, 10)));
    }

    #[test]
    fn test_sealed_len_of_last_chunk() {
        let layout = ChunkLayout::new(16, 40);
        assert_eq!(layout.sealed_len_of(1, 80), Some(56));
        assert_eq!(layout.sealed_len_of(5, 80), Some(56));
        assert_eq!(layout.sealed_len_of(2, 20), Some(44));
        assert_eq!(layout.sealed_len_of(1, 0), Some(40));
        assert!(layout.sealed_len_of(6, 80).is_none());
    }

    #[test]
    fn test_chunk_zero_and_empty_object() {
        assert!(SMALL.read_boundaries(0, 19).is_none());
        assert!(SMALL.read_boundaries(1, 0).is_none());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(SMALL.chunk_count(0), 1);
        assert_eq!(SMALL.chunk_count(1), 1);
        assert_eq!(SMALL.chunk_count(5), 1);
        assert_eq!(SMALL.chunk_count(6), 2);
        assert_eq!(SMALL.chunk_count(15), 3);
        assert_eq!(SMALL.ciphertext_len(15), 21);
        assert_eq!(SMALL.ciphertext_len(0), 2);
    }

    #[test]
    fn test_plaintext_bounds() {
        assert_eq!(SMALL.plaintext_bounds(1, 13), Some((0, 5)));
        assert_eq!(SMALL.plaintext_bounds(3, 13), Some((10, 13)));
        assert_eq!(SMALL.plaintext_bounds(4, 13), None);
        assert_eq!(SMALL.plaintext_bounds(1, 0), Some((0, 0)));
    }

    proptest! {
        #[test]
        fn prop_ranges_tile_the_object(
            chunk_size in 1u64..64,
            overhead in 0u64..48,
            plaintext_len in 0u64..2048,
        ) {
            let layout = ChunkLayout::new(chunk_size, overhead);
            let total = layout.ciphertext_len(plaintext_len);
            let count = layout.chunk_count(plaintext_len);
            prop_assume!(total > 0);

            let mut next = 0u64;
            for n in 1..=count {
                let range = layout.read_boundaries(n, total).unwrap();
                prop_assert_eq!(range.start, next);
                prop_assert_eq!(range.eof, n == count);
                next = range.end + 1;
            }
            prop_assert_eq!(next, total);
            prop_assert!(layout.read_boundaries(count + 1, total).is_none());
        }

        #[test]
        fn prop_plaintext_bounds_match_sealed_ranges(
            chunk_size in 1u64..64,
            plaintext_len in 1u64..2048,
        ) {
            let layout = ChunkLayout::new(chunk_size, 40);
            let total = layout.ciphertext_len(plaintext_len);
            for n in 1..=layout.chunk_count(plaintext_len) {
                let (start, end) = layout.plaintext_bounds(n, plaintext_len).unwrap();
                let sealed = layout.read_boundaries(n, total).unwrap();
                prop_assert_eq!(sealed.size(), end - start + 40);
            }
        }
    }
}
