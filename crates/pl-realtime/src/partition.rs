//! Atomic chunk claiming over a shared workload
//!
//! Every participating thread calls [`ChunkCursor::claim`] in a loop until it
//! returns `None`. Each index in `0..len` is handed out exactly once per
//! reset, in contiguous chunks, with a single `fetch_add` per claim.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use pl_core::assert_release;

/// Shared cursor handing out contiguous index ranges
#[derive(Debug)]
pub struct ChunkCursor {
    next: CachePadded<AtomicUsize>,
    chunk_size: usize,
}

impl ChunkCursor {
    pub fn new(chunk_size: usize) -> Self {
        assert_release!(chunk_size >= 1, "chunk size must be at least 1");
        Self {
            next: CachePadded::new(AtomicUsize::new(0)),
            chunk_size,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Rewind to index zero. Must not race with `claim`.
    #[inline]
    pub fn reset(&self) {
        self.next.store(0, Ordering::Relaxed);
    }

    /// Claim the next chunk of a workload of `len` items.
    ///
    /// The counter only grows by one chunk per claim, so with a `reset`
    /// before each period it stays below `len` plus one chunk per thread.
    #[inline]
    pub fn claim(&self, len: usize) -> Option<Range<usize>> {
        let start = self.next.fetch_add(self.chunk_size, Ordering::Relaxed);
        if start >= len {
            return None;
        }
        Some(start..start.saturating_add(self.chunk_size).min(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread_chunks() {
        let cursor = ChunkCursor::new(256);
        let chunks: Vec<_> = std::iter::from_fn(|| cursor.claim(1000)).collect();
        assert_eq!(chunks, vec![0..256, 256..512, 512..768, 768..1000]);
        assert_eq!(cursor.claim(1000), None);
    }

    #[test]
    fn test_empty_workload() {
        let cursor = ChunkCursor::new(4);
        assert_eq!(cursor.claim(0), None);
    }

    #[test]
    fn test_reset_rewinds() {
        let cursor = ChunkCursor::new(3);
        assert_eq!(cursor.claim(5), Some(0..3));
        assert_eq!(cursor.claim(5), Some(3..5));
        assert_eq!(cursor.claim(5), None);

        cursor.reset();
        assert_eq!(cursor.claim(5), Some(0..3));
    }

    #[test]
    fn test_last_chunk_near_usize_max() {
        let cursor = ChunkCursor::new(256);
        cursor.next.store(usize::MAX - 10, Ordering::Relaxed);
        assert_eq!(cursor.claim(usize::MAX), Some(usize::MAX - 10..usize::MAX));
    }

    #[test]
    fn test_concurrent_claims_cover_workload_once() {
        const LEN: usize = 1000;
        const NUM_THREADS: usize = 4;

        let cursor = Arc::new(ChunkCursor::new(256));
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                thread::spawn(move || std::iter::from_fn(|| cursor.claim(LEN)).collect::<Vec<_>>())
            })
            .collect();

        let mut chunks: Vec<Range<usize>> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        chunks.sort_by_key(|chunk| chunk.start);

        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        assert_eq!(total, LEN);
        assert_eq!(chunks.last().map(|chunk| chunk.len()), Some(232));

        let mut expected_start = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start, expected_start, "gap or overlap");
            expected_start = chunk.end;
        }
    }
}
