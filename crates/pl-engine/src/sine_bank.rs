//! Parallel Sine Bank
//!
//! Partials are taken in chunks by every processing thread until none are
//! left. Chunking keeps contention on the shared cursor low and forces each
//! thread to do a meaningful amount of work per claim, which is closer to a
//! real workload of synthesizers and effects than single sines would be.
//!
//! Each thread renders into its own scratch buffer; the driver thread sums
//! them with [`ParallelSineBank::mix_to`] once every thread has finished.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use pl_core::{MAX_NUM_FRAMES, StereoBuffer, StereoBufferMut, assert_release};
use pl_realtime::ChunkCursor;

use crate::{Partial, process_partial};

/// Partials taken at a time by a processing thread
pub const NUM_PARTIALS_PER_PROCESSING_CHUNK: usize = 256;

pub struct ParallelSineBank {
    partials: Box<[UnsafeCell<Partial>]>,
    buffers: Box<[CachePadded<Mutex<StereoBuffer>>]>,
    cursor: ChunkCursor,
    num_active_partials: AtomicUsize,
}

// SAFETY: partials are only mutated through `process`, and the cursor hands
// each index to exactly one thread between two calls to `prepare`.
unsafe impl Sync for ParallelSineBank {}

impl ParallelSineBank {
    pub fn new() -> Self {
        Self::with_chunk_size(NUM_PARTIALS_PER_PROCESSING_CHUNK)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            partials: Box::new([]),
            buffers: Box::new([]),
            cursor: ChunkCursor::new(chunk_size),
            num_active_partials: AtomicUsize::new(0),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.cursor.chunk_size()
    }

    pub fn num_partials(&self) -> usize {
        self.partials.len()
    }

    /// Snapshot of every partial's state
    pub fn partials(&mut self) -> Vec<Partial> {
        self.partials.iter_mut().map(|cell| *cell.get_mut()).collect()
    }

    pub fn set_partials(&mut self, partials: Vec<Partial>) {
        self.partials = partials.into_iter().map(UnsafeCell::new).collect();
    }

    pub fn num_threads(&self) -> usize {
        self.buffers.len()
    }

    /// Allocate one scratch buffer per processing thread
    pub fn set_num_threads(&mut self, num_threads: usize) {
        if num_threads != self.buffers.len() {
            self.buffers = (0..num_threads)
                .map(|_| CachePadded::new(Mutex::new(StereoBuffer::new(MAX_NUM_FRAMES))))
                .collect();
        }
    }

    /// Start a new period: the first `num_active_partials` partials ramp to
    /// their active amplitude, the rest fade out.
    ///
    /// # Safety
    ///
    /// No thread may be inside [`process`](Self::process) while this runs.
    pub unsafe fn prepare(&self, num_active_partials: usize, num_frames: usize) {
        assert_release!(
            num_frames > 0 && num_frames <= MAX_NUM_FRAMES,
            "Invalid number of frames: {}",
            num_frames
        );

        self.num_active_partials
            .store(num_active_partials, Ordering::Relaxed);
        self.cursor.reset();

        for buffer in self.buffers.iter() {
            buffer.lock().clear(num_frames);
        }
    }

    /// Next range of partials for the calling thread, `None` once every
    /// partial of this period has been claimed
    #[inline]
    pub fn claim_next_chunk(&self) -> Option<Range<usize>> {
        self.cursor.claim(self.partials.len())
    }

    /// Claim and render chunks until the bank is exhausted. Returns the
    /// number of active partials this thread rendered.
    pub fn process(&self, thread_index: usize, num_frames: usize) -> usize {
        assert_release!(
            thread_index < self.buffers.len(),
            "Invalid thread index: {}",
            thread_index
        );
        assert_release!(
            num_frames > 0 && num_frames <= MAX_NUM_FRAMES,
            "Invalid number of frames: {}",
            num_frames
        );

        let mut buffer = self.buffers[thread_index].lock();
        let num_active = self.num_active_partials.load(Ordering::Relaxed);
        let mut num_active_processed = 0;

        while let Some(chunk) = self.claim_next_chunk() {
            for index in chunk {
                // SAFETY: `index` was claimed by this thread alone
                let partial = unsafe { &mut *self.partials[index].get() };
                if index < num_active {
                    partial.target_amp = partial.amp_when_active;
                    num_active_processed += 1;
                } else {
                    partial.target_amp = 0.0;
                }
                process_partial(partial, num_frames, &mut buffer);
            }
        }

        num_active_processed
    }

    /// Sum every thread's scratch buffer into `destination`
    pub fn mix_to(&self, destination: &mut StereoBufferMut<'_>, num_frames: usize) {
        assert_release!(
            num_frames > 0 && num_frames <= destination.num_frames(),
            "Invalid number of frames: {}",
            num_frames
        );

        for buffer in self.buffers.iter() {
            destination.add_from(&buffer.lock(), num_frames);
        }
    }
}

impl Default for ParallelSineBank {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParallelSineBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelSineBank")
            .field("num_partials", &self.partials.len())
            .field("num_threads", &self.buffers.len())
            .field("chunk_size", &self.cursor.chunk_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_partials(count: usize) -> Vec<Partial> {
        (0..count)
            .map(|i| Partial {
                amp_when_active: 0.01,
                amp_smoothing_coeff: 1.0,
                phase_increment: 0.01 * (i + 1) as f32,
                phase: 1.0,
                ..Partial::default()
            })
            .collect()
    }

    #[test]
    fn test_active_partials_get_active_target() {
        let mut bank = ParallelSineBank::with_chunk_size(4);
        bank.set_partials(loud_partials(10));
        bank.set_num_threads(1);

        unsafe { bank.prepare(6, 32) };
        assert_eq!(bank.process(0, 32), 6);

        let partials = bank.partials();
        assert!(partials[..6].iter().all(|p| p.target_amp == 0.01));
        assert!(partials[6..].iter().all(|p| p.target_amp == 0.0));
    }

    #[test]
    fn test_active_count_beyond_partials_is_clamped() {
        let mut bank = ParallelSineBank::with_chunk_size(4);
        bank.set_partials(loud_partials(10));
        bank.set_num_threads(1);

        unsafe { bank.prepare(usize::MAX, 32) };
        assert_eq!(bank.process(0, 32), 10);
        assert!(bank.partials().iter().all(|p| p.target_amp == 0.01));
    }

    #[test]
    fn test_second_process_after_exhaustion_does_nothing() {
        let mut bank = ParallelSineBank::new();
        bank.set_partials(loud_partials(300));
        bank.set_num_threads(2);

        unsafe { bank.prepare(300, 16) };
        assert_eq!(bank.process(0, 16), 300);
        assert_eq!(bank.process(1, 16), 0);
    }

    #[test]
    fn test_mix_adds_into_destination() {
        let mut bank = ParallelSineBank::with_chunk_size(1);
        bank.set_partials(loud_partials(2));
        bank.set_num_threads(2);

        unsafe { bank.prepare(2, 8) };
        assert_eq!(bank.process(0, 8), 2);
        assert_eq!(bank.process(1, 8), 0);
        let rendered = bank.buffers[0].lock().left[..8].to_vec();

        let mut left = vec![1.0; 8];
        let mut right = vec![1.0; 8];
        bank.mix_to(&mut StereoBufferMut::new(&mut left, &mut right), 8);

        for (mixed, x) in left.iter().zip(&rendered) {
            assert_eq!(*mixed, 1.0 + x);
        }
        assert!(rendered.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_claims_reset_every_period() {
        let mut bank = ParallelSineBank::new();
        bank.set_partials(loud_partials(1000));
        bank.set_num_threads(1);

        unsafe { bank.prepare(0, 8) };
        let chunks: Vec<_> = std::iter::from_fn(|| bank.claim_next_chunk()).collect();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3], 768..1000);

        unsafe { bank.prepare(0, 8) };
        assert_eq!(bank.claim_next_chunk(), Some(0..256));
    }

    #[test]
    fn test_prepare_clears_buffers() {
        let mut bank = ParallelSineBank::new();
        bank.set_partials(loud_partials(4));
        bank.set_num_threads(1);

        unsafe { bank.prepare(4, 8) };
        bank.process(0, 8);
        unsafe { bank.prepare(0, 8) };

        let buffer = bank.buffers[0].lock();
        assert!(buffer.left[..8].iter().all(|&x| x == 0.0));
    }
}
