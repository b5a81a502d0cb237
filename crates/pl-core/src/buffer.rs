//! Stereo audio buffers
//!
//! `StereoBuffer` owns per-thread scratch storage; `StereoBufferMut` is the
//! borrowed view a driver hands to the render path for one period.

/// Type alias for audio samples on the render path
pub type Sample = f32;

/// Owned, non-interleaved stereo buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoBuffer {
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

impl StereoBuffer {
    /// Allocate a zeroed buffer of `num_frames` frames per channel
    pub fn new(num_frames: usize) -> Self {
        Self {
            left: vec![0.0; num_frames],
            right: vec![0.0; num_frames],
        }
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    /// Zero the first `num_frames` frames of both channels
    #[inline]
    pub fn clear(&mut self, num_frames: usize) {
        self.left[..num_frames].fill(0.0);
        self.right[..num_frames].fill(0.0);
    }

    /// Borrow the first `num_frames` frames as a mutable view
    #[inline]
    pub fn as_mut(&mut self, num_frames: usize) -> StereoBufferMut<'_> {
        StereoBufferMut {
            left: &mut self.left[..num_frames],
            right: &mut self.right[..num_frames],
        }
    }
}

/// Borrowed stereo output for one render callback
#[derive(Debug)]
pub struct StereoBufferMut<'a> {
    pub left: &'a mut [Sample],
    pub right: &'a mut [Sample],
}

impl<'a> StereoBufferMut<'a> {
    /// Create a view over two channels; both must have the same length
    pub fn new(left: &'a mut [Sample], right: &'a mut [Sample]) -> Self {
        assert_release!(
            left.len() == right.len(),
            "Mismatched channel lengths: {} != {}",
            left.len(),
            right.len()
        );
        Self { left, right }
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn fill(&mut self, value: Sample) {
        self.left.fill(value);
        self.right.fill(value);
    }

    /// Add the first `num_frames` frames of `source` into this buffer
    #[inline]
    pub fn add_from(&mut self, source: &StereoBuffer, num_frames: usize) {
        for (out, x) in self.left[..num_frames].iter_mut().zip(&source.left) {
            *out += *x;
        }
        for (out, x) in self.right[..num_frames].iter_mut().zip(&source.right) {
            *out += *x;
        }
    }

    /// Reborrow with a shorter lifetime
    #[inline]
    pub fn reborrow(&mut self) -> StereoBufferMut<'_> {
        StereoBufferMut {
            left: &mut *self.left,
            right: &mut *self.right,
        }
    }
}
