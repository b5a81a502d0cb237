//! Output volume fader

use crate::{RampedValue, StereoBufferMut};

/// Scales a stereo buffer by a linearly ramped amplitude.
///
/// Unity gain with no ramp in progress leaves the buffer untouched.
#[derive(Debug, Clone)]
pub struct VolumeFader {
    ramp: RampedValue,
}

impl VolumeFader {
    pub fn new() -> Self {
        Self {
            ramp: RampedValue::new(1.0),
        }
    }

    /// Fade to amplitude `amp` (must be >= 0) over `num_frames` frames
    pub fn fade_to(&mut self, amp: f32, num_frames: u64) {
        assert_release!(amp >= 0.0, "Invalid output volume: {}", amp);
        self.ramp.ramp_to(amp, num_frames);
    }

    /// Current amplitude
    pub fn amplitude(&self) -> f32 {
        self.ramp.value()
    }

    pub fn process(&mut self, io: &mut StereoBufferMut<'_>) {
        if !self.ramp.is_ramping() && self.ramp.value() == 1.0 {
            return;
        }

        for (l, r) in io.left.iter_mut().zip(io.right.iter_mut()) {
            let amp = self.ramp.tick();
            *l *= amp;
            *r *= amp;
        }
    }
}

impl Default for VolumeFader {
    fn default() -> Self {
        Self::new()
    }
}
