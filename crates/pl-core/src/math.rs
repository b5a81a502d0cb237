//! Small DSP helpers used by the sine bank

use std::f32::consts::{FRAC_PI_4, TAU};

/// One full oscillator cycle in radians
pub const TWO_PI: f32 = TAU;

/// MIDI note number of middle C
pub const NOTE_C3: f32 = 60.0;

/// MIDI note number of concert A
pub const NOTE_A3: f32 = NOTE_C3 + 9.0;

/// Equal power gains `(left, right)` for a pan position in `[-1, 1]`.
///
/// The centre position is 3dB down on both channels.
#[inline]
pub fn equal_power_pan_gains(pan: f32) -> (f32, f32) {
    assert_release!((-1.0..=1.0).contains(&pan), "Invalid pan: {}", pan);

    (
        (FRAC_PI_4 * (1.0 - pan)).sin(),
        (FRAC_PI_4 * (pan + 1.0)).sin(),
    )
}

/// One-pole coefficient for a low-pass with time constant `tau` seconds.
///
/// `y[n] = y[n - 1] + (x[n] - y[n - 1]) * make_one_pole(tau, fs)`
#[inline]
pub fn make_one_pole(tau: f32, sample_rate: f32) -> f32 {
    assert_release!(
        tau >= 0.0 && sample_rate > 0.0,
        "Invalid one-pole parameters: tau={}, fs={}",
        tau,
        sample_rate
    );

    1.0 - (-1.0 / (tau * sample_rate).max(1.0e-6)).exp()
}

/// Linear interpolation (and extrapolation) from `a` to `b`
#[inline]
pub fn lerp(a: f32, b: f32, x: f32) -> f32 {
    (1.0 - x) * a + x * b
}

/// Frequency in Hz of a (fractional) MIDI note, A3 = 440Hz
#[inline]
pub fn note_to_frequency(note: f32) -> f32 {
    ((note - NOTE_A3) / 12.0).exp2() * 440.0
}
