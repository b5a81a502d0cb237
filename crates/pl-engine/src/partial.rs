//! Partials
//!
//! A partial is one sine oscillator with a smoothed amplitude and a fixed
//! stereo position. Sawtooth voices are built from their harmonic series.

use std::time::Duration;

use pl_core::{
    StereoBuffer, TWO_PI, equal_power_pan_gains, lerp, make_one_pole, note_to_frequency,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Amplitudes at or below this are treated as silent
pub const SILENCE_THRESHOLD: f32 = 0.00001;

/// Detuned saws stacked per chord note: (pan, detune in Hz)
const CHORD_VOICES: [(f32, f32); 5] = [(-1.0, -4.0), (-1.0, -2.0), (0.0, 0.0), (1.0, 2.0), (1.0, 4.0)];

/// A single sine oscillator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    /// Amplitude the partial ramps to while it is among the active partials
    pub amp_when_active: f32,
    pub target_amp: f32,
    pub amp: f32,
    /// One-pole coefficient smoothing `amp` toward `target_amp`
    pub amp_smoothing_coeff: f32,
    /// -1 (left) ..= 1 (right)
    pub pan: f32,
    /// Radians per sample
    pub phase_increment: f32,
    /// Radians in [0, 2π)
    pub phase: f32,
}

impl Partial {
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.target_amp.abs() <= SILENCE_THRESHOLD && self.amp.abs() <= SILENCE_THRESHOLD
    }
}

/// Add `num_frames` samples of `partial` into `output`, advancing its state
pub fn process_partial(partial: &mut Partial, num_frames: usize, output: &mut StereoBuffer) {
    if partial.is_silent() {
        return;
    }

    let (left_gain, right_gain) = equal_power_pan_gains(partial.pan);
    let left = &mut output.left[..num_frames];
    let right = &mut output.right[..num_frames];

    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let sample = partial.phase.sin() * partial.amp;
        *l += sample * left_gain;
        *r += sample * right_gain;

        partial.amp = lerp(partial.amp, partial.target_amp, partial.amp_smoothing_coeff);

        partial.phase += partial.phase_increment;
        if partial.phase >= TWO_PI {
            partial.phase -= TWO_PI;
        }
    }
}

/// Band-limited sawtooth as its harmonic series up to Nyquist
pub fn generate_saw(
    sample_rate: f32,
    amp: f32,
    amp_smoothing_duration: Duration,
    pan: f32,
    frequency: f32,
) -> Vec<Partial> {
    let amp_smoothing_coeff = make_one_pole(amp_smoothing_duration.as_secs_f32(), sample_rate);
    let nyquist = sample_rate / 2.0;
    let num_harmonics = (nyquist / frequency) as usize;

    (1..=num_harmonics)
        .map(|harmonic| {
            let sign = if harmonic % 2 == 0 { 1.0 } else { -1.0 };
            let partial_frequency = harmonic as f32 * frequency;
            Partial {
                amp_when_active: (2.0 * amp / std::f32::consts::PI) * (1.0 / harmonic as f32) * sign,
                amp_smoothing_coeff,
                pan,
                phase_increment: TWO_PI * partial_frequency / sample_rate,
                ..Partial::default()
            }
        })
        .collect()
}

/// Five detuned saws per note, all partials sorted by frequency
pub fn generate_chord(
    sample_rate: f32,
    amp_smoothing_duration: Duration,
    note_numbers: &[f32],
) -> Vec<Partial> {
    let amp = 1.0 / (note_numbers.len() * CHORD_VOICES.len()) as f32;

    let mut partials: Vec<Partial> = note_numbers
        .iter()
        .flat_map(|&note| {
            let frequency = note_to_frequency(note);
            CHORD_VOICES.iter().flat_map(move |&(pan, detune)| {
                generate_saw(sample_rate, amp, amp_smoothing_duration, pan, frequency + detune)
            })
        })
        .collect();

    partials.sort_by(|a, b| a.phase_increment.total_cmp(&b.phase_increment));
    partials
}

/// Give every partial after the first `num_to_skip` a pseudo-random start
/// phase. Deterministic for a given `seed`.
pub fn randomize_phases(partials: &mut [Partial], num_to_skip: usize, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for partial in partials.iter_mut().skip(num_to_skip) {
        partial.phase = rng.random_range(0.0..TWO_PI);
    }
}
