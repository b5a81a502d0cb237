//! pl-core: Shared types, math, and configuration for PerfLab
//!
//! This crate provides the foundational types used across all PerfLab crates:
//! stereo buffers handed between the driver and the render handler, the small
//! amount of DSP math the sine bank needs, and the performance configuration
//! consumed by the audio host.

#[macro_use]
mod assert;
mod buffer;
mod config;
mod error;
mod fader;
mod math;
mod ramped;

pub use assert::fatal;
pub use buffer::*;
pub use config::*;
pub use error::*;
pub use fader::*;
pub use math::*;
pub use ramped::*;

use std::time::Duration;

/// Largest number of frames a driver may request in one render callback.
pub const MAX_NUM_FRAMES: usize = 4096;

/// Buffer size requested from the driver unless configured otherwise.
pub const DEFAULT_PREFERRED_BUFFER_SIZE: usize = 128;

/// Expected computation time of a worker per period, used as the quantum of
/// the time-constraint policy.
pub const REALTIME_THREAD_QUANTUM: Duration = Duration::from_micros(500);
