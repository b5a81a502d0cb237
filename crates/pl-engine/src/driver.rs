//! Driver interface
//!
//! A driver owns the hardware (or simulated) clock and calls the render
//! callback once per buffer on its own real-time thread.

use std::sync::Arc;
use std::time::Duration;

use pl_core::StereoBufferMut;
use pl_realtime::AudioWorkgroup;

use crate::DriverResult;

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Stopped,
    Started,
    /// The device went away or failed
    Invalid,
}

/// Outcome of one render callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Output was rendered
    Rendered,
    /// The host is not running; output was silenced
    Inactive,
}

/// Called once per buffer with the output and the buffer's host time
pub type RenderCallback =
    Box<dyn FnMut(&mut StereoBufferMut<'_>, u64) -> RenderStatus + Send + 'static>;

/// An audio output driver.
///
/// `stop()` must not return while a callback is in flight and must drop the
/// callback it was started with.
pub trait Driver {
    fn start(&mut self, callback: RenderCallback) -> DriverResult<()>;
    fn stop(&mut self);
    fn status(&self) -> DriverStatus;

    fn sample_rate(&self) -> f64;
    fn nominal_buffer_duration(&self) -> Duration;

    fn preferred_buffer_size(&self) -> usize;
    /// Only valid while stopped
    fn set_preferred_buffer_size(&mut self, preferred_buffer_size: usize) -> DriverResult<()>;

    /// Workgroup of the thread calling the render callback, if any
    fn audio_workgroup(&self) -> Option<Arc<dyn AudioWorkgroup>>;
}
