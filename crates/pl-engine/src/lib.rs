//! # PerfLab Engine
//!
//! The audio host and the workload it drives:
//! - `AudioHost`: fans each driver callback out to real-time worker threads
//! - `ParallelSineBank`: chunked, lock-free parallel rendering of partials
//! - `PerfEngine`: sine chord, sine bursts and per-callback measurements
//! - Drivers: `SimulatedDriver` (timer thread) and `CpalDriver` (hardware)

mod driver;
mod engine;
mod error;
mod host;
mod partial;
mod simulated;
mod sine_bank;

#[cfg(feature = "cpal-driver")]
mod cpal_driver;

pub use driver::*;
pub use engine::*;
pub use error::*;
pub use host::*;
pub use partial::*;
pub use simulated::*;
pub use sine_bank::*;

#[cfg(feature = "cpal-driver")]
pub use cpal_driver::*;
