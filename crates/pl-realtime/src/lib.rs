//! # PerfLab Real-Time Primitives
//!
//! Building blocks for driving worker threads from an audio callback:
//! - Wait-free single-producer/single-consumer queue
//! - OS counting semaphores for the start/finish barrier
//! - Atomic chunk claiming over a shared workload
//! - Time-constraint (deadline) scheduling and host time base conversion
//! - Low-energy spin waiting and busy threads
//! - Audio workgroup membership
//!
//! CRITICAL: nothing reachable from the render path allocates or takes a
//! contended lock.

mod error;

pub mod busy;
pub mod partition;
pub mod semaphore;
pub mod spsc;
pub mod thread;
pub mod workgroup;

pub use busy::*;
pub use error::*;
pub use partition::*;
pub use semaphore::*;
pub use spsc::*;
pub use thread::*;
pub use workgroup::*;
