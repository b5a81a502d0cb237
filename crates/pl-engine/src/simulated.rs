//! Simulated Driver
//!
//! Timer-driven stand-in for an audio device: a dedicated thread calls the
//! render callback once per nominal buffer duration and discards the output.
//! Used for headless runs and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pl_core::{DriverConfig, MAX_NUM_FRAMES, StereoBuffer};
use pl_realtime::{AudioWorkgroup, host_time_now};

use crate::{Driver, DriverError, DriverResult, DriverStatus, RenderCallback, RenderStatus};

/// Counters published by the simulated driver thread
#[derive(Debug, Default)]
struct SimulatedStats {
    num_callbacks: AtomicU64,
    num_overruns: AtomicU64,
    /// f32 bits of the largest absolute sample of the last buffer
    last_peak: AtomicU32,
}

/// A driver that renders on a timer thread instead of hardware
pub struct SimulatedDriver {
    config: DriverConfig,
    workgroup: Option<Arc<dyn AudioWorkgroup>>,
    running: Arc<AtomicBool>,
    stats: Arc<SimulatedStats>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SimulatedDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            workgroup: None,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SimulatedStats::default()),
            thread_handle: None,
        }
    }

    /// Expose `workgroup` as the driver thread's workgroup
    pub fn with_workgroup(mut self, workgroup: Arc<dyn AudioWorkgroup>) -> Self {
        self.workgroup = Some(workgroup);
        self
    }

    /// Render callbacks completed since creation
    pub fn num_callbacks(&self) -> u64 {
        self.stats.num_callbacks.load(Ordering::Acquire)
    }

    /// Callbacks that took longer than the buffer duration
    pub fn num_overruns(&self) -> u64 {
        self.stats.num_overruns.load(Ordering::Acquire)
    }

    /// Peak absolute sample of the most recent buffer
    pub fn last_peak(&self) -> f32 {
        f32::from_bits(self.stats.last_peak.load(Ordering::Acquire))
    }

    fn driver_thread(
        mut callback: RenderCallback,
        running: Arc<AtomicBool>,
        stats: Arc<SimulatedStats>,
        num_frames: usize,
        period: Duration,
    ) {
        let mut output = StereoBuffer::new(num_frames);
        let mut deadline = Instant::now();

        while running.load(Ordering::Acquire) {
            let start = Instant::now();

            output.clear(num_frames);
            let status = callback(&mut output.as_mut(num_frames), host_time_now());

            let peak = match status {
                RenderStatus::Rendered => output
                    .left
                    .iter()
                    .chain(&output.right)
                    .fold(0.0f32, |peak, x| peak.max(x.abs())),
                RenderStatus::Inactive => 0.0,
            };
            stats.last_peak.store(peak.to_bits(), Ordering::Release);
            stats.num_callbacks.fetch_add(1, Ordering::AcqRel);

            if start.elapsed() > period {
                stats.num_overruns.fetch_add(1, Ordering::Relaxed);
            }

            // Sleep until the next period, dropping missed ones
            deadline += period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }
    }
}

impl Driver for SimulatedDriver {
    fn start(&mut self, callback: RenderCallback) -> DriverResult<()> {
        if self.thread_handle.is_some() {
            return Err(DriverError::AlreadyStarted);
        }

        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let num_frames = self.config.preferred_buffer_size;
        let period = self.nominal_buffer_duration();

        let handle = thread::Builder::new()
            .name("Simulated Audio Driver".to_string())
            .spawn(move || Self::driver_thread(callback, running, stats, num_frames, period))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DriverError::Spawn(e)
            })?;

        self.thread_handle = Some(handle);
        log::info!(
            "Simulated driver started: {} frames @ {} Hz",
            num_frames,
            self.config.sample_rate
        );
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        // The callback is dropped when the thread exits
        if handle.join().is_err() {
            log::error!("Simulated driver thread panicked");
        }
        log::info!("Simulated driver stopped");
    }

    fn status(&self) -> DriverStatus {
        if self.thread_handle.is_some() {
            DriverStatus::Started
        } else {
            DriverStatus::Stopped
        }
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn nominal_buffer_duration(&self) -> Duration {
        self.config.nominal_buffer_duration()
    }

    fn preferred_buffer_size(&self) -> usize {
        self.config.preferred_buffer_size
    }

    fn set_preferred_buffer_size(&mut self, preferred_buffer_size: usize) -> DriverResult<()> {
        if self.thread_handle.is_some() {
            return Err(DriverError::Busy);
        }
        if preferred_buffer_size == 0 || preferred_buffer_size > MAX_NUM_FRAMES {
            return Err(DriverError::UnsupportedBufferSize(preferred_buffer_size));
        }
        self.config.preferred_buffer_size = preferred_buffer_size;
        Ok(())
    }

    fn audio_workgroup(&self) -> Option<Arc<dyn AudioWorkgroup>> {
        self.workgroup.clone()
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
