//! Busy Threads
//!
//! Lowest-priority threads that keep the CPU from being clocked down between
//! audio callbacks. Each iteration blocks on a condition variable for
//! `period * (1 - cpu_usage)` and then spins with low-energy work for
//! `period * cpu_usage`. Blocking keeps total usage under background CPU
//! limits; the condition variable lets the thread exit promptly on stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pl_core::{BusyThreadsConfig, assert_release};

use crate::{RealtimeError, RealtimeResult, low_energy_work, set_current_thread_lowest_priority};

#[derive(Debug, Clone, Copy)]
struct Timing {
    period: Duration,
    cpu_usage: f64,
}

struct BusyShared {
    timing: Mutex<Timing>,
    wake: Condvar,
    is_active: AtomicBool,
}

/// A single low-priority thread performing low-energy busy work
pub struct BusyThread {
    name: String,
    shared: Arc<BusyShared>,
    handle: Option<JoinHandle<()>>,
}

impl BusyThread {
    /// Create a stopped busy thread
    pub fn new(name: impl Into<String>) -> Self {
        let defaults = BusyThreadsConfig::default();
        Self {
            name: name.into(),
            shared: Arc::new(BusyShared {
                timing: Mutex::new(Timing {
                    period: defaults.period,
                    cpu_usage: defaults.cpu_usage,
                }),
                wake: Condvar::new(),
                is_active: AtomicBool::new(false),
            }),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start performing busy work. No-op if already running.
    pub fn start(&mut self) -> RealtimeResult<()> {
        assert_release!(
            self.shared.is_active.load(Ordering::Acquire) == self.handle.is_some(),
            "Invalid busy thread state"
        );
        if self.handle.is_some() {
            return Ok(());
        }

        self.shared.is_active.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || busy_thread(shared))
            .map_err(|e| {
                self.shared.is_active.store(false, Ordering::Release);
                RealtimeError::Spawn {
                    name: self.name.clone(),
                    source: e,
                }
            })?;

        self.handle = Some(handle);
        log::debug!("{} started", self.name);
        Ok(())
    }

    /// Stop performing busy work and join the thread
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        {
            let _lock = self.shared.timing.lock();
            self.shared.is_active.store(false, Ordering::Release);
            self.shared.wake.notify_all();
        }

        if handle.join().is_err() {
            log::error!("{} panicked", self.name);
        }
        log::debug!("{} stopped", self.name);
    }

    /// Duration of one busy iteration
    pub fn period(&self) -> Duration {
        self.shared.timing.lock().period
    }

    pub fn set_period(&self, period: Duration) {
        assert_release!(!period.is_zero(), "Invalid busy thread period");
        self.shared.timing.lock().period = period;
    }

    /// Fraction of each iteration spent working rather than blocking
    pub fn cpu_usage(&self) -> f64 {
        self.shared.timing.lock().cpu_usage
    }

    pub fn set_cpu_usage(&self, cpu_usage: f64) {
        assert_release!(
            (0.0..=1.0).contains(&cpu_usage),
            "Invalid busy thread CPU usage: {}",
            cpu_usage
        );
        self.shared.timing.lock().cpu_usage = cpu_usage;
    }
}

impl Drop for BusyThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BusyThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn busy_thread(shared: Arc<BusyShared>) {
    if let Err(e) = set_current_thread_lowest_priority() {
        log::warn!("Busy thread keeps default priority: {}", e);
    }

    // Block for the idle share of the period, then return the end of the
    // work share. None once stopped.
    let block = || -> Option<Instant> {
        let start_time = Instant::now();
        let mut timing = shared.timing.lock();

        let work_duration = timing.period.mul_f64(timing.cpu_usage);
        let block_end = start_time + timing.period.saturating_sub(work_duration);
        let work_end = block_end + work_duration;

        while shared.is_active.load(Ordering::Acquire) {
            if shared.wake.wait_until(&mut timing, block_end).timed_out() {
                break;
            }
        }

        shared.is_active.load(Ordering::Acquire).then_some(work_end)
    };

    while let Some(work_end) = block() {
        while Instant::now() < work_end && shared.is_active.load(Ordering::Relaxed) {
            low_energy_work();
        }
    }
}

/// A resizable pool of [`BusyThread`]s sharing one timing configuration
#[derive(Debug)]
pub struct BusyThreads {
    threads: Vec<BusyThread>,
    period: Duration,
    cpu_usage: f64,
}

impl BusyThreads {
    /// Create an empty pool with the given timing
    pub fn new(config: &BusyThreadsConfig) -> Self {
        Self {
            threads: Vec::new(),
            period: config.period,
            cpu_usage: config.cpu_usage,
        }
    }

    /// Create the pool and start `config.num_threads` threads
    pub fn with_config(config: &BusyThreadsConfig) -> RealtimeResult<Self> {
        let mut pool = Self::new(config);
        pool.set_num_threads(config.num_threads)?;
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Replace the pool with `num_threads` freshly started threads
    pub fn set_num_threads(&mut self, num_threads: usize) -> RealtimeResult<()> {
        if num_threads == self.threads.len() {
            return Ok(());
        }

        self.threads.clear();
        for index in 0..num_threads {
            let mut thread = BusyThread::new(format!("Busy Thread {}", index + 1));
            thread.set_period(self.period);
            thread.set_cpu_usage(self.cpu_usage);
            thread.start()?;
            self.threads.push(thread);
        }

        log::info!("Busy threads: {}", num_threads);
        Ok(())
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        if period != self.period {
            for thread in &self.threads {
                thread.set_period(period);
            }
            self.period = period;
        }
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    pub fn set_cpu_usage(&mut self, cpu_usage: f64) {
        if cpu_usage != self.cpu_usage {
            for thread in &self.threads {
                thread.set_cpu_usage(cpu_usage);
            }
            self.cpu_usage = cpu_usage;
        }
    }

    /// Apply every field of `config`, resizing the pool if needed
    pub fn apply(&mut self, config: &BusyThreadsConfig) -> RealtimeResult<()> {
        self.set_period(config.period);
        self.set_cpu_usage(config.cpu_usage);
        self.set_num_threads(config.num_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_threads: usize) -> BusyThreadsConfig {
        BusyThreadsConfig {
            num_threads,
            period: Duration::from_millis(5),
            cpu_usage: 0.5,
        }
    }

    #[test]
    fn test_busy_thread_is_stopped_by_default() {
        let thread = BusyThread::new("Busy Thread Test");
        assert!(!thread.is_running());
        assert_eq!(thread.name(), "Busy Thread Test");
    }

    #[test]
    fn test_start_stop_is_prompt() {
        let mut thread = BusyThread::new("Busy Thread Test");
        thread.set_period(Duration::from_secs(10));
        thread.set_cpu_usage(0.0);
        thread.start().unwrap();
        assert!(thread.is_running());

        // Double start is a no-op
        thread.start().unwrap();

        let begin = Instant::now();
        thread.stop();
        assert!(!thread.is_running());
        assert!(begin.elapsed() < Duration::from_secs(5), "stop waited out the period");
    }

    #[test]
    fn test_live_timing_changes() {
        let mut thread = BusyThread::new("Busy Thread Test");
        thread.start().unwrap();
        thread.set_period(Duration::from_millis(2));
        thread.set_cpu_usage(1.0);
        assert_eq!(thread.period(), Duration::from_millis(2));
        assert_eq!(thread.cpu_usage(), 1.0);
        std::thread::sleep(Duration::from_millis(10));
        thread.stop();
    }

    #[test]
    fn test_pool_resize() {
        let mut pool = BusyThreads::with_config(&config(2)).unwrap();
        assert_eq!(pool.num_threads(), 2);

        pool.set_num_threads(3).unwrap();
        assert_eq!(pool.num_threads(), 3);

        pool.set_cpu_usage(0.25);
        pool.set_period(Duration::from_millis(3));
        assert!(pool.threads.iter().all(|thread| thread.cpu_usage() == 0.25));
        assert!(
            pool.threads
                .iter()
                .all(|thread| thread.period() == Duration::from_millis(3))
        );

        pool.apply(&config(0)).unwrap();
        assert_eq!(pool.num_threads(), 0);
    }
}
