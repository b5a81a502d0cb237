//! Audio Host
//!
//! Fans each driver callback out to a fixed pool of real-time worker threads:
//!
//! ```text
//! driver callback ──► render_started ──► post "start"[i] ──► [process(0)]
//!                                              │
//!                 worker i in 1..=N: wait "start"[i] ─► process(i) ─► post "finished"
//!                                                                    │
//! render_ended ◄── wait "finished" ×N ◄──────────────────────────────┘
//! ```
//!
//! Every worker waits on its own start semaphore, so a worker that finishes
//! early cannot take a second turn in the same period.
//!
//! Structural changes (worker count, buffer size, work interval, driver
//! thread participation) stop the host, apply the change and restart it if
//! it was running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use pl_core::{
    AudioHostConfig, BusyThreadsConfig, MAX_NUM_THREADS, PerformanceConfig, StereoBufferMut,
    VolumeFader, assert_release,
};
use pl_realtime::{
    AudioWorkgroup, BusyThreads, Consumer, FixedSpscQueue, NativeThread, Producer,
    RealtimeResult, Semaphore, TimeConstraintPolicy, WorkgroupMembership,
    apply_time_constraint_policy, host_time_now, low_energy_work_until, seconds_to_host_time,
};

use crate::{Driver, HostError, HostResult, RenderCallback, RenderStatus};

/// Pending output fades the callback has not picked up yet
const FADE_COMMAND_QUEUE_SIZE: usize = 16;

/// Work performed by the host on every driver callback.
///
/// `process` runs concurrently on every processing thread; thread index 0 is
/// the driver thread and workers are numbered from 1.
pub trait RenderHandler: Send + Sync + 'static {
    /// Called on start, before any worker exists
    fn setup(&mut self, num_worker_threads: usize);

    /// Called on the driver thread before workers are woken
    fn render_started(&self, io: &mut StereoBufferMut<'_>, num_frames: usize);

    /// Called once per period on each processing thread
    fn process(&self, thread_index: usize, num_frames: usize);

    /// Called on the driver thread after every worker finished
    fn render_ended(&self, io: &mut StereoBufferMut<'_>, host_time: u64, num_frames: usize);
}

#[derive(Debug, Clone, Copy)]
struct FadeCommand {
    target_volume: f32,
    num_frames: u64,
}

/// State only the driver thread touches while the host is started
struct OutputState {
    fades: Consumer<FadeCommand>,
    fader: VolumeFader,
}

struct HostShared<H> {
    handler: H,
    /// One per worker, indexed by `thread_index - 1`
    start_working: Box<[Semaphore]>,
    finished_working: Semaphore,
    workers_active: AtomicBool,
    /// Frames of the current period, read by workers after waking
    num_frames: AtomicUsize,
    /// f64 bits
    minimum_load: AtomicU64,
    // Fixed while started
    num_workers: usize,
    process_in_driver_thread: bool,
    sample_rate: f64,
    output: Mutex<OutputState>,
}

impl<H: RenderHandler> HostShared<H> {
    fn render(&self, io: &mut StereoBufferMut<'_>, host_time: u64) -> RenderStatus {
        let start_time = host_time_now();
        let num_frames = io.num_frames();

        if !self.workers_active.load(Ordering::Acquire) {
            io.fill(0.0);
            return RenderStatus::Inactive;
        }

        self.num_frames.store(num_frames, Ordering::Relaxed);
        let mut output = self.output.lock();
        while let Some(fade) = output.fades.try_pop() {
            output.fader.fade_to(fade.target_volume, fade.num_frames);
        }

        self.handler.render_started(io, num_frames);

        for start in &self.start_working[..self.num_workers] {
            if let Err(e) = start.post() {
                pl_core::fatal(format_args!("Failed to wake worker: {}", e));
            }
        }

        if self.process_in_driver_thread {
            self.handler.process(0, num_frames);
        }

        for _ in 0..self.num_workers {
            if let Err(e) = self.finished_working.wait() {
                pl_core::fatal(format_args!("Failed to wait for worker: {}", e));
            }
        }

        self.handler.render_ended(io, host_time, num_frames);
        output.fader.process(io);

        if self.process_in_driver_thread {
            self.ensure_minimum_load(start_time, num_frames);
        }

        RenderStatus::Rendered
    }

    /// Spin until `minimum_load` of the buffer duration has passed
    fn ensure_minimum_load(&self, buffer_start_time: u64, num_frames: usize) {
        let minimum_load = f64::from_bits(self.minimum_load.load(Ordering::Relaxed));
        if minimum_load <= 0.0 {
            return;
        }

        let buffer_duration = num_frames as f64 / self.sample_rate;
        low_energy_work_until(
            buffer_start_time.saturating_add(seconds_to_host_time(buffer_duration * minimum_load)),
        );
    }

    fn worker_thread(
        &self,
        thread_index: usize,
        workgroup: Option<Arc<dyn AudioWorkgroup>>,
    ) {
        let start = &self.start_working[thread_index - 1];
        let mut membership: Option<WorkgroupMembership> = None;
        let mut need_to_join = workgroup.is_some();

        loop {
            if let Err(e) = start.wait() {
                pl_core::fatal(format_args!("Worker {} failed to wait: {}", thread_index, e));
            }
            if !self.workers_active.load(Ordering::Acquire) {
                break;
            }

            // Join after the first wake so the driver thread's interval is live
            if need_to_join {
                if let Some(workgroup) = &workgroup {
                    // A deadline thread may be refused a narrower CPU set
                    match workgroup.join() {
                        Ok(joined) => membership = Some(joined),
                        Err(e) => log::warn!(
                            "Worker {} running outside the workgroup: {}",
                            thread_index, e
                        ),
                    }
                }
                need_to_join = false;
            }

            let start_time = host_time_now();
            let num_frames = self.num_frames.load(Ordering::Relaxed);
            self.handler.process(thread_index, num_frames);
            if let Err(e) = self.finished_working.post() {
                pl_core::fatal(format_args!("Worker {} failed to signal: {}", thread_index, e));
            }
            self.ensure_minimum_load(start_time, num_frames);
        }

        // Leave the workgroup on this thread
        drop(membership);
    }
}

/// Drives a [`RenderHandler`] from a [`Driver`] with a pool of worker threads
pub struct AudioHost<H: RenderHandler, D: Driver> {
    driver: D,
    shared: Arc<HostShared<H>>,
    fade_producer: Producer<FadeCommand>,
    output_volume: f32,
    workers: Vec<JoinHandle<()>>,
    busy_threads: BusyThreads,
    busy_threads_config: BusyThreadsConfig,
    config: AudioHostConfig,
    is_started: bool,
}

impl<H: RenderHandler, D: Driver> AudioHost<H, D> {
    /// Create a stopped host
    pub fn new(handler: H, driver: D, config: PerformanceConfig) -> HostResult<Self> {
        config.validate()?;

        let (fade_producer, fades) = FixedSpscQueue::new(FADE_COMMAND_QUEUE_SIZE);
        let audio_host = config.audio_host;

        let shared = Arc::new(HostShared {
            handler,
            start_working: (1..MAX_NUM_THREADS)
                .map(|_| Semaphore::new())
                .collect::<RealtimeResult<_>>()?,
            finished_working: Semaphore::new()?,
            workers_active: AtomicBool::new(false),
            num_frames: AtomicUsize::new(0),
            minimum_load: AtomicU64::new(audio_host.minimum_load.to_bits()),
            num_workers: 0,
            process_in_driver_thread: audio_host.process_in_driver_thread,
            sample_rate: driver.sample_rate(),
            output: Mutex::new(OutputState {
                fades,
                fader: VolumeFader::new(),
            }),
        });

        Ok(Self {
            driver,
            shared,
            fade_producer,
            output_volume: 1.0,
            workers: Vec::new(),
            busy_threads: BusyThreads::new(&config.busy_threads),
            busy_threads_config: config.busy_threads,
            config: audio_host,
            is_started: false,
        })
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Mutable handler access; `None` while started
    pub fn handler_mut(&mut self) -> Option<&mut H> {
        if self.is_started {
            return None;
        }
        Arc::get_mut(&mut self.shared).map(|shared| &mut shared.handler)
    }

    /// Start the workers, busy threads and driver. No-op if started.
    pub fn start(&mut self) -> HostResult<()> {
        if self.is_started {
            return Ok(());
        }

        let num_workers = self.config.num_worker_threads();
        let sample_rate = self.driver.sample_rate();
        {
            let shared = Arc::get_mut(&mut self.shared).ok_or(HostError::HandlerInUse)?;
            shared.handler.setup(num_workers);
            shared.num_workers = num_workers;
            shared.process_in_driver_thread = self.config.process_in_driver_thread;
            shared.sample_rate = sample_rate;
        }

        let workgroup = if self.config.is_work_interval_on {
            Some(
                self.driver
                    .audio_workgroup()
                    .ok_or(HostError::WorkgroupUnavailable)?,
            )
        } else {
            None
        };

        self.setup_worker_threads(num_workers, workgroup)?;

        if let Err(e) = self.busy_threads.apply(&self.busy_threads_config) {
            self.teardown_worker_threads();
            return Err(e.into());
        }

        let shared = Arc::clone(&self.shared);
        let callback: RenderCallback =
            Box::new(move |io, host_time| shared.render(io, host_time));
        if let Err(e) = self.driver.start(callback) {
            self.teardown_busy_threads();
            self.teardown_worker_threads();
            return Err(e.into());
        }

        self.is_started = true;
        log::info!(
            "Audio host started: {} worker threads, driver thread {}",
            num_workers,
            if self.config.process_in_driver_thread {
                "processing"
            } else {
                "idle"
            }
        );
        Ok(())
    }

    /// Stop the driver, then join every worker. No-op if stopped.
    pub fn stop(&mut self) {
        if !self.is_started {
            return;
        }

        self.driver.stop();
        self.teardown_worker_threads();
        self.teardown_busy_threads();
        self.is_started = false;
        log::info!("Audio host stopped");
    }

    fn setup_worker_threads(
        &mut self,
        num_workers: usize,
        workgroup: Option<Arc<dyn AudioWorkgroup>>,
    ) -> HostResult<()> {
        assert_release!(
            self.workers.is_empty(),
            "Worker threads must be torn down before they are set up"
        );

        let policy = self
            .config
            .realtime_threads
            .then(|| TimeConstraintPolicy::for_buffer_duration(self.driver.nominal_buffer_duration()));

        self.shared.workers_active.store(true, Ordering::Release);

        let (ready_tx, ready_rx) = bounded::<(usize, RealtimeResult<()>)>(num_workers);
        for thread_index in 1..=num_workers {
            let shared = Arc::clone(&self.shared);
            let workgroup = workgroup.clone();
            let ready = ready_tx.clone();
            let name = format!("Audio Worker Thread {}", thread_index);

            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                let applied = match policy {
                    Some(policy) => apply_time_constraint_policy(&NativeThread::current(), &policy),
                    None => Ok(()),
                };
                let failed = applied.is_err();
                let _ = ready.send((thread_index, applied));
                drop(ready);
                if !failed {
                    shared.worker_thread(thread_index, workgroup);
                }
            });

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    let error = pl_realtime::RealtimeError::Spawn { name, source };
                    drop(ready_tx);
                    let waiting = Self::collect_ready(&ready_rx, self.workers.len()).0;
                    self.abort_workers(&waiting);
                    return Err(error.into());
                }
            }
        }
        drop(ready_tx);

        let (waiting, first_error) = Self::collect_ready(&ready_rx, num_workers);
        if let Some(error) = first_error {
            self.abort_workers(&waiting);
            return Err(error);
        }

        Ok(())
    }

    /// Wait for `expected` readiness reports. Returns the thread indices now
    /// waiting on their start semaphore and the first failure.
    fn collect_ready(
        ready: &Receiver<(usize, RealtimeResult<()>)>,
        expected: usize,
    ) -> (Vec<usize>, Option<HostError>) {
        let mut waiting = Vec::with_capacity(expected);
        let mut first_error = None;
        for index in 1..=expected {
            match ready.recv() {
                Ok((thread_index, Ok(()))) => waiting.push(thread_index),
                Ok((_, Err(e))) => {
                    log::error!("Worker thread setup failed: {}", e);
                    first_error.get_or_insert(HostError::Realtime(e));
                }
                Err(_) => {
                    first_error.get_or_insert(HostError::WorkerExited(index));
                }
            }
        }
        (waiting, first_error)
    }

    /// Release the workers waiting at `thread_indices` and join every worker
    fn abort_workers(&mut self, thread_indices: &[usize]) {
        self.shared.workers_active.store(false, Ordering::Release);
        for &thread_index in thread_indices {
            if let Err(e) = self.shared.start_working[thread_index - 1].post() {
                pl_core::fatal(format_args!("Failed to release worker: {}", e));
            }
        }
        self.join_workers();
    }

    fn teardown_worker_threads(&mut self) {
        let thread_indices: Vec<usize> = (1..=self.workers.len()).collect();
        self.abort_workers(&thread_indices);
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }

    fn teardown_busy_threads(&mut self) {
        if let Err(e) = self.busy_threads.set_num_threads(0) {
            log::warn!("Failed to stop busy threads: {}", e);
        }
    }

    /// Run `f` with the host stopped, restarting it afterwards if it was
    /// running
    pub fn while_stopped<F>(&mut self, f: F) -> HostResult<()>
    where
        F: FnOnce(&mut Self) -> HostResult<()>,
    {
        let was_started = self.is_started;
        self.stop();

        let result = f(self);

        if was_started {
            self.start()?;
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn preferred_buffer_size(&self) -> usize {
        self.driver.preferred_buffer_size()
    }

    /// Recreates the worker threads so their policy uses the new duration
    pub fn set_preferred_buffer_size(&mut self, preferred_buffer_size: usize) -> HostResult<()> {
        if preferred_buffer_size == self.driver.preferred_buffer_size() {
            return Ok(());
        }
        self.while_stopped(|host| {
            host.driver
                .set_preferred_buffer_size(preferred_buffer_size)
                .map_err(HostError::from)
        })
    }

    pub fn num_processing_threads(&self) -> usize {
        self.config.num_processing_threads
    }

    pub fn set_num_processing_threads(&mut self, num_threads: usize) -> HostResult<()> {
        assert_release!(
            (1..=MAX_NUM_THREADS).contains(&num_threads),
            "Invalid number of processing threads: {}",
            num_threads
        );
        if num_threads == self.config.num_processing_threads {
            return Ok(());
        }
        let mut target = self.config;
        target.num_processing_threads = num_threads;
        target.validate()?;
        self.while_stopped(|host| {
            host.config = target;
            Ok(())
        })
    }

    /// Dedicated workers currently running
    pub fn num_worker_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn process_in_driver_thread(&self) -> bool {
        self.config.process_in_driver_thread
    }

    pub fn set_process_in_driver_thread(&mut self, is_enabled: bool) -> HostResult<()> {
        if is_enabled == self.config.process_in_driver_thread {
            return Ok(());
        }
        let mut target = self.config;
        target.process_in_driver_thread = is_enabled;
        target.validate()?;
        self.while_stopped(|host| {
            host.config = target;
            Ok(())
        })
    }

    pub fn is_work_interval_on(&self) -> bool {
        self.config.is_work_interval_on
    }

    pub fn set_is_work_interval_on(&mut self, is_on: bool) -> HostResult<()> {
        if is_on == self.config.is_work_interval_on {
            return Ok(());
        }
        self.while_stopped(|host| {
            host.config.is_work_interval_on = is_on;
            Ok(())
        })
    }

    pub fn minimum_load(&self) -> f64 {
        self.config.minimum_load
    }

    /// Takes effect on the next period
    pub fn set_minimum_load(&mut self, minimum_load: f64) {
        assert_release!(
            (0.0..=1.0).contains(&minimum_load),
            "Invalid minimum load: {}",
            minimum_load
        );
        self.config.minimum_load = minimum_load;
        self.shared
            .minimum_load
            .store(minimum_load.to_bits(), Ordering::Relaxed);
    }

    pub fn busy_threads_config(&self) -> BusyThreadsConfig {
        self.busy_threads_config
    }

    /// Applied immediately while started, otherwise on the next start
    pub fn set_busy_threads_config(&mut self, config: BusyThreadsConfig) -> HostResult<()> {
        self.busy_threads_config = config;
        if self.is_started {
            self.busy_threads.apply(&config)?;
        }
        Ok(())
    }

    pub fn num_busy_threads(&self) -> usize {
        self.busy_threads.num_threads()
    }

    pub fn performance_config(&self) -> PerformanceConfig {
        PerformanceConfig {
            busy_threads: self.busy_threads_config,
            audio_host: self.config,
        }
    }

    /// Apply a full configuration, restarting once if anything structural
    /// changed
    pub fn apply_config(&mut self, config: &PerformanceConfig) -> HostResult<()> {
        config.validate()?;

        let target = config.audio_host;
        let needs_restart = target.num_processing_threads != self.config.num_processing_threads
            || target.process_in_driver_thread != self.config.process_in_driver_thread
            || target.is_work_interval_on != self.config.is_work_interval_on
            || target.realtime_threads != self.config.realtime_threads;

        if needs_restart {
            self.while_stopped(|host| {
                host.config = target;
                Ok(())
            })?;
        }
        self.set_minimum_load(target.minimum_load);
        self.set_busy_threads_config(config.busy_threads)
    }

    /// Target output amplitude
    pub fn output_volume(&self) -> f32 {
        self.output_volume
    }

    /// Fade the output to `volume` (an amplitude >= 0) over `fade_duration`
    pub fn set_output_volume(&mut self, volume: f32, fade_duration: Duration) -> HostResult<()> {
        assert_release!(volume >= 0.0, "Invalid output volume: {}", volume);

        let num_frames = (fade_duration.as_secs_f64() * self.driver.sample_rate()) as u64;
        if self.is_started {
            self.fade_producer
                .try_push(FadeCommand {
                    target_volume: volume,
                    num_frames,
                })
                .map_err(|_| HostError::CommandQueueFull)?;
        } else {
            self.shared.output.lock().fader.fade_to(volume, num_frames);
        }

        self.output_volume = volume;
        Ok(())
    }
}

impl<H: RenderHandler, D: Driver> Drop for AudioHost<H, D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedDriver;
    use pl_core::DriverConfig;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHandler {
        num_workers: usize,
        renders: AtomicUsize,
        processed: AtomicUsize,
    }

    impl RenderHandler for CountingHandler {
        fn setup(&mut self, num_worker_threads: usize) {
            self.num_workers = num_worker_threads;
        }

        fn render_started(&self, _io: &mut StereoBufferMut<'_>, _num_frames: usize) {}

        fn process(&self, _thread_index: usize, _num_frames: usize) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }

        fn render_ended(&self, io: &mut StereoBufferMut<'_>, _host_time: u64, _num_frames: usize) {
            io.fill(1.0);
            self.renders.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> PerformanceConfig {
        let mut config = PerformanceConfig::STANDARD;
        config.audio_host.is_work_interval_on = false;
        config.audio_host.realtime_threads = false;
        config
    }

    fn test_host() -> AudioHost<CountingHandler, SimulatedDriver> {
        let driver = SimulatedDriver::new(DriverConfig {
            preferred_buffer_size: 64,
            ..DriverConfig::default()
        });
        AudioHost::new(CountingHandler::default(), driver, test_config()).unwrap()
    }

    fn wait_for_renders(host: &AudioHost<CountingHandler, SimulatedDriver>, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while host.handler().renders.load(Ordering::SeqCst) < count {
            assert!(std::time::Instant::now() < deadline, "host stalled");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_setup_receives_worker_count() {
        let mut host = test_host();
        host.start().unwrap();
        assert_eq!(host.handler().num_workers, 1);
        assert_eq!(host.num_worker_threads(), 1);
        host.stop();
        assert_eq!(host.num_worker_threads(), 0);
    }

    #[test]
    fn test_handler_mut_only_while_stopped() {
        let mut host = test_host();
        assert!(host.handler_mut().is_some());
        host.start().unwrap();
        assert!(host.handler_mut().is_none());
        host.stop();
        assert!(host.handler_mut().is_some());
    }

    #[test]
    fn test_work_interval_requires_workgroup() {
        let mut config = test_config();
        config.audio_host.is_work_interval_on = true;
        let driver = SimulatedDriver::new(DriverConfig::default());
        let mut host = AudioHost::new(CountingHandler::default(), driver, config).unwrap();

        assert!(matches!(host.start(), Err(HostError::WorkgroupUnavailable)));
        assert!(!host.is_started());
    }

    #[test]
    fn test_output_volume_fade_applies_in_callback() {
        let mut host = test_host();
        host.set_output_volume(0.0, Duration::ZERO).unwrap();
        host.start().unwrap();
        wait_for_renders(&host, 3);
        assert_eq!(host.driver().last_peak(), 0.0);

        host.set_output_volume(0.5, Duration::ZERO).unwrap();
        let seen = host.handler().renders.load(Ordering::SeqCst);
        wait_for_renders(&host, seen + 3);
        assert_eq!(host.driver().last_peak(), 0.5);
        assert_eq!(host.output_volume(), 0.5);
    }

    #[test]
    fn test_reconfigure_restarts_running_host() {
        let mut host = test_host();
        host.start().unwrap();

        host.set_num_processing_threads(4).unwrap();
        assert!(host.is_started());
        assert_eq!(host.num_worker_threads(), 3);

        host.set_process_in_driver_thread(false).unwrap();
        assert_eq!(host.num_worker_threads(), 4);

        host.set_preferred_buffer_size(128).unwrap();
        assert_eq!(host.preferred_buffer_size(), 128);
        assert!(host.is_started());
        wait_for_renders(&host, 2);
    }

    #[test]
    fn test_driver_slot_counts_against_thread_limit() {
        let mut config = test_config();
        config.audio_host.num_processing_threads = MAX_NUM_THREADS;
        config.audio_host.process_in_driver_thread = false;
        let driver = SimulatedDriver::new(DriverConfig::default());
        assert!(matches!(
            AudioHost::new(CountingHandler::default(), driver, config),
            Err(HostError::Config(pl_core::ConfigError::TooManyWorkerThreads(8)))
        ));

        let mut host = test_host();
        host.set_num_processing_threads(MAX_NUM_THREADS).unwrap();
        assert!(matches!(
            host.set_process_in_driver_thread(false),
            Err(HostError::Config(_))
        ));
        assert!(host.process_in_driver_thread());

        host.set_process_in_driver_thread(true).unwrap();
        host.start().unwrap();
        assert_eq!(host.num_worker_threads(), MAX_NUM_THREADS - 1);
        host.stop();
    }

    #[test]
    fn test_apply_config_while_stopped_does_not_start() {
        let mut host = test_host();
        let mut config = test_config();
        config.audio_host.num_processing_threads = 3;
        config.audio_host.minimum_load = 0.25;
        host.apply_config(&config).unwrap();

        assert!(!host.is_started());
        assert_eq!(host.num_processing_threads(), 3);
        assert_eq!(host.minimum_load(), 0.25);
        assert_eq!(host.performance_config(), config);
    }
}
