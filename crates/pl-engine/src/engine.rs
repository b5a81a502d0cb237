//! Performance Measurement Engine
//!
//! Wires a [`ParallelSineBank`] playing a chord into an [`AudioHost`] and
//! publishes one [`DriveMeasurement`] per driver callback.
//!
//! Control flows into the callback and measurements flow out of it through
//! wait-free SPSC queues; nothing on the render path blocks on the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pl_core::{MAX_NUM_THREADS, PerformanceConfig, StereoBufferMut, assert_release};
use pl_realtime::{
    Consumer, FixedSpscQueue, Producer, cpu_number, duration_to_host_time, host_time_now,
    host_time_to_seconds,
};
use serde::{Deserialize, Serialize};

use crate::{
    AudioHost, Driver, HostError, HostResult, ParallelSineBank, RenderHandler, generate_chord,
    randomize_phases,
};

pub const DEFAULT_NUM_SINES: usize = 18;
pub const AMP_SMOOTHING_DURATION: Duration = Duration::from_millis(100);
pub const CHORD_NOTE_NUMBERS: [f32; 3] = [53.0, 56.0, 60.0];
/// Leading partials keep phase zero so the chord onset is coherent
pub const NUM_UNRANDOMIZED_PHASES: usize = 15;
pub const PHASE_SEED: u64 = 42;
pub const DRIVE_MEASUREMENT_QUEUE_SIZE: usize = 1024;

const SINE_BURST_QUEUE_SIZE: usize = 64;
const UNKNOWN_CPU: usize = usize::MAX;

/// Sample-rate independent engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub num_sines: usize,
    pub chord_note_numbers: Vec<f32>,
    #[serde(with = "duration_millis")]
    pub amp_smoothing: Duration,
    pub num_unrandomized_phases: usize,
    pub phase_seed: u64,
    pub measurement_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_sines: DEFAULT_NUM_SINES,
            chord_note_numbers: CHORD_NOTE_NUMBERS.to_vec(),
            amp_smoothing: AMP_SMOOTHING_DURATION,
            num_unrandomized_phases: NUM_UNRANDOMIZED_PHASES,
            phase_seed: PHASE_SEED,
            measurement_queue_size: DRIVE_MEASUREMENT_QUEUE_SIZE,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis / 1000.0).map_err(serde::de::Error::custom)
    }
}

/// Timing of one driver callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveMeasurement {
    /// Host time of the buffer, seconds
    pub host_time: f64,
    /// Wall time spent rendering, seconds
    pub duration: f64,
    pub num_frames: usize,
    /// CPU each processing thread ran on, by thread index
    pub cpu_numbers: [Option<usize>; MAX_NUM_THREADS],
    /// Active partials rendered by each processing thread
    pub num_active_partials_processed: [usize; MAX_NUM_THREADS],
}

impl DriveMeasurement {
    pub fn total_active_partials_processed(&self) -> usize {
        self.num_active_partials_processed.iter().sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct SineBurst {
    duration: Duration,
    num_additional_sines: usize,
}

/// Render-thread state; only the driver thread locks it
struct RenderState {
    bursts: Consumer<SineBurst>,
    measurements: Producer<DriveMeasurement>,
    burst_end_host_time: u64,
    burst_additional_sines: usize,
    render_start_host_time: u64,
    num_dropped_measurements: u64,
}

/// Render handler playing the sine bank
pub struct SineRenderHandler {
    sine_bank: ParallelSineBank,
    num_sines: AtomicUsize,
    cpu_numbers: [AtomicUsize; MAX_NUM_THREADS],
    num_active_partials_processed: [AtomicUsize; MAX_NUM_THREADS],
    render_state: Mutex<RenderState>,
}

impl SineRenderHandler {
    fn new(
        sine_bank: ParallelSineBank,
        num_sines: usize,
        bursts: Consumer<SineBurst>,
        measurements: Producer<DriveMeasurement>,
    ) -> Self {
        Self {
            sine_bank,
            num_sines: AtomicUsize::new(num_sines),
            cpu_numbers: std::array::from_fn(|_| AtomicUsize::new(UNKNOWN_CPU)),
            num_active_partials_processed: std::array::from_fn(|_| AtomicUsize::new(0)),
            render_state: Mutex::new(RenderState {
                bursts,
                measurements,
                burst_end_host_time: 0,
                burst_additional_sines: 0,
                render_start_host_time: 0,
                num_dropped_measurements: 0,
            }),
        }
    }

    pub fn sine_bank(&self) -> &ParallelSineBank {
        &self.sine_bank
    }

    pub fn num_sines(&self) -> usize {
        self.num_sines.load(Ordering::Relaxed)
    }

    /// Measurements lost because the queue was full
    pub fn num_dropped_measurements(&self) -> u64 {
        self.render_state.lock().num_dropped_measurements
    }
}

impl RenderHandler for SineRenderHandler {
    fn setup(&mut self, num_worker_threads: usize) {
        let num_threads = num_worker_threads + 1;
        assert_release!(
            num_threads <= MAX_NUM_THREADS,
            "Invalid number of worker threads: {}",
            num_worker_threads
        );
        self.sine_bank.set_num_threads(num_threads);
    }

    fn render_started(&self, _io: &mut StereoBufferMut<'_>, num_frames: usize) {
        let now = host_time_now();
        let mut state = self.render_state.lock();
        state.render_start_host_time = now;

        while let Some(burst) = state.bursts.try_pop() {
            state.burst_end_host_time = now.saturating_add(duration_to_host_time(burst.duration));
            state.burst_additional_sines = burst.num_additional_sines;
        }

        let mut num_active = self.num_sines.load(Ordering::Relaxed);
        if now < state.burst_end_host_time {
            num_active = num_active.saturating_add(state.burst_additional_sines);
        }

        for (cpu, processed) in self
            .cpu_numbers
            .iter()
            .zip(&self.num_active_partials_processed)
        {
            cpu.store(UNKNOWN_CPU, Ordering::Relaxed);
            processed.store(0, Ordering::Relaxed);
        }

        // SAFETY: the host calls render_started before waking any worker
        unsafe { self.sine_bank.prepare(num_active, num_frames) };
    }

    fn process(&self, thread_index: usize, num_frames: usize) {
        self.cpu_numbers[thread_index].store(cpu_number().unwrap_or(UNKNOWN_CPU), Ordering::Relaxed);
        let processed = self.sine_bank.process(thread_index, num_frames);
        self.num_active_partials_processed[thread_index].store(processed, Ordering::Relaxed);
    }

    fn render_ended(&self, io: &mut StereoBufferMut<'_>, host_time: u64, num_frames: usize) {
        io.fill(0.0);
        self.sine_bank.mix_to(io, num_frames);

        let mut state = self.render_state.lock();
        let duration = host_time_to_seconds(host_time_now().saturating_sub(state.render_start_host_time));

        let measurement = DriveMeasurement {
            host_time: host_time_to_seconds(host_time),
            duration,
            num_frames,
            cpu_numbers: std::array::from_fn(|i| {
                let cpu = self.cpu_numbers[i].load(Ordering::Relaxed);
                (cpu != UNKNOWN_CPU).then_some(cpu)
            }),
            num_active_partials_processed: std::array::from_fn(|i| {
                self.num_active_partials_processed[i].load(Ordering::Relaxed)
            }),
        };

        if state.measurements.try_push(measurement).is_err() {
            state.num_dropped_measurements += 1;
        }
    }
}

/// Sine bank performance engine
pub struct PerfEngine<D: Driver> {
    host: AudioHost<SineRenderHandler, D>,
    bursts: Producer<SineBurst>,
    measurements: Consumer<DriveMeasurement>,
    max_num_sines: usize,
}

impl<D: Driver> PerfEngine<D> {
    pub fn new(driver: D, config: &EngineConfig, performance: PerformanceConfig) -> HostResult<Self> {
        let sample_rate = driver.sample_rate() as f32;
        let mut partials = generate_chord(sample_rate, config.amp_smoothing, &config.chord_note_numbers);
        randomize_phases(&mut partials, config.num_unrandomized_phases, config.phase_seed);
        let max_num_sines = partials.len();

        let mut sine_bank = ParallelSineBank::new();
        sine_bank.set_partials(partials);

        let (burst_producer, burst_consumer) = FixedSpscQueue::new(SINE_BURST_QUEUE_SIZE);
        let (measurement_producer, measurement_consumer) =
            FixedSpscQueue::new(config.measurement_queue_size);

        let handler = SineRenderHandler::new(
            sine_bank,
            config.num_sines.min(max_num_sines),
            burst_consumer,
            measurement_producer,
        );

        log::info!("Engine ready: {} partials @ {} Hz", max_num_sines, sample_rate);

        Ok(Self {
            host: AudioHost::new(handler, driver, performance)?,
            bursts: burst_producer,
            measurements: measurement_consumer,
            max_num_sines,
        })
    }

    pub fn start(&mut self) -> HostResult<()> {
        self.host.start()
    }

    pub fn stop(&mut self) {
        self.host.stop();
    }

    pub fn host(&self) -> &AudioHost<SineRenderHandler, D> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut AudioHost<SineRenderHandler, D> {
        &mut self.host
    }

    pub fn max_num_sines(&self) -> usize {
        self.max_num_sines
    }

    pub fn num_sines(&self) -> usize {
        self.host.handler().num_sines()
    }

    /// Number of continuously playing sines, clamped to the partial count
    pub fn set_num_sines(&self, num_sines: usize) {
        self.host
            .handler()
            .num_sines
            .store(num_sines.min(self.max_num_sines), Ordering::Relaxed);
    }

    /// Play `num_additional_sines` on top of the regular ones for `duration`.
    /// The total stays clamped to the partial count.
    pub fn play_sine_burst(&mut self, duration: Duration, num_additional_sines: usize) -> HostResult<()> {
        self.bursts
            .try_push(SineBurst {
                duration,
                num_additional_sines: num_additional_sines.min(self.max_num_sines),
            })
            .map_err(|_| HostError::CommandQueueFull)
    }

    /// Hand every pending measurement to `callback`. Returns how many were
    /// delivered.
    pub fn fetch_measurements<F>(&mut self, mut callback: F) -> usize
    where
        F: FnMut(DriveMeasurement),
    {
        let mut count = 0;
        self.measurements.drain(|measurement| {
            callback(measurement);
            count += 1;
        });
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_json_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"num_sines": 40}"#).unwrap();
        assert_eq!(config.num_sines, 40);
        assert_eq!(config.chord_note_numbers, CHORD_NOTE_NUMBERS.to_vec());
        assert_eq!(config.amp_smoothing, AMP_SMOOTHING_DURATION);

        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert!(json.contains("\"amp_smoothing\":100.0"));
    }

    #[test]
    fn test_measurement_totals() {
        let mut measurement = DriveMeasurement {
            host_time: 0.0,
            duration: 0.001,
            num_frames: 128,
            cpu_numbers: [None; MAX_NUM_THREADS],
            num_active_partials_processed: [0; MAX_NUM_THREADS],
        };
        measurement.num_active_partials_processed[0] = 10;
        measurement.num_active_partials_processed[2] = 8;
        assert_eq!(measurement.total_active_partials_processed(), 18);
    }
}
