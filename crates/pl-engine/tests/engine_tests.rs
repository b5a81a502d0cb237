//! PerfEngine Integration Tests
//!
//! Tests for:
//! - Chord generation sized by the driver's sample rate
//! - Measurements: one per callback, active partial totals, frame counts
//! - Sine bursts raising the active count for their duration, clamped to
//!   the partial count
//! - Rendered output reaching the driver

use pl_core::{DriverConfig, MAX_NUM_THREADS, PerformanceConfig};
use pl_engine::{DriveMeasurement, EngineConfig, PerfEngine, SimulatedDriver};
use std::thread;
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const BUFFER_SIZE: usize = 128;

fn test_engine(num_sines: usize) -> PerfEngine<SimulatedDriver> {
    let driver = SimulatedDriver::new(DriverConfig {
        preferred_buffer_size: BUFFER_SIZE,
        ..DriverConfig::default()
    });

    let mut performance = PerformanceConfig::STANDARD;
    performance.audio_host.num_processing_threads = 3;
    performance.audio_host.is_work_interval_on = false;
    performance.audio_host.realtime_threads = false;

    let config = EngineConfig {
        num_sines,
        ..EngineConfig::default()
    };
    PerfEngine::new(driver, &config, performance).unwrap()
}

fn collect_measurements(
    engine: &mut PerfEngine<SimulatedDriver>,
    count: usize,
) -> Vec<DriveMeasurement> {
    let mut measurements = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while measurements.len() < count {
        assert!(Instant::now() < deadline, "no measurements arriving");
        engine.fetch_measurements(|m| measurements.push(m));
        thread::sleep(Duration::from_millis(2));
    }
    measurements
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_engine_partials_cover_chord() {
    let engine = test_engine(18);
    assert!(engine.max_num_sines() > 1000);
    assert_eq!(engine.num_sines(), 18);
}

#[test]
fn test_num_sines_clamped_to_partials() {
    let engine = test_engine(18);
    engine.set_num_sines(usize::MAX);
    assert_eq!(engine.num_sines(), engine.max_num_sines());
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEASUREMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_measurements_account_for_active_sines() {
    let mut engine = test_engine(300);
    engine.start().unwrap();
    let measurements = collect_measurements(&mut engine, 20);
    engine.stop();

    for m in &measurements {
        assert_eq!(m.num_frames, BUFFER_SIZE);
        assert_eq!(m.total_active_partials_processed(), 300);
        assert!(m.duration >= 0.0);
        // Driver thread plus two workers
        assert!(m.num_active_partials_processed[3..].iter().all(|&n| n == 0));
        assert!(m.cpu_numbers[3..MAX_NUM_THREADS].iter().all(Option::is_none));
    }

    assert!(
        measurements
            .windows(2)
            .all(|pair| pair[0].host_time <= pair[1].host_time)
    );
}

#[test]
fn test_sine_burst_adds_sines_temporarily() {
    let mut engine = test_engine(10);
    engine.start().unwrap();
    collect_measurements(&mut engine, 2);

    engine
        .play_sine_burst(Duration::from_millis(50), 100)
        .unwrap();
    let during = collect_measurements(&mut engine, 5);
    assert!(
        during
            .iter()
            .any(|m| m.total_active_partials_processed() == 110)
    );

    thread::sleep(Duration::from_millis(100));
    engine.fetch_measurements(|_| {});
    let after = collect_measurements(&mut engine, 3);
    engine.stop();

    assert!(
        after
            .iter()
            .all(|m| m.total_active_partials_processed() == 10)
    );
}

#[test]
fn test_oversized_burst_clamped_to_partials() {
    let mut engine = test_engine(10);
    let max_num_sines = engine.max_num_sines();
    engine.start().unwrap();
    collect_measurements(&mut engine, 2);

    engine.play_sine_burst(Duration::MAX, usize::MAX).unwrap();
    engine.fetch_measurements(|_| {});
    let during = collect_measurements(&mut engine, 5);
    engine.stop();

    assert!(
        during
            .iter()
            .all(|m| m.total_active_partials_processed() <= max_num_sines)
    );
    assert_eq!(
        during.last().map(DriveMeasurement::total_active_partials_processed),
        Some(max_num_sines)
    );
}

#[test]
fn test_output_is_audible() {
    let mut engine = test_engine(18);
    engine.start().unwrap();
    // Let the 100ms amplitude smoothing get going
    thread::sleep(Duration::from_millis(200));
    let peak = engine.host().driver().last_peak();
    engine.stop();

    assert!(peak > 0.0, "silent output");
    assert!(peak < 2.0, "output clipping: {}", peak);
}

#[test]
fn test_silence_when_no_sines() {
    let mut engine = test_engine(0);
    engine.start().unwrap();
    collect_measurements(&mut engine, 5);
    let peak = engine.host().driver().last_peak();
    engine.stop();

    assert_eq!(peak, 0.0);
}
