//! PerfLab - headless render core runner
//!
//! Usage:
//!   perflab                            - 5s on the simulated driver, standard preset
//!   perflab --preset optimal -t 4      - dedicated workers, 4 processing threads
//!   perflab --sines 2000 --burst 500   - heavier load plus a burst halfway through
//!   perflab --config run.json --json   - settings from a file, JSON summary

mod summary;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use pl_core::{DriverConfig, PerformanceConfig, PlError, PlResult};
use pl_engine::{Driver, EngineConfig, PerfEngine, SimulatedDriver};
use serde::Deserialize;

use crate::summary::{RunSummary, SummaryBuilder};

/// How often measurements are drained while running
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    /// Timer thread, no audio device
    Simulated,
    /// Default output device
    Cpal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    Standard,
    Optimal,
}

impl Preset {
    fn config(self) -> PerformanceConfig {
        match self {
            Self::Standard => PerformanceConfig::STANDARD,
            Self::Optimal => PerformanceConfig::OPTIMAL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "perflab", about = "Parallel real-time audio render benchmark")]
struct Cli {
    /// Seconds to run
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    #[arg(long, value_enum, default_value_t = DriverKind::Simulated)]
    driver: DriverKind,

    /// Performance preset, overridden by --config and the flags below
    #[arg(short, long, value_enum, default_value_t = Preset::Standard)]
    preset: Preset,

    /// JSON file with `performance`, `engine` and `driver` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Processing threads, driver thread included
    #[arg(short, long)]
    threads: Option<usize>,

    /// Frames per callback
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Continuously playing sines
    #[arg(short, long)]
    sines: Option<usize>,

    /// Extra sines played for --burst-ms halfway through the run
    #[arg(long)]
    burst: Option<usize>,

    #[arg(long, default_value_t = 500)]
    burst_ms: u64,

    /// Fraction of the buffer duration every processing thread stays busy
    #[arg(long)]
    minimum_load: Option<f64>,

    #[arg(long)]
    busy_threads: Option<usize>,

    /// Keep workers at normal priority
    #[arg(long)]
    no_realtime: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// Settings file layout; every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunConfig {
    performance: Option<PerformanceConfig>,
    engine: EngineConfig,
    driver: DriverConfig,
}

impl RunConfig {
    fn load(path: &Path) -> PlResult<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| PlError::Serialization(e.to_string()))
    }
}

/// Everything a run needs, after merging preset, file and flags
#[derive(Debug)]
struct RunSettings {
    performance: PerformanceConfig,
    engine: EngineConfig,
    driver: DriverConfig,
    duration: Duration,
    burst: Option<(Duration, usize)>,
}

impl RunSettings {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => RunConfig::default(),
        };

        let mut performance = file.performance.unwrap_or_else(|| cli.preset.config());
        let mut engine = file.engine;
        let mut driver = file.driver;

        if let Some(threads) = cli.threads {
            performance.audio_host.num_processing_threads = threads;
        }
        if let Some(minimum_load) = cli.minimum_load {
            performance.audio_host.minimum_load = minimum_load;
        }
        if let Some(busy_threads) = cli.busy_threads {
            performance.busy_threads.num_threads = busy_threads;
        }
        if cli.no_realtime {
            performance.audio_host.realtime_threads = false;
        }
        if let Some(buffer_size) = cli.buffer_size {
            driver.preferred_buffer_size = buffer_size;
        }
        if let Some(sines) = cli.sines {
            engine.num_sines = sines;
        }

        performance.validate()?;
        driver.validate()?;

        let duration = Duration::try_from_secs_f64(cli.duration)
            .with_context(|| format!("Invalid duration: {}", cli.duration))?;
        let burst = cli
            .burst
            .map(|sines| (Duration::from_millis(cli.burst_ms), sines));

        Ok(Self {
            performance,
            engine,
            driver,
            duration,
            burst,
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = RunSettings::from_cli(&cli)?;
    log::debug!("Run settings: {:?}", settings);

    let summary = match cli.driver {
        DriverKind::Simulated => run(simulated_driver(settings.driver), &settings)?,
        DriverKind::Cpal => run_cpal(&settings)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

/// Simulated driver whose work interval pins members to the physical cores
#[cfg(any(target_os = "linux", target_os = "android"))]
fn simulated_driver(config: DriverConfig) -> SimulatedDriver {
    let workgroup = pl_realtime::CpuAffinityWorkgroup::physical_cores();
    log::debug!("Simulated work interval on CPUs {:?}", workgroup.cpus());
    SimulatedDriver::new(config).with_workgroup(std::sync::Arc::new(workgroup))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn simulated_driver(config: DriverConfig) -> SimulatedDriver {
    SimulatedDriver::new(config)
}

#[cfg(feature = "cpal-driver")]
fn run_cpal(settings: &RunSettings) -> Result<RunSummary> {
    let driver = pl_engine::CpalDriver::new(settings.driver.preferred_buffer_size)?;
    run(driver, settings)
}

#[cfg(not(feature = "cpal-driver"))]
fn run_cpal(_settings: &RunSettings) -> Result<RunSummary> {
    bail!("perflab was built without the cpal-driver feature")
}

fn run<D: Driver>(driver: D, settings: &RunSettings) -> Result<RunSummary> {
    let sample_rate = driver.sample_rate();
    let mut performance = settings.performance;
    if performance.audio_host.is_work_interval_on && driver.audio_workgroup().is_none() {
        log::warn!("Driver has no audio workgroup, running without work interval");
        performance.audio_host.is_work_interval_on = false;
    }

    let mut engine = PerfEngine::new(driver, &settings.engine, performance)?;
    engine
        .host_mut()
        .set_output_volume(settings.driver.output_volume, Duration::ZERO)?;

    log::info!(
        "Running {} of {} sines for {:.1}s on {} processing threads",
        engine.num_sines(),
        engine.max_num_sines(),
        settings.duration.as_secs_f64(),
        performance.audio_host.num_processing_threads
    );

    let mut builder = SummaryBuilder::new(sample_rate);
    let mut burst = settings.burst;

    if let Err(e) = engine.start() {
        if !performance.audio_host.realtime_threads {
            return Err(e.into());
        }
        log::warn!("Real-time scheduling unavailable ({}), retrying at normal priority", e);
        performance.audio_host.realtime_threads = false;
        engine.host_mut().apply_config(&performance)?;
        engine.start()?;
    }
    let started = Instant::now();

    while started.elapsed() < settings.duration {
        thread::sleep(POLL_INTERVAL);
        engine.fetch_measurements(|measurement| builder.add(&measurement));

        if let Some((duration, num_sines)) = burst {
            if started.elapsed() >= settings.duration / 2 {
                log::info!("Sine burst: +{} for {:?}", num_sines, duration);
                engine.play_sine_burst(duration, num_sines)?;
                burst = None;
            }
        }
    }

    engine.stop();
    engine.fetch_measurements(|measurement| builder.add(&measurement));

    if builder.is_empty() {
        bail!("No render callbacks in {:?}", settings.duration);
    }
    log::info!("Collected {} measurements", builder.len());

    // Sine bank threads: the driver thread plus every possible worker
    let num_threads = performance.audio_host.num_worker_threads() + 1;
    let num_dropped = engine.host().handler().num_dropped_measurements();
    Ok(builder.finish(num_threads, num_dropped))
}
