//! Performance Configuration
//!
//! Settings consumed by the audio host and the busy-thread pool. Two presets
//! mirror the tunings the render core is usually run with:
//!
//! - `PerformanceConfig::STANDARD`: the driver thread shares the work, worker
//!   threads join the driver's work interval, no busy threads.
//! - `PerformanceConfig::OPTIMAL`: all work on dedicated workers plus one busy
//!   thread keeping the CPU clocked up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, DEFAULT_PREFERRED_BUFFER_SIZE, MAX_NUM_FRAMES};

/// Upper bound on threads taking part in rendering (driver thread included)
pub const MAX_NUM_THREADS: usize = 8;

/// Busy thread pool settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusyThreadsConfig {
    /// Number of low-priority busy threads
    pub num_threads: usize,
    /// Duration of one busy iteration (block + low-energy work)
    #[serde(with = "duration_secs")]
    pub period: Duration,
    /// Fraction of each iteration spent working rather than blocking
    pub cpu_usage: f64,
}

impl Default for BusyThreadsConfig {
    fn default() -> Self {
        PerformanceConfig::STANDARD.busy_threads
    }
}

/// Audio host settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioHostConfig {
    /// Threads taking part in rendering, including the driver thread when
    /// `process_in_driver_thread` is set
    pub num_processing_threads: usize,
    /// Run one share of the work directly in the driver callback
    pub process_in_driver_thread: bool,
    /// Join worker threads to the driver's real-time work interval
    pub is_work_interval_on: bool,
    /// Fraction of the buffer duration every processing thread stays busy for
    pub minimum_load: f64,
    /// Apply the time-constraint scheduling policy to worker threads
    #[serde(default = "default_realtime_threads")]
    pub realtime_threads: bool,
}

fn default_realtime_threads() -> bool {
    true
}

impl AudioHostConfig {
    /// Number of dedicated worker threads this configuration asks for
    pub fn num_worker_threads(&self) -> usize {
        if self.process_in_driver_thread {
            self.num_processing_threads.saturating_sub(1)
        } else {
            self.num_processing_threads
        }
    }

    /// The driver thread always holds a slot, so dedicated workers get at
    /// most `MAX_NUM_THREADS - 1`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_processing_threads == 0 || self.num_processing_threads > MAX_NUM_THREADS {
            return Err(ConfigError::InvalidNumProcessingThreads(
                self.num_processing_threads,
            ));
        }
        if self.num_worker_threads() + 1 > MAX_NUM_THREADS {
            return Err(ConfigError::TooManyWorkerThreads(self.num_worker_threads()));
        }
        if !(0.0..=1.0).contains(&self.minimum_load) {
            return Err(ConfigError::InvalidMinimumLoad(self.minimum_load));
        }
        Ok(())
    }
}

impl Default for AudioHostConfig {
    fn default() -> Self {
        PerformanceConfig::STANDARD.audio_host
    }
}

/// Complete performance configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub busy_threads: BusyThreadsConfig,
    pub audio_host: AudioHostConfig,
}

impl PerformanceConfig {
    pub const STANDARD: Self = Self {
        busy_threads: BusyThreadsConfig {
            num_threads: 0,
            // Ramps CPUs up without exceeding background CPU usage limits
            period: Duration::from_millis(35),
            cpu_usage: 0.5,
        },
        audio_host: AudioHostConfig {
            num_processing_threads: 2,
            process_in_driver_thread: true,
            is_work_interval_on: true,
            minimum_load: 0.0,
            realtime_threads: true,
        },
    };

    pub const OPTIMAL: Self = Self {
        busy_threads: BusyThreadsConfig {
            num_threads: 1,
            period: Self::STANDARD.busy_threads.period,
            cpu_usage: Self::STANDARD.busy_threads.cpu_usage,
        },
        audio_host: AudioHostConfig {
            num_processing_threads: 2,
            process_in_driver_thread: false,
            is_work_interval_on: false,
            minimum_load: Self::STANDARD.audio_host.minimum_load,
            realtime_threads: true,
        },
    };

    /// Check every field against its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio_host.validate()?;

        let busy = &self.busy_threads;
        if busy.period.is_zero() {
            return Err(ConfigError::InvalidBusyThreadPeriod(busy.period.as_secs_f64()));
        }
        if !(0.0..=1.0).contains(&busy.cpu_usage) {
            return Err(ConfigError::InvalidBusyThreadCpuUsage(busy.cpu_usage));
        }

        Ok(())
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Driver settings requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub preferred_buffer_size: usize,
    pub sample_rate: f64,
    /// Output amplitude, >= 0
    pub output_volume: f32,
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preferred_buffer_size == 0 || self.preferred_buffer_size > MAX_NUM_FRAMES {
            return Err(ConfigError::InvalidBufferSize(self.preferred_buffer_size));
        }
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.output_volume.is_nan() || self.output_volume < 0.0 {
            return Err(ConfigError::InvalidOutputVolume(self.output_volume));
        }
        Ok(())
    }

    /// Duration of one buffer at the configured rate
    pub fn nominal_buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.preferred_buffer_size as f64 / self.sample_rate)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            preferred_buffer_size: DEFAULT_PREFERRED_BUFFER_SIZE,
            sample_rate: 48000.0,
            output_volume: 1.0,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(PerformanceConfig::STANDARD.validate().is_ok());
        assert!(PerformanceConfig::OPTIMAL.validate().is_ok());
        assert!(DriverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_worker_thread_count() {
        assert_eq!(PerformanceConfig::STANDARD.audio_host.num_worker_threads(), 1);
        assert_eq!(PerformanceConfig::OPTIMAL.audio_host.num_worker_threads(), 2);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = PerformanceConfig::STANDARD;
        config.audio_host.minimum_load = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMinimumLoad(1.5)));

        let mut config = PerformanceConfig::STANDARD;
        config.audio_host.num_processing_threads = 0;
        assert!(config.validate().is_err());

        let mut config = PerformanceConfig::OPTIMAL;
        config.busy_threads.period = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = PerformanceConfig::OPTIMAL;
        config.audio_host.num_processing_threads = MAX_NUM_THREADS;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyWorkerThreads(MAX_NUM_THREADS))
        );
        config.audio_host.num_processing_threads = MAX_NUM_THREADS - 1;
        assert!(config.validate().is_ok());
        config.audio_host.process_in_driver_thread = true;
        config.audio_host.num_processing_threads = MAX_NUM_THREADS;
        assert!(config.validate().is_ok());

        let driver = DriverConfig {
            output_volume: -1.0,
            ..DriverConfig::default()
        };
        assert_eq!(driver.validate(), Err(ConfigError::InvalidOutputVolume(-1.0)));
    }

    #[test]
    fn test_json_round_trip_uses_seconds() {
        let json = serde_json::to_string(&PerformanceConfig::OPTIMAL).unwrap();
        assert!(json.contains("\"period\":0.035"));

        let parsed: PerformanceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PerformanceConfig::OPTIMAL);
    }

    #[test]
    fn test_realtime_threads_defaults_on() {
        let json = r#"{
            "busy_threads": {"num_threads": 0, "period": 0.035, "cpu_usage": 0.5},
            "audio_host": {
                "num_processing_threads": 3,
                "process_in_driver_thread": false,
                "is_work_interval_on": false,
                "minimum_load": 0.25
            }
        }"#;
        let parsed: PerformanceConfig = serde_json::from_str(json).unwrap();
        assert!(parsed.audio_host.realtime_threads);
        assert_eq!(parsed.audio_host.num_worker_threads(), 3);
    }
}
