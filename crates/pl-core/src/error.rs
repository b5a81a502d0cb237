//! Error types for PerfLab

use thiserror::Error;

/// Configuration validation error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid number of processing threads: {0}")]
    InvalidNumProcessingThreads(usize),

    #[error("Too many dedicated worker threads: {0}")]
    TooManyWorkerThreads(usize),

    #[error("Invalid busy thread period: {0}s")]
    InvalidBusyThreadPeriod(f64),

    #[error("Invalid busy thread CPU usage: {0}")]
    InvalidBusyThreadCpuUsage(f64),

    #[error("Invalid minimum load: {0}")]
    InvalidMinimumLoad(f64),

    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(usize),

    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(f64),

    #[error("Invalid output volume: {0}")]
    InvalidOutputVolume(f32),
}

/// Core error type
#[derive(Error, Debug)]
pub enum PlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias
pub type PlResult<T> = Result<T, PlError>;
