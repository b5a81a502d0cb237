//! Engine error types

use pl_core::ConfigError;
use pl_realtime::RealtimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Failed to build stream: {0}")]
    StreamBuild(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Driver already started")]
    AlreadyStarted,

    #[error("Buffer size can only change while the driver is stopped")]
    Busy,

    #[error("Unsupported buffer size: {0}")]
    UnsupportedBufferSize(usize),

    #[error("Failed to spawn driver thread: {0}")]
    Spawn(std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Render handler is still referenced by a driver or worker")]
    HandlerInUse,

    #[error("Work interval requested but the driver has no audio workgroup")]
    WorkgroupUnavailable,

    #[error("Worker thread {0} exited before reporting readiness")]
    WorkerExited(usize),

    #[error("Command queue is full")]
    CommandQueueFull,
}

pub type HostResult<T> = Result<T, HostError>;
