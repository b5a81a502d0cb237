//! Real-time primitive error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Failed to create semaphore: {0}")]
    SemaphoreCreate(std::io::Error),

    #[error("Semaphore {op} failed: {source}")]
    Semaphore {
        op: &'static str,
        source: std::io::Error,
    },

    #[error("Failed to apply time constraint policy to {thread}: {source}")]
    ThreadPolicy {
        thread: String,
        source: std::io::Error,
    },

    #[error("Failed to query host time base: {0}")]
    Timebase(String),

    #[error("Failed to join audio workgroup: {0}")]
    WorkgroupJoin(String),

    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
