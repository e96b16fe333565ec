//! Worker error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
