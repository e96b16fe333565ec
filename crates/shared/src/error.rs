//! Error types for the Tirta platform

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
