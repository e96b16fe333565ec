//! Tirta Worker
//!
//! Background jobs for the Tirta platform: monthly invoice generation and the
//! daily overdue pass, plus the manual generation trigger used by operators.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::{ConfigError, LogFormat, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use scheduler::{InvoiceJobs, InvoiceScheduler, MonthlyRunSummary, OverdueRunSummary};
