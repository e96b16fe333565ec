//! Worker configuration

use std::env;

/// Default schedule of the monthly generation job: 00:00 UTC on the 1st
pub const DEFAULT_MONTHLY_GENERATION_CRON: &str = "0 0 0 1 * *";

/// Default schedule of the overdue pass: 01:00 UTC every day
pub const DEFAULT_OVERDUE_UPDATE_CRON: &str = "0 0 1 * * *";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    pub enable_invoice_scheduler: bool,
    pub monthly_generation_cron: String,
    pub overdue_update_cron: String,

    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            enable_invoice_scheduler: env::var("ENABLE_INVOICE_SCHEDULER")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            monthly_generation_cron: cron_var(
                "MONTHLY_GENERATION_CRON",
                DEFAULT_MONTHLY_GENERATION_CRON,
            )?,
            overdue_update_cron: cron_var("OVERDUE_UPDATE_CRON", DEFAULT_OVERDUE_UPDATE_CRON)?,

            log_format: env::var("LOG_FORMAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(LogFormat::Pretty),
        })
    }
}

/// Read a cron expression, requiring the six-field form (with seconds)
fn cron_var(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    let value = value.trim().to_string();

    if value.split_whitespace().count() != 6 {
        return Err(ConfigError::InvalidCron {
            name,
            value,
        });
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid cron expression in {name}: {value:?} (expected 6 fields: sec min hour day month weekday)")]
    InvalidCron { name: &'static str, value: String },
}
