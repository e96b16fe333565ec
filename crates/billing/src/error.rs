//! Billing error types

use thiserror::Error;
use tirta_shared::UsagePeriod;
use uuid::Uuid;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid invoice number: {0}")]
    InvalidInvoiceNumber(String),

    #[error("Failed to generate invoice numbers: {0}")]
    Numbering(String),

    #[error("No water usage records found for tenant {tenant_id} in period {period}")]
    NoUsageRecords { tenant_id: Uuid, period: UsagePeriod },
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                BillingError::AlreadyExists(db_err.message().to_string())
            }
            _ => BillingError::Database(err.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
