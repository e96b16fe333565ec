//! Tirta Billing
//!
//! Monthly water invoice generation for the Tirta platform:
//! - Invoice number formatting and per-tenant sequence allocation
//! - Late-payment penalty calculation
//! - Invoice generation (scheduled, manual and preview runs)
//! - Daily overdue status updates
//! - Generation run history

pub mod allocator;
pub mod error;
pub mod generation;
pub mod history;
pub mod memory_store;
pub mod numbering;
pub mod overdue;
pub mod penalty;
pub mod pg_store;
pub mod store;

pub use allocator::InvoiceNumberAllocator;
pub use error::{BillingError, BillingResult};
pub use generation::{
    InvoiceGenerationRequest, InvoiceGenerationResult, InvoiceGenerationService,
    InvoicePreviewSummary, MAX_INVOICE_TOTAL,
};
pub use history::{build_generation_run, GenerationHistoryService};
pub use memory_store::InMemoryBillingStore;
pub use numbering::{
    format_invoice_number, invoice_number_prefix, validate_invoice_number, InvoiceNumber,
};
pub use overdue::OverdueStatusUpdater;
pub use penalty::{invoice_penalty, total_penalty, PenaltyCalculator};
pub use pg_store::PgBillingStore;
pub use store::BillingStore;
