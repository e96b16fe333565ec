//! Persistence interface consumed by the billing core
//!
//! The generation engine, allocator, penalty calculator and overdue updater
//! only talk to storage through [`BillingStore`]. `PgBillingStore` backs it
//! with Postgres; `InMemoryBillingStore` serves tests and local runs.

use async_trait::async_trait;
use time::OffsetDateTime;
use tirta_shared::{
    Customer, GenerationRun, Invoice, InvoiceKind, PenaltyPolicy, SubscriptionType, Tenant,
    TenantStatus, UsagePeriod, UsageRecord,
};
use uuid::Uuid;

use crate::error::BillingResult;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Highest invoice number of the tenant starting with `prefix`
    /// Ordered by sequence value, so `...-10000` sorts above `...-9999`.
    async fn highest_invoice_number(
        &self,
        tenant_id: Uuid,
        prefix: &str,
    ) -> BillingResult<Option<String>>;

    async fn invoice_exists(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period: UsagePeriod,
        kind: InvoiceKind,
    ) -> BillingResult<bool>;

    async fn find_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<Customer>>;

    async fn find_subscription_type(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<Option<SubscriptionType>>;

    /// Usage records of a period in a stable order; an empty `customer_ids`
    /// means every customer of the tenant.
    async fn usage_records(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        customer_ids: &[Uuid],
    ) -> BillingResult<Vec<UsageRecord>>;

    /// Customer invoices not yet `PAID` whose due date is before `cutoff`
    async fn unpaid_invoices_due_before(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Invoice>>;

    async fn penalty_policy(&self, tenant_id: Uuid) -> BillingResult<Option<PenaltyPolicy>>;

    /// Insert an invoice
    /// Fails with `AlreadyExists` on a duplicate number within the tenant or a
    /// second monthly invoice for the same customer and period.
    async fn create_invoice(&self, invoice: &Invoice) -> BillingResult<()>;

    /// Flip `UNPAID` invoices due before `now` to `OVERDUE`, returning how many changed
    async fn mark_overdue(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<u64>;

    async fn record_generation_run(&self, run: &GenerationRun) -> BillingResult<()>;

    /// Most recent generation runs of a tenant, newest first
    async fn generation_runs(&self, tenant_id: Uuid, limit: i64)
        -> BillingResult<Vec<GenerationRun>>;

    async fn tenants_by_status(&self, status: TenantStatus) -> BillingResult<Vec<Tenant>>;
}
