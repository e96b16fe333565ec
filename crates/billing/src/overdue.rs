//! Daily overdue pass
//!
//! Flags every `UNPAID` invoice of a tenant whose due date has passed as
//! `OVERDUE` in one bulk update. `PARTIAL` invoices are left alone.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::BillingStore;

#[derive(Clone)]
pub struct OverdueStatusUpdater {
    store: Arc<dyn BillingStore>,
}

impl OverdueStatusUpdater {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Mark the tenant's past-due unpaid invoices overdue
    /// Returns the number of invoices that changed; repeated calls return 0.
    pub async fn update_overdue_invoices(&self, tenant_id: Uuid) -> BillingResult<u64> {
        self.update_overdue_invoices_at(tenant_id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn update_overdue_invoices_at(
        &self,
        tenant_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<u64> {
        let updated = self.store.mark_overdue(tenant_id, now).await?;

        if updated > 0 {
            tracing::info!(
                tenant_id = %tenant_id,
                updated = updated,
                "Marked invoices as overdue"
            );
        }

        Ok(updated)
    }
}
