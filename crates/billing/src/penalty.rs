//! Late-payment penalties
//!
//! A customer's next invoice carries a penalty for every earlier invoice that
//! is still unpaid past its due date plus the tenant's grace period. Each
//! overdue invoice contributes `outstanding * percent / 100`, capped per
//! invoice; contributions add up across all qualifying invoices.

use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use time::{Duration, OffsetDateTime};
use tirta_shared::{Invoice, PenaltyPolicy};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::BillingStore;

#[derive(Clone)]
pub struct PenaltyCalculator {
    store: Arc<dyn BillingStore>,
}

impl PenaltyCalculator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Penalty to charge on the customer's next invoice
    pub async fn penalty(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        policy: &PenaltyPolicy,
    ) -> BillingResult<Decimal> {
        self.penalty_at(tenant_id, customer_id, policy, OffsetDateTime::now_utc())
            .await
    }

    pub async fn penalty_at(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        policy: &PenaltyPolicy,
        now: OffsetDateTime,
    ) -> BillingResult<Decimal> {
        // A grace period reaching past the earliest representable date
        // leaves nothing overdue
        let grace = Duration::days(i64::from(policy.grace_period_days.max(0)));
        let Some(cutoff) = now.checked_sub(grace) else {
            return Ok(Decimal::ZERO);
        };

        let overdue = self
            .store
            .unpaid_invoices_due_before(tenant_id, customer_id, cutoff)
            .await?;

        Ok(total_penalty(&overdue, policy))
    }
}

/// Penalty for a single outstanding amount
///
/// Rounded to two decimal places, halves away from zero, before the cap.
pub fn invoice_penalty(outstanding: Decimal, policy: &PenaltyPolicy) -> Decimal {
    if outstanding <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let penalty = (outstanding * policy.late_penalty_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    penalty.min(policy.late_penalty_max_cap)
}

/// Sum of per-invoice penalties
pub fn total_penalty(invoices: &[Invoice], policy: &PenaltyPolicy) -> Decimal {
    invoices
        .iter()
        .map(|invoice| invoice_penalty(invoice.outstanding(), policy))
        .sum()
}
