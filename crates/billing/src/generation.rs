//! Monthly invoice generation
//!
//! Turns a tenant's water usage records for one period into customer
//! invoices: base fee + usage charge + carried-forward penalty. Runs are
//! idempotent (customers already invoiced for the period are skipped) and
//! best-effort (one bad record never aborts the batch). Only a missing data
//! set or a numbering failure fails the whole call.
//!
//! Invoice numbers are reserved for every usage record before the records
//! are processed and bound to them by position. A record that is skipped or
//! fails leaves its number unused, so gaps in the sequence are expected.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tirta_shared::{
    Invoice, InvoiceKind, InvoiceStatus, PenaltyPolicy, UsagePeriod, UsageRecord,
};
use uuid::Uuid;

use crate::allocator::InvoiceNumberAllocator;
use crate::error::{BillingError, BillingResult};
use crate::numbering::InvoiceNumber;
use crate::penalty::PenaltyCalculator;
use crate::store::BillingStore;

/// Upper bound for a single invoice total
pub const MAX_INVOICE_TOTAL: i64 = 999_999_999;

/// Parameters of one generation run
#[derive(Debug, Clone)]
pub struct InvoiceGenerationRequest {
    pub tenant_id: Uuid,
    pub period: UsagePeriod,
    /// Restrict the run to these customers; empty means all customers
    pub customer_ids: Vec<Uuid>,
    /// Compute everything but persist nothing
    pub dry_run: bool,
}

impl InvoiceGenerationRequest {
    pub fn new(tenant_id: Uuid, period: UsagePeriod) -> Self {
        Self {
            tenant_id,
            period,
            customer_ids: Vec::new(),
            dry_run: false,
        }
    }

    pub fn preview(tenant_id: Uuid, period: UsagePeriod) -> Self {
        Self {
            dry_run: true,
            ..Self::new(tenant_id, period)
        }
    }

    pub fn for_customers(mut self, customer_ids: Vec<Uuid>) -> Self {
        self.customer_ids = customer_ids;
        self
    }
}

/// Outcome of one generation run
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceGenerationResult {
    pub period: UsagePeriod,
    pub success: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total_amount: Decimal,
    pub invoices: Vec<Invoice>,
    /// Human-readable notes for skipped and failed records
    pub errors: Vec<String>,
    pub preview_only: bool,
}

impl InvoiceGenerationResult {
    fn new(period: UsagePeriod, preview_only: bool) -> Self {
        Self {
            period,
            success: 0,
            skipped: 0,
            failed: 0,
            total_amount: Decimal::ZERO,
            invoices: Vec::new(),
            errors: Vec::new(),
            preview_only,
        }
    }

    /// Aggregate figures for a preview screen
    pub fn summary(&self) -> InvoicePreviewSummary {
        InvoicePreviewSummary {
            total_customers: self.invoices.len(),
            total_usage_m3: self.invoices.iter().map(|i| i.usage_m3).sum(),
            total_amount: self.total_amount,
            total_penalty: self.invoices.iter().map(|i| i.penalty_amount).sum(),
            period_month: self.period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePreviewSummary {
    pub total_customers: usize,
    pub total_usage_m3: Decimal,
    pub total_amount: Decimal,
    pub total_penalty: Decimal,
    pub period_month: UsagePeriod,
}

/// Why a usage record produced no invoice
enum RecordError {
    Skipped(String),
    Failed(String),
}

pub struct InvoiceGenerationService {
    store: Arc<dyn BillingStore>,
    allocator: Arc<InvoiceNumberAllocator>,
    penalties: PenaltyCalculator,
}

impl InvoiceGenerationService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        let allocator = Arc::new(InvoiceNumberAllocator::new(store.clone()));
        Self::with_allocator(store, allocator)
    }

    /// Build a service sharing an allocator (and its lock) with other services
    pub fn with_allocator(
        store: Arc<dyn BillingStore>,
        allocator: Arc<InvoiceNumberAllocator>,
    ) -> Self {
        Self {
            penalties: PenaltyCalculator::new(store.clone()),
            store,
            allocator,
        }
    }

    pub fn allocator(&self) -> &Arc<InvoiceNumberAllocator> {
        &self.allocator
    }

    /// Generate (or preview) invoices for a tenant and period
    pub async fn generate_invoices(
        &self,
        request: &InvoiceGenerationRequest,
    ) -> BillingResult<InvoiceGenerationResult> {
        self.generate_invoices_at(request, OffsetDateTime::now_utc())
            .await
    }

    pub async fn generate_invoices_at(
        &self,
        request: &InvoiceGenerationRequest,
        now: OffsetDateTime,
    ) -> BillingResult<InvoiceGenerationResult> {
        let tenant_id = request.tenant_id;
        let policy = self.load_policy(tenant_id).await;

        let usages = self
            .store
            .usage_records(tenant_id, request.period, &request.customer_ids)
            .await?;
        if usages.is_empty() {
            return Err(BillingError::NoUsageRecords {
                tenant_id,
                period: request.period,
            });
        }

        // Numbers carry the month the invoices are issued in
        let issue_period = UsagePeriod::from_date(now.date());
        let numbers = if request.dry_run {
            self.allocator
                .preview(tenant_id, issue_period, usages.len())
                .await?
        } else {
            self.allocator
                .allocate(tenant_id, issue_period, usages.len())
                .await?
        };

        let mut result = InvoiceGenerationResult::new(request.period, request.dry_run);

        for (usage, number) in usages.iter().zip(numbers) {
            let invoice = match self.build_invoice(usage, number, &policy, now).await {
                Ok(invoice) => invoice,
                Err(RecordError::Skipped(message)) => {
                    result.skipped += 1;
                    result.errors.push(message);
                    continue;
                }
                Err(RecordError::Failed(message)) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        customer_id = %usage.customer_id,
                        period = %request.period,
                        error = %message,
                        "Invoice generation failed for customer"
                    );
                    result.failed += 1;
                    result.errors.push(message);
                    continue;
                }
            };

            if !request.dry_run {
                if let Err(e) = self.store.create_invoice(&invoice).await {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        customer_id = %usage.customer_id,
                        invoice_number = %invoice.invoice_number,
                        error = %e,
                        "Failed to persist invoice"
                    );
                    result.failed += 1;
                    result.errors.push(format!(
                        "Failed to create invoice for customer {}: {}",
                        usage.customer_id, e
                    ));
                    continue;
                }
            }

            result.success += 1;
            result.total_amount += invoice.total_amount;
            result.invoices.push(invoice);
        }

        tracing::info!(
            tenant_id = %tenant_id,
            period = %request.period,
            dry_run = request.dry_run,
            success = result.success,
            skipped = result.skipped,
            failed = result.failed,
            total_amount = %result.total_amount,
            "Invoice generation finished"
        );

        Ok(result)
    }

    /// Tenant penalty settings, falling back to platform defaults
    async fn load_policy(&self, tenant_id: Uuid) -> PenaltyPolicy {
        match self.store.penalty_policy(tenant_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => PenaltyPolicy::default(),
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Failed to load tenant penalty settings, using defaults"
                );
                PenaltyPolicy::default()
            }
        }
    }

    async fn build_invoice(
        &self,
        usage: &UsageRecord,
        number: InvoiceNumber,
        policy: &PenaltyPolicy,
        now: OffsetDateTime,
    ) -> Result<Invoice, RecordError> {
        let tenant_id = usage.tenant_id;
        let customer_id = usage.customer_id;

        let exists = self
            .store
            .invoice_exists(tenant_id, customer_id, usage.usage_month, InvoiceKind::Monthly)
            .await
            .map_err(|e| {
                RecordError::Failed(format!(
                    "Failed to check existing invoice for customer {}: {}",
                    customer_id, e
                ))
            })?;
        if exists {
            return Err(RecordError::Skipped(format!(
                "Invoice already exists for customer {}",
                customer_id
            )));
        }

        let customer = self
            .store
            .find_customer(tenant_id, customer_id)
            .await
            .map_err(|e| {
                RecordError::Failed(format!("Failed to load customer {}: {}", customer_id, e))
            })?
            .ok_or_else(|| RecordError::Failed(format!("Customer not found: {}", customer_id)))?;

        let subscription = self
            .store
            .find_subscription_type(tenant_id, customer.subscription_id)
            .await
            .map_err(|e| {
                RecordError::Failed(format!(
                    "Failed to load subscription type for customer {}: {}",
                    customer_id, e
                ))
            })?
            .ok_or_else(|| {
                RecordError::Failed(format!(
                    "Subscription type not found for customer: {}",
                    customer_id
                ))
            })?;

        if usage.usage_m3 < Decimal::ZERO || usage.amount_calculated < Decimal::ZERO {
            return Err(RecordError::Failed(format!(
                "Invalid usage data for customer: {}",
                customer_id
            )));
        }

        let price_per_m3 = if usage.usage_m3 > Decimal::ZERO {
            usage
                .amount_calculated
                .checked_div(usage.usage_m3)
                .map(|price| price.round_dp(2))
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let usage_charge = usage.amount_calculated;
        let base_fee = subscription.monthly_fee;

        let penalty_amount = self
            .penalties
            .penalty_at(tenant_id, customer_id, policy, now)
            .await
            .map_err(|e| {
                RecordError::Failed(format!(
                    "Failed to calculate penalty for customer {}: {}",
                    customer_id, e
                ))
            })?;

        let due_date = now
            .checked_add(Duration::days(i64::from(policy.invoice_due_days)))
            .ok_or_else(|| {
                RecordError::Failed(format!("Invalid due date for customer: {}", customer_id))
            })?;

        let invalid_total =
            || RecordError::Failed(format!("Invalid total amount for customer: {}", customer_id));
        let subtotal = usage_charge.checked_add(base_fee).ok_or_else(invalid_total)?;
        let total_amount = subtotal.checked_add(penalty_amount).ok_or_else(invalid_total)?;
        if total_amount <= Decimal::ZERO || total_amount > Decimal::from(MAX_INVOICE_TOTAL) {
            return Err(invalid_total());
        }

        Ok(Invoice {
            id: Uuid::new_v4(),
            invoice_number: number.to_string(),
            tenant_id,
            customer_id,
            usage_month: usage.usage_month,
            usage_m3: usage.usage_m3,
            price_per_m3,
            base_fee,
            usage_charge,
            penalty_amount,
            subtotal,
            total_amount,
            total_paid: Decimal::ZERO,
            payment_status: InvoiceStatus::Unpaid,
            is_paid: false,
            due_date: Some(due_date),
            paid_date: None,
            kind: InvoiceKind::Monthly,
            notes: format!("Auto-generated invoice for {}", usage.usage_month),
            created_at: now,
        })
    }
}
