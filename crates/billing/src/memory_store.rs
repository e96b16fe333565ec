//! In-memory billing store (for testing and local development)
//!
//! Enforces the same uniqueness rules as the Postgres schema and exposes a
//! few fault switches so callers can exercise failure paths.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tirta_shared::{
    Customer, GenerationRun, Invoice, InvoiceKind, InvoiceStatus, PenaltyPolicy,
    SubscriptionType, Tenant, TenantStatus, UsagePeriod, UsageRecord,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

#[derive(Default)]
struct State {
    tenants: Vec<Tenant>,
    policies: Vec<(Uuid, PenaltyPolicy)>,
    customers: Vec<Customer>,
    subscription_types: Vec<SubscriptionType>,
    usages: Vec<UsageRecord>,
    invoices: Vec<Invoice>,
    runs: Vec<GenerationRun>,
}

#[derive(Default)]
struct Faults {
    number_lookups: bool,
    tenant_listing: bool,
    customer_lookups: HashSet<Uuid>,
    invoice_inserts: HashSet<Uuid>,
    overdue_updates: HashSet<Uuid>,
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    state: RwLock<State>,
    faults: RwLock<Faults>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.state.write().tenants.push(tenant);
    }

    pub fn set_penalty_policy(&self, tenant_id: Uuid, policy: PenaltyPolicy) {
        let mut state = self.state.write();
        state.policies.retain(|(id, _)| *id != tenant_id);
        state.policies.push((tenant_id, policy));
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.state.write().customers.push(customer);
    }

    pub fn insert_subscription_type(&self, subscription_type: SubscriptionType) {
        self.state.write().subscription_types.push(subscription_type);
    }

    pub fn insert_usage(&self, usage: UsageRecord) {
        self.state.write().usages.push(usage);
    }

    /// Insert an invoice directly, bypassing uniqueness checks
    pub fn insert_invoice(&self, invoice: Invoice) {
        self.state.write().invoices.push(invoice);
    }

    /// Insert a paid registration invoice that only occupies `invoice_number`
    pub fn seed_invoice_number(&self, tenant_id: Uuid, invoice_number: &str) {
        let now = OffsetDateTime::now_utc();
        self.insert_invoice(Invoice {
            id: Uuid::new_v4(),
            invoice_number: invoice_number.to_string(),
            tenant_id,
            customer_id: Uuid::new_v4(),
            usage_month: UsagePeriod::from_date(now.date()),
            usage_m3: Decimal::ZERO,
            price_per_m3: Decimal::ZERO,
            base_fee: Decimal::ZERO,
            usage_charge: Decimal::ZERO,
            penalty_amount: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            payment_status: InvoiceStatus::Paid,
            is_paid: true,
            due_date: None,
            paid_date: Some(now),
            kind: InvoiceKind::Registration,
            notes: String::new(),
            created_at: now,
        });
    }

    pub fn invoices(&self, tenant_id: Uuid) -> Vec<Invoice> {
        self.state
            .read()
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn invoice_by_number(&self, tenant_id: Uuid, invoice_number: &str) -> Option<Invoice> {
        self.state
            .read()
            .invoices
            .iter()
            .find(|i| i.tenant_id == tenant_id && i.invoice_number == invoice_number)
            .cloned()
    }

    pub fn fail_number_lookups(&self, fail: bool) {
        self.faults.write().number_lookups = fail;
    }

    pub fn fail_tenant_listing(&self, fail: bool) {
        self.faults.write().tenant_listing = fail;
    }

    pub fn fail_customer_lookups_for(&self, customer_id: Uuid) {
        self.faults.write().customer_lookups.insert(customer_id);
    }

    pub fn fail_invoice_inserts_for(&self, customer_id: Uuid) {
        self.faults.write().invoice_inserts.insert(customer_id);
    }

    pub fn fail_overdue_updates_for(&self, tenant_id: Uuid) {
        self.faults.write().overdue_updates.insert(tenant_id);
    }
}

fn sequence_key(invoice_number: &str) -> (usize, &str) {
    (invoice_number.len(), invoice_number)
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn highest_invoice_number(
        &self,
        tenant_id: Uuid,
        prefix: &str,
    ) -> BillingResult<Option<String>> {
        if self.faults.read().number_lookups {
            return Err(BillingError::Database("invoice number lookup failed".to_string()));
        }

        Ok(self
            .state
            .read()
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id && i.invoice_number.starts_with(prefix))
            .map(|i| i.invoice_number.as_str())
            .max_by(|a, b| sequence_key(a).cmp(&sequence_key(b)))
            .map(str::to_string))
    }

    async fn invoice_exists(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period: UsagePeriod,
        kind: InvoiceKind,
    ) -> BillingResult<bool> {
        Ok(self.state.read().invoices.iter().any(|i| {
            i.tenant_id == tenant_id
                && i.customer_id == customer_id
                && i.usage_month == period
                && i.kind == kind
        }))
    }

    async fn find_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<Customer>> {
        if self.faults.read().customer_lookups.contains(&customer_id) {
            return Err(BillingError::Database("customer lookup failed".to_string()));
        }

        Ok(self
            .state
            .read()
            .customers
            .iter()
            .find(|c| c.id == customer_id && c.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_subscription_type(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<Option<SubscriptionType>> {
        Ok(self
            .state
            .read()
            .subscription_types
            .iter()
            .find(|s| s.id == subscription_id && s.tenant_id == tenant_id)
            .cloned())
    }

    async fn usage_records(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        customer_ids: &[Uuid],
    ) -> BillingResult<Vec<UsageRecord>> {
        Ok(self
            .state
            .read()
            .usages
            .iter()
            .filter(|u| u.tenant_id == tenant_id && u.usage_month == period)
            .filter(|u| customer_ids.is_empty() || customer_ids.contains(&u.customer_id))
            .cloned()
            .collect())
    }

    async fn unpaid_invoices_due_before(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Invoice>> {
        Ok(self
            .state
            .read()
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id && i.customer_id == customer_id)
            .filter(|i| !i.payment_status.is_paid())
            .filter(|i| i.due_date.is_some_and(|due| due < cutoff))
            .cloned()
            .collect())
    }

    async fn penalty_policy(&self, tenant_id: Uuid) -> BillingResult<Option<PenaltyPolicy>> {
        Ok(self
            .state
            .read()
            .policies
            .iter()
            .find(|(id, _)| *id == tenant_id)
            .map(|(_, policy)| policy.clone()))
    }

    async fn create_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        if self.faults.read().invoice_inserts.contains(&invoice.customer_id) {
            return Err(BillingError::Database(format!(
                "insert rejected for customer {}",
                invoice.customer_id
            )));
        }

        let mut state = self.state.write();

        let duplicate_number = state.invoices.iter().any(|i| {
            i.tenant_id == invoice.tenant_id && i.invoice_number == invoice.invoice_number
        });
        if duplicate_number {
            return Err(BillingError::AlreadyExists(format!(
                "invoice number {}",
                invoice.invoice_number
            )));
        }

        let duplicate_period = invoice.kind == InvoiceKind::Monthly
            && state.invoices.iter().any(|i| {
                i.kind == InvoiceKind::Monthly
                    && i.tenant_id == invoice.tenant_id
                    && i.customer_id == invoice.customer_id
                    && i.usage_month == invoice.usage_month
            });
        if duplicate_period {
            return Err(BillingError::AlreadyExists(format!(
                "monthly invoice for customer {} in {}",
                invoice.customer_id, invoice.usage_month
            )));
        }

        state.invoices.push(invoice.clone());
        Ok(())
    }

    async fn mark_overdue(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<u64> {
        if self.faults.read().overdue_updates.contains(&tenant_id) {
            return Err(BillingError::Database(format!(
                "overdue update failed for tenant {}",
                tenant_id
            )));
        }

        let mut updated = 0;
        for invoice in self
            .state
            .write()
            .invoices
            .iter_mut()
            .filter(|i| i.tenant_id == tenant_id && i.is_overdue_at(now))
        {
            invoice.payment_status = InvoiceStatus::Overdue;
            updated += 1;
        }
        Ok(updated)
    }

    async fn record_generation_run(&self, run: &GenerationRun) -> BillingResult<()> {
        self.state.write().runs.push(run.clone());
        Ok(())
    }

    async fn generation_runs(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<GenerationRun>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state
            .read()
            .runs
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn tenants_by_status(&self, status: TenantStatus) -> BillingResult<Vec<Tenant>> {
        if self.faults.read().tenant_listing {
            return Err(BillingError::Database("tenant listing failed".to_string()));
        }

        Ok(self
            .state
            .read()
            .tenants
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }
}
