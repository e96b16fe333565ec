//! Postgres-backed billing store

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use tirta_shared::{
    Customer, GenerationRun, Invoice, InvoiceKind, InvoiceStatus, PenaltyPolicy, RunStatus,
    SubscriptionType, Tenant, TenantStatus, TriggerType, UsagePeriod, UsageRecord,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_period(value: &str) -> BillingResult<UsagePeriod> {
    value
        .parse()
        .map_err(|e| BillingError::Database(format!("Corrupt usage_month {:?}: {}", value, e)))
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: Uuid,
    tenant_id: Uuid,
    customer_id: Uuid,
    usage_month: String,
    usage_m3: Decimal,
    amount_calculated: Decimal,
}

impl TryFrom<UsageRow> for UsageRecord {
    type Error = BillingError;

    fn try_from(row: UsageRow) -> BillingResult<Self> {
        Ok(UsageRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            customer_id: row.customer_id,
            usage_month: parse_period(&row.usage_month)?,
            usage_m3: row.usage_m3,
            amount_calculated: row.amount_calculated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    tenant_id: Uuid,
    customer_id: Uuid,
    usage_month: String,
    usage_m3: Decimal,
    price_per_m3: Decimal,
    base_fee: Decimal,
    usage_charge: Decimal,
    penalty_amount: Decimal,
    subtotal: Decimal,
    total_amount: Decimal,
    total_paid: Decimal,
    payment_status: InvoiceStatus,
    is_paid: bool,
    due_date: Option<OffsetDateTime>,
    paid_date: Option<OffsetDateTime>,
    #[sqlx(rename = "type")]
    kind: InvoiceKind,
    notes: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> BillingResult<Self> {
        Ok(Invoice {
            id: row.id,
            invoice_number: row.invoice_number,
            tenant_id: row.tenant_id,
            customer_id: row.customer_id,
            usage_month: parse_period(&row.usage_month)?,
            usage_m3: row.usage_m3,
            price_per_m3: row.price_per_m3,
            base_fee: row.base_fee,
            usage_charge: row.usage_charge,
            penalty_amount: row.penalty_amount,
            subtotal: row.subtotal,
            total_amount: row.total_amount,
            total_paid: row.total_paid,
            payment_status: row.payment_status,
            is_paid: row.is_paid,
            due_date: row.due_date,
            paid_date: row.paid_date,
            kind: row.kind,
            notes: row.notes.unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GenerationRunRow {
    id: Uuid,
    tenant_id: Uuid,
    generated_for: String,
    generated_at: OffsetDateTime,
    success_count: i32,
    skipped_count: i32,
    failed_count: i32,
    status: RunStatus,
    error_message: Option<String>,
    execution_time_ms: i64,
    trigger_type: TriggerType,
    triggered_by: Option<Uuid>,
}

impl TryFrom<GenerationRunRow> for GenerationRun {
    type Error = BillingError;

    fn try_from(row: GenerationRunRow) -> BillingResult<Self> {
        Ok(GenerationRun {
            id: row.id,
            tenant_id: row.tenant_id,
            generated_for: parse_period(&row.generated_for)?,
            generated_at: row.generated_at,
            success_count: row.success_count,
            skipped_count: row.skipped_count,
            failed_count: row.failed_count,
            status: row.status,
            error_message: row.error_message,
            execution_time_ms: row.execution_time_ms,
            trigger_type: row.trigger_type,
            triggered_by: row.triggered_by,
        })
    }
}

const INVOICE_COLUMNS: &str = r#"
    id, invoice_number, tenant_id, customer_id, usage_month, usage_m3,
    price_per_m3, base_fee, usage_charge, penalty_amount, subtotal,
    total_amount, total_paid, payment_status, is_paid, due_date, paid_date,
    type, notes, created_at
"#;

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn highest_invoice_number(
        &self,
        tenant_id: Uuid,
        prefix: &str,
    ) -> BillingResult<Option<String>> {
        // Length first so that 5-digit sequences sort above 4-digit ones
        let number: Option<String> = sqlx::query_scalar(
            r#"
            SELECT invoice_number
            FROM invoices
            WHERE tenant_id = $1 AND invoice_number LIKE $2
            ORDER BY LENGTH(invoice_number) DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(format!("{}%", prefix))
        .fetch_optional(&self.pool)
        .await?;

        Ok(number)
    }

    async fn invoice_exists(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        period: UsagePeriod,
        kind: InvoiceKind,
    ) -> BillingResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM invoices
                WHERE tenant_id = $1 AND customer_id = $2 AND usage_month = $3 AND type = $4
            )
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(period.to_string())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<Customer>> {
        let customer: Option<Customer> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, customer_code, name, subscription_id
            FROM customers
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(customer_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn find_subscription_type(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<Option<SubscriptionType>> {
        let subscription: Option<SubscriptionType> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, monthly_fee
            FROM subscription_types
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(subscription_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn usage_records(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        customer_ids: &[Uuid],
    ) -> BillingResult<Vec<UsageRecord>> {
        let rows: Vec<UsageRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, customer_id, usage_month, usage_m3, amount_calculated
            FROM water_usages
            WHERE tenant_id = $1
              AND usage_month = $2
              AND (cardinality($3::uuid[]) = 0 OR customer_id = ANY($3))
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(period.to_string())
        .bind(customer_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UsageRecord::try_from).collect()
    }

    async fn unpaid_invoices_due_before(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE tenant_id = $1
              AND customer_id = $2
              AND payment_status <> 'PAID'
              AND due_date < $3
            ORDER BY due_date ASC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn penalty_policy(&self, tenant_id: Uuid) -> BillingResult<Option<PenaltyPolicy>> {
        let policy: Option<PenaltyPolicy> = sqlx::query_as(
            r#"
            SELECT late_penalty_percent, late_penalty_max_cap, grace_period_days, invoice_due_days
            FROM tenant_settings
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(policy)
    }

    async fn create_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, tenant_id, customer_id, usage_month, usage_m3,
                price_per_m3, base_fee, usage_charge, penalty_amount, subtotal,
                total_amount, total_paid, payment_status, is_paid, due_date, paid_date,
                type, notes, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $20
            )
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.invoice_number)
        .bind(invoice.tenant_id)
        .bind(invoice.customer_id)
        .bind(invoice.usage_month.to_string())
        .bind(invoice.usage_m3)
        .bind(invoice.price_per_m3)
        .bind(invoice.base_fee)
        .bind(invoice.usage_charge)
        .bind(invoice.penalty_amount)
        .bind(invoice.subtotal)
        .bind(invoice.total_amount)
        .bind(invoice.total_paid)
        .bind(invoice.payment_status)
        .bind(invoice.is_paid)
        .bind(invoice.due_date)
        .bind(invoice.paid_date)
        .bind(invoice.kind)
        .bind(&invoice.notes)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_overdue(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET payment_status = 'OVERDUE', updated_at = $2
            WHERE tenant_id = $1
              AND payment_status = 'UNPAID'
              AND due_date < $2
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_generation_run(&self, run: &GenerationRun) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoice_generation_history (
                id, tenant_id, generated_for, generated_at, success_count,
                skipped_count, failed_count, status, error_message,
                execution_time_ms, trigger_type, triggered_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(run.tenant_id)
        .bind(run.generated_for.to_string())
        .bind(run.generated_at)
        .bind(run.success_count)
        .bind(run.skipped_count)
        .bind(run.failed_count)
        .bind(run.status)
        .bind(&run.error_message)
        .bind(run.execution_time_ms)
        .bind(run.trigger_type)
        .bind(run.triggered_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn generation_runs(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<GenerationRun>> {
        let rows: Vec<GenerationRunRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, generated_for, generated_at, success_count,
                   skipped_count, failed_count, status, error_message,
                   execution_time_ms, trigger_type, triggered_by
            FROM invoice_generation_history
            WHERE tenant_id = $1
            ORDER BY generated_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GenerationRun::try_from).collect()
    }

    async fn tenants_by_status(&self, status: TenantStatus) -> BillingResult<Vec<Tenant>> {
        let tenants: Vec<Tenant> = sqlx::query_as(
            r#"
            SELECT id, name, village_code, status, created_at
            FROM tenants
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }
}
