//! Integration tests for monthly invoice generation
//!
//! Drives the generation engine end to end against the in-memory store.
//!
//! ## Test Coverage
//! - Idempotent re-runs and sequence gaps left by skipped records
//! - Dry runs versus persisted runs
//! - Per-record failures that do not abort the batch
//! - Upfront failures (no usage data, numbering lookup)
//! - Penalty carry-over and tenant settings
//! - Concurrent runs for the same tenant

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tirta_billing::{
    BillingError, InMemoryBillingStore, InvoiceGenerationRequest, InvoiceGenerationService,
};
use tirta_shared::{
    Customer, Invoice, InvoiceKind, InvoiceStatus, PenaltyPolicy, SubscriptionType, UsagePeriod,
    UsageRecord,
};
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

/// Generation instant used by most tests: invoices are issued in 2025-02
fn issued_at() -> OffsetDateTime {
    datetime!(2025-02-01 00:00 UTC)
}

fn january() -> UsagePeriod {
    "2025-01".parse().unwrap()
}

struct Fixture {
    store: Arc<InMemoryBillingStore>,
    service: InvoiceGenerationService,
    tenant_id: Uuid,
    subscription_id: Uuid,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let tenant_id = Uuid::new_v4();
        let subscription_id = Uuid::new_v4();
        store.insert_subscription_type(SubscriptionType {
            id: subscription_id,
            tenant_id,
            name: "Rumah Tangga".to_string(),
            monthly_fee: dec!(10000),
        });

        Self {
            service: InvoiceGenerationService::new(store.clone()),
            store,
            tenant_id,
            subscription_id,
        }
    }

    fn customer_with_subscription(&self, subscription_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.store.insert_customer(Customer {
            id,
            tenant_id: self.tenant_id,
            customer_code: format!("C-{}", &id.simple().to_string()[..6]),
            name: "Pelanggan".to_string(),
            subscription_id,
        });
        id
    }

    fn customer(&self) -> Uuid {
        self.customer_with_subscription(self.subscription_id)
    }

    fn usage(&self, customer_id: Uuid, period: UsagePeriod, usage_m3: Decimal, amount: Decimal) {
        self.store.insert_usage(UsageRecord {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            customer_id,
            usage_month: period,
            usage_m3,
            amount_calculated: amount,
        });
    }

    /// Customer with a standard 10 m3 / 50000 usage in January
    fn billed_customer(&self) -> Uuid {
        let id = self.customer();
        self.usage(id, january(), dec!(10), dec!(50000));
        id
    }

    fn existing_invoice(
        &self,
        customer_id: Uuid,
        number: &str,
        period: UsagePeriod,
        total: Decimal,
        status: InvoiceStatus,
        due: OffsetDateTime,
    ) {
        self.store.insert_invoice(Invoice {
            id: Uuid::new_v4(),
            invoice_number: number.to_string(),
            tenant_id: self.tenant_id,
            customer_id,
            usage_month: period,
            usage_m3: dec!(10),
            price_per_m3: dec!(5000),
            base_fee: dec!(10000),
            usage_charge: total - dec!(10000),
            penalty_amount: Decimal::ZERO,
            subtotal: total,
            total_amount: total,
            total_paid: Decimal::ZERO,
            payment_status: status,
            is_paid: status.is_paid(),
            due_date: Some(due),
            paid_date: None,
            kind: InvoiceKind::Monthly,
            notes: String::new(),
            created_at: due - Duration::days(14),
        });
    }

    fn invoice_numbers(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self
            .store
            .invoices(self.tenant_id)
            .into_iter()
            .map(|i| i.invoice_number)
            .collect();
        numbers.sort();
        numbers
    }

    async fn run(&self, request: InvoiceGenerationRequest) -> tirta_billing::InvoiceGenerationResult {
        self.service
            .generate_invoices_at(&request, issued_at())
            .await
            .unwrap()
    }
}

// ============================================================================
// Idempotency and numbering
// ============================================================================

#[tokio::test]
async fn test_existing_invoice_is_skipped_and_leaves_a_gap() {
    let fx = Fixture::new();
    let first = fx.billed_customer();
    let second = fx.billed_customer();
    let third = fx.billed_customer();
    fx.existing_invoice(
        second,
        "INV-202501-0001",
        january(),
        dec!(60000),
        InvoiceStatus::Unpaid,
        datetime!(2025-02-14 00:00 UTC),
    );

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;

    assert_eq!(result.success, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(
        result.errors,
        vec![format!("Invoice already exists for customer {}", second)]
    );

    // The skipped record consumed INV-202502-0002 without persisting it
    let numbers: Vec<_> = result.invoices.iter().map(|i| i.invoice_number.as_str()).collect();
    assert_eq!(numbers, vec!["INV-202502-0001", "INV-202502-0003"]);
    assert_eq!(result.invoices[0].customer_id, first);
    assert_eq!(result.invoices[1].customer_id, third);
    assert!(fx.store.invoice_by_number(fx.tenant_id, "INV-202502-0002").is_none());
    assert!(fx.store.invoice_by_number(fx.tenant_id, "INV-202502-0003").is_some());
}

#[tokio::test]
async fn test_invoice_amounts() {
    let fx = Fixture::new();
    let customer_id = fx.customer();
    fx.usage(customer_id, january(), dec!(3), dec!(10000));

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(result.success, 1);

    let invoice = &result.invoices[0];
    assert_eq!(invoice.usage_m3, dec!(3));
    assert_eq!(invoice.price_per_m3, dec!(3333.33));
    assert_eq!(invoice.usage_charge, dec!(10000));
    assert_eq!(invoice.base_fee, dec!(10000));
    assert_eq!(invoice.penalty_amount, dec!(0));
    assert_eq!(invoice.subtotal, dec!(20000));
    assert_eq!(invoice.total_amount, dec!(20000));
    assert_eq!(invoice.total_paid, dec!(0));
    assert_eq!(invoice.payment_status, InvoiceStatus::Unpaid);
    assert!(!invoice.is_paid);
    assert_eq!(invoice.kind, InvoiceKind::Monthly);
    assert_eq!(invoice.usage_month, january());
    assert_eq!(invoice.due_date, Some(datetime!(2025-02-15 00:00 UTC)));
    assert_eq!(invoice.notes, "Auto-generated invoice for 2025-01");
    assert_eq!(result.total_amount, dec!(20000));
}

#[tokio::test]
async fn test_zero_usage_bills_only_the_base_fee() {
    let fx = Fixture::new();
    let customer_id = fx.customer();
    fx.usage(customer_id, january(), dec!(0), dec!(0));

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(result.success, 1);
    assert_eq!(result.invoices[0].price_per_m3, dec!(0));
    assert_eq!(result.invoices[0].total_amount, dec!(10000));
}

#[tokio::test]
async fn test_second_run_is_a_full_skip() {
    let fx = Fixture::new();
    for _ in 0..3 {
        fx.billed_customer();
    }

    let first = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(first.success, 3);
    let persisted = fx.invoice_numbers();

    let second = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(second.success, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.failed, 0);
    assert!(second.invoices.is_empty());
    assert_eq!(second.total_amount, dec!(0));
    assert_eq!(fx.invoice_numbers(), persisted);

    // A preview after the real run sees the same skips
    let preview = fx.run(InvoiceGenerationRequest::preview(fx.tenant_id, january())).await;
    assert_eq!(preview.skipped, 3);
    assert_eq!(preview.success, 0);
}

#[tokio::test]
async fn test_numbering_continues_within_the_issue_month() {
    let fx = Fixture::new();
    fx.billed_customer();
    fx.store.seed_invoice_number(fx.tenant_id, "INV-202502-0041");
    // Numbers issued in other months do not affect this run
    fx.store.seed_invoice_number(fx.tenant_id, "INV-202501-0900");

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(result.invoices[0].invoice_number, "INV-202502-0042");
}

// ============================================================================
// Dry runs
// ============================================================================

#[tokio::test]
async fn test_dry_run_matches_real_run_without_persisting() {
    let fx = Fixture::new();
    let debtor = fx.billed_customer();
    fx.billed_customer();
    let skipped = fx.billed_customer();
    let orphan = Uuid::new_v4();
    fx.usage(orphan, january(), dec!(5), dec!(25000));
    fx.existing_invoice(
        skipped,
        "INV-202501-0001",
        january(),
        dec!(60000),
        InvoiceStatus::Paid,
        datetime!(2025-01-15 00:00 UTC),
    );
    fx.existing_invoice(
        debtor,
        "INV-202412-0001",
        "2024-12".parse().unwrap(),
        dec!(100000),
        InvoiceStatus::Overdue,
        datetime!(2025-01-10 00:00 UTC),
    );
    let before = fx.invoice_numbers();

    let preview = fx.run(InvoiceGenerationRequest::preview(fx.tenant_id, january())).await;
    assert!(preview.preview_only);
    assert_eq!(fx.invoice_numbers(), before);

    let real = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert!(!real.preview_only);

    assert_eq!(
        (preview.success, preview.skipped, preview.failed),
        (real.success, real.skipped, real.failed)
    );
    assert_eq!((real.success, real.skipped, real.failed), (2, 1, 1));
    assert_eq!(preview.total_amount, real.total_amount);
    assert_eq!(preview.errors, real.errors);

    let amounts = |r: &tirta_billing::InvoiceGenerationResult| {
        r.invoices
            .iter()
            .map(|i| (i.customer_id, i.invoice_number.clone(), i.penalty_amount, i.total_amount))
            .collect::<Vec<_>>()
    };
    assert_eq!(amounts(&preview), amounts(&real));
    assert_eq!(fx.invoice_numbers().len(), before.len() + 2);
}

#[tokio::test]
async fn test_preview_summary() {
    let fx = Fixture::new();
    let debtor = fx.billed_customer();
    let other = fx.customer();
    fx.usage(other, january(), dec!(4.5), dec!(22500));
    fx.existing_invoice(
        debtor,
        "INV-202412-0001",
        "2024-12".parse().unwrap(),
        dec!(100000),
        InvoiceStatus::Unpaid,
        datetime!(2025-01-10 00:00 UTC),
    );

    let preview = fx.run(InvoiceGenerationRequest::preview(fx.tenant_id, january())).await;
    let summary = preview.summary();
    assert_eq!(summary.total_customers, 2);
    assert_eq!(summary.total_usage_m3, dec!(14.5));
    assert_eq!(summary.total_penalty, dec!(2000));
    // (50000 + 10000 + 2000) + (22500 + 10000)
    assert_eq!(summary.total_amount, dec!(94500));
    assert_eq!(summary.period_month, january());
}

// ============================================================================
// Per-record failures
// ============================================================================

#[tokio::test]
async fn test_bad_records_fail_without_aborting_the_batch() {
    let fx = Fixture::new();

    let good = fx.billed_customer();

    let missing_customer = Uuid::new_v4();
    fx.usage(missing_customer, january(), dec!(10), dec!(50000));

    let missing_subscription = fx.customer_with_subscription(Uuid::new_v4());
    fx.usage(missing_subscription, january(), dec!(10), dec!(50000));

    let negative = fx.customer();
    fx.usage(negative, january(), dec!(-1), dec!(50000));

    let free_tier = Uuid::new_v4();
    fx.store.insert_subscription_type(SubscriptionType {
        id: free_tier,
        tenant_id: fx.tenant_id,
        name: "Sosial".to_string(),
        monthly_fee: dec!(0),
    });
    let zero_total = fx.customer_with_subscription(free_tier);
    fx.usage(zero_total, january(), dec!(0), dec!(0));

    let too_large = fx.customer();
    fx.usage(too_large, january(), dec!(1000), dec!(999999999));

    let rejected = fx.billed_customer();
    fx.store.fail_invoice_inserts_for(rejected);

    let last = fx.billed_customer();

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;

    assert_eq!(result.success, 2);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.failed, 6);
    assert_eq!(result.total_amount, dec!(120000));
    let billed: Vec<Uuid> = result.invoices.iter().map(|i| i.customer_id).collect();
    assert_eq!(billed, vec![good, last]);

    let expected = [
        format!("Customer not found: {}", missing_customer),
        format!("Subscription type not found for customer: {}", missing_subscription),
        format!("Invalid usage data for customer: {}", negative),
        format!("Invalid total amount for customer: {}", zero_total),
        format!("Invalid total amount for customer: {}", too_large),
        format!("Failed to create invoice for customer {}", rejected),
    ];
    assert_eq!(result.errors.len(), expected.len());
    for (message, prefix) in result.errors.iter().zip(expected.iter()) {
        assert!(message.starts_with(prefix.as_str()), "{:?} vs {:?}", message, prefix);
    }

    // The record after the failures kept its positional number
    assert_eq!(result.invoices[1].invoice_number, "INV-202502-0008");
    assert_eq!(fx.store.invoices(fx.tenant_id).len(), 2);
}

// ============================================================================
// Upfront failures
// ============================================================================

#[tokio::test]
async fn test_no_usage_records_is_an_error() {
    let fx = Fixture::new();
    fx.customer();

    let err = fx
        .service
        .generate_invoices_at(&InvoiceGenerationRequest::new(fx.tenant_id, january()), issued_at())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NoUsageRecords { tenant_id, .. } if tenant_id == fx.tenant_id));
}

#[tokio::test]
async fn test_customer_filter_without_usage_is_an_error() {
    let fx = Fixture::new();
    fx.billed_customer();

    let request =
        InvoiceGenerationRequest::new(fx.tenant_id, january()).for_customers(vec![Uuid::new_v4()]);
    let err = fx
        .service
        .generate_invoices_at(&request, issued_at())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NoUsageRecords { .. }));
}

#[tokio::test]
async fn test_numbering_failure_aborts_the_run() {
    let fx = Fixture::new();
    fx.billed_customer();
    fx.store.fail_number_lookups(true);

    let err = fx
        .service
        .generate_invoices_at(&InvoiceGenerationRequest::new(fx.tenant_id, january()), issued_at())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Numbering(_)));
    assert!(fx.store.invoices(fx.tenant_id).is_empty());
}

// ============================================================================
// Penalties and tenant settings
// ============================================================================

#[tokio::test]
async fn test_penalty_is_carried_onto_the_next_invoice() {
    let fx = Fixture::new();
    let customer_id = fx.billed_customer();
    fx.existing_invoice(
        customer_id,
        "INV-202411-0001",
        "2024-11".parse().unwrap(),
        dec!(100000),
        InvoiceStatus::Overdue,
        datetime!(2024-12-15 00:00 UTC),
    );
    fx.existing_invoice(
        customer_id,
        "INV-202412-0001",
        "2024-12".parse().unwrap(),
        dec!(50000),
        InvoiceStatus::Unpaid,
        datetime!(2025-01-15 00:00 UTC),
    );
    // Still inside the grace period on 2025-02-01
    fx.existing_invoice(
        customer_id,
        "INV-202501-0009",
        "2024-10".parse().unwrap(),
        dec!(70000),
        InvoiceStatus::Unpaid,
        datetime!(2025-01-30 00:00 UTC),
    );

    let result = fx
        .run(InvoiceGenerationRequest::new(fx.tenant_id, january()).for_customers(vec![customer_id]))
        .await;

    let invoice = &result.invoices[0];
    assert_eq!(invoice.penalty_amount, dec!(3000));
    assert_eq!(invoice.subtotal, dec!(60000));
    assert_eq!(invoice.total_amount, dec!(63000));
}

#[tokio::test]
async fn test_tenant_settings_override_defaults() {
    let fx = Fixture::new();
    let customer_id = fx.billed_customer();
    fx.store.set_penalty_policy(
        fx.tenant_id,
        PenaltyPolicy {
            late_penalty_percent: dec!(5),
            late_penalty_max_cap: dec!(4000),
            grace_period_days: 0,
            invoice_due_days: 30,
        },
    );
    fx.existing_invoice(
        customer_id,
        "INV-202412-0001",
        "2024-12".parse().unwrap(),
        dec!(100000),
        InvoiceStatus::Unpaid,
        datetime!(2025-01-31 00:00 UTC),
    );

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    let invoice = &result.invoices[0];
    assert_eq!(invoice.penalty_amount, dec!(4000));
    assert_eq!(invoice.due_date, Some(issued_at() + Duration::days(30)));
}

#[tokio::test]
async fn test_out_of_range_settings_fail_records_instead_of_panicking() {
    let fx = Fixture::new();
    let first = fx.billed_customer();
    let second = fx.billed_customer();
    fx.store.set_penalty_policy(
        fx.tenant_id,
        PenaltyPolicy {
            grace_period_days: i32::MAX,
            invoice_due_days: i32::MAX,
            ..PenaltyPolicy::default()
        },
    );

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(result.success, 0);
    assert_eq!(result.failed, 2);
    assert_eq!(
        result.errors,
        vec![
            format!("Invalid due date for customer: {}", first),
            format!("Invalid due date for customer: {}", second),
        ]
    );
    assert!(fx.store.invoices(fx.tenant_id).is_empty());
}

#[tokio::test]
async fn test_customer_lookup_error_keeps_the_store_message() {
    let fx = Fixture::new();
    let broken = fx.billed_customer();
    let healthy = fx.billed_customer();
    fx.store.fail_customer_lookups_for(broken);

    let result = fx.run(InvoiceGenerationRequest::new(fx.tenant_id, january())).await;
    assert_eq!(result.success, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.invoices[0].customer_id, healthy);
    assert_eq!(
        result.errors,
        vec![format!(
            "Failed to load customer {}: Database error: customer lookup failed",
            broken
        )]
    );
}

// ============================================================================
// Filters and concurrency
// ============================================================================

#[tokio::test]
async fn test_customer_filter() {
    let fx = Fixture::new();
    fx.billed_customer();
    let wanted = fx.billed_customer();
    fx.billed_customer();

    let result = fx
        .run(InvoiceGenerationRequest::new(fx.tenant_id, january()).for_customers(vec![wanted]))
        .await;
    assert_eq!(result.success, 1);
    assert_eq!(result.invoices[0].customer_id, wanted);
    assert_eq!(result.invoices[0].invoice_number, "INV-202502-0001");
}

#[tokio::test]
async fn test_concurrent_runs_persist_unique_numbers() {
    let fx = Fixture::new();
    let december: UsagePeriod = "2024-12".parse().unwrap();
    for _ in 0..10 {
        let customer_id = fx.billed_customer();
        fx.usage(customer_id, december, dec!(8), dec!(40000));
    }

    let jan_request = InvoiceGenerationRequest::new(fx.tenant_id, january());
    let dec_request = InvoiceGenerationRequest::new(fx.tenant_id, december);
    let (jan, dec) = tokio::join!(
        fx.service.generate_invoices_at(&jan_request, issued_at()),
        fx.service.generate_invoices_at(&dec_request, issued_at()),
    );
    let (jan, dec) = (jan.unwrap(), dec.unwrap());
    assert_eq!(jan.success + dec.success, 20);
    assert_eq!(jan.failed + dec.failed, 0);

    let numbers = fx.invoice_numbers();
    let expected: Vec<String> = (1..=20).map(|seq| format!("INV-202502-{:04}", seq)).collect();
    assert_eq!(numbers, expected);
}
