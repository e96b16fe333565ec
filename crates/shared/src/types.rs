//! Common types used across the Tirta platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::PlatformError;

// =============================================================================
// Usage Period
// =============================================================================

/// A billing month, written `YYYY-MM`
///
/// Scopes usage lookups and duplicate detection for monthly invoices. The
/// compact `YYYYMM` form is embedded in invoice numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsagePeriod {
    year: i32,
    month: u8,
}

impl UsagePeriod {
    pub const MIN_YEAR: i32 = 1;
    pub const MAX_YEAR: i32 = 9999;

    pub fn new(year: i32, month: u8) -> Result<Self, PlatformError> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(PlatformError::Validation(format!(
                "Year out of range: {}",
                year
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(PlatformError::Validation(format!(
                "Month out of range: {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given calendar date
    pub fn from_date(date: Date) -> Self {
        Self {
            year: date.year().clamp(Self::MIN_YEAR, Self::MAX_YEAR),
            month: u8::from(date.month()),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// The calendar month before this one (January rolls back a year)
    /// The earliest representable period is its own predecessor.
    pub fn previous(&self) -> Self {
        match (self.year, self.month) {
            (Self::MIN_YEAR, 1) => *self,
            (year, 1) => Self { year: year - 1, month: 12 },
            (year, month) => Self { year, month: month - 1 },
        }
    }

    /// `YYYYMM`, as used inside invoice numbers
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl std::fmt::Display for UsagePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for UsagePeriod {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::Validation(format!("Invalid period (expected YYYY-MM): {}", s));

        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        let (year, month) = (&s[..4], &s[5..]);
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for UsagePeriod {
    type Error = PlatformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsagePeriod> for String {
    fn from(period: UsagePeriod) -> Self {
        period.to_string()
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Payment status of a customer invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self::Unpaid
    }
}

impl InvoiceStatus {
    /// Check if a move to `next` is a legal lifecycle step
    /// Paid is terminal; partial payments are never flagged overdue.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        match self {
            Self::Unpaid => matches!(next, Self::Partial | Self::Paid | Self::Overdue),
            Self::Partial => matches!(next, Self::Paid),
            Self::Overdue => matches!(next, Self::Partial | Self::Paid),
            Self::Paid => false,
        }
    }

    pub fn transition_to(self, next: InvoiceStatus) -> Result<InvoiceStatus, PlatformError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PlatformError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether the daily overdue pass may flag this invoice
    pub fn can_become_overdue(&self) -> bool {
        matches!(self, Self::Unpaid)
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Paid => write!(f, "PAID"),
            Self::Overdue => write!(f, "OVERDUE"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNPAID" => Ok(Self::Unpaid),
            "PARTIAL" => Ok(Self::Partial),
            "PAID" => Ok(Self::Paid),
            "OVERDUE" => Ok(Self::Overdue),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

/// Invoice origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceKind {
    /// One-off connection fee charged when a customer registers
    Registration,
    /// Periodic water usage invoice
    Monthly,
}

impl std::fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Tenant lifecycle status
///
/// Registration starts a trial; a subscription payment moves the tenant
/// through verification into `Active`. Only active tenants are billed by the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Trial,
    PendingPayment,
    PendingVerification,
    Active,
    Suspended,
    Expired,
    Inactive,
}

impl Default for TenantStatus {
    fn default() -> Self {
        Self::Trial
    }
}

impl TenantStatus {
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        match self {
            Self::Trial => matches!(
                next,
                Self::PendingPayment | Self::Expired | Self::Suspended | Self::Inactive
            ),
            Self::PendingPayment => {
                matches!(next, Self::PendingVerification | Self::Expired | Self::Inactive)
            }
            // Rejected payment proofs send the tenant back to PendingPayment
            Self::PendingVerification => {
                matches!(next, Self::Active | Self::PendingPayment | Self::Inactive)
            }
            Self::Active => matches!(next, Self::Suspended | Self::Expired | Self::Inactive),
            Self::Suspended => matches!(next, Self::Active | Self::Inactive),
            Self::Expired => matches!(next, Self::PendingPayment | Self::Inactive),
            Self::Inactive => false,
        }
    }

    pub fn transition_to(self, next: TenantStatus) -> Result<TenantStatus, PlatformError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PlatformError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether scheduled billing jobs run for this tenant
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trial => write!(f, "TRIAL"),
            Self::PendingPayment => write!(f, "PENDING_PAYMENT"),
            Self::PendingVerification => write!(f, "PENDING_VERIFICATION"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Verification state of a tenant's subscription payment proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPaymentStatus {
    Pending,
    Verified,
    Rejected,
}

impl Default for SubscriptionPaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SubscriptionPaymentStatus {
    /// Verification is one-shot: only pending submissions can be decided
    pub fn can_transition_to(&self, next: SubscriptionPaymentStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Verified | Self::Rejected),
            Self::Verified | Self::Rejected => false,
        }
    }

    pub fn transition_to(
        self,
        next: SubscriptionPaymentStatus,
    ) -> Result<SubscriptionPaymentStatus, PlatformError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PlatformError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Tenant status implied by a verification decision
    pub fn tenant_status(&self) -> Option<TenantStatus> {
        match self {
            Self::Pending => None,
            Self::Verified => Some(TenantStatus::Active),
            Self::Rejected => Some(TenantStatus::PendingPayment),
        }
    }
}

impl std::fmt::Display for SubscriptionPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Outcome of one invoice generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// What started an invoice generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Tenant (water utility) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub village_code: String,
    pub status: TenantStatus,
    pub created_at: OffsetDateTime,
}

/// Late-payment settings of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PenaltyPolicy {
    /// Percentage of the outstanding amount charged per overdue invoice
    pub late_penalty_percent: Decimal,
    /// Upper bound of the penalty charged for a single overdue invoice
    pub late_penalty_max_cap: Decimal,
    pub grace_period_days: i32,
    pub invoice_due_days: i32,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self {
            late_penalty_percent: Decimal::from(2),
            late_penalty_max_cap: Decimal::from(100_000),
            grace_period_days: 3,
            invoice_due_days: 14,
        }
    }
}

/// Water customer of a tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_code: String,
    pub name: String,
    pub subscription_id: Uuid,
}

/// Pricing tier a customer subscribes to
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Fixed monthly fee added to every monthly invoice
    pub monthly_fee: Decimal,
}

/// Metered consumption of one customer in one month
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub usage_month: UsagePeriod,
    pub usage_m3: Decimal,
    /// Usage charge already priced by the tenant's water rates
    pub amount_calculated: Decimal,
}

/// Customer invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// `INV-YYYYMM-NNNN`, unique within the tenant
    pub invoice_number: String,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub usage_month: UsagePeriod,
    pub usage_m3: Decimal,
    pub price_per_m3: Decimal,
    pub base_fee: Decimal,
    pub usage_charge: Decimal,
    pub penalty_amount: Decimal,
    /// `usage_charge + base_fee`
    pub subtotal: Decimal,
    /// `subtotal + penalty_amount`
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub payment_status: InvoiceStatus,
    /// Mirrors `payment_status == PAID` for older readers
    pub is_paid: bool,
    pub due_date: Option<OffsetDateTime>,
    pub paid_date: Option<OffsetDateTime>,
    #[serde(rename = "type")]
    pub kind: InvoiceKind,
    pub notes: String,
    pub created_at: OffsetDateTime,
}

impl Invoice {
    /// Amount still owed (never negative)
    pub fn outstanding(&self) -> Decimal {
        (self.total_amount - self.total_paid).max(Decimal::ZERO)
    }

    /// Unpaid and past its due date
    pub fn is_overdue_at(&self, now: OffsetDateTime) -> bool {
        self.payment_status.can_become_overdue() && self.due_date.is_some_and(|due| due < now)
    }

    /// Record a payment against this invoice
    ///
    /// Moves the invoice to `PARTIAL` or `PAID`; a full payment also stamps
    /// `paid_date` and `is_paid`.
    pub fn apply_payment(
        &mut self,
        amount: Decimal,
        at: OffsetDateTime,
    ) -> Result<InvoiceStatus, PlatformError> {
        if amount <= Decimal::ZERO {
            return Err(PlatformError::Validation(format!(
                "Payment amount must be positive: {}",
                amount
            )));
        }

        if self.payment_status.is_paid() {
            return Err(PlatformError::InvalidTransition {
                from: self.payment_status.to_string(),
                to: InvoiceStatus::Paid.to_string(),
            });
        }

        let total_paid = self.total_paid + amount;
        let next = if total_paid >= self.total_amount {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        };

        if next != self.payment_status {
            self.payment_status.transition_to(next)?;
        }

        self.total_paid = total_paid;
        self.payment_status = next;
        if next.is_paid() {
            self.is_paid = true;
            self.paid_date = Some(at);
        }

        Ok(next)
    }
}

/// Audit record of one generation run for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub generated_for: UsagePeriod,
    pub generated_at: OffsetDateTime,
    pub success_count: i32,
    pub skipped_count: i32,
    pub failed_count: i32,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub trigger_type: TriggerType,
    /// Operator who started a manual run
    pub triggered_by: Option<Uuid>,
}
