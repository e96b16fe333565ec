//! Invoice Generation History
//!
//! Every generation run (scheduled or manual) leaves one audit record per
//! tenant:
//! - the target period and outcome counts
//! - the error text when the run failed upfront
//! - who or what triggered it and how long it took
//!
//! Records are append-only.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tirta_shared::{GenerationRun, RunStatus, TriggerType, UsagePeriod};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::generation::InvoiceGenerationResult;
use crate::store::BillingStore;

/// Default number of runs returned by [`GenerationHistoryService::recent_runs`]
pub const DEFAULT_HISTORY_LIMIT: i64 = 12;

/// Build the audit record for a finished run
///
/// A failed run records zero counts and the error text.
pub fn build_generation_run(
    tenant_id: Uuid,
    period: UsagePeriod,
    outcome: Result<&InvoiceGenerationResult, &BillingError>,
    trigger_type: TriggerType,
    triggered_by: Option<Uuid>,
    elapsed: Duration,
    generated_at: OffsetDateTime,
) -> GenerationRun {
    let execution_time_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

    let (success_count, skipped_count, failed_count, status, error_message) = match outcome {
        Ok(result) => (
            count(result.success),
            count(result.skipped),
            count(result.failed),
            RunStatus::Success,
            None,
        ),
        Err(e) => (0, 0, 0, RunStatus::Failed, Some(e.to_string())),
    };

    GenerationRun {
        id: Uuid::new_v4(),
        tenant_id,
        generated_for: period,
        generated_at,
        success_count,
        skipped_count,
        failed_count,
        status,
        error_message,
        execution_time_ms,
        trigger_type,
        triggered_by,
    }
}

fn count(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Records and lists generation runs
#[derive(Clone)]
pub struct GenerationHistoryService {
    store: Arc<dyn BillingStore>,
}

impl GenerationHistoryService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Persist a run record
    pub async fn record(&self, run: &GenerationRun) -> BillingResult<()> {
        self.store.record_generation_run(run).await?;

        tracing::info!(
            tenant_id = %run.tenant_id,
            period = %run.generated_for,
            status = ?run.status,
            trigger = %run.trigger_type,
            success = run.success_count,
            skipped = run.skipped_count,
            failed = run.failed_count,
            execution_time_ms = run.execution_time_ms,
            "Recorded invoice generation run"
        );

        Ok(())
    }

    /// Most recent runs of a tenant, newest first
    pub async fn recent_runs(
        &self,
        tenant_id: Uuid,
        limit: Option<i64>,
    ) -> BillingResult<Vec<GenerationRun>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 100);
        self.store.generation_runs(tenant_id, limit).await
    }
}
