//! Invoice scheduler
//!
//! Two cron jobs drive billing for every active tenant:
//! - monthly generation for the previous calendar month
//! - a daily pass that flags past-due invoices as overdue
//!
//! Tenants are processed one at a time. A failure for one tenant is logged
//! and the job moves on. Each job type has its own guard: a firing that finds
//! the previous run of the same job still active is skipped.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;
use tirta_billing::{
    build_generation_run, BillingResult, BillingStore, GenerationHistoryService,
    InvoiceGenerationRequest, InvoiceGenerationResult, InvoiceGenerationService,
    OverdueStatusUpdater,
};
use tirta_shared::{TenantStatus, TriggerType, UsagePeriod};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

/// Outcome of one monthly generation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRunSummary {
    pub period: UsagePeriod,
    pub tenants: usize,
    pub tenants_failed: usize,
    pub invoices_created: u32,
    pub invoices_skipped: u32,
    pub invoices_failed: u32,
}

impl MonthlyRunSummary {
    fn new(period: UsagePeriod) -> Self {
        Self {
            period,
            tenants: 0,
            tenants_failed: 0,
            invoices_created: 0,
            invoices_skipped: 0,
            invoices_failed: 0,
        }
    }
}

/// Outcome of one overdue pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverdueRunSummary {
    pub tenants: usize,
    pub tenants_failed: usize,
    pub invoices_marked: u64,
}

/// The work behind the scheduled jobs and the manual trigger
pub struct InvoiceJobs {
    store: Arc<dyn BillingStore>,
    engine: InvoiceGenerationService,
    overdue: OverdueStatusUpdater,
    history: GenerationHistoryService,
    monthly_guard: Mutex<()>,
    overdue_guard: Mutex<()>,
}

impl InvoiceJobs {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            engine: InvoiceGenerationService::new(store.clone()),
            overdue: OverdueStatusUpdater::new(store.clone()),
            history: GenerationHistoryService::new(store.clone()),
            monthly_guard: Mutex::new(()),
            overdue_guard: Mutex::new(()),
            store,
        }
    }

    pub fn history(&self) -> &GenerationHistoryService {
        &self.history
    }

    /// Generate last month's invoices for every active tenant
    ///
    /// Returns `None` when the previous monthly run is still in progress.
    pub async fn run_monthly_generation(&self) -> Option<MonthlyRunSummary> {
        self.run_monthly_generation_at(OffsetDateTime::now_utc())
            .await
    }

    pub async fn run_monthly_generation_at(
        &self,
        now: OffsetDateTime,
    ) -> Option<MonthlyRunSummary> {
        let Ok(_guard) = self.monthly_guard.try_lock() else {
            warn!("Monthly invoice generation still running, skipping this firing");
            return None;
        };

        let period = UsagePeriod::from_date(now.date()).previous();
        let mut summary = MonthlyRunSummary::new(period);
        info!(period = %period, "Starting monthly invoice generation");

        let tenants = match self.store.tenants_by_status(TenantStatus::Active).await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "Failed to load active tenants for invoice generation");
                return Some(summary);
            }
        };
        summary.tenants = tenants.len();

        for tenant in tenants {
            match self
                .generate_for_tenant(tenant.id, period, TriggerType::Scheduled, None, now)
                .await
            {
                Ok(result) => {
                    summary.invoices_created += result.success;
                    summary.invoices_skipped += result.skipped;
                    summary.invoices_failed += result.failed;
                }
                Err(e) => {
                    error!(
                        tenant_id = %tenant.id,
                        tenant = %tenant.name,
                        period = %period,
                        error = %e,
                        "Invoice generation failed for tenant"
                    );
                    summary.tenants_failed += 1;
                }
            }
        }

        info!(
            period = %period,
            tenants = summary.tenants,
            tenants_failed = summary.tenants_failed,
            created = summary.invoices_created,
            skipped = summary.invoices_skipped,
            failed = summary.invoices_failed,
            "Monthly invoice generation completed"
        );

        Some(summary)
    }

    /// Flag past-due invoices of every active tenant as overdue
    ///
    /// Returns `None` when the previous overdue pass is still in progress.
    pub async fn update_overdue_invoices(&self) -> Option<OverdueRunSummary> {
        self.update_overdue_invoices_at(OffsetDateTime::now_utc())
            .await
    }

    pub async fn update_overdue_invoices_at(
        &self,
        now: OffsetDateTime,
    ) -> Option<OverdueRunSummary> {
        let Ok(_guard) = self.overdue_guard.try_lock() else {
            warn!("Overdue invoice update still running, skipping this firing");
            return None;
        };

        let mut summary = OverdueRunSummary::default();

        let tenants = match self.store.tenants_by_status(TenantStatus::Active).await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "Failed to load active tenants for overdue update");
                return Some(summary);
            }
        };
        summary.tenants = tenants.len();

        for tenant in tenants {
            match self.overdue.update_overdue_invoices_at(tenant.id, now).await {
                Ok(updated) => summary.invoices_marked += updated,
                Err(e) => {
                    error!(
                        tenant_id = %tenant.id,
                        tenant = %tenant.name,
                        error = %e,
                        "Failed to update overdue invoices for tenant"
                    );
                    summary.tenants_failed += 1;
                }
            }
        }

        info!(
            tenants = summary.tenants,
            tenants_failed = summary.tenants_failed,
            invoices_marked = summary.invoices_marked,
            "Overdue invoice update completed"
        );

        Some(summary)
    }

    /// Operator-triggered generation for one tenant and period
    pub async fn run_manual_generation(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        triggered_by: Option<Uuid>,
    ) -> BillingResult<InvoiceGenerationResult> {
        self.run_manual_generation_at(tenant_id, period, triggered_by, OffsetDateTime::now_utc())
            .await
    }

    pub async fn run_manual_generation_at(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        triggered_by: Option<Uuid>,
        now: OffsetDateTime,
    ) -> BillingResult<InvoiceGenerationResult> {
        info!(
            tenant_id = %tenant_id,
            period = %period,
            triggered_by = ?triggered_by,
            "Manual invoice generation requested"
        );
        self.generate_for_tenant(tenant_id, period, TriggerType::Manual, triggered_by, now)
            .await
    }

    /// Compute the invoices a run would create without persisting them or
    /// recording history
    pub async fn preview_generation(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        customer_ids: Vec<Uuid>,
    ) -> BillingResult<InvoiceGenerationResult> {
        let request = InvoiceGenerationRequest::preview(tenant_id, period).for_customers(customer_ids);
        self.engine.generate_invoices(&request).await
    }

    async fn generate_for_tenant(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        trigger: TriggerType,
        triggered_by: Option<Uuid>,
        now: OffsetDateTime,
    ) -> BillingResult<InvoiceGenerationResult> {
        let started = Instant::now();
        let request = InvoiceGenerationRequest::new(tenant_id, period);
        let outcome = self.engine.generate_invoices_at(&request, now).await;

        let run = build_generation_run(
            tenant_id,
            period,
            outcome.as_ref(),
            trigger,
            triggered_by,
            started.elapsed(),
            now,
        );
        if let Err(e) = self.history.record(&run).await {
            error!(
                tenant_id = %tenant_id,
                period = %period,
                error = %e,
                "Failed to record invoice generation history"
            );
        }

        outcome
    }
}

/// Cron driver for [`InvoiceJobs`] with an explicit start/stop lifecycle
pub struct InvoiceScheduler {
    jobs: Arc<InvoiceJobs>,
    monthly_cron: String,
    overdue_cron: String,
    scheduler: Option<JobScheduler>,
}

impl InvoiceScheduler {
    pub fn new(
        jobs: Arc<InvoiceJobs>,
        monthly_cron: impl Into<String>,
        overdue_cron: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            monthly_cron: monthly_cron.into(),
            overdue_cron: overdue_cron.into(),
            scheduler: None,
        }
    }

    pub fn jobs(&self) -> &Arc<InvoiceJobs> {
        &self.jobs
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Register both jobs and start firing them
    pub async fn start(&mut self) -> WorkerResult<()> {
        if self.scheduler.is_some() {
            warn!("Invoice scheduler already started");
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| WorkerError::Scheduler(format!("{:?}", e)))?;

        let jobs = self.jobs.clone();
        let monthly = Job::new_async(self.monthly_cron.as_str(), move |_uuid, _lock| {
            let jobs = jobs.clone();
            Box::pin(async move {
                jobs.run_monthly_generation().await;
            })
        })
        .map_err(|e| WorkerError::Scheduler(format!("monthly job: {:?}", e)))?;

        let jobs = self.jobs.clone();
        let overdue = Job::new_async(self.overdue_cron.as_str(), move |_uuid, _lock| {
            let jobs = jobs.clone();
            Box::pin(async move {
                jobs.update_overdue_invoices().await;
            })
        })
        .map_err(|e| WorkerError::Scheduler(format!("overdue job: {:?}", e)))?;

        scheduler
            .add(monthly)
            .await
            .map_err(|e| WorkerError::Scheduler(format!("{:?}", e)))?;
        scheduler
            .add(overdue)
            .await
            .map_err(|e| WorkerError::Scheduler(format!("{:?}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| WorkerError::Scheduler(format!("{:?}", e)))?;

        info!(
            monthly_cron = %self.monthly_cron,
            overdue_cron = %self.overdue_cron,
            "Invoice scheduler started"
        );

        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Stop firing jobs; a run already in progress finishes on its own
    pub async fn stop(&mut self) -> WorkerResult<()> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| WorkerError::Scheduler(format!("{:?}", e)))?;
            info!("Invoice scheduler stopped");
        }
        Ok(())
    }
}
