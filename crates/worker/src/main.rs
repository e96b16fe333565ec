//! Tirta worker binary
//!
//! Runs the invoice scheduler until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tirta_billing::{BillingStore, PgBillingStore};
use tirta_shared::{create_pool, run_migrations};
use tirta_worker::{InvoiceJobs, InvoiceScheduler, LogFormat, WorkerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tirta_worker=info,tirta_billing=info,info".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;
    init_tracing(config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tirta worker");

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;

    if config.run_migrations {
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool.clone()));
    let jobs = Arc::new(InvoiceJobs::new(store));
    let mut scheduler = InvoiceScheduler::new(
        jobs,
        config.monthly_generation_cron.clone(),
        config.overdue_update_cron.clone(),
    );

    if config.enable_invoice_scheduler {
        scheduler.start().await?;
    } else {
        info!("Invoice scheduler disabled (ENABLE_INVOICE_SCHEDULER=false)");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler.stop().await?;
    pool.close().await;

    info!("Tirta worker stopped");
    Ok(())
}
