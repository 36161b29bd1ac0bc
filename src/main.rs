//! Loyalty Core - reconciliation service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  Config  │───▶│ Postgres │───▶│  Scheduler   │───▶│ Accrual  │
//! │  (YAML)  │    │ (schema) │    │ (N workers)  │    │  oracle  │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! Runs the reconciliation loop until Ctrl-C. The HTTP surface that drives
//! order creation and withdrawals lives outside this binary.

use anyhow::Context;
use std::sync::Arc;

use loyalty_core::accrual::HttpAccrualClient;
use loyalty_core::config::AppConfig;
use loyalty_core::db::{Database, schema};
use loyalty_core::logging::init_logging;
use loyalty_core::order::OrderService;
use loyalty_core::scheduler::ReconciliationScheduler;
use loyalty_core::store::PgStore;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).context("Failed to load configuration")?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting loyalty core"
    );

    let db = Database::connect(&app_config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check()
        .await
        .context("PostgreSQL health check failed")?;
    schema::init_schema(db.pool())
        .await
        .context("Failed to initialize schema")?;

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let accrual = Arc::new(
        HttpAccrualClient::new(&app_config.accrual.base_url, app_config.accrual.timeout())
            .context("Failed to build accrual client")?,
    );
    tracing::info!(accrual = %accrual.base_url(), "Accrual system configured");

    let orders = Arc::new(OrderService::new(store, accrual));
    let scheduler = ReconciliationScheduler::start(
        orders,
        app_config.reconciliation.scheduler_config(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    db.pool().close().await;

    tracing::info!("Loyalty core stopped");
    Ok(())
}
