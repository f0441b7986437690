use std::sync::Arc;
use std::time::Duration;

use entitlements::billing::{
    run_reconciliation_tick, spawn_reconciliation_scheduler, HttpBillingClient,
    PgSubscriptionStore, Reconciler, ReconcilerConfig,
};
use entitlements::config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let reconciler_config = ReconcilerConfig::from_env();
    let client = HttpBillingClient::new(
        config::BILLING_API_BASE_URL.as_str(),
        config::BILLING_API_TOKEN.clone(),
        reconciler_config.fetch_timeout,
    )?;
    let reconciler = Reconciler::new(
        Arc::new(PgSubscriptionStore::new(pool)),
        Arc::new(client),
        reconciler_config,
    );
    tracing::info!(
        concurrency = reconciler.config().effective_concurrency(),
        fetch_timeout = ?reconciler.config().fetch_timeout,
        deadline = ?reconciler.config().batch_deadline,
        "billing reconciliation configured"
    );

    if *config::RECONCILE_RUN_ONCE {
        let summary = run_reconciliation_tick(&reconciler).await?;
        tracing::info!(?summary, "single reconciliation run finished");
        return Ok(());
    }

    let interval = Duration::from_secs(*config::RECONCILE_INTERVAL_SECS);
    let scheduler = spawn_reconciliation_scheduler(reconciler, interval);
    tracing::info!(?interval, "billing reconciliation scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down billing reconciliation scheduler");
    scheduler.abort();

    Ok(())
}
