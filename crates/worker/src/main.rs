//! Helpdesk maintenance worker
//!
//! Runs scheduled jobs against the shared database:
//! - conversation retention cleanup on `CLEANUP_CRON`
//! - hourly purge of expired refresh tokens

use helpdesk_api::{
    auth::RefreshTokenStore,
    maintenance::{CleanupOutcome, CleanupService, PgRetentionStore},
    system_log::{self, event, level},
    Config,
};
use helpdesk_shared::db::create_pool;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REFRESH_TOKEN_PURGE_CRON: &str = "0 15 * * * *";

async fn run_cleanup(pool: &PgPool, service: &CleanupService<PgRetentionStore>) {
    match service.trigger().await {
        Ok(CleanupOutcome::Disabled) => {
            info!("Retention cleanup skipped: retention not configured");
        }
        Ok(CleanupOutcome::Completed {
            retention_days,
            deleted,
            batches,
            duration_ms,
            ..
        }) => {
            info!(
                retention_days,
                deleted, batches, duration_ms, "Scheduled retention cleanup finished"
            );
            system_log::record(
                pool,
                level::INFO,
                event::CLEANUP_COMPLETED,
                None,
                json!({ "deleted": deleted, "batches": batches, "source": "scheduled" }),
            )
            .await;
        }
        Ok(outcome @ CleanupOutcome::DryRun { .. }) => {
            // trigger never yields a dry run
            error!(?outcome, "Unexpected cleanup outcome");
        }
        Err(e) => {
            error!(error = %e, "Scheduled retention cleanup failed");
        }
    }
}

async fn purge_refresh_tokens(store: &RefreshTokenStore) {
    match store.purge_expired().await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "Purged expired refresh tokens"),
        Err(e) => error!(error = %e, "Failed to purge expired refresh tokens"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("helpdesk_worker=info,helpdesk_api=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url, 2).await?;

    let cleanup = Arc::new(CleanupService::new(
        PgRetentionStore::new(pool.clone()),
        config.conversation_retention_days,
        config.cleanup_batch_size,
    ));
    let refresh_tokens = RefreshTokenStore::new(pool.clone(), config.refresh_token_expiry_days);

    let scheduler = JobScheduler::new().await?;

    {
        let pool = pool.clone();
        let cleanup = Arc::clone(&cleanup);
        scheduler
            .add(Job::new_async(config.cleanup_cron.as_str(), move |_id, _scheduler| {
                let pool = pool.clone();
                let cleanup = Arc::clone(&cleanup);
                Box::pin(async move { run_cleanup(&pool, &cleanup).await })
            })?)
            .await?;
    }

    scheduler
        .add(Job::new_async(REFRESH_TOKEN_PURGE_CRON, move |_id, _scheduler| {
            let refresh_tokens = refresh_tokens.clone();
            Box::pin(async move { purge_refresh_tokens(&refresh_tokens).await })
        })?)
        .await?;

    scheduler.start().await?;
    info!(
        cleanup_cron = %config.cleanup_cron,
        retention_days = ?config.conversation_retention_days,
        batch_size = config.cleanup_batch_size,
        "Maintenance worker started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down maintenance worker");

    Ok(())
}
