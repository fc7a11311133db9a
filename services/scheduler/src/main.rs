use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};

use tether_config::{init_tracing, AppConfig};
use tether_db::identity::pg_repository::{
    PgExternalIdentityRepository, PgIdentitySettingsRepository, PgLinkAuditRepository,
    PgLinkSuggestionRepository, PgOrgMemberRepository,
};
use tether_engine::LinkingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let config = AppConfig::from_env().context("failed to load config")?;
    tracing::info!(service = "tether-scheduler", "starting");

    let pool = tether_db::create_pool(&config.database_url)
        .await
        .context("failed to create database pool")?;
    tether_db::MIGRATOR
        .run(&pool)
        .await
        .context("failed to apply migrations")?;

    let service = LinkingService::new(
        Arc::new(PgExternalIdentityRepository::new(pool.clone())),
        Arc::new(PgLinkSuggestionRepository::new(pool.clone())),
        Arc::new(PgLinkAuditRepository::new(pool.clone())),
        Arc::new(PgOrgMemberRepository::new(pool.clone())),
        Arc::new(PgIdentitySettingsRepository::new(pool)),
    );

    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(config.sweep_interval_secs));
    tracing::info!(
        interval_secs = config.sweep_interval_secs,
        retention_days = config.audit_retention_days,
        "maintenance loop ready"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_maintenance(&service, config.audit_retention_days).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// One maintenance pass; failures are logged and retried next tick.
async fn run_maintenance(service: &LinkingService, retention_days: i64) {
    match service.expire_due_suggestions(Utc::now()).await {
        Ok(count) => tracing::debug!(count, "suggestion expiry sweep complete"),
        Err(e) => tracing::error!(error = %e, "suggestion expiry sweep failed"),
    }

    let cutoff = Utc::now() - Duration::days(retention_days);
    match service.prune_audit_log(cutoff).await {
        Ok(count) => tracing::debug!(count, "audit retention prune complete"),
        Err(e) => tracing::error!(error = %e, "audit retention prune failed"),
    }
}
