use std::sync::Arc;

use ferry_common::types::{ServiceInfo, SyncClass};
use ferry_config::{init_tracing, AppConfig, RunMode, ServiceConfig, SyncConfig};
use ferry_ingest::source::HttpPageSource;
use ferry_ingest::{Stores, SyncEngine, SyncRunResult};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let app = AppConfig::from_env().expect("invalid application configuration");
    init_tracing(&app.log_level);

    let info = ServiceInfo::new("ferry-ingest");
    tracing::info!(service = %info.name, version = %info.version, "starting");

    let sync_config = SyncConfig::from_env().expect("invalid sync configuration");
    let service = ServiceConfig::from_env().expect("invalid service configuration");

    let pool = ferry_db::create_pool(&app.database_url, app.db_max_connections)
        .await
        .expect("failed to connect to database");
    ferry_db::schema::ensure_schema(&pool)
        .await
        .expect("failed to bootstrap schema");

    let source = HttpPageSource::new(sync_config.http_timeout, sync_config.initial_backoff)
        .expect("failed to create http client");
    let categories = sync_config.categories.clone();
    let engine = SyncEngine::new(Stores::postgres(pool), Arc::new(source), sync_config);

    engine.purge_expired_checkpoints().await;

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, finishing in-flight work");
            cancel.cancel();
        }
    });

    match service.mode {
        RunMode::Replay => {
            let tenants = resolve_tenants(&engine, &service).await;
            for tenant_id in tenants {
                for class in SyncClass::ALL {
                    for &category in &categories {
                        match engine.replay_failed_batches(tenant_id, class, category).await {
                            Ok(outcome) if outcome.skipped => {
                                tracing::info!(
                                    tenant_id = %tenant_id,
                                    sync_class = %class,
                                    category = %category,
                                    "sync in progress, replay skipped"
                                );
                            }
                            Ok(outcome) if outcome.recovered + outcome.still_failing > 0 => {
                                tracing::info!(
                                    tenant_id = %tenant_id,
                                    sync_class = %class,
                                    category = %category,
                                    recovered = outcome.recovered,
                                    still_failing = outcome.still_failing,
                                    "replay finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(tenant_id = %tenant_id, error = %e, "replay failed");
                            }
                        }
                    }
                }
            }
        }
        RunMode::Sync(class) => {
            let cancel = engine.cancellation_token();
            loop {
                let tenants = resolve_tenants(&engine, &service).await;
                let results = engine.run_all(class, &tenants).await;
                summarize(class, &results);

                let Some(interval) = service.interval else {
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
    }

    tracing::info!("ingest service finished");
}

async fn resolve_tenants(engine: &SyncEngine, service: &ServiceConfig) -> Vec<Uuid> {
    if let Some(tenants) = &service.tenants {
        return tenants.clone();
    }
    match engine.enabled_tenants().await {
        Ok(tenants) => tenants,
        Err(e) => {
            tracing::error!(error = %e, "failed to list tenant connections");
            Vec::new()
        }
    }
}

fn summarize(class: SyncClass, results: &[SyncRunResult]) {
    let succeeded = results.iter().filter(|r| r.success).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    let items: u64 = results.iter().map(|r| r.total_items).sum();
    tracing::info!(
        sync_class = %class,
        tenants = results.len(),
        succeeded,
        skipped,
        failed = results.len() - succeeded - skipped,
        items,
        "sync round finished"
    );
}
