//! Trigger surface: runs syncs for one or many tenants.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ferry_common::error::FerryResult;
use ferry_common::types::{RecordCategory, SyncClass, SyncKey};
use ferry_config::SyncConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ledger::ReplayOutcome;
use crate::orchestrator::{Stores, SyncOrchestrator, SyncRunResult};
use crate::source::PageSource;
use crate::status::{StatusFeed, SyncStatus};

type ActiveSet = Arc<Mutex<HashSet<(Uuid, SyncClass)>>>;

#[derive(Clone)]
pub struct SyncEngine {
    orchestrator: Arc<SyncOrchestrator>,
    stores: Stores,
    limiter: Arc<Semaphore>,
    active: ActiveSet,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(stores: Stores, source: Arc<dyn PageSource>, config: SyncConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_tenants.max(1)));
        let orchestrator = SyncOrchestrator::new(&stores, source, StatusFeed::new(), config);
        Self {
            orchestrator: Arc::new(orchestrator),
            stores,
            limiter,
            active: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by every run started from this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_full(&self, tenant_id: Uuid) -> SyncRunResult {
        self.run(tenant_id, SyncClass::Full).await
    }

    pub async fn run_incremental(&self, tenant_id: Uuid) -> SyncRunResult {
        self.run(tenant_id, SyncClass::Incremental).await
    }

    pub async fn run_manual(&self, tenant_id: Uuid) -> SyncRunResult {
        self.run(tenant_id, SyncClass::Manual).await
    }

    pub async fn run(&self, tenant_id: Uuid, sync_class: SyncClass) -> SyncRunResult {
        let Some(_guard) = ActiveGuard::claim(&self.active, tenant_id, sync_class) else {
            tracing::info!(
                tenant_id = %tenant_id,
                sync_class = %sync_class,
                "sync already in progress in this process, skipping"
            );
            return SyncRunResult {
                tenant_id,
                sync_class: Some(sync_class),
                skipped: true,
                ..SyncRunResult::default()
            };
        };

        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return SyncRunResult {
                    tenant_id,
                    sync_class: Some(sync_class),
                    aborted_reason: Some("concurrency limiter closed".to_string()),
                    ..SyncRunResult::default()
                };
            }
        };

        self.orchestrator.run(tenant_id, sync_class, &self.cancel).await
    }

    /// Run `sync_class` for every tenant, at most `max_concurrent_tenants`
    /// at a time. Results come back in input order.
    pub async fn run_all(&self, sync_class: SyncClass, tenants: &[Uuid]) -> Vec<SyncRunResult> {
        let mut set = JoinSet::new();
        for (idx, &tenant_id) in tenants.iter().enumerate() {
            let engine = self.clone();
            set.spawn(async move { (idx, engine.run(tenant_id, sync_class).await) });
        }

        let mut results = Vec::with_capacity(tenants.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => tracing::error!(error = %e, "sync task panicked"),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Tenants with an enabled connection, the default scope of `run_all`.
    pub async fn enabled_tenants(&self) -> FerryResult<Vec<Uuid>> {
        self.stores.connections.list_enabled_tenants().await
    }

    pub async fn replay_failed_batches(
        &self,
        tenant_id: Uuid,
        sync_class: SyncClass,
        category: RecordCategory,
    ) -> FerryResult<ReplayOutcome> {
        let Some(_guard) = ActiveGuard::claim(&self.active, tenant_id, sync_class) else {
            tracing::info!(
                tenant_id = %tenant_id,
                sync_class = %sync_class,
                "sync in progress in this process, skipping replay"
            );
            return Ok(ReplayOutcome {
                skipped: true,
                ..ReplayOutcome::default()
            });
        };
        let key = SyncKey::new(tenant_id, sync_class, category);
        self.orchestrator.replay_failed_batches(&key).await
    }

    /// Live status, or a coarse one rebuilt from the newest surviving
    /// checkpoint when no run has published in this process.
    pub async fn status(&self, tenant_id: Uuid) -> Option<SyncStatus> {
        if let Some(status) = self.orchestrator.feed().get_status(tenant_id) {
            return Some(status);
        }
        self.orchestrator
            .checkpoints()
            .list_for_tenant(tenant_id)
            .await
            .iter()
            .max_by_key(|cp| cp.updated_at)
            .map(SyncStatus::from_checkpoint)
    }

    pub async fn purge_expired_checkpoints(&self) -> u64 {
        self.orchestrator.checkpoints().purge_expired().await
    }
}

/// Marks (tenant, class) busy for the lifetime of the guard.
struct ActiveGuard {
    active: ActiveSet,
    key: (Uuid, SyncClass),
}

impl ActiveGuard {
    fn claim(active: &ActiveSet, tenant_id: Uuid, sync_class: SyncClass) -> Option<Self> {
        let key = (tenant_id, sync_class);
        let inserted = active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key);
        inserted.then(|| Self {
            active: active.clone(),
            key,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.key);
    }
}
