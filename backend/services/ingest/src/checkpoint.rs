use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_common::types::SyncKey;
use ferry_db::checkpoint::models::Checkpoint;
use ferry_db::checkpoint::repositories::CheckpointRepository;
use uuid::Uuid;

/// Resume-state store for the orchestrator.
///
/// Store failures are logged and swallowed: losing a checkpoint only costs
/// resumability, so it must never stop a run.
#[derive(Clone)]
pub struct CheckpointStore {
    repo: Arc<dyn CheckpointRepository>,
    ttl: chrono::Duration,
}

impl CheckpointStore {
    pub fn new(repo: Arc<dyn CheckpointRepository>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(7));
        Self { repo, ttl }
    }

    /// Persist `checkpoint`, stamping `updated_at` and a fresh expiry.
    pub async fn save(&self, checkpoint: &mut Checkpoint) {
        let now = Utc::now();
        checkpoint.updated_at = now;
        checkpoint.expires_at = now + self.ttl;
        if let Err(e) = self.repo.save(checkpoint).await {
            tracing::warn!(
                key = %checkpoint.key,
                page = checkpoint.page_index,
                error = %e,
                "failed to save checkpoint"
            );
        }
    }

    /// Load an unexpired checkpoint. `None` means start from page 1.
    pub async fn load(&self, key: &SyncKey) -> Option<Checkpoint> {
        match self.repo.load(key).await {
            Ok(cp) => cp.filter(|cp| !cp.is_expired(Utc::now())),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to load checkpoint, starting fresh");
                None
            }
        }
    }

    pub async fn clear(&self, key: &SyncKey) {
        if let Err(e) = self.repo.clear(key).await {
            tracing::warn!(key = %key, error = %e, "failed to clear checkpoint");
        }
    }

    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Vec<Checkpoint> {
        self.repo
            .list_for_tenant(tenant_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to list checkpoints");
                Vec::new()
            })
            .into_iter()
            .filter(|cp| !cp.is_expired(Utc::now()))
            .collect()
    }

    /// Delete expired checkpoints; returns how many went.
    pub async fn purge_expired(&self) -> u64 {
        match self.repo.purge_expired().await {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(purged = n, "purged expired checkpoints");
                }
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to purge expired checkpoints");
                0
            }
        }
    }

    /// A blank checkpoint for page 1.
    pub fn fresh(&self, key: SyncKey) -> Checkpoint {
        let now = Utc::now();
        Checkpoint {
            key,
            page_index: 1,
            cursor: None,
            items_persisted: 0,
            failed_pages: Vec::new(),
            updated_at: now,
            expires_at: now + self.ttl,
        }
    }
}
