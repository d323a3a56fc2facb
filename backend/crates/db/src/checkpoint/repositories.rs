use async_trait::async_trait;
use ferry_common::error::FerryResult;
use ferry_common::types::SyncKey;
use uuid::Uuid;

use crate::checkpoint::models::Checkpoint;

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Insert or overwrite the checkpoint for its key.
    async fn save(&self, checkpoint: &Checkpoint) -> FerryResult<()>;

    /// Load the checkpoint for `key`. Expired checkpoints are reported as absent.
    async fn load(&self, key: &SyncKey) -> FerryResult<Option<Checkpoint>>;

    async fn clear(&self, key: &SyncKey) -> FerryResult<()>;

    /// All live checkpoints of a tenant, newest first.
    async fn list_for_tenant(&self, tenant_id: Uuid) -> FerryResult<Vec<Checkpoint>>;

    /// Delete expired checkpoints. Returns how many were removed.
    async fn purge_expired(&self) -> FerryResult<u64>;
}
