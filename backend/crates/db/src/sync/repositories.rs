use async_trait::async_trait;
use chrono::Duration;
use ferry_common::types::SyncClass;
use uuid::Uuid;

use crate::sync::models::SyncLock;
use ferry_common::error::FerryResult;

/// Lifecycle of the per tenant+class run lock.
///
/// Every call after `acquire` is scoped to the `run_id` the acquire handed
/// out. Once another process takes a stale lock over, the old holder's
/// calls match nothing and return `false` / `None`.
#[async_trait]
pub trait SyncLockRepository: Send + Sync {
    /// Get or create the lock row for a given tenant+class pair.
    async fn get_or_create(&self, tenant_id: Uuid, sync_class: SyncClass) -> FerryResult<SyncLock>;

    /// Atomically set status to 'running' with a fresh `run_id` unless another
    /// run holds it. A 'running' row untouched for longer than `stale_after`
    /// is taken over. Returns `None` if the lock is held.
    async fn acquire(
        &self,
        tenant_id: Uuid,
        sync_class: SyncClass,
        stale_after: Duration,
    ) -> FerryResult<Option<SyncLock>>;

    /// Refresh `updated_at` so a live run is not mistaken for a stale one.
    /// Returns `false` if `lock` no longer owns the row.
    async fn heartbeat(&self, lock: &SyncLock) -> FerryResult<bool>;

    /// Mark a run as completed, stamping last_completed_at.
    async fn mark_completed(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>>;

    /// Mark a run as failed with an error message.
    async fn mark_failed(&self, lock: &SyncLock, error_message: &str) -> FerryResult<Option<SyncLock>>;

    /// Return the lock to 'idle' without touching last_completed_at.
    async fn release(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>>;
}
