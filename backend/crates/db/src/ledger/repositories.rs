use async_trait::async_trait;
use ferry_common::error::FerryResult;
use ferry_common::types::SyncKey;

use crate::ledger::models::FailedBatch;

#[async_trait]
pub trait FailedBatchRepository: Send + Sync {
    /// Append batches to the ledger entry for `key`, creating it if absent.
    async fn append(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()>;

    /// All batches recorded for `key`, oldest first. Empty when there is no entry.
    async fn load(&self, key: &SyncKey) -> FerryResult<Vec<FailedBatch>>;

    /// Overwrite the entry with `batches`; an empty slice deletes the entry.
    async fn replace(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()>;
}
