use async_trait::async_trait;
use ferry_common::error::FerryResult;
use ferry_common::types::RecordCategory;
use uuid::Uuid;

use crate::records::models::Record;

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Insert or overwrite `records` keyed by (tenant_id, source_id), all-or-nothing.
    /// Returns the number of rows written.
    async fn batch_upsert(&self, category: RecordCategory, records: &[Record]) -> FerryResult<u64>;

    /// Count stored records for a tenant in one category.
    async fn count(&self, tenant_id: Uuid, category: RecordCategory) -> FerryResult<i64>;
}
