use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::db_err;
use crate::ledger::models::FailedBatch;
use crate::ledger::repositories::FailedBatchRepository;
use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::SyncKey;

#[derive(Clone)]
pub struct PgFailedBatchRepository {
    pool: PgPool,
}

impl PgFailedBatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn delete(&self, key: &SyncKey) -> FerryResult<()> {
        sqlx::query(
            "delete from failed_batches
             where tenant_id = $1 and sync_class = $2 and category = $3",
        )
        .bind(key.tenant_id)
        .bind(key.sync_class.as_str())
        .bind(key.category.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl FailedBatchRepository for PgFailedBatchRepository {
    async fn append(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()> {
        if batches.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "insert into failed_batches (tenant_id, sync_class, category, batches, updated_at)
             values ($1, $2, $3, $4, $5)
             on conflict (tenant_id, sync_class, category) do update set
               batches = failed_batches.batches || excluded.batches,
               updated_at = excluded.updated_at",
        )
        .bind(key.tenant_id)
        .bind(key.sync_class.as_str())
        .bind(key.category.as_str())
        .bind(Json(batches))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!(key = %key, appended = batches.len(), "failed batches recorded");
        Ok(())
    }

    async fn load(&self, key: &SyncKey) -> FerryResult<Vec<FailedBatch>> {
        let row = sqlx::query(
            "select batches from failed_batches
             where tenant_id = $1 and sync_class = $2 and category = $3",
        )
        .bind(key.tenant_id)
        .bind(key.sync_class.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(r) => {
                let batches: Json<Vec<FailedBatch>> = r
                    .try_get("batches")
                    .map_err(|e| FerryError::Internal(format!("corrupt ledger entry: {e}")))?;
                Ok(batches.0)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn replace(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()> {
        if batches.is_empty() {
            return self.delete(key).await;
        }

        sqlx::query(
            "insert into failed_batches (tenant_id, sync_class, category, batches, updated_at)
             values ($1, $2, $3, $4, $5)
             on conflict (tenant_id, sync_class, category) do update set
               batches = excluded.batches,
               updated_at = excluded.updated_at",
        )
        .bind(key.tenant_id)
        .bind(key.sync_class.as_str())
        .bind(key.category.as_str())
        .bind(Json(batches))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::models::Record;
    use crate::test_db;
    use ferry_common::types::{RecordCategory, SyncClass};
    use uuid::Uuid;

    fn failed_batch(tenant_id: Uuid, start: usize, error: &str) -> FailedBatch {
        let items = (start..start + 2)
            .map(|i| Record {
                tenant_id,
                category: RecordCategory::Orders,
                source_id: format!("order-{i}"),
                payload: serde_json::json!({ "id": i }),
                status: None,
                currency: None,
                amount_minor: None,
                source_created_at: None,
                source_updated_at: None,
                synced_at: Utc::now(),
            })
            .collect();
        FailedBatch {
            page_index: 1,
            start_index: start,
            end_index: start + 2,
            items,
            error: error.to_string(),
            failed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_accumulates_batches() {
        let pool = match test_db::pool().await {
            Some(p) => p,
            None => return,
        };
        let repo = PgFailedBatchRepository::new(pool);
        let tenant = Uuid::new_v4();
        let key = SyncKey::new(tenant, SyncClass::Full, RecordCategory::Orders);

        repo.append(&key, &[failed_batch(tenant, 0, "timeout")]).await.expect("first");
        repo.append(&key, &[failed_batch(tenant, 2, "deadlock")]).await.expect("second");

        let loaded = repo.load(&key).await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].error, "timeout");
        assert_eq!(loaded[1].start_index, 2);
        assert_eq!(loaded[1].items.len(), 2);
    }

    #[tokio::test]
    async fn replace_with_empty_clears_entry() {
        let pool = match test_db::pool().await {
            Some(p) => p,
            None => return,
        };
        let repo = PgFailedBatchRepository::new(pool);
        let tenant = Uuid::new_v4();
        let key = SyncKey::new(tenant, SyncClass::Manual, RecordCategory::Orders);

        repo.append(&key, &[failed_batch(tenant, 0, "timeout")]).await.expect("append");
        repo.replace(&key, &[]).await.expect("replace");
        assert!(repo.load(&key).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn load_missing_entry_is_empty() {
        let pool = match test_db::pool().await {
            Some(p) => p,
            None => return,
        };
        let repo = PgFailedBatchRepository::new(pool);
        let key = SyncKey::new(Uuid::new_v4(), SyncClass::Full, RecordCategory::Transactions);
        assert!(repo.load(&key).await.expect("load").is_empty());
    }
}
