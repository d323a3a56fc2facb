use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::checkpoint::models::{Checkpoint, FailedPage};
use crate::checkpoint::repositories::CheckpointRepository;
use crate::db_err;
use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::SyncKey;

#[derive(Clone)]
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> FerryResult<Checkpoint> {
        let sync_class: String = row.get("sync_class");
        let category: String = row.get("category");
        let page_index: i32 = row.get("page_index");
        let items_persisted: i64 = row.get("items_persisted");
        let failed_pages: Json<Vec<FailedPage>> = row
            .try_get("failed_pages")
            .map_err(|e| FerryError::Internal(format!("corrupt failed_pages: {e}")))?;

        Ok(Checkpoint {
            key: SyncKey::new(row.get("tenant_id"), sync_class.parse()?, category.parse()?),
            page_index: page_index.max(1) as u32,
            cursor: row.get("cursor"),
            items_persisted: items_persisted.max(0) as u64,
            failed_pages: failed_pages.0,
            updated_at: row.get("updated_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> FerryResult<()> {
        sqlx::query(
            "insert into sync_checkpoints
             (tenant_id, sync_class, category, page_index, cursor, items_persisted,
              failed_pages, updated_at, expires_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             on conflict (tenant_id, sync_class, category) do update set
               page_index = excluded.page_index,
               cursor = excluded.cursor,
               items_persisted = excluded.items_persisted,
               failed_pages = excluded.failed_pages,
               updated_at = excluded.updated_at,
               expires_at = excluded.expires_at",
        )
        .bind(checkpoint.key.tenant_id)
        .bind(checkpoint.key.sync_class.as_str())
        .bind(checkpoint.key.category.as_str())
        .bind(checkpoint.page_index as i32)
        .bind(&checkpoint.cursor)
        .bind(checkpoint.items_persisted as i64)
        .bind(Json(&checkpoint.failed_pages))
        .bind(checkpoint.updated_at)
        .bind(checkpoint.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self, key: &SyncKey) -> FerryResult<Option<Checkpoint>> {
        let row = sqlx::query(
            "select tenant_id, sync_class, category, page_index, cursor, items_persisted,
                    failed_pages, updated_at, expires_at
             from sync_checkpoints
             where tenant_id = $1 and sync_class = $2 and category = $3 and expires_at > $4",
        )
        .bind(key.tenant_id)
        .bind(key.sync_class.as_str())
        .bind(key.category.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Self::map_row).transpose()
    }

    async fn clear(&self, key: &SyncKey) -> FerryResult<()> {
        sqlx::query(
            "delete from sync_checkpoints
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

    async fn list_for_tenant(&self, tenant_id: Uuid) -> FerryResult<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "select tenant_id, sync_class, category, page_index, cursor, items_persisted,
                    failed_pages, updated_at, expires_at
             from sync_checkpoints
             where tenant_id = $1 and expires_at > $2
             order by updated_at desc",
        )
        .bind(tenant_id)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn purge_expired(&self) -> FerryResult<u64> {
        let result = sqlx::query("delete from sync_checkpoints where expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
