use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::db_err;
use crate::records::models::{Record, MAX_BATCH_SIZE};
use crate::records::repositories::RecordRepository;
use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::RecordCategory;

#[derive(Clone)]
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn table(category: RecordCategory) -> &'static str {
        match category {
            RecordCategory::Orders => "orders",
            RecordCategory::Transactions => "transactions",
        }
    }
}

/// Postgres rejects an upsert that touches the same key twice, so keep only
/// the last occurrence of each (tenant_id, source_id).
fn dedup_last_wins(records: &[Record]) -> Vec<&Record> {
    let mut out: Vec<&Record> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(pos) = out
            .iter()
            .position(|r| r.tenant_id == record.tenant_id && r.source_id == record.source_id)
        {
            out[pos] = record;
        } else {
            out.push(record);
        }
    }
    out
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn batch_upsert(&self, category: RecordCategory, records: &[Record]) -> FerryResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if records.len() > MAX_BATCH_SIZE {
            return Err(FerryError::Validation(format!(
                "batch of {} exceeds the maximum of {MAX_BATCH_SIZE}",
                records.len()
            )));
        }

        let rows = dedup_last_wins(records);
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "insert into {} (tenant_id, source_id, payload, status, currency, amount_minor,
              source_created_at, source_updated_at, synced_at) ",
            Self::table(category)
        ));
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.tenant_id)
                .push_bind(r.source_id.clone())
                .push_bind(r.payload.clone())
                .push_bind(r.status.clone())
                .push_bind(r.currency.clone())
                .push_bind(r.amount_minor)
                .push_bind(r.source_created_at)
                .push_bind(r.source_updated_at)
                .push_bind(r.synced_at);
        });
        qb.push(
            " on conflict (tenant_id, source_id) do update set
               payload = excluded.payload,
               status = excluded.status,
               currency = excluded.currency,
               amount_minor = excluded.amount_minor,
               source_created_at = excluded.source_created_at,
               source_updated_at = excluded.source_updated_at,
               synced_at = excluded.synced_at",
        );

        let result = qb.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, tenant_id: Uuid, category: RecordCategory) -> FerryResult<i64> {
        let sql = format!(
            "select count(*) as cnt from {} where tenant_id = $1",
            Self::table(category)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt"))
    }
}
