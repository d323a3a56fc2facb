use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::connections::models::TenantConnection;
use crate::connections::repositories::ConnectionRepository;
use crate::db_err;
use ferry_common::error::FerryResult;

#[derive(Clone)]
pub struct PgConnectionRepository {
    pool: PgPool,
}

impl PgConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> TenantConnection {
        TenantConnection {
            tenant_id: row.get("tenant_id"),
            endpoint: row.get("endpoint"),
            access_token: row.get("access_token"),
            enabled: row.get("enabled"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn get_connection(&self, tenant_id: Uuid) -> FerryResult<Option<TenantConnection>> {
        let row = sqlx::query(
            "select tenant_id, endpoint, access_token, enabled, created_at, updated_at
             from tenant_connections
             where tenant_id = $1 and enabled",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Self::map_row))
    }

    async fn list_enabled_tenants(&self) -> FerryResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "select tenant_id from tenant_connections where enabled order by tenant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| r.get("tenant_id")).collect())
    }
}
