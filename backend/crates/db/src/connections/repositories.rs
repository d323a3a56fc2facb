use async_trait::async_trait;
use ferry_common::error::FerryResult;
use uuid::Uuid;

use crate::connections::models::TenantConnection;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// The enabled connection for a tenant, or `None` if missing or disabled.
    async fn get_connection(&self, tenant_id: Uuid) -> FerryResult<Option<TenantConnection>>;

    /// Ids of every tenant with an enabled connection.
    async fn list_enabled_tenants(&self) -> FerryResult<Vec<Uuid>>;
}
