use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How to reach a tenant's upstream account.
#[derive(Clone, Serialize, Deserialize)]
pub struct TenantConnection {
    pub tenant_id: Uuid,
    pub endpoint: String,
    pub access_token: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Hand-written so the token never reaches the logs.
impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("tenant_id", &self.tenant_id)
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let conn = TenantConnection {
            tenant_id: Uuid::new_v4(),
            endpoint: "https://shop.example.com/api".to_string(),
            access_token: "shpat_secret".to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let rendered = format!("{conn:?}");
        assert!(!rendered.contains("shpat_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
