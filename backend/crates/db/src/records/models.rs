use chrono::{DateTime, Utc};
use ferry_common::types::RecordCategory;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest batch the store accepts in one atomic upsert.
pub const MAX_BATCH_SIZE: usize = 500;

/// One synchronized upstream record. Identity is (tenant_id, source_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub tenant_id: Uuid,
    pub category: RecordCategory,
    pub source_id: String,
    pub payload: serde_json::Value,
    pub status: Option<String>,
    pub currency: Option<String>,
    pub amount_minor: Option<i64>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}
