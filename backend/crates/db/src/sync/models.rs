use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLock {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sync_class: String,
    pub status: String,
    /// Set by each successful `acquire`; only the holder may heartbeat or finish the run.
    pub run_id: Option<Uuid>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
