use chrono::{DateTime, Utc};
use ferry_common::types::SyncKey;
use serde::{Deserialize, Serialize};

/// A page whose fetch failed after all retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPage {
    pub page_index: u32,
    pub cursor: Option<String>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Resume position for one (tenant, sync class, category).
///
/// `cursor` always points at the page that has not been fetched yet;
/// `page_index` is that page's 1-based number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: SyncKey,
    pub page_index: u32,
    pub cursor: Option<String>,
    pub items_persisted: u64,
    pub failed_pages: Vec<FailedPage>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
