use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::models::Record;

/// A write batch that exhausted its retries.
///
/// `start_index..end_index` is the half-open slice of the page's valid
/// records (invalid ones are skipped before batching, so this is not a raw
/// page offset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub page_index: u32,
    pub start_index: usize,
    pub end_index: usize,
    pub items: Vec<Record>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
