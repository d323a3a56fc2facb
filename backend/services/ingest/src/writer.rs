use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_common::error::FerryResult;
use ferry_common::types::{RecordCategory, SyncKey};
use ferry_db::ledger::models::FailedBatch;
use ferry_db::records::models::{Record, MAX_BATCH_SIZE};
use ferry_db::records::repositories::RecordRepository;

use crate::retry::{self, RetryPolicy};
use crate::source::models::to_record;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Rows acknowledged by the store.
    pub written: u64,
    /// Raw entries rejected by validation.
    pub skipped: usize,
    /// Batches attempted, including failed ones.
    pub batches: usize,
    /// Batches that exhausted their retries, in page order.
    pub failed: Vec<FailedBatch>,
}

/// Splits pages into store-sized batches and upserts them.
#[derive(Clone)]
pub struct BatchWriter {
    records: Arc<dyn RecordRepository>,
    policy: RetryPolicy,
    inter_batch_delay: Duration,
}

impl BatchWriter {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        policy: RetryPolicy,
        inter_batch_delay: Duration,
    ) -> Self {
        Self {
            records,
            policy,
            inter_batch_delay,
        }
    }

    /// Validate and persist one page of raw records.
    ///
    /// Failed batches are returned rather than retried again; the caller
    /// hands them to the ledger.
    pub async fn write_all(
        &self,
        key: &SyncKey,
        page_index: u32,
        raw: &[serde_json::Value],
        batch_size: usize,
    ) -> WriteOutcome {
        let synced_at = Utc::now();
        let mut outcome = WriteOutcome::default();

        let mut records = Vec::with_capacity(raw.len());
        for item in raw {
            match to_record(key.tenant_id, key.category, item, synced_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %key.tenant_id,
                        page = page_index,
                        error = %e,
                        "skipping invalid record"
                    );
                    outcome.skipped += 1;
                }
            }
        }

        let size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let chunk_count = records.len().div_ceil(size);

        for (n, chunk) in records.chunks(size).enumerate() {
            let start_index = n * size;
            outcome.batches += 1;

            match self.write_batch(key.category, chunk).await {
                Ok(rows) => {
                    outcome.written += rows;
                    if n + 1 < chunk_count && !self.inter_batch_delay.is_zero() {
                        tokio::time::sleep(self.inter_batch_delay).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %key.tenant_id,
                        page = page_index,
                        start_index,
                        size = chunk.len(),
                        error = %e,
                        "batch write failed after retries"
                    );
                    outcome.failed.push(FailedBatch {
                        page_index,
                        start_index,
                        end_index: start_index + chunk.len(),
                        items: chunk.to_vec(),
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                }
            }
        }

        outcome
    }

    /// Upsert one batch through the retry controller.
    pub async fn write_batch(&self, category: RecordCategory, batch: &[Record]) -> FerryResult<u64> {
        let label = format!("upsert {category} batch");
        retry::execute(&self.policy, &label, || {
            self.records.batch_upsert(category, batch)
        })
        .await
    }
}
