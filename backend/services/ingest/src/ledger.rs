use std::sync::Arc;

use ferry_common::error::FerryResult;
use ferry_common::types::SyncKey;
use ferry_db::ledger::models::FailedBatch;
use ferry_db::ledger::repositories::FailedBatchRepository;

use crate::writer::BatchWriter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Batches written successfully on replay.
    pub recovered: usize,
    pub recovered_items: u64,
    /// Batches left in the ledger.
    pub still_failing: usize,
    /// A sync or another replay held the key; the ledger was not touched.
    pub skipped: bool,
}

/// Durable list of write batches that exhausted their retries.
#[derive(Clone)]
pub struct FailedBatchLedger {
    repo: Arc<dyn FailedBatchRepository>,
}

impl FailedBatchLedger {
    pub fn new(repo: Arc<dyn FailedBatchRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()> {
        if batches.is_empty() {
            return Ok(());
        }
        self.repo.append(key, batches).await?;
        tracing::info!(
            key = %key,
            batches = batches.len(),
            items = batches.iter().map(FailedBatch::len).sum::<usize>(),
            "recorded failed batches"
        );
        Ok(())
    }

    pub async fn pending(&self, key: &SyncKey) -> FerryResult<Vec<FailedBatch>> {
        self.repo.load(key).await
    }

    /// Re-attempt every ledgered batch for `key` and keep only the ones
    /// that still fail. The caller must own the key's sync lock, since the
    /// final `replace` overwrites whatever was appended in between.
    pub async fn replay(&self, key: &SyncKey, writer: &BatchWriter) -> FerryResult<ReplayOutcome> {
        let batches = self.repo.load(key).await?;
        let mut outcome = ReplayOutcome::default();
        if batches.is_empty() {
            return Ok(outcome);
        }

        let mut still_failing = Vec::new();
        for mut batch in batches {
            match writer.write_batch(key.category, &batch.items).await {
                Ok(rows) => {
                    outcome.recovered += 1;
                    outcome.recovered_items += rows;
                }
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        page = batch.page_index,
                        start_index = batch.start_index,
                        error = %e,
                        "replayed batch still failing"
                    );
                    batch.error = e.to_string();
                    still_failing.push(batch);
                }
            }
        }

        outcome.still_failing = still_failing.len();
        self.repo.replace(key, &still_failing).await?;

        tracing::info!(
            key = %key,
            recovered = outcome.recovered,
            still_failing = outcome.still_failing,
            "failed-batch replay finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_support::{MemoryLedger, MemoryRecords};
    use chrono::Utc;
    use ferry_common::types::{RecordCategory, SyncClass};
    use ferry_db::records::models::Record;
    use std::time::Duration;
    use uuid::Uuid;

    fn writer(store: Arc<MemoryRecords>) -> BatchWriter {
        let policy = RetryPolicy {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_rate_limit_waits: 0,
        };
        BatchWriter::new(store, policy, Duration::ZERO)
    }

    fn batch(key: &SyncKey, start: usize, len: usize) -> FailedBatch {
        let items = (start..start + len)
            .map(|i| Record {
                tenant_id: key.tenant_id,
                category: key.category,
                source_id: i.to_string(),
                payload: serde_json::json!({ "id": i }),
                status: None,
                currency: None,
                amount_minor: None,
                source_created_at: None,
                source_updated_at: None,
                synced_at: Utc::now(),
            })
            .collect();
        FailedBatch {
            page_index: 1,
            start_index: start,
            end_index: start + len,
            items,
            error: "database error: timeout".into(),
            failed_at: Utc::now(),
        }
    }

    fn key() -> SyncKey {
        SyncKey::new(Uuid::new_v4(), SyncClass::Full, RecordCategory::Orders)
    }

    #[tokio::test]
    async fn record_ignores_empty_list() {
        let repo = Arc::new(MemoryLedger::new());
        let ledger = FailedBatchLedger::new(repo.clone());
        let key = key();

        ledger.record(&key, &[]).await.unwrap();
        assert!(ledger.pending(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_replay_clears_entry() {
        let repo = Arc::new(MemoryLedger::new());
        let ledger = FailedBatchLedger::new(repo.clone());
        let store = Arc::new(MemoryRecords::new());
        let key = key();

        ledger
            .record(&key, &[batch(&key, 0, 5), batch(&key, 5, 5)])
            .await
            .unwrap();
        let outcome = ledger.replay(&key, &writer(store.clone())).await.unwrap();

        assert_eq!(outcome.recovered, 2);
        assert_eq!(outcome.recovered_items, 10);
        assert_eq!(outcome.still_failing, 0);
        assert!(ledger.pending(&key).await.unwrap().is_empty());
        assert_eq!(store.stored(key.tenant_id, RecordCategory::Orders), 10);
    }

    #[tokio::test]
    async fn partial_replay_keeps_only_failures() {
        let repo = Arc::new(MemoryLedger::new());
        let ledger = FailedBatchLedger::new(repo.clone());
        let store = Arc::new(MemoryRecords::new());
        store.fail_calls(&[2]);
        let key = key();

        ledger
            .record(&key, &[batch(&key, 0, 5), batch(&key, 5, 5)])
            .await
            .unwrap();
        let outcome = ledger.replay(&key, &writer(store)).await.unwrap();

        assert_eq!(outcome.recovered, 1);
        assert_eq!(outcome.still_failing, 1);
        let pending = ledger.pending(&key).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start_index, 5);
    }

    #[tokio::test]
    async fn replay_of_empty_ledger_is_noop() {
        let ledger = FailedBatchLedger::new(Arc::new(MemoryLedger::new()));
        let store = Arc::new(MemoryRecords::new());
        let outcome = ledger.replay(&key(), &writer(store)).await.unwrap();
        assert_eq!(outcome, ReplayOutcome::default());
    }
}
