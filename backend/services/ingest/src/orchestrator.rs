//! Per-tenant fetch → write → checkpoint → wait loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_common::error::FerryResult;
use ferry_common::types::{RecordCategory, SyncClass, SyncKey};
use ferry_config::{FetchFailurePolicy, SyncConfig};
use ferry_db::checkpoint::models::{Checkpoint, FailedPage};
use ferry_db::checkpoint::repositories::CheckpointRepository;
use ferry_db::connections::models::TenantConnection;
use ferry_db::connections::repositories::ConnectionRepository;
use ferry_db::ledger::repositories::FailedBatchRepository;
use ferry_db::records::repositories::RecordRepository;
use ferry_db::sync::models::SyncLock;
use ferry_db::sync::repositories::SyncLockRepository;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::fetcher::PageFetcher;
use crate::ledger::{FailedBatchLedger, ReplayOutcome};
use crate::retry::RetryPolicy;
use crate::source::PageSource;
use crate::status::{StatusFeed, StatusPublisher, SyncStage};
use crate::writer::BatchWriter;

/// The persistence seams the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub ledger: Arc<dyn FailedBatchRepository>,
    pub records: Arc<dyn RecordRepository>,
    pub connections: Arc<dyn ConnectionRepository>,
    pub locks: Arc<dyn SyncLockRepository>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use ferry_db::checkpoint::pg_repository::PgCheckpointRepository;
        use ferry_db::connections::pg_repository::PgConnectionRepository;
        use ferry_db::ledger::pg_repository::PgFailedBatchRepository;
        use ferry_db::records::pg_repository::PgRecordRepository;
        use ferry_db::sync::pg_repository::PgSyncLockRepository;

        Self {
            checkpoints: Arc::new(PgCheckpointRepository::new(pool.clone())),
            ledger: Arc::new(PgFailedBatchRepository::new(pool.clone())),
            records: Arc::new(PgRecordRepository::new(pool.clone())),
            connections: Arc::new(PgConnectionRepository::new(pool.clone())),
            locks: Arc::new(PgSyncLockRepository::new(pool)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncRunResult {
    pub tenant_id: Uuid,
    pub sync_class: Option<SyncClass>,
    /// True unless the run was aborted, cancelled or skipped. Failed pages
    /// and batches do not flip it.
    pub success: bool,
    /// Items persisted, cumulative across resumes of the same checkpoint.
    pub total_items: u64,
    pub pages_processed: u32,
    pub failed_page_count: usize,
    pub failed_batch_count: usize,
    pub skipped_records: usize,
    pub resumed: bool,
    pub cancelled: bool,
    /// Another run held the lock.
    pub skipped: bool,
    pub aborted_reason: Option<String>,
}

impl SyncRunResult {
    fn new(tenant_id: Uuid, sync_class: SyncClass) -> Self {
        Self {
            tenant_id,
            sync_class: Some(sync_class),
            ..Self::default()
        }
    }
}

enum CategoryEnd {
    Completed,
    Aborted(String),
    Cancelled,
    /// A stale-lock takeover handed the key to another run.
    LockLost,
}

const LOCK_LOST: &str = "sync lock taken over by another run";

/// Per-run context threaded through the category loop.
struct RunContext<'a> {
    lock: &'a SyncLock,
    connection: &'a TenantConnection,
    updated_since: Option<DateTime<Utc>>,
    publisher: &'a StatusPublisher,
    cancel: &'a CancellationToken,
}

pub struct SyncOrchestrator {
    fetcher: PageFetcher,
    writer: BatchWriter,
    checkpoints: CheckpointStore,
    ledger: FailedBatchLedger,
    connections: Arc<dyn ConnectionRepository>,
    locks: Arc<dyn SyncLockRepository>,
    feed: StatusFeed,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(stores: &Stores, source: Arc<dyn PageSource>, feed: StatusFeed, config: SyncConfig) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            fetcher: PageFetcher::new(source, policy, config.page_size),
            writer: BatchWriter::new(stores.records.clone(), policy, config.inter_batch_delay),
            checkpoints: CheckpointStore::new(stores.checkpoints.clone(), config.checkpoint_ttl),
            ledger: FailedBatchLedger::new(stores.ledger.clone()),
            connections: stores.connections.clone(),
            locks: stores.locks.clone(),
            feed,
            config,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn ledger(&self) -> &FailedBatchLedger {
        &self.ledger
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn feed(&self) -> &StatusFeed {
        &self.feed
    }

    /// Sync every configured category for one tenant.
    ///
    /// Never returns an error: every failure path is folded into the result.
    pub async fn run(&self, tenant_id: Uuid, sync_class: SyncClass, cancel: &CancellationToken) -> SyncRunResult {
        let mut result = SyncRunResult::new(tenant_id, sync_class);

        let lock = match self.acquire_lock(tenant_id, sync_class).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    sync_class = %sync_class,
                    "sync already running, skipping"
                );
                result.skipped = true;
                return result;
            }
            Err(e) => {
                tracing::error!(tenant_id = %tenant_id, sync_class = %sync_class, error = %e, "could not acquire sync lock");
                result.aborted_reason = Some(e.to_string());
                return result;
            }
        };

        let publisher = self.feed.register(tenant_id, sync_class);
        publisher.publish(None, SyncStage::Init, 0, 0, "loading connection");

        let connection = match self.connections.get_connection(tenant_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                let reason = format!("no enabled connection for tenant {tenant_id}");
                return self.abort(result, &lock, &publisher, reason).await;
            }
            Err(e) => {
                let reason = format!("connection lookup failed: {e}");
                return self.abort(result, &lock, &publisher, reason).await;
            }
        };

        let ctx = RunContext {
            lock: &lock,
            connection: &connection,
            updated_since: self.updated_since(sync_class, &lock),
            publisher: &publisher,
            cancel,
        };

        let mut abort_reasons = Vec::new();
        for &category in &self.config.categories {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let key = SyncKey::new(tenant_id, sync_class, category);
            match self.run_category(&key, &ctx, &mut result).await {
                CategoryEnd::Completed => {}
                CategoryEnd::Aborted(reason) => abort_reasons.push(format!("{category}: {reason}")),
                CategoryEnd::Cancelled => {
                    result.cancelled = true;
                    break;
                }
                CategoryEnd::LockLost => {
                    abort_reasons.push(format!("{category}: {LOCK_LOST}"));
                    break;
                }
            }
        }

        if !abort_reasons.is_empty() {
            result.aborted_reason = Some(abort_reasons.join("; "));
        }
        result.success = result.aborted_reason.is_none() && !result.cancelled;

        let (stage, message) = if result.success {
            (SyncStage::Completed, format!("synced {} items", result.total_items))
        } else if let Some(reason) = &result.aborted_reason {
            (SyncStage::Aborted, reason.clone())
        } else {
            (SyncStage::Cancelled, "cancelled".to_string())
        };
        publisher.publish(None, stage, result.total_items, result.pages_processed, message);

        self.finish_lock(&lock, &result).await;

        if result.success {
            tracing::info!(
                tenant_id = %tenant_id,
                sync_class = %sync_class,
                total_items = result.total_items,
                pages = result.pages_processed,
                failed_pages = result.failed_page_count,
                failed_batches = result.failed_batch_count,
                resumed = result.resumed,
                "sync completed"
            );
        } else if result.cancelled {
            tracing::info!(tenant_id = %tenant_id, sync_class = %sync_class, "sync cancelled, checkpoint kept");
        } else {
            tracing::error!(
                tenant_id = %tenant_id,
                sync_class = %sync_class,
                reason = result.aborted_reason.as_deref().unwrap_or_default(),
                "sync aborted"
            );
        }
        result
    }

    /// Re-attempt the ledgered batches of `key` while holding its sync lock,
    /// so a concurrent run cannot append to the ledger mid-replay.
    pub async fn replay_failed_batches(&self, key: &SyncKey) -> FerryResult<ReplayOutcome> {
        let Some(lock) = self.acquire_lock(key.tenant_id, key.sync_class).await? else {
            tracing::info!(key = %key, "sync lock held, skipping replay");
            return Ok(ReplayOutcome {
                skipped: true,
                ..ReplayOutcome::default()
            });
        };

        let outcome = self.ledger.replay(key, &self.writer).await;
        match self.locks.release(&lock).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(key = %key, "sync lock changed hands during replay"),
            Err(e) => tracing::warn!(key = %key, error = %e, "failed to release sync lock after replay"),
        }
        outcome
    }

    async fn acquire_lock(&self, tenant_id: Uuid, sync_class: SyncClass) -> FerryResult<Option<SyncLock>> {
        let stale_after = chrono::Duration::from_std(self.config.lock_stale_after)
            .unwrap_or(chrono::Duration::hours(1));
        self.locks.get_or_create(tenant_id, sync_class).await?;
        self.locks.acquire(tenant_id, sync_class, stale_after).await
    }

    /// Refresh the lock before touching the checkpoint or ledger. `false`
    /// means another run owns the key now; store errors count as still held.
    async fn hold_lock(&self, key: &SyncKey, ctx: &RunContext<'_>) -> bool {
        match self.locks.heartbeat(ctx.lock).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::error!(key = %key, "sync lock taken over, stopping without writing checkpoint");
                false
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "sync lock heartbeat failed");
                true
            }
        }
    }

    async fn abort(
        &self,
        mut result: SyncRunResult,
        lock: &SyncLock,
        publisher: &StatusPublisher,
        reason: String,
    ) -> SyncRunResult {
        tracing::error!(tenant_id = %result.tenant_id, reason = %reason, "sync aborted");
        publisher.publish(None, SyncStage::Aborted, 0, 0, reason.clone());
        result.aborted_reason = Some(reason);
        self.finish_lock(lock, &result).await;
        result
    }

    async fn finish_lock(&self, lock: &SyncLock, result: &SyncRunResult) {
        let outcome = if result.success {
            self.locks.mark_completed(lock).await
        } else if let Some(reason) = &result.aborted_reason {
            self.locks.mark_failed(lock, reason).await
        } else {
            self.locks.release(lock).await
        };
        match outcome {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(tenant_id = %result.tenant_id, "sync lock owned by another run, leaving it untouched")
            }
            Err(e) => tracing::warn!(tenant_id = %result.tenant_id, error = %e, "failed to update sync lock"),
        }
    }

    /// Lower bound for incremental runs: the last completion minus an
    /// overlap, or a fixed lookback when nothing has completed yet.
    fn updated_since(&self, sync_class: SyncClass, lock: &SyncLock) -> Option<DateTime<Utc>> {
        if sync_class != SyncClass::Incremental {
            return None;
        }
        let overlap = chrono::Duration::from_std(self.config.incremental_overlap)
            .unwrap_or(chrono::Duration::hours(1));
        Some(match lock.last_completed_at {
            Some(last) => last - overlap,
            None => Utc::now() - chrono::Duration::days(i64::from(self.config.incremental_lookback_days)),
        })
    }

    async fn load_checkpoint(&self, key: &SyncKey, result: &mut SyncRunResult) -> Checkpoint {
        match self.checkpoints.load(key).await {
            // A cursor-less checkpoint past page 1 cannot be positioned.
            Some(cp) if cp.cursor.is_none() && cp.page_index > 1 => {
                tracing::warn!(key = %key, page = cp.page_index, "discarding checkpoint without cursor");
                self.checkpoints.fresh(*key)
            }
            Some(cp) => {
                tracing::info!(
                    key = %key,
                    page = cp.page_index,
                    items = cp.items_persisted,
                    "resuming from checkpoint"
                );
                result.resumed = true;
                cp
            }
            None => self.checkpoints.fresh(*key),
        }
    }

    async fn run_category(&self, key: &SyncKey, ctx: &RunContext<'_>, result: &mut SyncRunResult) -> CategoryEnd {
        let category = key.category;
        let base_items = result.total_items;
        let wait = self.config.wait_interval(key.sync_class);
        let mut checkpoint = self.load_checkpoint(key, result).await;

        let end = loop {
            if ctx.cancel.is_cancelled() {
                break CategoryEnd::Cancelled;
            }

            let page_index = checkpoint.page_index;
            let progress = base_items + checkpoint.items_persisted;
            ctx.publisher.publish(
                Some(category),
                SyncStage::Fetching,
                progress,
                page_index,
                format!("fetching {category} page {page_index}"),
            );

            let fetched = self
                .fetcher
                .fetch(ctx.connection, category, checkpoint.cursor.as_deref(), ctx.updated_since)
                .await;

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(key = %key, page = page_index, error = %e, "page fetch failed");
                    if !self.hold_lock(key, ctx).await {
                        break CategoryEnd::LockLost;
                    }
                    result.failed_page_count += 1;
                    checkpoint.failed_pages.push(FailedPage {
                        page_index,
                        cursor: checkpoint.cursor.clone(),
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });

                    let skip_to = match self.config.fetch_failure_policy {
                        FetchFailurePolicy::SkipForward => e
                            .next_cursor()
                            .filter(|next| Some(*next) != checkpoint.cursor.as_deref())
                            .map(str::to_string),
                        FetchFailurePolicy::Abort => None,
                    };

                    match skip_to {
                        Some(next) => {
                            tracing::warn!(key = %key, page = page_index, "skipping failed page");
                            checkpoint.page_index += 1;
                            checkpoint.cursor = Some(next);
                            if !self.checkpoint_and_wait(&mut checkpoint, ctx, base_items, wait).await {
                                break CategoryEnd::Cancelled;
                            }
                            continue;
                        }
                        None => {
                            ctx.publisher.publish(
                                Some(category),
                                SyncStage::Checkpointing,
                                progress,
                                page_index,
                                "saving checkpoint before abort",
                            );
                            self.checkpoints.save(&mut checkpoint).await;
                            break CategoryEnd::Aborted(format!("page {page_index} fetch failed: {e}"));
                        }
                    }
                }
            };

            ctx.publisher.publish(
                Some(category),
                SyncStage::Writing,
                progress,
                page_index,
                format!("writing {} {category}", page.records.len()),
            );
            let outcome = self
                .writer
                .write_all(key, page_index, &page.records, self.config.batch_size)
                .await;

            result.pages_processed += 1;
            result.skipped_records += outcome.skipped;
            result.failed_batch_count += outcome.failed.len();
            checkpoint.items_persisted += outcome.written;

            if !self.hold_lock(key, ctx).await {
                break CategoryEnd::LockLost;
            }
            if let Err(e) = self.ledger.record(key, &outcome.failed).await {
                tracing::error!(key = %key, page = page_index, error = %e, "failed to record failed batches");
            }

            match page.next_cursor {
                None => {
                    self.checkpoints.clear(key).await;
                    break CategoryEnd::Completed;
                }
                Some(next) if checkpoint.cursor.as_deref() == Some(next.as_str()) => {
                    // Without a cursor the next run starts the category over
                    // instead of looping on the same page.
                    let reason = format!("upstream repeated cursor after page {page_index}");
                    result.failed_page_count += 1;
                    checkpoint.page_index += 1;
                    checkpoint.failed_pages.push(FailedPage {
                        page_index: checkpoint.page_index,
                        cursor: Some(next),
                        error: reason.clone(),
                        failed_at: Utc::now(),
                    });
                    checkpoint.cursor = None;
                    self.checkpoints.save(&mut checkpoint).await;
                    break CategoryEnd::Aborted(reason);
                }
                Some(next) => {
                    checkpoint.page_index += 1;
                    checkpoint.cursor = Some(next);
                    if !self.checkpoint_and_wait(&mut checkpoint, ctx, base_items, wait).await {
                        break CategoryEnd::Cancelled;
                    }
                }
            }
        };

        result.total_items = base_items + checkpoint.items_persisted;
        end
    }

    /// Persist the checkpoint, then sleep the per-class interval. Returns
    /// `false` if cancelled during the wait.
    async fn checkpoint_and_wait(
        &self,
        checkpoint: &mut Checkpoint,
        ctx: &RunContext<'_>,
        base_items: u64,
        wait: std::time::Duration,
    ) -> bool {
        let progress = base_items + checkpoint.items_persisted;
        let category: RecordCategory = checkpoint.key.category;
        ctx.publisher.publish(
            Some(category),
            SyncStage::Checkpointing,
            progress,
            checkpoint.page_index,
            format!("checkpoint before page {}", checkpoint.page_index),
        );
        self.checkpoints.save(checkpoint).await;

        ctx.publisher.publish(
            Some(category),
            SyncStage::Waiting,
            progress,
            checkpoint.page_index,
            format!("waiting {}ms", wait.as_millis()),
        );
        tokio::select! {
            _ = ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}
