//! In-memory repositories and a scripted upstream for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::{RecordCategory, SyncClass, SyncKey};
use ferry_db::checkpoint::models::Checkpoint;
use ferry_db::checkpoint::repositories::CheckpointRepository;
use ferry_db::connections::models::TenantConnection;
use ferry_db::connections::repositories::ConnectionRepository;
use ferry_db::ledger::models::FailedBatch;
use ferry_db::ledger::repositories::FailedBatchRepository;
use ferry_db::records::models::Record;
use ferry_db::records::repositories::RecordRepository;
use ferry_db::sync::models::{SyncLock, STATUS_FAILED, STATUS_IDLE, STATUS_RUNNING};
use ferry_db::sync::repositories::SyncLockRepository;
use reqwest::StatusCode;
use tokio::time::Instant;
use uuid::Uuid;

use crate::source::{Page, PageRequest, PageSource, SourceError};

pub fn connection(tenant_id: Uuid) -> TenantConnection {
    TenantConnection {
        tenant_id,
        endpoint: "https://shop.example.test/api".to_string(),
        access_token: "secret".to_string(),
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// `count` valid orders with numeric ids starting at `start`.
pub fn raw_records(start: usize, count: usize) -> Vec<serde_json::Value> {
    (start..start + count)
        .map(|i| {
            serde_json::json!({
                "id": i,
                "status": "paid",
                "currency": "usd",
                "total_price": "19.99",
                "updated_at": "2026-01-01T00:00:00Z"
            })
        })
        .collect()
}

// ── Records ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecords {
    rows: Mutex<HashMap<(Uuid, RecordCategory, String), Record>>,
    calls: Mutex<usize>,
    failing_calls: Mutex<HashSet<usize>>,
    batch_sizes: Mutex<Vec<usize>>,
    write_delay: Mutex<Duration>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given 1-based `batch_upsert` calls fail with a database error.
    pub fn fail_calls(&self, calls: &[usize]) {
        self.failing_calls.lock().unwrap().extend(calls.iter().copied());
    }

    /// Make every `batch_upsert` take `delay` before it lands.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn stored(&self, tenant_id: Uuid, category: RecordCategory) -> usize {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, c, _)| *t == tenant_id && *c == category)
            .count()
    }

    /// Sizes of the successful batches, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordRepository for MemoryRecords {
    async fn batch_upsert(&self, category: RecordCategory, records: &[Record]) -> FerryResult<u64> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_calls.lock().unwrap().contains(&call) {
            return Err(FerryError::Database("connection reset".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        for r in records {
            rows.insert((r.tenant_id, category, r.source_id.clone()), r.clone());
        }
        self.batch_sizes.lock().unwrap().push(records.len());
        Ok(records.len() as u64)
    }

    async fn count(&self, tenant_id: Uuid, category: RecordCategory) -> FerryResult<i64> {
        Ok(self.stored(tenant_id, category) as i64)
    }
}

// ── Checkpoints ─────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpoints {
    rows: Mutex<HashMap<SyncKey, Checkpoint>>,
    saved_pages: Mutex<Vec<u32>>,
    failing: Mutex<bool>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn insert(&self, checkpoint: Checkpoint) {
        self.rows.lock().unwrap().insert(checkpoint.key, checkpoint);
    }

    pub fn get(&self, key: &SyncKey) -> Option<Checkpoint> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    /// `page_index` of every save, in order.
    pub fn saved_pages(&self) -> Vec<u32> {
        self.saved_pages.lock().unwrap().clone()
    }

    fn check(&self) -> FerryResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(FerryError::Database("checkpoint store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointRepository for MemoryCheckpoints {
    async fn save(&self, checkpoint: &Checkpoint) -> FerryResult<()> {
        self.check()?;
        self.saved_pages.lock().unwrap().push(checkpoint.page_index);
        self.insert(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, key: &SyncKey) -> FerryResult<Option<Checkpoint>> {
        self.check()?;
        Ok(self.get(key).filter(|cp| !cp.is_expired(Utc::now())))
    }

    async fn clear(&self, key: &SyncKey) -> FerryResult<()> {
        self.check()?;
        self.rows.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> FerryResult<Vec<Checkpoint>> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|cp| cp.key.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn purge_expired(&self) -> FerryResult<u64> {
        self.check()?;
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, cp| !cp.is_expired(now));
        Ok((before - rows.len()) as u64)
    }
}

// ── Ledger ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<SyncKey, Vec<FailedBatch>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedBatchRepository for MemoryLedger {
    async fn append(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()> {
        self.rows
            .lock()
            .unwrap()
            .entry(*key)
            .or_default()
            .extend_from_slice(batches);
        Ok(())
    }

    async fn load(&self, key: &SyncKey) -> FerryResult<Vec<FailedBatch>> {
        Ok(self.rows.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn replace(&self, key: &SyncKey, batches: &[FailedBatch]) -> FerryResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if batches.is_empty() {
            rows.remove(key);
        } else {
            rows.insert(*key, batches.to_vec());
        }
        Ok(())
    }
}

// ── Connections ─────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryConnections {
    rows: Mutex<HashMap<Uuid, TenantConnection>>,
}

impl MemoryConnections {
    pub fn with(tenants: &[Uuid]) -> Self {
        let rows = tenants.iter().map(|t| (*t, connection(*t))).collect();
        Self {
            rows: Mutex::new(rows),
        }
    }
}

#[async_trait]
impl ConnectionRepository for MemoryConnections {
    async fn get_connection(&self, tenant_id: Uuid) -> FerryResult<Option<TenantConnection>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&tenant_id)
            .filter(|c| c.enabled)
            .cloned())
    }

    async fn list_enabled_tenants(&self) -> FerryResult<Vec<Uuid>> {
        let mut tenants: Vec<Uuid> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.tenant_id)
            .collect();
        tenants.sort();
        Ok(tenants)
    }
}

// ── Sync locks ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryLocks {
    rows: Mutex<HashMap<(Uuid, SyncClass), SyncLock>>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend another process is mid-run.
    pub fn hold(&self, tenant_id: Uuid, sync_class: SyncClass) {
        let mut lock = new_lock(tenant_id, sync_class);
        lock.status = STATUS_RUNNING.to_string();
        lock.run_id = Some(Uuid::new_v4());
        self.rows.lock().unwrap().insert((tenant_id, sync_class), lock);
    }

    pub fn get(&self, tenant_id: Uuid, sync_class: SyncClass) -> Option<SyncLock> {
        self.rows.lock().unwrap().get(&(tenant_id, sync_class)).cloned()
    }

    /// Apply `f` if `lock` still owns its row, then drop ownership.
    fn finish(&self, lock: &SyncLock, f: impl FnOnce(&mut SyncLock)) -> FerryResult<Option<SyncLock>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .values_mut()
            .find(|l| l.id == lock.id && l.run_id.is_some() && l.run_id == lock.run_id)
        else {
            return Ok(None);
        };
        f(row);
        row.run_id = None;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }
}

fn new_lock(tenant_id: Uuid, sync_class: SyncClass) -> SyncLock {
    SyncLock {
        id: Uuid::new_v4(),
        tenant_id,
        sync_class: sync_class.as_str().to_string(),
        status: STATUS_IDLE.to_string(),
        run_id: None,
        last_completed_at: None,
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl SyncLockRepository for MemoryLocks {
    async fn get_or_create(&self, tenant_id: Uuid, sync_class: SyncClass) -> FerryResult<SyncLock> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .entry((tenant_id, sync_class))
            .or_insert_with(|| new_lock(tenant_id, sync_class))
            .clone())
    }

    async fn acquire(
        &self,
        tenant_id: Uuid,
        sync_class: SyncClass,
        stale_after: chrono::Duration,
    ) -> FerryResult<Option<SyncLock>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(lock) = rows.get_mut(&(tenant_id, sync_class)) else {
            return Ok(None);
        };
        let now = Utc::now();
        if lock.status == STATUS_RUNNING && lock.updated_at >= now - stale_after {
            return Ok(None);
        }
        lock.status = STATUS_RUNNING.to_string();
        lock.run_id = Some(Uuid::new_v4());
        lock.error_message = None;
        lock.updated_at = now;
        Ok(Some(lock.clone()))
    }

    async fn heartbeat(&self, lock: &SyncLock) -> FerryResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.values_mut().find(|l| {
            l.id == lock.id && l.run_id.is_some() && l.run_id == lock.run_id && l.status == STATUS_RUNNING
        });
        Ok(match row {
            Some(row) => {
                row.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn mark_completed(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, |l| {
            l.status = STATUS_IDLE.to_string();
            l.error_message = None;
            l.last_completed_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, lock: &SyncLock, error_message: &str) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, |l| {
            l.status = STATUS_FAILED.to_string();
            l.error_message = Some(error_message.to_string());
        })
    }

    async fn release(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, |l| {
            l.status = STATUS_IDLE.to_string();
            l.error_message = None;
        })
    }
}

// ── Scripted upstream ───────────────────────────────────────

/// Replays a fixed sequence of responses and logs every request.
/// Once the script runs out it serves an empty last page.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Result<Page, SourceError>>>,
    calls: Mutex<Vec<(PageRequest, Instant)>>,
    next_id: usize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, step: Result<Page, SourceError>) -> Self {
        self.steps.get_mut().unwrap().push_back(step);
        self
    }

    /// A page of `count` fresh records.
    pub fn then_page(mut self, count: usize, next_cursor: Option<&str>) -> Self {
        let records = raw_records(self.next_id, count);
        self.next_id += count;
        self.then_records(records, next_cursor)
    }

    pub fn then_records(self, records: Vec<serde_json::Value>, next_cursor: Option<&str>) -> Self {
        self.push(Ok(Page {
            records,
            next_cursor: next_cursor.map(str::to_string),
        }))
    }

    pub fn then_server_error(self, next_cursor: Option<&str>) -> Self {
        self.push(Err(SourceError::HttpError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "upstream unavailable".to_string(),
            next_cursor: next_cursor.map(str::to_string),
        }))
    }

    pub fn then_unauthorized(self) -> Self {
        self.push(Err(SourceError::HttpError {
            status: StatusCode::UNAUTHORIZED,
            body: "token revoked".to_string(),
            next_cursor: None,
        }))
    }

    pub fn then_rate_limit(self, retry_after: Duration) -> Self {
        self.push(Err(SourceError::RateLimited {
            retry_after,
            next_cursor: None,
        }))
    }

    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }
}
