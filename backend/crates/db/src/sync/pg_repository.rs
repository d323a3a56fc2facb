use async_trait::async_trait;
use chrono::{Duration, Utc};
use ferry_common::types::SyncClass;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db_err;
use crate::sync::models::{SyncLock, STATUS_FAILED, STATUS_IDLE, STATUS_RUNNING};
use crate::sync::repositories::SyncLockRepository;
use ferry_common::error::FerryResult;

const RETURNING: &str = "returning id, tenant_id, sync_class, status, run_id, last_completed_at, \
                         error_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncLockRepository {
    pool: PgPool,
}

impl PgSyncLockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SyncLock {
        SyncLock {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            sync_class: row.get("sync_class"),
            status: row.get("status"),
            run_id: row.get("run_id"),
            last_completed_at: row.get("last_completed_at"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Finish the run owned by `lock`. Clears `run_id` so the holder cannot
    /// touch the row again.
    async fn finish(
        &self,
        lock: &SyncLock,
        status: &str,
        error_message: Option<&str>,
        completed: bool,
    ) -> FerryResult<Option<SyncLock>> {
        let now = Utc::now();
        let sql = format!(
            "update sync_locks
             set status = $1,
                 error_message = $2,
                 last_completed_at = case when $3 then $4 else last_completed_at end,
                 run_id = null,
                 updated_at = $4
             where id = $5 and run_id = $6
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(status)
            .bind(error_message)
            .bind(completed)
            .bind(now)
            .bind(lock.id)
            .bind(lock.run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(Self::map_row))
    }
}

#[async_trait]
impl SyncLockRepository for PgSyncLockRepository {
    async fn get_or_create(&self, tenant_id: Uuid, sync_class: SyncClass) -> FerryResult<SyncLock> {
        let sql = format!(
            "insert into sync_locks (id, tenant_id, sync_class)
             values ($1, $2, $3)
             on conflict (tenant_id, sync_class) do update set tenant_id = excluded.tenant_id
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(sync_class.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Self::map_row(row))
    }

    async fn acquire(
        &self,
        tenant_id: Uuid,
        sync_class: SyncClass,
        stale_after: Duration,
    ) -> FerryResult<Option<SyncLock>> {
        let now = Utc::now();
        let sql = format!(
            "update sync_locks
             set status = $1, run_id = $2, error_message = null, updated_at = $3
             where tenant_id = $4 and sync_class = $5
               and (status != $1 or updated_at < $6)
             {RETURNING}"
        );
        let row = sqlx::query(&sql)
            .bind(STATUS_RUNNING)
            .bind(Uuid::new_v4())
            .bind(now)
            .bind(tenant_id)
            .bind(sync_class.as_str())
            .bind(now - stale_after)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(Self::map_row))
    }

    async fn heartbeat(&self, lock: &SyncLock) -> FerryResult<bool> {
        let result = sqlx::query(
            "update sync_locks set updated_at = $1
             where id = $2 and run_id = $3 and status = $4",
        )
        .bind(Utc::now())
        .bind(lock.id)
        .bind(lock.run_id)
        .bind(STATUS_RUNNING)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, STATUS_IDLE, None, true).await
    }

    async fn mark_failed(&self, lock: &SyncLock, error_message: &str) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, STATUS_FAILED, Some(error_message), false)
            .await
    }

    async fn release(&self, lock: &SyncLock) -> FerryResult<Option<SyncLock>> {
        self.finish(lock, STATUS_IDLE, None, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    async fn test_repo() -> Option<PgSyncLockRepository> {
        let pool = test_db::pool().await?;
        Some(PgSyncLockRepository::new(pool))
    }

    #[tokio::test]
    async fn get_or_create_inserts_new() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        let lock = repo.get_or_create(tenant, SyncClass::Full).await.expect("should work");
        assert_eq!(lock.tenant_id, tenant);
        assert_eq!(lock.sync_class, "full");
        assert_eq!(lock.status, STATUS_IDLE);
        assert!(lock.last_completed_at.is_none());
    }

    #[tokio::test]
    async fn get_or_create_returns_existing() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        let a = repo.get_or_create(tenant, SyncClass::Full).await.expect("first");
        let b = repo.get_or_create(tenant, SyncClass::Full).await.expect("second");
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn acquire_fails_when_already_running() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        repo.get_or_create(tenant, SyncClass::Incremental).await.expect("create");
        let first = repo
            .acquire(tenant, SyncClass::Incremental, Duration::hours(1))
            .await
            .expect("first lock");
        assert_eq!(first.expect("acquired").status, STATUS_RUNNING);
        let second = repo
            .acquire(tenant, SyncClass::Incremental, Duration::hours(1))
            .await
            .expect("second lock");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        repo.get_or_create(tenant, SyncClass::Full).await.expect("create");
        repo.acquire(tenant, SyncClass::Full, Duration::hours(1))
            .await
            .expect("first lock");
        let takeover = repo
            .acquire(tenant, SyncClass::Full, Duration::seconds(-1))
            .await
            .expect("takeover");
        assert!(takeover.is_some());
    }

    #[tokio::test]
    async fn mark_completed_stamps_time_and_release_does_not() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        repo.get_or_create(tenant, SyncClass::Manual).await.expect("create");
        let lock = repo
            .acquire(tenant, SyncClass::Manual, Duration::hours(1))
            .await
            .expect("lock")
            .expect("should acquire");

        let released = repo
            .release(&lock)
            .await
            .expect("release")
            .expect("owner releases");
        assert_eq!(released.status, STATUS_IDLE);
        assert!(released.last_completed_at.is_none());
        assert!(released.run_id.is_none());

        let lock = repo
            .acquire(tenant, SyncClass::Manual, Duration::hours(1))
            .await
            .expect("relock")
            .expect("should acquire again");
        let completed = repo
            .mark_completed(&lock)
            .await
            .expect("complete")
            .expect("owner completes");
        assert!(completed.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_failed_sets_error() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        repo.get_or_create(tenant, SyncClass::Full).await.expect("create");
        let lock = repo
            .acquire(tenant, SyncClass::Full, Duration::hours(1))
            .await
            .expect("lock")
            .expect("should acquire");
        let failed = repo
            .mark_failed(&lock, "connection timeout")
            .await
            .expect("mark failed")
            .expect("owner marks failed");
        assert_eq!(failed.status, STATUS_FAILED);
        assert_eq!(failed.error_message.as_deref(), Some("connection timeout"));
    }

    #[tokio::test]
    async fn taken_over_holder_cannot_heartbeat_or_finish() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let tenant = Uuid::new_v4();
        repo.get_or_create(tenant, SyncClass::Full).await.expect("create");
        let old = repo
            .acquire(tenant, SyncClass::Full, Duration::hours(1))
            .await
            .expect("lock")
            .expect("should acquire");
        assert!(repo.heartbeat(&old).await.expect("heartbeat"));

        let new = repo
            .acquire(tenant, SyncClass::Full, Duration::seconds(-1))
            .await
            .expect("takeover")
            .expect("stale lock taken");
        assert_ne!(old.run_id, new.run_id);

        assert!(!repo.heartbeat(&old).await.expect("stale heartbeat"));
        assert!(repo.mark_failed(&old, "late").await.expect("stale finish").is_none());
        assert!(repo.heartbeat(&new).await.expect("owner heartbeat"));
    }
}
