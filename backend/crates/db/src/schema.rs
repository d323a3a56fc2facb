use ferry_common::error::FerryResult;
use sqlx::PgPool;

use crate::db_err;

const STATEMENTS: &[&str] = &[
    "create table if not exists tenant_connections (
       tenant_id uuid primary key,
       endpoint text not null,
       access_token text not null,
       enabled boolean not null default true,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create table if not exists orders (
       tenant_id uuid not null,
       source_id text not null,
       payload jsonb not null,
       status text,
       currency text,
       amount_minor bigint,
       source_created_at timestamptz,
       source_updated_at timestamptz,
       synced_at timestamptz not null,
       primary key (tenant_id, source_id)
     )",
    "create table if not exists transactions (
       tenant_id uuid not null,
       source_id text not null,
       payload jsonb not null,
       status text,
       currency text,
       amount_minor bigint,
       source_created_at timestamptz,
       source_updated_at timestamptz,
       synced_at timestamptz not null,
       primary key (tenant_id, source_id)
     )",
    "create table if not exists sync_checkpoints (
       tenant_id uuid not null,
       sync_class text not null,
       category text not null,
       page_index integer not null,
       cursor text,
       items_persisted bigint not null default 0,
       failed_pages jsonb not null default '[]'::jsonb,
       updated_at timestamptz not null default now(),
       expires_at timestamptz not null,
       primary key (tenant_id, sync_class, category)
     )",
    "create index if not exists sync_checkpoints_expires_idx on sync_checkpoints(expires_at)",
    "create table if not exists failed_batches (
       tenant_id uuid not null,
       sync_class text not null,
       category text not null,
       batches jsonb not null default '[]'::jsonb,
       updated_at timestamptz not null default now(),
       primary key (tenant_id, sync_class, category)
     )",
    "create table if not exists sync_locks (
       id uuid primary key,
       tenant_id uuid not null,
       sync_class text not null,
       status text not null default 'idle',
       run_id uuid,
       last_completed_at timestamptz,
       error_message text,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create unique index if not exists sync_locks_tenant_class_uidx
       on sync_locks(tenant_id, sync_class)",
    "alter table sync_locks add column if not exists run_id uuid",
];

/// Create every table the engine needs. Idempotent; safe to run on each start.
pub async fn ensure_schema(pool: &PgPool) -> FerryResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await.map_err(db_err)?;
    }
    tracing::debug!(statements = STATEMENTS.len(), "schema ensured");
    Ok(())
}
