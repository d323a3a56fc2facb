pub mod checkpoint;
pub mod connections;
pub mod ledger;
pub mod records;
pub mod schema;
pub mod sync;

use ferry_common::error::{FerryError, FerryResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> FerryResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| FerryError::Database(e.to_string()))
}

pub(crate) fn db_err(e: sqlx::Error) -> FerryError {
    FerryError::Database(e.to_string())
}
