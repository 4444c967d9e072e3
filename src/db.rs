//! Database connection pool and schema initialization.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::error::ExptDbError;
use crate::tables;

/// Open a SQLite connection pool for the given database URL, creating the
/// database file if it does not exist.
///
/// The pool is sized for the single request a process serves; in-memory
/// databases additionally require a single connection to see one store.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, ExptDbError> {
    debug!("opening database {}", database_url);
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Apply the schema DDL. All statements are idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), ExptDbError> {
    for ddl in tables::SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initializes_in_memory() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        // A second pass must be a no-op.
        init_schema(&pool).await.unwrap();
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('regions', 'metric_types', 'experiments', 'expt_metrics')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(4, count.0);
    }
}
