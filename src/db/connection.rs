use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::db::errors::{DatabaseError, Result};

/// Create a connection pool for a database URL
///
/// Pool size stays small; upstream connection pooling (RDS Proxy,
/// pgbouncer) handles fan-out.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(10))
        .max_lifetime(Duration::from_secs(300))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("Failed to create pool: {}", e)))?;

    info!("Database connection pool created");
    Ok(pool)
}

/// Health check for the database connection
pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::QueryError)?;

    Ok(())
}
