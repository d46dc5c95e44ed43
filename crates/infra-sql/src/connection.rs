// Connection Pool Setup

use crate::dialect::Dialect;
use crate::error::map_sqlx_error;
use keel_core::error::Result;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Executor};
use std::time::Duration;
use tracing::debug;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a connection pool for a Postgres or SQLite URL
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<AnyPool> {
    install_default_drivers();
    let dialect = Dialect::from_url(database_url)?;

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Enable foreign keys on every SQLite connection
                if dialect == Dialect::Sqlite {
                    conn.execute("PRAGMA foreign_keys = ON").await?;
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)?;

    debug!(system = dialect.system(), max_connections, "Connection pool ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_pool_rejects_unknown_scheme() {
        assert!(create_pool("mysql://localhost/db", 1).await.is_err());
    }
}
