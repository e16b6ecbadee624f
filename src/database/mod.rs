//! Postgres persistence for offline transactions and routing model snapshots

pub mod error;
pub mod model_repository;
pub mod offline_repository;

pub use model_repository::PgModelStore;
pub use offline_repository::PgOfflineStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use self::error::{DatabaseError, DatabaseErrorKind};
use crate::config::DatabaseConfig;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Open the pool and make sure one connection can be checked out.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connection_timeout_secs = config.connection_timeout,
        "Initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(
            config.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        ))
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!(error = %e, "Failed to initialize database pool");
            DatabaseError::from_sqlx(e)
        })?;

    pool.acquire().await.map_err(|e| {
        log_error!(error = %e, "Failed to acquire test connection");
        DatabaseError::from_sqlx(e)
    })?;

    info!(size = pool.size(), idle = pool.num_idle(), "Database pool ready");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        DatabaseError::from_sqlx(e)
    })?;
    Ok(())
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        log_error!(error = %e, "Database migration failed");
        DatabaseError::new(DatabaseErrorKind::Unknown {
            message: e.to_string(),
        })
    })?;
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL
    async fn connects_and_migrates() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            max_connections: 2,
            min_connections: 1,
            connection_timeout: 5,
            idle_timeout: None,
        };
        let pool = connect(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(health_check(&pool).await.is_ok());
    }
}
