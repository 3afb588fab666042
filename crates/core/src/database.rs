use crate::{
    config::{DatabaseConfig, RedisConfig},
    error::{Error, ErrorCode, Result},
};
use redis::aio::ConnectionManager;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Postgres connection pool wrapper.
///
/// The database is the source of truth for durable state; all external
/// effects of a state change go through the outbox table written in the
/// same transaction.
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await
            .map_err(|e| {
                Error::new(
                    ErrorCode::DatabaseConnectionError,
                    format!("Failed to connect to database: {}", e),
                )
            })?;

        info!(
            max_connections = config.max_connections,
            "Database pool established"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn get(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Connect to Redis and return a multiplexed connection manager.
///
/// The manager reconnects transparently; callers clone it per operation as
/// connections are cheap handles onto one multiplexed pipeline.
pub async fn connect_redis(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())
        .map_err(|e| Error::new(ErrorCode::CacheUnavailable, format!("Invalid Redis URL: {}", e)))?;

    let manager = ConnectionManager::new(client).await.map_err(|e| {
        Error::new(
            ErrorCode::CacheUnavailable,
            format!("Failed to connect to Redis: {}", e),
        )
    })?;

    info!("Redis connection manager established");
    Ok(manager)
}

/// Acquire a named advisory lock on this connection, without blocking.
///
/// Returns `true` when the lock was obtained. Used to serialize the outbox
/// poller and aggregate full rebuilds across instances.
pub async fn try_advisory_lock(pool: &PgPool, key: i64) -> Result<bool> {
    let row: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Release a previously acquired advisory lock.
pub async fn advisory_unlock(pool: &PgPool, key: i64) -> Result<bool> {
    let row: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
