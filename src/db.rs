//! Connection construction for PostgreSQL and Redis.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the PostgreSQL pool with the configured sizing.
pub async fn init_pool(cfg: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_conns)
        .min_connections(cfg.database.min_conns)
        .max_lifetime(cfg.database.max_conn_lifetime)
        .idle_timeout(cfg.database.max_conn_idle_time)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect(&cfg.database_url())
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    Ok(())
}

/// Cheap liveness probe used before the scheduler starts.
pub async fn health(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("database health check failed")?;
    Ok(())
}

/// Open the shared Redis connection and verify it responds.
pub async fn connect_redis(cfg: &Config) -> Result<ConnectionManager> {
    let client = redis::Client::open(cfg.redis_url()).context("invalid Redis URL")?;
    let mut conn = ConnectionManager::new(client)
        .await
        .context("failed to connect to Redis")?;
    let _pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .context("failed to ping Redis")?;
    Ok(conn)
}
