//! Key-value cache contract and its Redis implementation.
//!
//! The post store talks to this trait only; tests substitute an in-memory
//! double. Values are serialized JSON strings, TTLs are set per key, and
//! pattern deletes back the coarse list-cache invalidation.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use crate::error::{ensure_live, Result};

#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value; `Ok(None)` on miss.
    async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<Option<String>>;

    /// Store a value with a TTL.
    async fn set(&self, ctx: &CancellationToken, key: &str, value: &str, ttl: Duration)
        -> Result<()>;

    /// Remove a single key. Removing an absent key is not an error.
    async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<()>;

    /// Remove every key matching a glob pattern such as `posts:list:*`.
    async fn delete_pattern(&self, ctx: &CancellationToken, pattern: &str) -> Result<()>;
}

/// Redis-backed cache over a shared multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<Option<String>> {
        ensure_live(ctx)?;
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        ctx: &CancellationToken,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<()> {
        ensure_live(ctx)?;
        let mut conn = self.conn.clone();
        // Redis EX takes whole seconds; round sub-second TTLs up to one.
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<()> {
        ensure_live(ctx)?;
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_pattern(&self, ctx: &CancellationToken, pattern: &str) -> Result<()> {
        ensure_live(ctx)?;
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }
}
