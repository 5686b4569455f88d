//! Redis cache backend implementation.

use super::CacheBackend;
use crate::config::{CacheConfig, DEFAULT_REDIS_POOL_SIZE};
use crate::error::{Error, Result};
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

/// GET-compare-SET executed server-side so the swap is atomic.
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_REDIS_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => format!(
                "redis://{}:{}@{}:{}/{}",
                username, password, self.host, self.port, self.database
            ),
            (None, Some(password)) => format!(
                "redis://default:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

/// Redis backend with connection pooling.
///
/// Values are written without expiry. Dedup markers use `SET NX`, which is
/// atomic across every node sharing the Redis instance.
///
/// # Example
///
/// ```no_run
/// # use swr_kit::backend::{CacheBackend, RedisBackend, RedisConfig};
/// # use swr_kit::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig::default()).await?;
///
/// backend.set("anime:1", b"{}".to_vec()).await?;
/// let created = backend.set_if_absent("queue_update:anime:1", vec![1]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let conn_str = config.connection_string();
        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size as usize));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized: {}:{}",
            config.host, config.port
        );

        Ok(RedisBackend { pool })
    }

    /// Create from connection string with the default pool size.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        Self::from_url(conn_str, DEFAULT_REDIS_POOL_SIZE).await
    }

    /// Connect to `REDIS_URL` with `REDIS_POOL_SIZE` connections, as loaded
    /// into [`CacheConfig`].
    ///
    /// # Errors
    /// Returns `Error::ConfigError` without a Redis URL, `Err` if pool
    /// creation fails.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| Error::ConfigError("redis driver needs REDIS_URL".into()))?;
        Self::from_url(url, config.redis_pool_size).await
    }

    /// Create from connection string with an explicit pool size.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_url(conn_str: &str, pool_size: u32) -> Result<Self> {
        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size as usize));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized from connection string (pool size: {})",
            pool_size
        );

        Ok(RedisBackend { pool })
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis GET failed for key {}: {}", key, e)))?;

        if value.is_some() {
            debug!("✓ Redis GET {} -> HIT", key);
        } else {
            debug!("✓ Redis GET {} -> MISS", key);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| Error::BackendError(format!("Redis SET failed for key {}: {}", key, e)))?;
        debug!("✓ Redis SET {}", key);

        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let mut conn = self.connection().await?;

        let created: bool = conn.set_nx(key, value).await.map_err(|e| {
            Error::BackendError(format!("Redis SETNX failed for key {}: {}", key, e))
        })?;
        debug!("✓ Redis SETNX {} -> {}", key, created);

        Ok(created)
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], value: Vec<u8>) -> Result<bool> {
        let mut conn = self.connection().await?;

        let swapped: bool = redis::cmd("EVAL")
            .arg(COMPARE_AND_SWAP_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(expected)
            .arg(value)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis CAS failed for key {}: {}", key, e)))?;
        debug!("✓ Redis CAS {} -> {}", key, swapped);

        Ok(swapped)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL failed for key {}: {}", key, e)))?;

        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let exists: bool = conn.exists(key).await.map_err(|e| {
            Error::BackendError(format!("Redis EXISTS failed for key {}: {}", key, e))
        })?;

        Ok(exists)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis PING failed: {}", e)))?;

        Ok(pong.contains("PONG"))
    }
}
