use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Key namespace for delivered-message records.
pub fn sent_message_key(external_id: &str) -> String {
    format!("sent_messages:{external_id}")
}

/// Minimal key/value cache interface (e.g. Redis).
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Checks if the cache is reachable.
    async fn ping(&self) -> Result<()>;

    /// Stores a value with the given TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Retrieves a value by key; None if missing.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes a key. No-op if the key does not exist.
    async fn del(&self, key: &str) -> Result<()>;
}

/// Thin Redis-backed implementation of the cache interface.
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .with_context(|| format!("Failed to set cache key {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Failed to read cache key {key}"))?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let () = conn
            .del(key)
            .await
            .with_context(|| format!("Failed to delete cache key {key}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_message_key_namespace() {
        assert_eq!(sent_message_key("ext-1"), "sent_messages:ext-1");
    }
}
