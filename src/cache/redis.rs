//! Redis cache store.
//!
//! Keys are `<prefix>:<len>:<region>:<key>`, where `<len>` is the byte length
//! of the region name. The length keeps regions whose names contain `:` apart
//! from each other and from the key. Entries with a TTL are written with
//! `SET .. PX`, so Redis expires them on its own. Clearing a region walks the
//! keyspace with `SCAN MATCH` and deletes each batch of matches.

use super::CacheStore;
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per SCAN step when clearing a region.
const SCAN_COUNT: usize = 500;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to `url`. The connection manager reconnects on its own after
    /// failures.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> DbResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| DbError::cache(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| DbError::cache(format!("Failed to connect to Redis: {}", e)))?;

        let prefix = prefix.into();
        info!(prefix = %prefix, "Redis cache store connected");
        Ok(Self { conn, prefix })
    }

    fn key(&self, region: &str, key: &str) -> String {
        entry_key(&self.prefix, region, key)
    }

    fn region_pattern(&self, region: &str) -> String {
        region_pattern(&self.prefix, region)
    }
}

fn entry_key(prefix: &str, region: &str, key: &str) -> String {
    format!("{}:{}:{}:{}", prefix, region.len(), region, key)
}

/// SCAN pattern matching every key in `region` and nothing else.
fn region_pattern(prefix: &str, region: &str) -> String {
    format!(
        "{}:{}:{}:*",
        escape_glob(prefix),
        region.len(),
        escape_glob(region)
    )
}

/// Escape glob metacharacters so a region name matches literally.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn redis_error(op: &str, e: redis::RedisError) -> DbError {
    DbError::cache(format!("Redis {} failed: {}", op, e))
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, region: &str, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(region, key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| redis_error("GET", e))
    }

    async fn set(&self, region: &str, key: &str, payload: String, ttl: Duration) -> DbResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(region, key)).arg(payload);
        if !ttl.is_zero() {
            // PX takes whole milliseconds; round sub-millisecond TTLs up
            let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(ms);
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_error("SET", e))
    }

    async fn delete(&self, region: &str, key: &str) -> DbResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(region, key))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| redis_error("DEL", e))?;
        Ok(())
    }

    async fn clear(&self, region: &str) -> DbResult<()> {
        let mut conn = self.conn.clone();
        let pattern = self.region_pattern(region);
        let mut cursor: u64 = 0;
        let mut removed: i64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("SCAN", e))?;

            if !keys.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(|e| redis_error("DEL", e))?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(region = %region, removed, "Redis cache region cleared");
        Ok(())
    }
}
