//! Query result caching.
//!
//! Results are stored as JSON under `(region, key)` in a [`CacheStore`]. The
//! [`CacheManager`] holds a default store (in-process unless replaced) plus
//! per-region overrides, so hot regions can live in Redis while the rest stay
//! local. [`CacheRegion`] memoizes queries and pages by a fingerprint of the
//! database name, the SQL text and the bound arguments.
//!
//! Nothing is invalidated on writes. Callers that write to cached tables clear
//! or delete the affected entries themselves.

pub mod local;
#[cfg(feature = "redis-cache")]
pub mod redis;

pub use local::LocalStore;
#[cfg(feature = "redis-cache")]
pub use self::redis::RedisStore;

use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::models::{Page, PageQuery, Record, Value};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// TTL of a region unless set with [`CacheRegion::ttl`].
pub const DEFAULT_REGION_TTL: Duration = Duration::from_secs(300);

/// Storage backend for cached payloads.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Payload for `key`, `None` when absent or expired.
    async fn get(&self, region: &str, key: &str) -> DbResult<Option<String>>;

    /// Store `payload`; a zero `ttl` never expires.
    async fn set(&self, region: &str, key: &str, payload: String, ttl: Duration) -> DbResult<()>;

    async fn delete(&self, region: &str, key: &str) -> DbResult<()>;

    /// Remove every entry in `region`.
    async fn clear(&self, region: &str) -> DbResult<()>;
}

/// Routes regions to stores and (de)serializes payloads.
pub struct CacheManager {
    local: Arc<LocalStore>,
    default_store: RwLock<Arc<dyn CacheStore>>,
    regions: RwLock<HashMap<String, Arc<dyn CacheStore>>>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager {
    /// Manager backed by a fresh [`LocalStore`].
    pub fn new() -> Self {
        let local = Arc::new(LocalStore::new());
        let default_store: Arc<dyn CacheStore> = local.clone();
        Self {
            default_store: RwLock::new(default_store),
            local,
            regions: RwLock::new(HashMap::new()),
        }
    }

    /// The built-in local store, for starting its sweep task.
    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// Replace the store used by regions without an override.
    pub fn set_default_store(&self, store: Arc<dyn CacheStore>) {
        debug!(store = store.name(), "Default cache store set");
        *self.default_store.write() = store;
    }

    /// Route one region to `store`.
    pub fn set_region_store(&self, region: &str, store: Arc<dyn CacheStore>) {
        debug!(region = %region, store = store.name(), "Region cache store set");
        self.regions.write().insert(region.to_string(), store);
    }

    /// Store serving `region`; the lock is released before any I/O.
    pub fn store_for(&self, region: &str) -> Arc<dyn CacheStore> {
        if let Some(store) = self.regions.read().get(region) {
            return Arc::clone(store);
        }
        Arc::clone(&self.default_store.read())
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        region: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> DbResult<()> {
        let payload = serde_json::to_string(value)?;
        self.store_for(region).set(region, key, payload, ttl).await
    }

    /// Cached value, `None` when absent, expired, or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, region: &str, key: &str) -> Option<T> {
        match self.try_get(region, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(region = %region, key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn try_get<T: DeserializeOwned>(&self, region: &str, key: &str) -> DbResult<Option<T>> {
        match self.store_for(region).get(region, key).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, region: &str, key: &str) -> DbResult<()> {
        self.store_for(region).delete(region, key).await
    }

    pub async fn clear(&self, region: &str) -> DbResult<()> {
        debug!(region = %region, "Clearing cache region");
        self.store_for(region).clear(region).await
    }

    /// Query memoization for one region.
    pub fn region(&self, name: &str) -> CacheRegion<'_> {
        CacheRegion {
            manager: self,
            name: name.to_string(),
            ttl: DEFAULT_REGION_TTL,
        }
    }
}

/// A named region of a [`CacheManager`] that memoizes query results.
pub struct CacheRegion<'a> {
    manager: &'a CacheManager,
    name: String,
    ttl: Duration,
}

impl CacheRegion<'_> {
    /// Set the entry TTL; zero never expires.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rows of `sql`, served from the cache when present.
    pub async fn query(&self, db: &Database, sql: &str, args: &[Value]) -> DbResult<Vec<Record>> {
        let key = fingerprint(db.name(), sql, args);
        self.cached(&key, db.query(sql, args)).await
    }

    /// A page of `query`, served from the cache when present.
    pub async fn paginate(
        &self,
        db: &Database,
        page: u64,
        page_size: u64,
        query: &PageQuery,
        args: &[Value],
    ) -> DbResult<Page> {
        let shape = format!(
            "PAGE {} {} SELECT {} FROM {} WHERE {} ORDER BY {}",
            page, page_size, query.select, query.table, query.filter, query.order_by
        );
        let key = fingerprint(db.name(), &shape, args);
        self.cached(&key, db.paginate(page, page_size, query, args))
            .await
    }

    /// A page of a raw SELECT, served from the cache when present.
    pub async fn paginate_sql(
        &self,
        db: &Database,
        page: u64,
        page_size: u64,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Page> {
        let shape = format!("PAGE {} {} {}", page, page_size, sql);
        let key = fingerprint(db.name(), &shape, args);
        self.cached(&key, db.paginate_sql(page, page_size, sql, args))
            .await
    }

    /// Drop the entry for one query.
    pub async fn evict(&self, db: &Database, sql: &str, args: &[Value]) -> DbResult<()> {
        let key = fingerprint(db.name(), sql, args);
        self.manager.delete(&self.name, &key).await
    }

    /// Drop every entry in this region.
    pub async fn clear(&self) -> DbResult<()> {
        self.manager.clear(&self.name).await
    }

    /// Serve `key` from the store, or run `load` and store its result. Store
    /// failures are logged and never fail the query.
    async fn cached<T, F>(&self, key: &str, load: F) -> DbResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = DbResult<T>>,
    {
        let store = self.manager.store_for(&self.name);

        match store.get(&self.name, key).await {
            Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    debug!(region = %self.name, key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(region = %self.name, key = %key, error = %e, "Discarding unreadable cache entry");
                }
            },
            Ok(None) => debug!(region = %self.name, key = %key, "Cache miss"),
            Err(e) => {
                warn!(region = %self.name, store = store.name(), error = %e, "Cache read failed, querying database");
            }
        }

        let value = load.await?;

        let stored = match serde_json::to_string(&value) {
            Ok(payload) => store.set(&self.name, key, payload, self.ttl).await,
            Err(e) => Err(DbError::from(e)),
        };
        if let Err(e) = stored {
            warn!(region = %self.name, store = store.name(), error = %e, "Cache write failed");
        }
        Ok(value)
    }
}

/// Collapse whitespace outside quoted text so formatting differences map to
/// the same key.
fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in sql.trim().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// SHA-256 hex digest of the database name, normalized SQL and typed
/// arguments.
pub fn fingerprint(db_name: &str, sql: &str, args: &[Value]) -> String {
    let typed: Vec<(&str, &Value)> = args.iter().map(|v| (v.type_name(), v)).collect();
    let args_json = serde_json::to_string(&typed).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(db_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_sql(sql).as_bytes());
    hasher.update([0u8]);
    hasher.update(args_json.as_bytes());
    format!("{:x}", hasher.finalize())
}
