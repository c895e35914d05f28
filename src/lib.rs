//! dbkit
//!
//! Dialect-agnostic data access over dynamic [`Record`]s for SQLite,
//! PostgreSQL and MySQL: CRUD, scoped transactions, count-aware pagination
//! and query-result caching.
//!
//! Databases live in a [`Registry`]. The free functions in this crate
//! (`open`, `use_db`, `select`, `current`, ...) act on a process-wide
//! registry; construct a [`Registry`] directly when isolation is needed.
//!
//! ```ignore
//! dbkit::open(Dialect::Sqlite, "sqlite:app.db", 1).await?;
//! let db = dbkit::current();
//! db.insert("users", &Record::new().with("name", "Alice").with("age", 30)).await?;
//! let page = db.paginate(1, 20, &PageQuery::new("users").order_by("id"), &[]).await?;
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use cache::{CacheManager, CacheRegion, CacheStore, LocalStore};
#[cfg(feature = "redis-cache")]
pub use cache::RedisStore;
pub use config::{Config, DatabaseConfig, PoolOptions};
pub use db::{Database, Registry, Tx};
pub use error::{DbError, DbResult};
pub use models::{Dialect, ExecResult, Page, PageQuery, Record, TransactionState, Value};

use futures_util::future::BoxFuture;
use std::sync::LazyLock;
use tracing::info;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
static CACHE: LazyLock<CacheManager> = LazyLock::new(CacheManager::new);

/// The process-wide registry.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// The process-wide cache manager.
pub fn cache() -> &'static CacheManager {
    &CACHE
}

/// Open the unnamed database on the process-wide registry.
pub async fn open(dialect: Dialect, dsn: &str, max_open: u32) -> DbResult<Database> {
    REGISTRY.open(dialect, dsn, max_open).await
}

pub async fn open_named(
    name: &str,
    dialect: Dialect,
    dsn: &str,
    max_open: u32,
) -> DbResult<Database> {
    REGISTRY.open_named(name, dialect, dsn, max_open).await
}

/// Handle for `name`, or a marker whose operations fail with NotFound.
pub fn use_db(name: &str) -> Database {
    REGISTRY.use_db(name)
}

pub fn select(name: &str) -> DbResult<()> {
    REGISTRY.select(name)
}

pub fn current() -> Database {
    REGISTRY.current()
}

/// Close every database on the process-wide registry.
pub async fn close() {
    REGISTRY.close().await
}

/// Run `work` in a transaction on the current database.
pub async fn transaction<T, F>(work: F) -> DbResult<T>
where
    F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, DbResult<T>>,
{
    REGISTRY.transaction(work).await
}

/// Apply `config` to the process-wide registry and cache: install tracing,
/// set the statement timeout, open every configured database, and attach
/// the Redis store and the local sweep task when configured.
pub async fn init(config: &Config) -> DbResult<Vec<Database>> {
    logging::init_tracing(config);

    REGISTRY.set_query_timeout(config.query_timeout_duration());
    let opened = REGISTRY.open_all(config).await?;

    #[cfg(feature = "redis-cache")]
    if let Some(url) = &config.redis_url {
        let store = RedisStore::connect(url, config.cache_prefix.clone()).await?;
        CACHE.set_default_store(std::sync::Arc::new(store));
    }

    if let Some(interval) = config.cache_sweep_interval_duration() {
        CACHE.local_store().start_sweep_task(interval);
    }

    info!(databases = opened.len(), "dbkit initialized");
    Ok(opened)
}
