//! Database handles.
//!
//! A [`Database`] is a cheap, cloneable handle to one pooled backend. Clones
//! share the pool and the primary-key cache. A handle obtained for a name that
//! is not registered is a marker: every operation on it fails with NotFound.

use crate::config::{DatabaseConfig, PoolOptions};
use crate::db::executor::Conn;
use crate::db::pool::DbPool;
use crate::db::session::Session;
use crate::db::transaction::Tx;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ExecResult, Page, PageQuery, Record, Value};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// State shared by every clone of a handle.
pub(crate) struct DatabaseInner {
    config: DatabaseConfig,
    pool: RwLock<DbPool>,
    limits: Mutex<PoolOptions>,
    primary_keys: RwLock<HashMap<String, Vec<String>>>,
}

impl DatabaseInner {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub(crate) fn legacy_pagination(&self) -> bool {
        self.config.legacy_pagination
    }

    /// Snapshot of the current pool; the lock is released before any I/O.
    pub(crate) fn pool(&self) -> DbPool {
        self.pool.read().clone()
    }

    pub(crate) fn cached_primary_keys(&self, table: &str) -> Option<Vec<String>> {
        self.primary_keys.read().get(table).cloned()
    }

    pub(crate) fn cache_primary_keys(&self, table: &str, keys: Vec<String>) {
        self.primary_keys.write().insert(table.to_string(), keys);
    }
}

/// Handle to one registered database.
#[derive(Clone)]
pub struct Database {
    name: String,
    inner: Option<Arc<DatabaseInner>>,
    timeout: Duration,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("dialect", &self.dialect())
            .field("timeout", &self.timeout)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Database {
    /// Open a pool for `config`. Statements use the configured query timeout,
    /// or `default_timeout` when the entry sets none.
    pub async fn connect(config: DatabaseConfig, default_timeout: Duration) -> DbResult<Self> {
        config
            .pool_options
            .validate()
            .map_err(DbError::invalid_input)?;

        let pool = DbPool::connect(&config).await?;
        let timeout = config.query_timeout.unwrap_or(default_timeout);
        info!(
            database = %config.name,
            dialect = %config.dialect,
            timeout_ms = timeout.as_millis() as u64,
            "Database opened"
        );

        Ok(Self {
            name: config.name.clone(),
            timeout,
            inner: Some(Arc::new(DatabaseInner {
                limits: Mutex::new(config.pool_options.clone()),
                pool: RwLock::new(pool),
                primary_keys: RwLock::new(HashMap::new()),
                config,
            })),
        })
    }

    /// A handle for an unknown name whose operations all fail with NotFound.
    pub(crate) fn marker(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: None,
            timeout: Duration::ZERO,
        }
    }

    fn live(&self) -> DbResult<&Arc<DatabaseInner>> {
        self.inner
            .as_ref()
            .ok_or_else(|| DbError::not_found(format!("database '{}'", self.name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend dialect; `None` for a marker handle.
    pub fn dialect(&self) -> Option<Dialect> {
        self.inner.as_ref().map(|inner| inner.dialect())
    }

    /// False for marker handles.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A clone of this handle whose statements use `timeout` as their deadline.
    /// `Duration::ZERO` runs statements without a deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Current pool limits; `None` for a marker handle.
    pub fn pool_options(&self) -> Option<PoolOptions> {
        self.inner.as_ref().map(|inner| inner.limits.lock().clone())
    }

    /// Rebuild the pool with `limits` overlaid on the current options. The new
    /// pool is swapped in before the old one is closed, so callers never see a
    /// missing pool. Work already running on the old pool finishes there.
    pub async fn set_pool_limits(&self, limits: PoolOptions) -> DbResult<()> {
        let inner = self.live()?;
        let options = inner.limits.lock().merged(&limits);
        options.validate().map_err(DbError::invalid_input)?;

        let mut config = inner.config.clone();
        config.pool_options = options.clone();
        let fresh = DbPool::connect(&config).await?;

        let old = std::mem::replace(&mut *inner.pool.write(), fresh);
        *inner.limits.lock() = options;
        old.close().await;

        info!(database = %self.name, "Pool limits updated");
        Ok(())
    }

    pub async fn ping(&self) -> DbResult<()> {
        self.live()?.pool().ping().await
    }

    /// Close the pool. Further operations on any clone fail.
    pub async fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.pool().close().await;
            info!(database = %self.name, "Database closed");
        }
    }

    pub async fn query(&self, sql: &str, args: &[Value]) -> DbResult<Vec<Record>> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .query(sql, args)
            .await
    }

    /// First row of the result; NotFound when there is none.
    pub async fn query_first(&self, sql: &str, args: &[Value]) -> DbResult<Record> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .query_first(sql, args)
            .await
    }

    pub async fn exec(&self, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .exec(sql, args)
            .await
    }

    pub async fn insert(&self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .insert(table, record)
            .await
    }

    /// UPDATE by primary key when every key column is set, INSERT otherwise.
    pub async fn save(&self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .save(table, record)
            .await
    }

    pub async fn update(
        &self,
        table: &str,
        record: &Record,
        filter: &str,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .update(table, record, filter, args)
            .await
    }

    pub async fn update_record(&self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .update_record(table, record)
            .await
    }

    pub async fn delete(&self, table: &str, filter: &str, args: &[Value]) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .delete(table, filter, args)
            .await
    }

    pub async fn delete_record(&self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .delete_record(table, record)
            .await
    }

    pub async fn count(&self, table: &str, filter: &str, args: &[Value]) -> DbResult<u64> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .count(table, filter, args)
            .await
    }

    /// Like [`Database::try_exists`], reporting `false` on failure.
    pub async fn exists(&self, table: &str, filter: &str, args: &[Value]) -> bool {
        match self.try_exists(table, filter, args).await {
            Ok(found) => found,
            Err(e) => {
                warn!(database = %self.name, table = %table, error = %e, "Existence check failed, reporting false");
                false
            }
        }
    }

    pub async fn try_exists(&self, table: &str, filter: &str, args: &[Value]) -> DbResult<bool> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .try_exists(table, filter, args)
            .await
    }

    /// Insert in chunks of `batch_size`, each chunk committed on its own. On
    /// failure the error carries the rows committed by earlier chunks.
    pub async fn batch_insert(
        &self,
        table: &str,
        records: &[Record],
        batch_size: usize,
    ) -> DbResult<u64> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .batch_insert(table, records, batch_size)
            .await
    }

    pub async fn paginate(
        &self,
        page: u64,
        page_size: u64,
        query: &PageQuery,
        args: &[Value],
    ) -> DbResult<Page> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .paginate(page, page_size, query, args)
            .await
    }

    pub async fn paginate_sql(
        &self,
        page: u64,
        page_size: u64,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Page> {
        let inner = self.live()?;
        let pool = inner.pool();
        Session::new(Conn::Pool(&pool), inner, self.timeout)
            .paginate_sql(page, page_size, sql, args)
            .await
    }

    /// Start a transaction under manual control.
    pub async fn begin(&self) -> DbResult<Tx> {
        let inner = self.live()?;
        let tx = inner.pool().begin().await?;
        Ok(Tx::new(Arc::clone(inner), tx, self.timeout))
    }

    /// Run `work` inside a transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back and returns the error when
    /// it returns `Err`. If `work` panics the transaction is rolled back and the
    /// panic resumes. `work` may end the transaction itself; it is then left as
    /// is.
    ///
    /// ```ignore
    /// db.transaction(|tx| Box::pin(async move {
    ///     tx.exec("UPDATE accounts SET balance = balance - ? WHERE id = ?", &[10.into(), 1.into()]).await?;
    ///     tx.exec("UPDATE accounts SET balance = balance + ? WHERE id = ?", &[10.into(), 2.into()]).await?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, DbResult<T>>,
    {
        let mut tx = self.begin().await?;
        let outcome = AssertUnwindSafe(work(&mut tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                if tx.is_active() {
                    tx.commit().await?;
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                if tx.is_active() {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(transaction_id = %tx.id(), error = %rollback_err, "Rollback failed");
                    }
                }
                Err(e)
            }
            Err(panic) => {
                error!(transaction_id = %tx.id(), "Unit of work panicked, rolling back");
                if tx.is_active() {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(transaction_id = %tx.id(), error = %rollback_err, "Rollback failed");
                    }
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
