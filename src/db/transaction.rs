//! Transactions.
//!
//! [`Tx`] is a handle bound to one open transaction. It exposes the same
//! operation set as [`Database`](crate::db::Database) and must end in exactly
//! one of commit or rollback. A `Tx` dropped while still active is rolled back
//! by the driver when its connection returns to the pool.
//!
//! [`Database::transaction`](crate::db::Database::transaction) wraps a unit of
//! work: commit on `Ok`, rollback on `Err`, and rollback then re-panic when the
//! unit of work panics.

use crate::db::database::DatabaseInner;
use crate::db::executor::Conn;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ExecResult, Page, PageQuery, Record, TransactionState, Value};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    pub fn dialect(&self) -> Dialect {
        match self {
            DbTransaction::MySql(_) => Dialect::MySql,
            DbTransaction::Postgres(_) => Dialect::Postgres,
            DbTransaction::SQLite(_) => Dialect::Sqlite,
        }
    }

    pub async fn commit(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.commit().await.map_err(DbError::from),
            Postgres(tx) => tx.commit().await.map_err(DbError::from),
            SQLite(tx) => tx.commit().await.map_err(DbError::from),
        })
    }

    pub async fn rollback(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.rollback().await.map_err(DbError::from),
            Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        })
    }
}

/// Generate a unique transaction ID.
pub fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// An open transaction on one database handle.
pub struct Tx {
    id: String,
    db: Arc<DatabaseInner>,
    inner: Option<DbTransaction>,
    state: TransactionState,
    timeout: Duration,
    started_at: Instant,
}

impl Tx {
    pub(crate) fn new(db: Arc<DatabaseInner>, inner: DbTransaction, timeout: Duration) -> Self {
        let id = generate_transaction_id();
        info!(transaction_id = %id, database = %db.name(), "Transaction started");
        Self {
            id,
            db,
            inner: Some(inner),
            state: TransactionState::Active,
            timeout,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }

    pub fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    fn session(&mut self) -> DbResult<Session<'_>> {
        match self.inner.as_mut() {
            Some(inner) => Ok(Session::new(Conn::Tx(inner), &self.db, self.timeout)),
            None => Err(DbError::transaction_state(
                format!("Transaction is already {}", self.state),
                self.id.clone(),
            )),
        }
    }

    fn take_active(&mut self, action: &str) -> DbResult<DbTransaction> {
        self.inner.take().ok_or_else(|| {
            DbError::transaction_state(
                format!("Cannot {} a transaction that is already {}", action, self.state),
                self.id.clone(),
            )
        })
    }

    /// Commit. A failed commit leaves the transaction rolled back.
    pub async fn commit(&mut self) -> DbResult<()> {
        let inner = self.take_active("commit")?;
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        match inner.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                info!(transaction_id = %self.id, elapsed_ms, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                warn!(transaction_id = %self.id, error = %e, "Transaction commit failed");
                Err(e)
            }
        }
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let inner = self.take_active("roll back")?;
        self.state = TransactionState::RolledBack;
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        inner.rollback().await?;
        info!(transaction_id = %self.id, elapsed_ms, "Transaction rolled back");
        Ok(())
    }

    pub async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Record>> {
        self.session()?.query(sql, args).await
    }

    pub async fn query_first(&mut self, sql: &str, args: &[Value]) -> DbResult<Record> {
        self.session()?.query_first(sql, args).await
    }

    pub async fn exec(&mut self, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        self.session()?.exec(sql, args).await
    }

    pub async fn insert(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        self.session()?.insert(table, record).await
    }

    pub async fn save(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        self.session()?.save(table, record).await
    }

    pub async fn update(
        &mut self,
        table: &str,
        record: &Record,
        filter: &str,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        self.session()?.update(table, record, filter, args).await
    }

    pub async fn update_record(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        self.session()?.update_record(table, record).await
    }

    pub async fn delete(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<ExecResult> {
        self.session()?.delete(table, filter, args).await
    }

    pub async fn delete_record(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        self.session()?.delete_record(table, record).await
    }

    pub async fn count(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<u64> {
        self.session()?.count(table, filter, args).await
    }

    pub async fn exists(&mut self, table: &str, filter: &str, args: &[Value]) -> bool {
        match self.session() {
            Ok(mut session) => session.exists(table, filter, args).await,
            Err(e) => {
                warn!(error = %e, "Existence check on a finished transaction");
                false
            }
        }
    }

    pub async fn try_exists(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<bool> {
        self.session()?.try_exists(table, filter, args).await
    }

    /// Multi-row inserts inside this transaction; no per-batch commits.
    pub async fn batch_insert(
        &mut self,
        table: &str,
        records: &[Record],
        batch_size: usize,
    ) -> DbResult<u64> {
        self.session()?.batch_insert(table, records, batch_size).await
    }

    pub async fn paginate(
        &mut self,
        page: u64,
        page_size: u64,
        query: &PageQuery,
        args: &[Value],
    ) -> DbResult<Page> {
        self.session()?.paginate(page, page_size, query, args).await
    }

    pub async fn paginate_sql(
        &mut self,
        page: u64,
        page_size: u64,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Page> {
        self.session()?.paginate_sql(page, page_size, sql, args).await
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(
                transaction_id = %self.id,
                database = %self.db.name(),
                "Transaction dropped while active, the driver will roll it back"
            );
        }
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("database", &self.db.name())
            .field("state", &self.state)
            .finish()
    }
}
