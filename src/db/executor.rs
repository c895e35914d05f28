//! Statement execution.
//!
//! This module runs SQL against either a pool or an open transaction with:
//! - `?` placeholders rewritten for the target dialect
//! - positional [`Value`] arguments
//! - a per-statement deadline
//! - rows mapped into [`Record`]s
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules
//! (`mysql`, `postgres`, `sqlite`). Each submodule is generic over
//! `sqlx::Executor`, so the same code serves `&Pool` and `&mut Connection`
//! borrowed out of a transaction.

use crate::db::dialect::rewrite_placeholders;
use crate::db::pool::DbPool;
use crate::db::transaction::DbTransaction;
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ExecResult, Record, Value};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Where a statement runs.
pub(crate) enum Conn<'a> {
    Pool(&'a DbPool),
    Tx(&'a mut DbTransaction),
}

impl Conn<'_> {
    pub(crate) fn dialect(&self) -> Dialect {
        match self {
            Conn::Pool(pool) => pool.dialect(),
            Conn::Tx(tx) => tx.dialect(),
        }
    }
}

/// Run a row-returning statement.
pub(crate) async fn fetch_records(
    conn: &mut Conn<'_>,
    sql: &str,
    args: &[Value],
    deadline: Duration,
) -> DbResult<Vec<Record>> {
    let start = Instant::now();
    let rewritten = rewrite_placeholders(sql, conn.dialect());
    let sql: &str = &rewritten;

    debug!(sql = %sql, params = args.len(), timeout_ms = deadline.as_millis() as u64, "Executing query");

    let records = match conn {
        Conn::Pool(pool) => match *pool {
            DbPool::MySql(p) => with_deadline(deadline, mysql::fetch(p, sql, args)).await?,
            DbPool::Postgres(p) => with_deadline(deadline, postgres::fetch(p, sql, args)).await?,
            DbPool::SQLite(p) => with_deadline(deadline, sqlite::fetch(p, sql, args)).await?,
        },
        Conn::Tx(tx) => match &mut **tx {
            DbTransaction::MySql(t) => {
                with_deadline(deadline, mysql::fetch(&mut **t, sql, args)).await?
            }
            DbTransaction::Postgres(t) => {
                with_deadline(deadline, postgres::fetch(&mut **t, sql, args)).await?
            }
            DbTransaction::SQLite(t) => {
                with_deadline(deadline, sqlite::fetch(&mut **t, sql, args)).await?
            }
        },
    };

    debug!(
        rows = records.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Query finished"
    );
    Ok(records)
}

/// Run a statement that returns no rows.
pub(crate) async fn execute(
    conn: &mut Conn<'_>,
    sql: &str,
    args: &[Value],
    deadline: Duration,
) -> DbResult<ExecResult> {
    let start = Instant::now();
    let rewritten = rewrite_placeholders(sql, conn.dialect());
    let sql: &str = &rewritten;

    debug!(sql = %sql, params = args.len(), timeout_ms = deadline.as_millis() as u64, "Executing statement");

    let result = match conn {
        Conn::Pool(pool) => match *pool {
            DbPool::MySql(p) => with_deadline(deadline, mysql::execute(p, sql, args)).await?,
            DbPool::Postgres(p) => {
                with_deadline(deadline, postgres::execute(p, sql, args)).await?
            }
            DbPool::SQLite(p) => with_deadline(deadline, sqlite::execute(p, sql, args)).await?,
        },
        Conn::Tx(tx) => match &mut **tx {
            DbTransaction::MySql(t) => {
                with_deadline(deadline, mysql::execute(&mut **t, sql, args)).await?
            }
            DbTransaction::Postgres(t) => {
                with_deadline(deadline, postgres::execute(&mut **t, sql, args)).await?
            }
            DbTransaction::SQLite(t) => {
                with_deadline(deadline, sqlite::execute(&mut **t, sql, args)).await?
            }
        },
    };

    debug!(
        rows_affected = result.rows_affected,
        last_insert_id = ?result.last_insert_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Statement finished"
    );
    Ok(result)
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Await `fut` under `deadline`. A zero deadline means no limit.
async fn with_deadline<T, F>(deadline: Duration, fut: F) -> DbResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    if deadline.is_zero() {
        return fut.await.map_err(DbError::from);
    }
    match timeout(deadline, fut).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(timeout_error("statement execution", deadline)),
    }
}

fn timeout_error(operation: &str, deadline: Duration) -> DbError {
    DbError::timeout(operation, deadline.as_millis() as u64)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Statements without arguments go through the unprepared path so that
// statements the server refuses to prepare still run.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::{Executor, MySql};

    pub async fn fetch<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<Vec<Record>, sqlx::Error>
    where
        E: Executor<'c, Database = MySql>,
    {
        let rows = if args.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_mysql_param(query, arg);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToRecord::to_record).collect())
    }

    pub async fn execute<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<ExecResult, sqlx::Error>
    where
        E: Executor<'c, Database = MySql>,
    {
        let result = if args.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_mysql_param(query, arg);
            }
            query.execute(executor).await?
        };
        Ok(ExecResult::new(
            result.rows_affected(),
            i64::try_from(result.last_insert_id()).ok(),
        ))
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::{Executor, Postgres};

    pub async fn fetch<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<Vec<Record>, sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let rows = if args.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_postgres_param(query, arg);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToRecord::to_record).collect())
    }

    /// PostgreSQL has no last-insert-id; generated keys come back through
    /// `RETURNING` on the fetch path.
    pub async fn execute<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<ExecResult, sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let result = if args.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_postgres_param(query, arg);
            }
            query.execute(executor).await?
        };
        Ok(ExecResult::affected(result.rows_affected()))
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::{Executor, Sqlite};

    pub async fn fetch<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<Vec<Record>, sqlx::Error>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let rows = if args.is_empty() {
            executor.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_sqlite_param(query, arg);
            }
            query.fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToRecord::to_record).collect())
    }

    pub async fn execute<'c, E>(executor: E, sql: &'c str, args: &'c [Value]) -> Result<ExecResult, sqlx::Error>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = if args.is_empty() {
            executor.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_sqlite_param(query, arg);
            }
            query.execute(executor).await?
        };
        Ok(ExecResult::new(
            result.rows_affected(),
            Some(result.last_insert_rowid()),
        ))
    }
}
