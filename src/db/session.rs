//! The operation set shared by [`Database`](crate::db::Database) and
//! [`Tx`](crate::db::Tx).
//!
//! A session borrows either a pool or an open transaction for the duration of
//! one call. Everything above it only decides which connection to hand in.

use crate::db::crud::{self, Statement};
use crate::db::database::DatabaseInner;
use crate::db::dialect::primary_key_sql;
use crate::db::executor::{self, Conn};
use crate::db::pagination::{self, PagePlan, ROWNUM_COLUMN};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ExecResult, Page, PageQuery, Record, Value, total_pages};
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) struct Session<'a> {
    conn: Conn<'a>,
    db: &'a DatabaseInner,
    timeout: Duration,
}

impl<'a> Session<'a> {
    pub(crate) fn new(conn: Conn<'a>, db: &'a DatabaseInner, timeout: Duration) -> Self {
        Self { conn, db, timeout }
    }

    fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub(crate) async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Record>> {
        executor::fetch_records(&mut self.conn, sql, args, self.timeout).await
    }

    pub(crate) async fn query_first(&mut self, sql: &str, args: &[Value]) -> DbResult<Record> {
        self.query(sql, args)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("Query returned no rows"))
    }

    pub(crate) async fn exec(&mut self, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        executor::execute(&mut self.conn, sql, args, self.timeout).await
    }

    async fn exec_statement(&mut self, stmt: &Statement) -> DbResult<ExecResult> {
        self.exec(&stmt.sql, &stmt.args).await
    }

    /// Primary-key columns of `table` in key order, cached per handle.
    pub(crate) async fn primary_keys(&mut self, table: &str) -> DbResult<Vec<String>> {
        if let Some(keys) = self.db.cached_primary_keys(table) {
            return Ok(keys);
        }

        // Metadata tables store the bare name; drop any schema prefix and quotes.
        let bare = table
            .rsplit('.')
            .next()
            .unwrap_or(table)
            .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));
        let rows = self
            .query(primary_key_sql(self.dialect()), &[Value::from(bare)])
            .await?;
        let keys: Vec<String> = rows
            .iter()
            .map(|r| r.string("column_name"))
            .filter(|k| !k.is_empty())
            .collect();

        debug!(database = %self.db.name(), table = %table, keys = ?keys, "Resolved primary key");
        self.db.cache_primary_keys(table, keys.clone());
        Ok(keys)
    }

    /// INSERT and report the generated key. PostgreSQL reads it back through
    /// `RETURNING` when the table has a single-column key not already supplied.
    pub(crate) async fn insert(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let dialect = self.dialect();
        if dialect != Dialect::Postgres {
            let stmt = crud::insert_sql(table, record, dialect, None)?;
            return self.exec_statement(&stmt).await;
        }

        let keys = self.primary_keys(table).await?;
        let returning = match keys.as_slice() {
            [pk] if record.get(pk).is_empty_key() => Some(pk.as_str()),
            _ => None,
        };
        let stmt = crud::insert_sql(table, record, dialect, returning)?;
        match returning {
            Some(pk) => {
                let rows = self.query(&stmt.sql, &stmt.args).await?;
                let id = rows.first().map(|r| r.int64(pk));
                Ok(ExecResult::new(rows.len() as u64, id))
            }
            None => self.exec_statement(&stmt).await,
        }
    }

    /// UPDATE when every primary-key column holds a value, otherwise INSERT
    /// with the empty key columns left out.
    pub(crate) async fn save(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let keys = self.primary_keys(table).await?;
        let keyed = !keys.is_empty() && keys.iter().all(|k| !record.get(k).is_empty_key());

        if keyed {
            debug!(table = %table, "Saving record as update");
            return self.update_record(table, record).await;
        }

        let mut row = record.clone();
        for key in &keys {
            if row.get(key).is_empty_key() {
                row.remove(key);
            }
        }
        debug!(table = %table, "Saving record as insert");
        self.insert(table, &row).await
    }

    pub(crate) async fn update(
        &mut self,
        table: &str,
        record: &Record,
        filter: &str,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        let stmt = crud::update_sql(table, record, filter, args, self.dialect())?;
        let result = self.exec_statement(&stmt).await?;
        Ok(ExecResult::affected(result.rows_affected))
    }

    pub(crate) async fn update_record(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let keys = self.primary_keys(table).await?;
        let stmt = crud::update_by_key(table, record, &keys, self.dialect())?;
        let result = self.exec_statement(&stmt).await?;
        Ok(ExecResult::affected(result.rows_affected))
    }

    pub(crate) async fn delete(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<ExecResult> {
        let stmt = crud::delete_sql(table, filter, args, self.dialect());
        let result = self.exec_statement(&stmt).await?;
        Ok(ExecResult::affected(result.rows_affected))
    }

    pub(crate) async fn delete_record(&mut self, table: &str, record: &Record) -> DbResult<ExecResult> {
        let keys = self.primary_keys(table).await?;
        let stmt = crud::delete_by_key(table, record, &keys, self.dialect())?;
        let result = self.exec_statement(&stmt).await?;
        Ok(ExecResult::affected(result.rows_affected))
    }

    pub(crate) async fn count(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<u64> {
        let sql = crud::count_sql(table, filter, self.dialect());
        let rows = self.query(&sql, args).await?;
        Ok(first_count(&rows))
    }

    pub(crate) async fn try_exists(&mut self, table: &str, filter: &str, args: &[Value]) -> DbResult<bool> {
        Ok(self.count(table, filter, args).await? > 0)
    }

    pub(crate) async fn exists(&mut self, table: &str, filter: &str, args: &[Value]) -> bool {
        match self.try_exists(table, filter, args).await {
            Ok(found) => found,
            Err(e) => {
                warn!(table = %table, error = %e, "Existence check failed, reporting false");
                false
            }
        }
    }

    /// Insert `records` in chunks of `batch_size`, one multi-row INSERT per
    /// chunk. On a pool each chunk commits on its own; inside a transaction
    /// the chunks share it. Returns the number of rows written.
    pub(crate) async fn batch_insert(
        &mut self,
        table: &str,
        records: &[Record],
        batch_size: usize,
    ) -> DbResult<u64> {
        if batch_size < 1 {
            return Err(DbError::invalid_input("batch_size must be at least 1"));
        }

        let dialect = self.dialect();
        let mut written: u64 = 0;
        for (idx, chunk) in records.chunks(batch_size).enumerate() {
            let outcome = match crud::batch_insert_sql(table, chunk, dialect) {
                Ok(stmt) => self.run_batch(&stmt).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(rows) => written += rows,
                Err(e) => {
                    warn!(
                        table = %table,
                        batch_index = idx,
                        committed_rows = written,
                        error = %e,
                        "Batch insert failed"
                    );
                    return Err(DbError::batch(written, idx, e));
                }
            }
        }

        info!(table = %table, rows = written, "Batch insert finished");
        Ok(written)
    }

    async fn run_batch(&mut self, stmt: &Statement) -> DbResult<u64> {
        let pool: Option<&DbPool> = match &self.conn {
            Conn::Pool(pool) => Some(*pool),
            Conn::Tx(_) => None,
        };

        let Some(pool) = pool else {
            return Ok(self.exec_statement(stmt).await?.rows_affected);
        };

        let mut tx = pool.begin().await?;
        let result = executor::execute(&mut Conn::Tx(&mut tx), &stmt.sql, &stmt.args, self.timeout).await;
        match result {
            Ok(result) => {
                tx.commit().await?;
                Ok(result.rows_affected)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback of failed batch failed");
                }
                Err(e)
            }
        }
    }

    pub(crate) async fn paginate(
        &mut self,
        page: u64,
        page_size: u64,
        query: &PageQuery,
        args: &[Value],
    ) -> DbResult<Page> {
        let plan = pagination::plan(
            self.dialect(),
            self.db.legacy_pagination(),
            page,
            page_size,
            query,
        )?;
        self.run_page(plan, args).await
    }

    pub(crate) async fn paginate_sql(
        &mut self,
        page: u64,
        page_size: u64,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Page> {
        let plan = pagination::plan_sql(
            self.dialect(),
            self.db.legacy_pagination(),
            page,
            page_size,
            sql,
        )?;
        self.run_page(plan, args).await
    }

    async fn run_page(&mut self, plan: PagePlan, args: &[Value]) -> DbResult<Page> {
        let counted = self.query(&plan.count_sql, args).await?;
        let total_row = first_count(&counted);
        let total_page = total_pages(total_row, plan.page_size);

        if total_row == 0 || plan.page > total_page {
            return Ok(Page::empty(plan.page, plan.page_size, total_row));
        }

        let mut list = self.query(&plan.data_sql, args).await?;
        if plan.strip_rownum {
            for record in &mut list {
                record.remove(ROWNUM_COLUMN);
                record.remove(&ROWNUM_COLUMN.to_ascii_uppercase());
            }
        }

        Ok(Page {
            list,
            page: plan.page,
            page_size: plan.page_size,
            total_page,
            total_row,
        })
    }
}

/// First column of the first row as a non-negative count.
fn first_count(rows: &[Record]) -> u64 {
    rows.first()
        .and_then(|r| r.iter().next().map(|(_, v)| v.as_i64()))
        .map_or(0, |n| u64::try_from(n).unwrap_or(0))
}
