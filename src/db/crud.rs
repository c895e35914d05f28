//! SQL text builders for record writes.
//!
//! Builders emit `?` placeholders and leave rewriting to the executor, so the
//! same [`Statement`] can run on any dialect. They are public because SQL
//! Server and Oracle have no bundled driver: callers generate the statement
//! here and hand [`Statement::native_sql`] to their own client.

use crate::db::dialect::{ident, rewrite_placeholders, strip_leading_keywords};
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, Record, Value};

/// SQL text plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    fn new(sql: String, args: Vec<Value>) -> Self {
        Self { sql, args }
    }

    /// The statement with placeholders in the dialect's native form.
    pub fn native_sql(&self, dialect: Dialect) -> String {
        rewrite_placeholders(&self.sql, dialect).into_owned()
    }
}

/// ` WHERE <filter>` or nothing for a blank fragment.
pub(crate) fn where_clause(filter: &str) -> String {
    let filter = strip_leading_keywords(filter, &["WHERE"]);
    if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn column_list(columns: &[&str], dialect: Dialect) -> String {
    columns
        .iter()
        .map(|c| ident(c, dialect))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO t (cols) VALUES (?, ...)`. With `returning`, PostgreSQL gets a
/// `RETURNING` clause for the generated key.
pub fn insert_sql(
    table: &str,
    record: &Record,
    dialect: Dialect,
    returning: Option<&str>,
) -> DbResult<Statement> {
    if record.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Cannot insert an empty record into {}",
            table
        )));
    }
    let columns = record.keys();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        ident(table, dialect),
        column_list(&columns, dialect),
        placeholders(columns.len())
    );
    if let (Dialect::Postgres, Some(pk)) = (dialect, returning) {
        sql.push_str(" RETURNING ");
        sql.push_str(&ident(pk, dialect));
    }
    let args = record.iter().map(|(_, v)| v.clone()).collect();
    Ok(Statement::new(sql, args))
}

/// `UPDATE t SET a = ?, ... [WHERE filter]`. Record values bind before
/// `filter_args`.
pub fn update_sql(
    table: &str,
    record: &Record,
    filter: &str,
    filter_args: &[Value],
    dialect: Dialect,
) -> DbResult<Statement> {
    if record.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Nothing to update in {}",
            table
        )));
    }
    let assignments = record
        .keys()
        .iter()
        .map(|c| format!("{} = ?", ident(c, dialect)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {}{}",
        ident(table, dialect),
        assignments,
        where_clause(filter)
    );
    let mut args: Vec<Value> = record.iter().map(|(_, v)| v.clone()).collect();
    args.extend_from_slice(filter_args);
    Ok(Statement::new(sql, args))
}

/// Check that `record` holds a usable value for every key column and build
/// the `k1 = ? AND k2 = ?` filter.
fn key_filter(
    table: &str,
    record: &Record,
    keys: &[String],
    dialect: Dialect,
) -> DbResult<(String, Vec<Value>)> {
    if keys.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Table {} has no primary key",
            table
        )));
    }
    let mut parts = Vec::with_capacity(keys.len());
    let mut args = Vec::with_capacity(keys.len());
    for key in keys {
        let value = record.get(key);
        if value.is_empty_key() {
            return Err(DbError::invalid_input(format!(
                "Primary key column {} of {} is empty",
                key, table
            )));
        }
        parts.push(format!("{} = ?", ident(key, dialect)));
        args.push(value.clone());
    }
    Ok((parts.join(" AND "), args))
}

/// UPDATE keyed on the primary key; key columns are not reassigned.
pub fn update_by_key(
    table: &str,
    record: &Record,
    keys: &[String],
    dialect: Dialect,
) -> DbResult<Statement> {
    let (filter, filter_args) = key_filter(table, record, keys, dialect)?;
    let changes: Record = record
        .iter()
        .filter(|(k, _)| !keys.iter().any(|pk| pk.as_str() == *k))
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    update_sql(table, &changes, &filter, &filter_args, dialect)
}

/// `DELETE FROM t [WHERE filter]`.
pub fn delete_sql(table: &str, filter: &str, filter_args: &[Value], dialect: Dialect) -> Statement {
    let sql = format!("DELETE FROM {}{}", ident(table, dialect), where_clause(filter));
    Statement::new(sql, filter_args.to_vec())
}

/// DELETE keyed on the primary key.
pub fn delete_by_key(
    table: &str,
    record: &Record,
    keys: &[String],
    dialect: Dialect,
) -> DbResult<Statement> {
    let (filter, filter_args) = key_filter(table, record, keys, dialect)?;
    Ok(delete_sql(table, &filter, &filter_args, dialect))
}

/// `SELECT COUNT(*) FROM t [WHERE filter]`.
pub fn count_sql(table: &str, filter: &str, dialect: Dialect) -> String {
    format!(
        "SELECT COUNT(*) FROM {}{}",
        ident(table, dialect),
        where_clause(filter)
    )
}

/// One multi-row INSERT for `records`.
///
/// The column list is the union of all record keys in first-seen order;
/// records missing a column bind NULL for it. Oracle has no multi-row
/// `VALUES`, so it gets `INSERT ALL INTO ... SELECT 1 FROM DUAL`.
pub fn batch_insert_sql(table: &str, records: &[Record], dialect: Dialect) -> DbResult<Statement> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
    }
    if columns.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Cannot insert empty records into {}",
            table
        )));
    }

    let table_sql = ident(table, dialect);
    let cols_sql = column_list(&columns, dialect);
    let row = format!("({})", placeholders(columns.len()));

    let mut args = Vec::with_capacity(records.len() * columns.len());
    for record in records {
        for column in &columns {
            args.push(record.get(column).clone());
        }
    }

    let sql = if dialect == Dialect::Oracle {
        let into = format!("INTO {} ({}) VALUES {}", table_sql, cols_sql, row);
        format!(
            "INSERT ALL {} SELECT 1 FROM DUAL",
            vec![into; records.len()].join(" ")
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            table_sql,
            cols_sql,
            vec![row; records.len()].join(", ")
        )
    };
    Ok(Statement::new(sql, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Record {
        Record::new().with("name", "Alice").with("age", 30)
    }

    #[test]
    fn test_insert_sql() {
        let stmt = insert_sql("users", &alice(), Dialect::MySql, None).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO users (name, age) VALUES (?, ?)");
        assert_eq!(stmt.args, vec![Value::from("Alice"), Value::Int(30)]);

        let stmt = insert_sql("users", &alice(), Dialect::Postgres, Some("id")).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO users (name, age) VALUES (?, ?) RETURNING id"
        );
        assert_eq!(
            stmt.native_sql(Dialect::Postgres),
            "INSERT INTO users (name, age) VALUES ($1, $2) RETURNING id"
        );

        // RETURNING is PostgreSQL only
        let stmt = insert_sql("users", &alice(), Dialect::Sqlite, Some("id")).unwrap();
        assert!(!stmt.sql.contains("RETURNING"));

        assert!(insert_sql("users", &Record::new(), Dialect::MySql, None).is_err());
    }

    #[test]
    fn test_insert_quotes_unusual_columns() {
        let record = Record::new().with("first name", "A").with("age", 1);
        let stmt = insert_sql("my table", &record, Dialect::MySql, None).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO `my table` (`first name`, age) VALUES (?, ?)"
        );
        let stmt = insert_sql("dbo.t", &record, Dialect::SqlServer, None).unwrap();
        assert!(stmt.sql.starts_with("INSERT INTO dbo.t ([first name]"));
    }

    #[test]
    fn test_update_sql_binds_record_then_filter() {
        let stmt = update_sql(
            "users",
            &Record::new().with("age", 31),
            "WHERE name = ?",
            &[Value::from("Alice")],
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE users SET age = ? WHERE name = ?");
        assert_eq!(stmt.args, vec![Value::Int(31), Value::from("Alice")]);

        let stmt = update_sql("users", &Record::new().with("age", 1), "", &[], Dialect::Sqlite)
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE users SET age = ?");
    }

    #[test]
    fn test_update_by_key() {
        let record = alice().with("id", 7);
        let keys = vec!["id".to_string()];
        let stmt = update_by_key("users", &record, &keys, Dialect::Postgres).unwrap();
        assert_eq!(stmt.sql, "UPDATE users SET name = ?, age = ? WHERE id = ?");
        assert_eq!(stmt.args.last(), Some(&Value::Int(7)));

        let err = update_by_key("users", &alice(), &keys, Dialect::Postgres).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));

        let err = update_by_key("users", &alice(), &[], Dialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("no primary key"));

        // Only key columns: nothing to update
        let only_key = Record::new().with("id", 7);
        assert!(update_by_key("users", &only_key, &keys, Dialect::Postgres).is_err());
    }

    #[test]
    fn test_delete_sql() {
        let stmt = delete_sql("users", "age > ?", &[Value::Int(18)], Dialect::MySql);
        assert_eq!(stmt.sql, "DELETE FROM users WHERE age > ?");

        let keys = vec!["tenant".to_string(), "id".to_string()];
        let record = Record::new().with("id", 3).with("tenant", "acme");
        let stmt = delete_by_key("users", &record, &keys, Dialect::MySql).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM users WHERE tenant = ? AND id = ?");
        assert_eq!(stmt.args, vec![Value::from("acme"), Value::Int(3)]);
    }

    #[test]
    fn test_count_sql() {
        assert_eq!(count_sql("users", "", Dialect::MySql), "SELECT COUNT(*) FROM users");
        assert_eq!(
            count_sql("users", " where age > ?", Dialect::MySql),
            "SELECT COUNT(*) FROM users WHERE age > ?"
        );
    }

    #[test]
    fn test_batch_insert_union_of_columns() {
        let records = vec![
            Record::new().with("name", "a").with("age", 1),
            Record::new().with("name", "b").with("email", "b@x"),
        ];
        let stmt = batch_insert_sql("users", &records, Dialect::Sqlite).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO users (name, age, email) VALUES (?, ?, ?), (?, ?, ?)"
        );
        assert_eq!(
            stmt.args,
            vec![
                Value::from("a"),
                Value::Int(1),
                Value::Null,
                Value::from("b"),
                Value::Null,
                Value::from("b@x"),
            ]
        );
    }

    #[test]
    fn test_batch_insert_oracle() {
        let records = vec![Record::new().with("name", "a"), Record::new().with("name", "b")];
        let stmt = batch_insert_sql("users", &records, Dialect::Oracle).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT ALL INTO users (name) VALUES (?) INTO users (name) VALUES (?) SELECT 1 FROM DUAL"
        );
        assert_eq!(
            stmt.native_sql(Dialect::Oracle),
            "INSERT ALL INTO users (name) VALUES (:1) INTO users (name) VALUES (:2) SELECT 1 FROM DUAL"
        );
    }
}
