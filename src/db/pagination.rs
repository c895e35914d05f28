//! Pagination planning.
//!
//! A page needs two statements: a row count and a limited data query. The
//! count normally drops the select list and ORDER BY (`SELECT COUNT(*) FROM t
//! WHERE ...`). That is only correct when each source row yields exactly one
//! result row, so the select and filter fragments are scanned for constructs
//! that break the assumption (DISTINCT, grouping, aggregates, window functions,
//! set operators). When any is found the count wraps the query as a derived
//! table instead.
//!
//! The scan is lexical: literals and comments are masked and only keywords at
//! parenthesis depth 0 are considered, so subqueries in the filter do not
//! force the slower count.

use crate::db::crud::where_clause;
use crate::db::dialect::{
    Token, count_placeholders, ident, keyword_pairs, mask_sql, strip_leading_keywords, tokenize,
};
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, PageQuery};

/// Aggregate functions that collapse rows when called at depth 0.
const AGGREGATES: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "GROUP_CONCAT",
    "STRING_AGG",
    "ARRAY_AGG",
    "LISTAGG",
    "JSON_AGG",
    "JSONB_AGG",
    "JSON_ARRAYAGG",
    "JSON_OBJECTAGG",
    "BIT_AND",
    "BIT_OR",
    "BOOL_AND",
    "BOOL_OR",
    "STDDEV",
    "VARIANCE",
];

const SET_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT", "MINUS"];

/// Keywords that end a statement's row set and cannot be followed by another
/// limiting clause.
const LIMITING: &[&str] = &["LIMIT", "FETCH", "OFFSET"];

/// Column added by the ROWNUM wrapper; removed from returned records.
pub const ROWNUM_COLUMN: &str = "rn__";

/// Count and data statements for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    /// Requested page, clamped to at least 1.
    pub page: u64,
    pub page_size: u64,
    pub offset: u64,
    pub count_sql: String,
    pub data_sql: String,
    /// Whether the count wraps the query as a derived table.
    pub subquery_count: bool,
    /// Whether records carry the synthetic ROWNUM column.
    pub strip_rownum: bool,
}

fn depth0(tokens: &[Token]) -> Vec<Token> {
    tokens.iter().filter(|t| t.depth == 0).cloned().collect()
}

fn has_any(tokens: &[Token], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.word.as_str()))
}

fn has_aggregate_call(tokens: &[Token]) -> bool {
    tokens
        .iter()
        .any(|t| t.call && AGGREGATES.contains(&t.word.as_str()))
}

/// Whether a select list yields other than one row per source row.
fn select_needs_subquery(select: &str, dialect: Dialect) -> bool {
    let tokens = depth0(&tokenize(&mask_sql(select, dialect)));
    has_any(&tokens, &["DISTINCT", "OVER", "WITH"])
        || has_any(&tokens, SET_OPERATORS)
        || has_aggregate_call(&tokens)
        || !keyword_pairs(&tokens, "GROUP", "BY").is_empty()
        // Arguments bound in the select list must survive into the count.
        || count_placeholders(select, dialect) > 0
}

/// Whether a WHERE fragment carries grouping or set semantics.
fn filter_needs_subquery(filter: &str, dialect: Dialect) -> bool {
    let tokens = depth0(&tokenize(&mask_sql(filter, dialect)));
    has_any(&tokens, &["HAVING"])
        || has_any(&tokens, SET_OPERATORS)
        || !keyword_pairs(&tokens, "GROUP", "BY").is_empty()
}

/// Ordering and limiting belong in their own fragments, never in the filter.
fn check_filter(filter: &str, dialect: Dialect) -> DbResult<()> {
    let tokens = depth0(&tokenize(&mask_sql(filter, dialect)));
    if !keyword_pairs(&tokens, "ORDER", "BY").is_empty() {
        return Err(DbError::invalid_input(
            "Filter must not contain ORDER BY; use PageQuery::order_by",
        ));
    }
    if has_any(&tokens, LIMITING) {
        return Err(DbError::invalid_input(
            "Filter must not contain a limiting clause",
        ));
    }
    Ok(())
}

/// Whether `tokens` hold a SQL Server `TOP n` / `TOP (n)` row limit: `TOP`
/// at the head of a select list, followed by a number or a parenthesis.
fn has_top_clause(tokens: &[Token]) -> bool {
    tokens.iter().enumerate().any(|(idx, t)| {
        if t.word != "TOP" {
            return false;
        }
        let heads_select = match idx.checked_sub(1).map(|prev| tokens[prev].word.as_str()) {
            None => true,
            Some(prev) => matches!(prev, "SELECT" | "DISTINCT" | "ALL"),
        };
        let limited = t.call
            || tokens
                .get(idx + 1)
                .is_some_and(|next| next.word.starts_with(|c: char| c.is_ascii_digit()));
        heads_select && limited
    })
}

fn derived_alias(dialect: Dialect) -> &'static str {
    match dialect {
        // Oracle rejects AS for table aliases and unquoted names starting with `_`
        Dialect::Oracle => " \"_sub\"",
        _ => " AS _sub",
    }
}

fn subquery_count(inner: &str, dialect: Dialect) -> String {
    format!("SELECT COUNT(*) FROM ({}){}", inner, derived_alias(dialect))
}

/// Append the dialect's limiting clause. Returns the statement and whether
/// the ROWNUM column must be stripped.
fn limit_statement(
    dialect: Dialect,
    legacy: bool,
    base: &str,
    has_order: bool,
    offset: u64,
    size: u64,
) -> (String, bool) {
    match dialect {
        Dialect::MySql | Dialect::Postgres | Dialect::Sqlite => {
            (format!("{} LIMIT {} OFFSET {}", base, size, offset), false)
        }
        Dialect::SqlServer => {
            let order = if has_order { "" } else { " ORDER BY (SELECT NULL)" };
            (
                format!(
                    "{}{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    base, order, offset, size
                ),
                false,
            )
        }
        Dialect::Oracle if legacy => (
            format!(
                "SELECT * FROM (SELECT a__.*, ROWNUM {rn} FROM ({base}) a__ WHERE ROWNUM <= {end}) WHERE {rn} > {start}",
                rn = ROWNUM_COLUMN,
                base = base,
                end = offset + size,
                start = offset
            ),
            true,
        ),
        Dialect::Oracle => (
            format!(
                "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                base, offset, size
            ),
            false,
        ),
    }
}

fn clamp(page: u64, page_size: u64) -> DbResult<(u64, u64)> {
    if page_size < 1 {
        return Err(DbError::invalid_input("page_size must be at least 1"));
    }
    let page = page.max(1);
    let offset = (page - 1).saturating_mul(page_size);
    Ok((page, offset))
}

/// Plan a page over `SELECT <select> FROM <table> [WHERE ..] [ORDER BY ..]`.
pub fn plan(
    dialect: Dialect,
    legacy: bool,
    page: u64,
    page_size: u64,
    query: &PageQuery,
) -> DbResult<PagePlan> {
    let (page, offset) = clamp(page, page_size)?;
    if query.table.trim().is_empty() {
        return Err(DbError::invalid_input("PageQuery.table must not be empty"));
    }

    let select = match query.select.trim() {
        "" => "*",
        s => s,
    };
    let filter = strip_leading_keywords(&query.filter, &["WHERE"]);
    check_filter(filter, dialect)?;
    if has_top_clause(&depth0(&tokenize(&mask_sql(select, dialect)))) {
        return Err(DbError::invalid_input(
            "Select list already has a TOP row limit",
        ));
    }
    let order_by = strip_leading_keywords(&query.order_by, &["ORDER", "BY"]);
    if count_placeholders(order_by, dialect) > 0 {
        return Err(DbError::invalid_input(
            "ORDER BY must not contain bind placeholders",
        ));
    }

    let table = ident(query.table.trim(), dialect);
    let from_where = format!("FROM {}{}", table, where_clause(filter));
    let base = format!("SELECT {} {}", select, from_where);

    let fallback = select_needs_subquery(select, dialect) || filter_needs_subquery(filter, dialect);
    let count_sql = if fallback {
        subquery_count(&base, dialect)
    } else {
        format!("SELECT COUNT(*) {}", from_where)
    };

    let ordered = if order_by.is_empty() {
        base
    } else {
        format!("{} ORDER BY {}", base, order_by)
    };
    let (data_sql, strip_rownum) =
        limit_statement(dialect, legacy, &ordered, !order_by.is_empty(), offset, page_size);

    Ok(PagePlan {
        page,
        page_size,
        offset,
        count_sql,
        data_sql,
        subquery_count: fallback,
        strip_rownum,
    })
}

/// Plan a page over a complete SELECT statement.
///
/// The top-level FROM and trailing ORDER BY are located at depth 0. The fast
/// count replaces the select list with `COUNT(*)` and drops the ORDER BY; the
/// fallback wraps the statement, minus its ORDER BY, as a derived table.
pub fn plan_sql(
    dialect: Dialect,
    legacy: bool,
    page: u64,
    page_size: u64,
    sql: &str,
) -> DbResult<PagePlan> {
    let (page, offset) = clamp(page, page_size)?;
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(DbError::invalid_input("SQL must not be empty"));
    }

    let masked = mask_sql(sql, dialect);
    let top = depth0(&tokenize(&masked));

    if has_any(&top, LIMITING) || has_top_clause(&top) {
        return Err(DbError::invalid_input(
            "Statement already has a limiting clause",
        ));
    }

    let order_start = keyword_pairs(&top, "ORDER", "BY")
        .last()
        .map(|&idx| top[idx].start);
    let body = match order_start {
        Some(start) => sql[..start].trim_end(),
        None => sql,
    };
    if let Some(start) = order_start {
        if count_placeholders(&sql[start..], dialect) > 0 {
            return Err(DbError::invalid_input(
                "ORDER BY must not contain bind placeholders",
            ));
        }
    }

    let starts_with_select = top.first().is_some_and(|t| t.word == "SELECT");
    let from = top.iter().find(|t| t.word == "FROM");

    let fast_from = match from {
        Some(from)
            if starts_with_select
                && !has_any(&top, &["DISTINCT", "HAVING", "OVER"])
                && !has_any(&top, SET_OPERATORS)
                && !has_aggregate_call(&top)
                && keyword_pairs(&top, "GROUP", "BY").is_empty()
                && count_placeholders(&sql[..from.start], dialect) == 0 =>
        {
            Some(from.start)
        }
        _ => None,
    };

    let count_sql = match fast_from {
        Some(start) => format!("SELECT COUNT(*) {}", &body[start..]),
        None => subquery_count(body, dialect),
    };
    let (data_sql, strip_rownum) =
        limit_statement(dialect, legacy, sql, order_start.is_some(), offset, page_size);

    Ok(PagePlan {
        page,
        page_size,
        offset,
        count_sql,
        data_sql,
        subquery_count: fast_from.is_none(),
        strip_rownum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> PageQuery {
        PageQuery::new("users")
    }

    #[test]
    fn test_fast_count_drops_order_by() {
        let q = users()
            .select("id, name")
            .filter("WHERE age > ?")
            .order_by("ORDER BY id DESC");
        let p = plan(Dialect::MySql, false, 2, 10, &q).unwrap();
        assert_eq!(p.count_sql, "SELECT COUNT(*) FROM users WHERE age > ?");
        assert_eq!(
            p.data_sql,
            "SELECT id, name FROM users WHERE age > ? ORDER BY id DESC LIMIT 10 OFFSET 10"
        );
        assert!(!p.subquery_count);
        assert!(!p.count_sql.contains("ORDER"));
    }

    #[test]
    fn test_distinct_and_group_by_use_subquery() {
        let q = users().select("DISTINCT city");
        let p = plan(Dialect::Postgres, false, 1, 20, &q).unwrap();
        assert_eq!(
            p.count_sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT city FROM users) AS _sub"
        );

        let q = users().select("city").filter("1 = 1 GROUP BY city");
        let p = plan(Dialect::Postgres, false, 1, 20, &q).unwrap();
        assert!(p.subquery_count);

        let q = users().select("city, count(*) AS n").filter("age > 3 group by city");
        let p = plan(Dialect::Sqlite, false, 1, 20, &q).unwrap();
        assert!(p.count_sql.starts_with("SELECT COUNT(*) FROM (SELECT city, count(*) AS n"));
    }

    #[test]
    fn test_aggregate_and_window_use_subquery() {
        for select in [
            "sum(amount)",
            "GROUP_CONCAT(name)",
            "string_agg(name, ',')",
            "row_number() OVER (ORDER BY id) AS rn",
        ] {
            let p = plan(Dialect::MySql, false, 1, 5, &users().select(select)).unwrap();
            assert!(p.subquery_count, "{select}");
        }
    }

    #[test]
    fn test_keywords_in_literals_and_subqueries_are_ignored() {
        let q = users()
            .select("id, 'DISTINCT' AS label, max_score")
            .filter("id IN (SELECT user_id FROM orders GROUP BY user_id)");
        let p = plan(Dialect::Postgres, false, 1, 5, &q).unwrap();
        assert!(!p.subquery_count);
        assert_eq!(
            p.count_sql,
            "SELECT COUNT(*) FROM users WHERE id IN (SELECT user_id FROM orders GROUP BY user_id)"
        );
    }

    #[test]
    fn test_oracle_derived_table_has_no_as() {
        let p = plan(Dialect::Oracle, false, 1, 5, &users().select("DISTINCT city")).unwrap();
        assert_eq!(
            p.count_sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT city FROM users) \"_sub\""
        );
    }

    #[test]
    fn test_sqlserver_synthesizes_order_by() {
        let p = plan(Dialect::SqlServer, false, 3, 10, &users()).unwrap();
        assert_eq!(
            p.data_sql,
            "SELECT * FROM users ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );

        let p = plan(Dialect::SqlServer, false, 1, 10, &users().order_by("id")).unwrap();
        assert_eq!(
            p.data_sql,
            "SELECT * FROM users ORDER BY id OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_oracle_pagination() {
        let q = users().order_by("id");
        let p = plan(Dialect::Oracle, false, 2, 10, &q).unwrap();
        assert_eq!(
            p.data_sql,
            "SELECT * FROM users ORDER BY id OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert!(!p.strip_rownum);

        let p = plan(Dialect::Oracle, true, 2, 10, &q).unwrap();
        assert_eq!(
            p.data_sql,
            "SELECT * FROM (SELECT a__.*, ROWNUM rn__ FROM (SELECT * FROM users ORDER BY id) a__ \
             WHERE ROWNUM <= 20) WHERE rn__ > 10"
        );
        assert!(p.strip_rownum);
    }

    #[test]
    fn test_page_bounds() {
        let p = plan(Dialect::Sqlite, false, 0, 10, &users()).unwrap();
        assert_eq!(p.page, 1);
        assert_eq!(p.offset, 0);

        let err = super::plan(Dialect::Sqlite, false, 1, 0, &users()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_placeholders_in_order_by_rejected() {
        let q = users().order_by("FIELD(id, ?)");
        assert!(plan(Dialect::MySql, false, 1, 10, &q).is_err());
    }

    #[test]
    fn test_plan_sql_fast_path() {
        let sql = "SELECT u.id, (SELECT COUNT(*) FROM orders o WHERE o.uid = u.id) AS n \
                   FROM users u WHERE u.age > ? ORDER BY u.id;";
        let p = plan_sql(Dialect::Postgres, false, 1, 10, sql).unwrap();
        assert_eq!(p.count_sql, "SELECT COUNT(*) FROM users u WHERE u.age > ?");
        assert!(p.data_sql.ends_with("ORDER BY u.id LIMIT 10 OFFSET 0"));
        assert!(!p.data_sql.contains(';'));
    }

    #[test]
    fn test_plan_sql_fallback() {
        let sql = "SELECT city, COUNT(*) FROM users GROUP BY city ORDER BY city";
        let p = plan_sql(Dialect::MySql, false, 1, 10, sql).unwrap();
        assert_eq!(
            p.count_sql,
            "SELECT COUNT(*) FROM (SELECT city, COUNT(*) FROM users GROUP BY city) AS _sub"
        );

        let sql = "SELECT id FROM a UNION SELECT id FROM b";
        let p = plan_sql(Dialect::Sqlite, false, 1, 10, sql).unwrap();
        assert!(p.subquery_count);

        let sql = "WITH t AS (SELECT 1 AS x) SELECT x FROM t";
        let p = plan_sql(Dialect::Postgres, false, 1, 10, sql).unwrap();
        assert!(p.subquery_count);
    }

    #[test]
    fn test_plan_sql_window_order_by_is_not_trailing() {
        let sql = "SELECT id, rank() OVER (ORDER BY score) FROM users";
        let p = plan_sql(Dialect::SqlServer, false, 1, 10, sql).unwrap();
        assert!(p.data_sql.contains("ORDER BY (SELECT NULL)"));
        assert!(p.subquery_count);
    }

    #[test]
    fn test_plan_sql_rejects_existing_limit() {
        let err = plan_sql(Dialect::MySql, false, 1, 10, "SELECT * FROM t LIMIT 5").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_filter_rejects_order_by_and_limits() {
        let q = users().filter("id > 1 ORDER BY id");
        let err = plan(Dialect::Sqlite, false, 1, 10, &q).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));

        let q = users().filter("WHERE id > ? LIMIT 5");
        assert!(plan(Dialect::MySql, false, 1, 10, &q).is_err());

        // nested ordering and quoted text are fine
        let q = users()
            .filter("id IN (SELECT user_id FROM orders ORDER BY created LIMIT 3) AND note <> 'order by'");
        let p = plan(Dialect::MySql, false, 1, 10, &q).unwrap();
        assert!(p.count_sql.starts_with("SELECT COUNT(*) FROM users WHERE id IN"));
        assert!(!p.subquery_count);
    }

    #[test]
    fn test_top_row_limit_rejected() {
        let err = plan_sql(Dialect::SqlServer, false, 1, 10, "SELECT TOP 5 id FROM u").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(plan_sql(Dialect::SqlServer, false, 1, 10, "SELECT DISTINCT TOP (5) id FROM u").is_err());
        assert!(plan(Dialect::SqlServer, false, 1, 10, &users().select("TOP 5 id")).is_err());

        // a column named top is not a row limit
        let p = plan_sql(Dialect::Postgres, false, 1, 10, "SELECT top FROM u").unwrap();
        assert_eq!(p.count_sql, "SELECT COUNT(*) FROM u");
        let p = plan_sql(Dialect::MySql, false, 1, 10, "SELECT id FROM u WHERE id IN (SELECT TOP 1 id FROM v)")
            .unwrap();
        assert!(!p.subquery_count);
    }
}
