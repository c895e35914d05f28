//! Per-dialect SQL text rules.
//!
//! Everything here is pure string work: placeholder rewriting, identifier
//! quoting, primary-key metadata queries and a small lexical scanner that the
//! pagination engine builds on. No SQL is parsed; literals and comments are
//! masked so that keyword and placeholder searches never look inside them.

use std::borrow::Cow;

use crate::models::Dialect;

// =============================================================================
// Lexical masking
// =============================================================================

/// Copy of `sql` with the contents of string literals, quoted identifiers and
/// comments replaced by spaces. Byte offsets are preserved, so positions found
/// in the mask index directly into the original text.
pub fn mask_sql(sql: &str, dialect: Dialect) -> Vec<u8> {
    let src = sql.as_bytes();
    let mut out = src.to_vec();
    let backslash_escapes = dialect == Dialect::MySql;
    let mut i = 0;

    while i < src.len() {
        match src[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < src.len() {
                    if backslash_escapes && quote == b'\'' && src[i] == b'\\' && i + 1 < src.len() {
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        i += 2;
                        continue;
                    }
                    if src[i] == quote {
                        // Doubled delimiter is an escaped quote.
                        if i + 1 < src.len() && src[i + 1] == quote {
                            out[i] = b' ';
                            out[i + 1] = b' ';
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    out[i] = b' ';
                    i += 1;
                }
                i += 1;
            }
            b'-' if src.get(i + 1) == Some(&b'-') => {
                while i < src.len() && src[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if src.get(i + 1) == Some(&b'*') => {
                out[i] = b' ';
                out[i + 1] = b' ';
                i += 2;
                while i < src.len() {
                    if src[i] == b'*' && src.get(i + 1) == Some(&b'/') {
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        i += 2;
                        break;
                    }
                    out[i] = b' ';
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    out
}

/// A bare word in masked SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Upper-cased text.
    pub word: String,
    pub start: usize,
    pub end: usize,
    /// Parenthesis nesting depth at the token.
    pub depth: usize,
    /// Next non-blank byte is `(`.
    pub call: bool,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Split masked SQL into words, tracking parenthesis depth.
pub fn tokenize(masked: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < masked.len() {
        let b = masked[i];
        if b == b'(' {
            depth += 1;
            i += 1;
        } else if b == b')' {
            depth = depth.saturating_sub(1);
            i += 1;
        } else if is_word_byte(b) {
            let start = i;
            while i < masked.len() && is_word_byte(masked[i]) {
                i += 1;
            }
            let call = masked[i..]
                .iter()
                .find(|c| !c.is_ascii_whitespace())
                .is_some_and(|c| *c == b'(');
            tokens.push(Token {
                word: String::from_utf8_lossy(&masked[start..i]).to_ascii_uppercase(),
                start,
                end: i,
                depth,
                call,
            });
        } else {
            i += 1;
        }
    }
    tokens
}

/// Index of every `first second` keyword pair (e.g. `GROUP BY`).
pub fn keyword_pairs(tokens: &[Token], first: &str, second: &str) -> Vec<usize> {
    tokens
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0].word == first && w[1].word == second)
        .map(|(idx, _)| idx)
        .collect()
}

/// Remove a leading keyword sequence (e.g. `["ORDER", "BY"]`) from a fragment.
pub fn strip_leading_keywords<'a>(fragment: &'a str, keywords: &[&str]) -> &'a str {
    let mut rest = fragment.trim();
    for kw in keywords {
        let Some(head) = rest.get(..kw.len()) else {
            return fragment.trim();
        };
        let boundary = rest[kw.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'));
        if !head.eq_ignore_ascii_case(kw) || !boundary {
            return fragment.trim();
        }
        rest = rest[kw.len()..].trim_start();
    }
    rest
}

// =============================================================================
// Placeholders
// =============================================================================

/// Rewrite `?` placeholders into the dialect's native form: `?` for MySQL and
/// SQLite, `$n` for PostgreSQL, `@pn` for SQL Server, `:n` for Oracle. `??`
/// yields a literal `?`. Placeholders inside literals and comments are kept.
pub fn rewrite_placeholders(sql: &str, dialect: Dialect) -> Cow<'_, str> {
    if !sql.contains('?') {
        return Cow::Borrowed(sql);
    }
    if matches!(dialect, Dialect::MySql | Dialect::Sqlite) && !sql.contains("??") {
        return Cow::Borrowed(sql);
    }

    let masked = mask_sql(sql, dialect);
    let mut out = String::with_capacity(sql.len() + 8);
    let mut last = 0;
    let mut n = 0;
    let mut i = 0;

    while i < masked.len() {
        if masked[i] != b'?' {
            i += 1;
            continue;
        }
        out.push_str(&sql[last..i]);
        if masked.get(i + 1) == Some(&b'?') {
            out.push('?');
            i += 2;
        } else {
            n += 1;
            match dialect {
                Dialect::MySql | Dialect::Sqlite => out.push('?'),
                Dialect::Postgres => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                Dialect::SqlServer => {
                    out.push_str("@p");
                    out.push_str(&n.to_string());
                }
                Dialect::Oracle => {
                    out.push(':');
                    out.push_str(&n.to_string());
                }
            }
            i += 1;
        }
        last = i;
    }
    out.push_str(&sql[last..]);
    Cow::Owned(out)
}

/// Number of bind placeholders in a statement written with `?`.
pub fn count_placeholders(sql: &str, dialect: Dialect) -> usize {
    let masked = mask_sql(sql, dialect);
    let mut count = 0;
    let mut i = 0;
    while i < masked.len() {
        if masked[i] == b'?' {
            if masked.get(i + 1) == Some(&b'?') {
                i += 2;
                continue;
            }
            count += 1;
        }
        i += 1;
    }
    count
}

// =============================================================================
// Identifiers
// =============================================================================

/// Quote one identifier for the dialect, escaping embedded delimiters.
pub fn quote_ident(ident: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
        _ => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

fn is_plain_ident(part: &str) -> bool {
    let mut chars = part.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a possibly schema-qualified name, quoting only the parts that need
/// it. Plain names stay unquoted so Oracle and PostgreSQL case folding apply.
pub fn ident(name: &str, dialect: Dialect) -> String {
    name.split('.')
        .map(|part| {
            if is_plain_ident(part) {
                part.to_string()
            } else {
                quote_ident(part, dialect)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

// =============================================================================
// Metadata
// =============================================================================

/// Query returning the primary-key column names of one table, in key order.
/// Takes the table name as its single `?` argument.
pub fn primary_key_sql(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => {
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION"
        }
        Dialect::Postgres => {
            "SELECT kcu.column_name::text AS column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = current_schema() \
               AND tc.table_name::text = ? \
             ORDER BY kcu.ordinal_position"
        }
        Dialect::Sqlite => "SELECT name AS column_name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
        Dialect::SqlServer => {
            "SELECT kcu.COLUMN_NAME AS column_name \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
               ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
              AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
             WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_NAME = ? \
             ORDER BY kcu.ORDINAL_POSITION"
        }
        Dialect::Oracle => {
            "SELECT cols.column_name AS column_name \
             FROM all_constraints cons \
             JOIN all_cons_columns cols \
               ON cons.constraint_name = cols.constraint_name \
              AND cons.owner = cols.owner \
             WHERE cons.constraint_type = 'P' \
               AND cons.owner = SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA') \
               AND cols.table_name = UPPER(?) \
             ORDER BY cols.position"
        }
    }
}

/// Liveness probe statement.
pub fn ping_sql(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Oracle => "SELECT 1 FROM DUAL",
        _ => "SELECT 1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_literals_and_comments() {
        let sql = "SELECT 'a ? b', \"x?\" -- what?\nFROM t /* ? */ WHERE id = ?";
        let masked = String::from_utf8(mask_sql(sql, Dialect::Postgres)).unwrap();
        assert_eq!(masked.len(), sql.len());
        assert_eq!(masked.matches('?').count(), 1);
        assert!(masked.ends_with("id = ?"));
    }

    #[test]
    fn test_mask_escaped_quotes() {
        let sql = "SELECT 'it''s ?' , ?";
        let masked = String::from_utf8(mask_sql(sql, Dialect::Sqlite)).unwrap();
        assert_eq!(masked.matches('?').count(), 1);

        let sql = r"SELECT 'it\'s ?', ?";
        let masked = String::from_utf8(mask_sql(sql, Dialect::MySql)).unwrap();
        assert_eq!(masked.matches('?').count(), 1);
    }

    #[test]
    fn test_mask_multibyte_text_stays_aligned() {
        let sql = "SELECT 'héllo ?' AS g, ? FROM t";
        let masked = mask_sql(sql, Dialect::Postgres);
        assert_eq!(masked.len(), sql.len());
        let rewritten = rewrite_placeholders(sql, Dialect::Postgres);
        assert_eq!(rewritten, "SELECT 'héllo ?' AS g, $1 FROM t");
    }

    #[test]
    fn test_rewrite_placeholders_per_dialect() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        assert_eq!(rewrite_placeholders(sql, Dialect::MySql), sql);
        assert_eq!(rewrite_placeholders(sql, Dialect::Sqlite), sql);
        assert_eq!(
            rewrite_placeholders(sql, Dialect::Postgres),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
        assert_eq!(
            rewrite_placeholders(sql, Dialect::SqlServer),
            "SELECT * FROM t WHERE a = @p1 AND b = @p2"
        );
        assert_eq!(
            rewrite_placeholders(sql, Dialect::Oracle),
            "SELECT * FROM t WHERE a = :1 AND b = :2"
        );
    }

    #[test]
    fn test_rewrite_literal_question_mark() {
        let sql = "SELECT data ?? 'k' FROM t WHERE id = ? AND note = '?'";
        assert_eq!(
            rewrite_placeholders(sql, Dialect::Postgres),
            "SELECT data ? 'k' FROM t WHERE id = $1 AND note = '?'"
        );
        assert_eq!(count_placeholders(sql, Dialect::Postgres), 1);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("user", Dialect::MySql), "`user`");
        assert_eq!(quote_ident("user", Dialect::Postgres), "\"user\"");
        assert_eq!(quote_ident("a]b", Dialect::SqlServer), "[a]]b]");
        assert_eq!(quote_ident("a\"b", Dialect::Oracle), "\"a\"\"b\"");
    }

    #[test]
    fn test_ident_quotes_only_when_needed() {
        assert_eq!(ident("users", Dialect::Postgres), "users");
        assert_eq!(ident("app.users", Dialect::MySql), "app.users");
        assert_eq!(ident("order items", Dialect::MySql), "`order items`");
        assert_eq!(ident("dbo.2fa", Dialect::SqlServer), "dbo.[2fa]");
    }

    #[test]
    fn test_strip_leading_keywords() {
        assert_eq!(strip_leading_keywords("  WHERE a = 1", &["WHERE"]), "a = 1");
        assert_eq!(strip_leading_keywords("where\na = 1", &["WHERE"]), "a = 1");
        assert_eq!(strip_leading_keywords("whereby = 1", &["WHERE"]), "whereby = 1");
        assert_eq!(strip_leading_keywords("order  by id", &["ORDER", "BY"]), "id");
        assert_eq!(strip_leading_keywords("ordinal", &["ORDER", "BY"]), "ordinal");
        assert_eq!(strip_leading_keywords("", &["WHERE"]), "");
    }

    #[test]
    fn test_tokenize_tracks_depth_and_calls() {
        let masked = mask_sql("SELECT COUNT (x), (SELECT y FROM z) FROM t", Dialect::Sqlite);
        let tokens = tokenize(&masked);
        let count = tokens.iter().find(|t| t.word == "COUNT").unwrap();
        assert!(count.call);
        assert_eq!(count.depth, 0);
        let inner_from = tokens.iter().filter(|t| t.word == "FROM").collect::<Vec<_>>();
        assert_eq!(inner_from[0].depth, 1);
        assert_eq!(inner_from[1].depth, 0);
    }

    #[test]
    fn test_primary_key_sql_takes_one_argument() {
        for dialect in [
            Dialect::MySql,
            Dialect::Postgres,
            Dialect::Sqlite,
            Dialect::SqlServer,
            Dialect::Oracle,
        ] {
            assert_eq!(count_placeholders(primary_key_sql(dialect), dialect), 1);
        }
    }
}
