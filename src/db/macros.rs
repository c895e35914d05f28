//! Database dispatch macros for reducing code duplication.
//!
//! These macros generate the three-way match over backend variants so the
//! per-backend arms stay side by side and readable.

/// Macro for generating database dispatch match arms over `DbPool`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Same as [`impl_db_dispatch!`], over `DbTransaction` variants.
#[macro_export]
macro_rules! impl_tx_dispatch {
    ($tx:expr, { $($variant:ident($t:ident) => $body:expr),+ $(,)? }) => {
        match $tx {
            $(
                $crate::db::transaction::DbTransaction::$variant($t) => $body,
            )+
        }
    };
}
