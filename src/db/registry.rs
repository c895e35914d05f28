//! Named database handles with a "current" selection.
//!
//! The registry lock guards only the name map and the current pointer. It is
//! never held across a connect or close: duplicate names are checked before
//! connecting and again before inserting, and a pool built by the losing side
//! of a race is closed afterwards.

use crate::config::{
    Config, DEFAULT_DATABASE_NAME, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseConfig, PoolOptions,
};
use crate::db::database::Database;
use crate::db::transaction::Tx;
use crate::error::{DbError, DbResult};
use crate::models::Dialect;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Default)]
struct RegistryState {
    databases: HashMap<String, Database>,
    current: Option<String>,
}

/// Registry of open databases.
pub struct Registry {
    state: RwLock<RegistryState>,
    query_timeout: RwLock<Duration>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_query_timeout(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    /// Registry whose handles default to `timeout` per statement.
    pub fn with_query_timeout(timeout: Duration) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            query_timeout: RwLock::new(timeout),
        }
    }

    /// Default statement deadline for databases opened from now on; zero
    /// disables it.
    pub fn set_query_timeout(&self, timeout: Duration) {
        *self.query_timeout.write() = timeout;
    }

    pub fn query_timeout(&self) -> Duration {
        *self.query_timeout.read()
    }

    /// Open the unnamed database, registered as "default".
    pub async fn open(&self, dialect: Dialect, dsn: &str, max_open: u32) -> DbResult<Database> {
        let config = DatabaseConfig::new(
            DEFAULT_DATABASE_NAME,
            dialect,
            dsn,
            PoolOptions::with_max_open(max_open),
        );
        self.open_config(config).await
    }

    /// Open a database under an explicit name. "default" is reserved.
    pub async fn open_named(
        &self,
        name: &str,
        dialect: Dialect,
        dsn: &str,
        max_open: u32,
    ) -> DbResult<Database> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::invalid_input("Database name must not be empty"));
        }
        if name.eq_ignore_ascii_case(DEFAULT_DATABASE_NAME) {
            return Err(DbError::invalid_input(format!(
                "'{}' is reserved for the unnamed database",
                DEFAULT_DATABASE_NAME
            )));
        }
        let config = DatabaseConfig::new(name, dialect, dsn, PoolOptions::with_max_open(max_open));
        self.open_config(config).await
    }

    /// Open and register a database. The first database registered becomes
    /// current.
    pub async fn open_config(&self, config: DatabaseConfig) -> DbResult<Database> {
        let name = config.name.clone();
        if self.state.read().databases.contains_key(&name) {
            return Err(DbError::duplicate_name(name));
        }

        let db = Database::connect(config, self.query_timeout()).await?;

        let registered = {
            let mut state = self.state.write();
            if state.databases.contains_key(&name) {
                false
            } else {
                state.databases.insert(name.clone(), db.clone());
                if state.current.is_none() {
                    state.current = Some(name.clone());
                }
                true
            }
        };

        if !registered {
            debug!(database = %name, "Lost registration race, closing new pool");
            db.close().await;
            return Err(DbError::duplicate_name(name));
        }

        info!(database = %name, "Database registered");
        Ok(db)
    }

    /// Open every `--database` entry of `config`, in order.
    pub async fn open_all(&self, config: &Config) -> DbResult<Vec<Database>> {
        let entries = config.parse_databases().map_err(DbError::invalid_input)?;
        let mut opened = Vec::with_capacity(entries.len());
        for entry in entries {
            opened.push(self.open_config(entry).await?);
        }
        Ok(opened)
    }

    /// Handle for `name`, or a marker whose operations fail with NotFound.
    pub fn use_db(&self, name: &str) -> Database {
        self.state
            .read()
            .databases
            .get(name)
            .cloned()
            .unwrap_or_else(|| Database::marker(name))
    }

    /// Make `name` the current database. Unknown names leave the current
    /// selection unchanged.
    pub fn select(&self, name: &str) -> DbResult<()> {
        let mut state = self.state.write();
        if !state.databases.contains_key(name) {
            return Err(DbError::not_found(format!("database '{}'", name)));
        }
        state.current = Some(name.to_string());
        debug!(database = %name, "Current database selected");
        Ok(())
    }

    /// Snapshot of the current database, or a marker when none is open.
    pub fn current(&self) -> Database {
        let state = self.state.read();
        state
            .current
            .as_ref()
            .and_then(|name| state.databases.get(name))
            .cloned()
            .unwrap_or_else(|| Database::marker(DEFAULT_DATABASE_NAME))
    }

    pub fn current_name(&self) -> Option<String> {
        self.state.read().current.clone()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().databases.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().databases.contains_key(name)
    }

    /// Close one database and drop it from the registry.
    pub async fn close_named(&self, name: &str) -> DbResult<()> {
        let removed = {
            let mut state = self.state.write();
            let removed = state.databases.remove(name);
            if removed.is_some() && state.current.as_deref() == Some(name) {
                state.current = None;
            }
            removed
        };
        match removed {
            Some(db) => {
                db.close().await;
                Ok(())
            }
            None => Err(DbError::not_found(format!("database '{}'", name))),
        }
    }

    /// Close every database and clear the registry. Safe to call repeatedly.
    pub async fn close(&self) {
        let drained: Vec<Database> = {
            let mut state = self.state.write();
            state.current = None;
            state.databases.drain().map(|(_, db)| db).collect()
        };
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for db in drained {
            db.close().await;
        }
        info!(count, "Registry closed");
    }

    /// Ping the current database.
    pub async fn ping(&self) -> DbResult<()> {
        self.current().ping().await
    }

    /// Run `work` in a transaction on the current database.
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, DbResult<T>>,
    {
        self.current().transaction(work).await
    }
}
