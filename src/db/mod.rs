//! Database access layer.
//!
//! This module provides:
//! - Connection pools per backend and the dispatch macros over them
//! - Dialect rules: placeholders, identifier quoting, key metadata
//! - Statement execution with row-to-record mapping
//! - Write builders and pagination planning
//! - Database handles, the registry and transactions

pub mod crud;
pub mod database;
pub mod dialect;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod pagination;
pub mod params;
pub mod pool;
pub mod registry;
pub(crate) mod session;
pub mod transaction;
pub mod types;

pub use crud::Statement;
pub use database::Database;
pub use pagination::PagePlan;
pub use pool::DbPool;
pub use registry::Registry;
pub use transaction::{DbTransaction, Tx};
