//! Data models for dbkit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod page;
pub mod query;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use connection::{Dialect, TransactionState, masked_connection_string};
pub use page::{Page, PageQuery, total_pages};
pub use query::ExecResult;
pub use record::Record;
pub use value::Value;
