//! Query-related data models.
//!
//! This module defines the outcome of write statements.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key of the last inserted row, when the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            // MySQL and SQLite report 0 when no key was generated.
            last_insert_id: last_insert_id.filter(|id| *id > 0),
        }
    }

    /// Result for statements that never generate keys (UPDATE, DELETE).
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_result_filters_zero_id() {
        assert_eq!(ExecResult::new(1, Some(0)).last_insert_id, None);
        assert_eq!(ExecResult::new(1, Some(12)).last_insert_id, Some(12));
        assert_eq!(ExecResult::affected(3).rows_affected, 3);
    }

    #[test]
    fn test_exec_result_serialization() {
        let json = serde_json::to_string(&ExecResult::affected(2)).unwrap();
        assert_eq!(json, r#"{"rows_affected":2}"#);
    }
}
