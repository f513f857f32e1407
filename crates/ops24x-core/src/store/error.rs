//! Storage errors

use std::fmt;
use thiserror::Error;

use super::StagedRecord;

/// A staged row rejected by a table constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    /// The rejected row
    pub record: StagedRecord,
    /// Constraint reported by the database, e.g. `UNIQUE constraint failed: metadata.parameter`
    pub constraint: String,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected: {}", self.record, self.constraint)
    }
}

/// Errors that can occur while persisting records
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Schema error in table '{table}': {detail}")]
    Schema { table: String, detail: String },

    #[error("{count} record(s) rejected by constraints, {committed} committed", count = .violations.len())]
    Constraint {
        committed: usize,
        violations: Vec<ConstraintViolation>,
    },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    /// Rows rejected by constraints, empty for other errors
    pub fn violations(&self) -> &[ConstraintViolation] {
        match self {
            StoreError::Constraint { violations, .. } => violations,
            _ => &[],
        }
    }
}
