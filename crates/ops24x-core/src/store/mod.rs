//! Sample Storage
//!
//! Durable, transactional storage for module metadata and speed samples.
//!
//! Writes are staged in memory and become durable only when the caller commits, so the
//! caller decides where commit boundaries fall.

mod error;
mod sqlite;

pub use error::{ConstraintViolation, StoreError};
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One module setting, stored once per parameter name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Parameter name (unique)
    pub parameter: String,
    /// Reported value, kept as text
    pub value: String,
}

impl MetadataRecord {
    /// Create a new metadata record
    pub fn new(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
        }
    }
}

/// A single speed observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Module timer value in seconds (unique)
    pub time: f64,
    /// Measured speed in the module's configured units
    pub speed: f64,
}

impl SpeedSample {
    /// Create a new speed sample
    pub fn new(time: f64, speed: f64) -> Self {
        Self { time, speed }
    }
}

/// A write waiting for the next commit
#[derive(Debug, Clone, PartialEq)]
pub enum StagedRecord {
    /// Row for the `metadata` table
    Metadata(MetadataRecord),
    /// Row for the `speed_samples` table
    Sample(SpeedSample),
}

impl fmt::Display for StagedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagedRecord::Metadata(m) => write!(f, "metadata({:?}, {:?})", m.parameter, m.value),
            StagedRecord::Sample(s) => write!(f, "speed_samples({}, {})", s.time, s.speed),
        }
    }
}

/// What to do with staged writes when a store is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Commit staged writes before closing
    Commit,
    /// Drop staged writes
    Discard,
}

/// Result of a fully successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    /// Rows made durable
    pub rows: usize,
}

/// Append-only sink for metadata and speed samples
pub trait Store {
    /// Create the tables if absent and verify their shape if present
    fn create_schema(&mut self) -> Result<(), StoreError>;

    /// Stage a metadata row
    fn insert_metadata(&mut self, record: MetadataRecord) -> Result<(), StoreError>;

    /// Stage a speed sample
    fn insert_sample(&mut self, sample: SpeedSample) -> Result<(), StoreError>;

    /// Make every staged write durable in one transaction.
    ///
    /// Rows that violate a constraint are skipped and reported through
    /// [`StoreError::Constraint`]; every other staged row is still committed.
    fn commit(&mut self) -> Result<CommitReport, StoreError>;

    /// Number of staged, uncommitted writes
    fn pending(&self) -> usize;

    /// Release the storage handle, committing or discarding staged writes first.
    /// Calling it on a closed store is a no-op.
    fn close(&mut self, policy: PendingPolicy) -> Result<(), StoreError>;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn create_schema(&mut self) -> Result<(), StoreError> {
        (**self).create_schema()
    }

    fn insert_metadata(&mut self, record: MetadataRecord) -> Result<(), StoreError> {
        (**self).insert_metadata(record)
    }

    fn insert_sample(&mut self, sample: SpeedSample) -> Result<(), StoreError> {
        (**self).insert_sample(sample)
    }

    fn commit(&mut self) -> Result<CommitReport, StoreError> {
        (**self).commit()
    }

    fn pending(&self) -> usize {
        (**self).pending()
    }

    fn close(&mut self, policy: PendingPolicy) -> Result<(), StoreError> {
        (**self).close(policy)
    }
}

impl<S: Store + ?Sized> Store for &mut S {
    fn create_schema(&mut self) -> Result<(), StoreError> {
        (**self).create_schema()
    }

    fn insert_metadata(&mut self, record: MetadataRecord) -> Result<(), StoreError> {
        (**self).insert_metadata(record)
    }

    fn insert_sample(&mut self, sample: SpeedSample) -> Result<(), StoreError> {
        (**self).insert_sample(sample)
    }

    fn commit(&mut self) -> Result<CommitReport, StoreError> {
        (**self).commit()
    }

    fn pending(&self) -> usize {
        (**self).pending()
    }

    fn close(&mut self, policy: PendingPolicy) -> Result<(), StoreError> {
        (**self).close(policy)
    }
}
