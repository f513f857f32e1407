//! SQLite-backed store
//!
//! Staged writes are buffered in memory and written in a single transaction per commit.
//! Rows that trip the `metadata.parameter` or `speed_samples.time` primary key are
//! skipped and reported; the rest of the batch still commits.

use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;

use super::{
    CommitReport, ConstraintViolation, MetadataRecord, PendingPolicy, SpeedSample, StagedRecord,
    Store, StoreError,
};
use crate::telemetry::{Event, Telemetry};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    parameter TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS speed_samples (
    time REAL PRIMARY KEY,
    speed REAL NOT NULL
);
";

const INSERT_METADATA: &str = "INSERT INTO metadata (parameter, value) VALUES (?1, ?2)";
const INSERT_SAMPLE: &str = "INSERT INTO speed_samples (time, speed) VALUES (?1, ?2)";

/// Expected column: (name, declared type, not null, primary key)
type ColumnShape = (&'static str, &'static str, bool, bool);

const METADATA_SHAPE: [ColumnShape; 2] = [
    ("parameter", "TEXT", false, true),
    ("value", "TEXT", false, false),
];

const SPEED_SAMPLES_SHAPE: [ColumnShape; 2] = [
    ("time", "REAL", false, true),
    ("speed", "REAL", true, false),
];

/// SQLite database holding one recording
pub struct SqliteStore {
    /// Connection, `None` once closed
    conn: Option<Connection>,
    /// Writes waiting for the next commit, in insertion order
    staged: Vec<StagedRecord>,
    telemetry: Arc<dyn Telemetry>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, telemetry: Arc<dyn Telemetry>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL keeps readers (e.g. a live dashboard) from blocking commits
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        Ok(Self::with_connection(conn, telemetry))
    }

    /// Open a private in-memory database
    pub fn open_in_memory(telemetry: Arc<dyn Telemetry>) -> Result<Self, StoreError> {
        Ok(Self::with_connection(Connection::open_in_memory()?, telemetry))
    }

    fn with_connection(conn: Connection, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            conn: Some(conn),
            staged: Vec::new(),
            telemetry,
        }
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    /// Committed metadata rows in insertion order
    pub fn metadata(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT parameter, value FROM metadata ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(MetadataRecord {
                parameter: row.get(0)?,
                value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Committed speed samples ordered by time
    pub fn samples(&self) -> Result<Vec<SpeedSample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT time, speed FROM speed_samples ORDER BY time")?;
        let rows = stmt.query_map([], |row| {
            Ok(SpeedSample {
                time: row.get(0)?,
                speed: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Value of a single committed metadata parameter
    pub fn metadata_value(&self, parameter: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT value FROM metadata WHERE parameter = ?1")?;
        let mut rows = stmt.query(params![parameter])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    fn discard_staged(&mut self) {
        let rows = self.staged.len();
        if rows > 0 {
            self.staged.clear();
            self.telemetry.record(Event::PendingDiscarded { rows });
        }
    }
}

fn verify_table(
    conn: &Connection,
    table: &str,
    expected: &[ColumnShape],
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>("name")?,
                row.get::<_, String>("type")?,
                row.get::<_, i64>("notnull")? != 0,
                row.get::<_, i64>("pk")? != 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let schema_error = |detail: String| StoreError::Schema {
        table: table.to_string(),
        detail,
    };

    if columns.len() != expected.len() {
        return Err(schema_error(format!(
            "expected {} columns, found {}",
            expected.len(),
            columns.len()
        )));
    }

    for ((name, decl_type, not_null, pk), (exp_name, exp_type, exp_not_null, exp_pk)) in
        columns.iter().zip(expected)
    {
        if name != exp_name
            || !decl_type.eq_ignore_ascii_case(exp_type)
            || *not_null != *exp_not_null
            || *pk != *exp_pk
        {
            return Err(schema_error(format!(
                "column '{}' {} (not null: {}, pk: {}) does not match expected '{}' {}",
                name, decl_type, not_null, pk, exp_name, exp_type
            )));
        }
    }

    Ok(())
}

impl Store for SqliteStore {
    fn create_schema(&mut self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        verify_table(conn, "metadata", &METADATA_SHAPE)?;
        verify_table(conn, "speed_samples", &SPEED_SAMPLES_SHAPE)?;
        Ok(())
    }

    fn insert_metadata(&mut self, record: MetadataRecord) -> Result<(), StoreError> {
        self.conn()?;
        self.staged.push(StagedRecord::Metadata(record));
        Ok(())
    }

    fn insert_sample(&mut self, sample: SpeedSample) -> Result<(), StoreError> {
        self.conn()?;
        self.staged.push(StagedRecord::Sample(sample));
        Ok(())
    }

    fn commit(&mut self) -> Result<CommitReport, StoreError> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        if self.staged.is_empty() {
            return Ok(CommitReport::default());
        }

        let tx = conn.transaction()?;
        let mut committed = 0;
        let mut violations = Vec::new();

        {
            let mut insert_metadata = tx.prepare_cached(INSERT_METADATA)?;
            let mut insert_sample = tx.prepare_cached(INSERT_SAMPLE)?;

            for record in &self.staged {
                let result = match record {
                    StagedRecord::Metadata(m) => {
                        insert_metadata.execute(params![m.parameter, m.value])
                    }
                    StagedRecord::Sample(s) => insert_sample.execute(params![s.time, s.speed]),
                };

                match result {
                    Ok(_) => committed += 1,
                    // A failed statement only aborts itself; the transaction carries on
                    Err(rusqlite::Error::SqliteFailure(err, message))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        violations.push(ConstraintViolation {
                            record: record.clone(),
                            constraint: message.unwrap_or_else(|| err.to_string()),
                        });
                    }
                    // Dropping `tx` rolls back; staged rows stay for a retry
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tx.commit()?;
        self.staged.clear();

        if violations.is_empty() {
            Ok(CommitReport { rows: committed })
        } else {
            Err(StoreError::Constraint {
                committed,
                violations,
            })
        }
    }

    fn pending(&self) -> usize {
        self.staged.len()
    }

    fn close(&mut self, policy: PendingPolicy) -> Result<(), StoreError> {
        if self.conn.is_none() {
            return Ok(());
        }

        let flushed = match policy {
            PendingPolicy::Commit => self.commit().map(|_| ()),
            PendingPolicy::Discard => Ok(()),
        };
        // Whatever is still staged here (discard policy or a failed commit) is lost
        self.discard_staged();

        let closed = match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| StoreError::Sqlite(e)),
            None => Ok(()),
        };

        flushed.and(closed)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.discard_staged();
        }
    }
}
