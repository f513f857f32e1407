//! Tests for the SQLite store

use ops24x_core::prelude::*;
use ops24x_core::store::{StagedRecord, StoreError};
use ops24x_core::telemetry::Event;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn open(path: &std::path::Path, telemetry: &Arc<RecordingTelemetry>) -> SqliteStore {
    let mut store = SqliteStore::open(path, telemetry.clone()).unwrap();
    store.create_schema().unwrap();
    store
}

#[test]
fn test_duplicate_metadata_keeps_first_value() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(RecordingTelemetry::new());
    let mut store = open(&dir.path().join("meta.db"), &telemetry);

    store.insert_metadata(MetadataRecord::new("Units", "mph")).unwrap();
    store.insert_metadata(MetadataRecord::new("Units", "kmh")).unwrap();
    store.insert_metadata(MetadataRecord::new("Version", "1.2.4")).unwrap();

    let err = store.commit().unwrap_err();
    let StoreError::Constraint {
        committed,
        violations,
    } = err
    else {
        panic!("expected a constraint error");
    };
    assert_eq!(committed, 2);
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].record,
        StagedRecord::Metadata(MetadataRecord::new("Units", "kmh"))
    );

    assert_eq!(store.metadata_value("Units").unwrap().as_deref(), Some("mph"));
    assert_eq!(store.pending(), 0);
}

#[test]
fn test_duplicate_time_keeps_first_speed() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let mut store = SqliteStore::open_in_memory(telemetry).unwrap();
    store.create_schema().unwrap();

    store.insert_sample(SpeedSample::new(0.5, 31.2)).unwrap();
    store.commit().unwrap();
    store.insert_sample(SpeedSample::new(0.5, 40.0)).unwrap();

    let err = store.commit().unwrap_err();
    assert_eq!(err.violations().len(), 1);
    assert!(err.violations()[0].constraint.contains("speed_samples.time"));
    assert_eq!(store.samples().unwrap(), vec![SpeedSample::new(0.5, 31.2)]);
}

#[test]
fn test_schema_creation_is_idempotent_and_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.db");
    let telemetry = Arc::new(RecordingTelemetry::new());

    {
        let mut store = open(&path, &telemetry);
        store.create_schema().unwrap();
        store.insert_sample(SpeedSample::new(1.0, 20.0)).unwrap();
        store.close(PendingPolicy::Commit).unwrap();
    }

    let store = open(&path, &telemetry);
    assert_eq!(store.samples().unwrap(), vec![SpeedSample::new(1.0, 20.0)]);
}

#[test]
fn test_incompatible_table_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE speed_samples (t INTEGER, v TEXT, extra BLOB);")
            .unwrap();
    }

    let mut store = SqliteStore::open(&path, Arc::new(RecordingTelemetry::new())).unwrap();
    let err = store.create_schema().unwrap_err();
    assert!(matches!(err, StoreError::Schema { ref table, .. } if table == "speed_samples"));
}

#[test]
fn test_close_discard_and_drop_report_lost_rows() {
    let telemetry = Arc::new(RecordingTelemetry::new());

    let mut store = SqliteStore::open_in_memory(telemetry.clone()).unwrap();
    store.create_schema().unwrap();
    store.insert_sample(SpeedSample::new(1.0, 20.0)).unwrap();
    store.close(PendingPolicy::Discard).unwrap();
    // Second close is a no-op
    store.close(PendingPolicy::Commit).unwrap();
    assert!(matches!(
        store.insert_sample(SpeedSample::new(2.0, 20.0)),
        Err(StoreError::Closed)
    ));

    let mut dropped = SqliteStore::open_in_memory(telemetry.clone()).unwrap();
    dropped.create_schema().unwrap();
    dropped.insert_sample(SpeedSample::new(1.0, 20.0)).unwrap();
    dropped.insert_sample(SpeedSample::new(1.1, 20.0)).unwrap();
    drop(dropped);

    let discarded: Vec<usize> = telemetry
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::PendingDiscarded { rows } => Some(rows),
            _ => None,
        })
        .collect();
    assert_eq!(discarded, vec![1, 2]);
}
