//! Recording lifecycle
//!
//! Ties a transport and a store together for one recording: create the schema, run the
//! handshake, listen until a stop condition, then release both on every exit path.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::ingest::{IngestError, IngestLoop, IngestSummary, StopFlag};
use crate::protocol::Transport;
use crate::session::{DeviceSession, HandshakeReport};
use crate::store::{PendingPolicy, Store};
use crate::telemetry::{Event, Telemetry};

/// What a finished recording did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSummary {
    /// Handshake results
    pub handshake: HandshakeReport,
    /// Listening results
    pub ingest: IngestSummary,
}

/// Runs a complete recording
pub struct Recorder {
    config: RecorderConfig,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
}

impl Recorder {
    /// Create a recorder using the system clock
    pub fn new(config: RecorderConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            config,
            telemetry,
            clock: Arc::new(SystemClock),
            stop: StopFlag::new(),
        }
    }

    /// Use another time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop listening when `stop` is set
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for requesting a stop from another thread (e.g. a signal handler)
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Configuration in use
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record until a stop condition, then close `transport` and `store`.
    ///
    /// Staged samples are committed on a clean stop and when the link fails while
    /// listening. They are discarded after a handshake or store failure.
    pub fn run<T, S>(
        &self,
        mut transport: T,
        mut store: S,
    ) -> Result<RecordingSummary, RecorderError>
    where
        T: Transport,
        S: Store,
    {
        let outcome = self.record(&mut transport, &mut store);
        transport.close();

        let policy = match &outcome {
            Ok(_) | Err(RecorderError::Ingest(IngestError::Transport(_))) => PendingPolicy::Commit,
            Err(_) => PendingPolicy::Discard,
        };
        let closed = store.close(policy);

        match outcome {
            Ok(summary) => {
                closed?;
                Ok(summary)
            }
            Err(e) => {
                self.telemetry.record(Event::Fatal {
                    error: e.to_string(),
                });
                if let Err(close_err) = closed {
                    self.telemetry.record(Event::Fatal {
                        error: close_err.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    fn record<T, S>(
        &self,
        transport: &mut T,
        store: &mut S,
    ) -> Result<RecordingSummary, RecorderError>
    where
        T: Transport,
        S: Store,
    {
        store.create_schema()?;

        let handshake = DeviceSession::new(
            &mut *transport,
            &mut *store,
            self.telemetry.clone(),
            self.clock.clone(),
        )
        .handshake(&self.config.parameters)?;

        let ingest = IngestLoop::new(
            transport,
            store,
            self.telemetry.clone(),
            self.clock.clone(),
            self.config.cursor_buffer_size,
        )
        .with_max_time(self.config.max_duration())
        .with_stop_flag(self.stop.clone())
        .run()?;

        Ok(RecordingSummary { handshake, ingest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ingest::StopReason;
    use crate::protocol::QueryCode;
    use crate::session::SessionError;
    use crate::simulator::SimulatedDevice;
    use crate::store::SqliteStore;
    use crate::telemetry::RecordingTelemetry;
    use std::time::Duration;

    fn config(max_time: f64) -> RecorderConfig {
        RecorderConfig {
            cursor_buffer_size: 4,
            max_time: Some(max_time),
            ..RecorderConfig::default()
        }
    }

    #[test]
    fn test_run_records_and_releases_resources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.db");
        let telemetry = Arc::new(RecordingTelemetry::new());
        let clock = Arc::new(ManualClock::new());
        let mut device =
            SimulatedDevice::new().with_clock(clock.clone(), Duration::from_millis(100));
        let mut store = SqliteStore::open(&path, telemetry.clone()).unwrap();

        let summary = Recorder::new(config(1.0), telemetry.clone())
            .with_clock(clock)
            .run(&mut device, &mut store)
            .unwrap();

        assert!(device.is_closed());
        assert_eq!(store.pending(), 0);
        assert_eq!(summary.handshake.metadata_rows, 11);
        assert_eq!(summary.ingest.stop, Some(StopReason::MaxTime));
        assert!(summary.ingest.samples > 0);

        drop(store);
        let reopened = SqliteStore::open(&path, telemetry).unwrap();
        assert_eq!(reopened.metadata().unwrap().len(), 11);
        assert_eq!(
            reopened.samples().unwrap().len() as u64,
            summary.ingest.samples
        );
    }

    #[test]
    fn test_handshake_failure_closes_everything() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = SimulatedDevice::new();
        device.silence_query(QueryCode::Units);
        let mut store = SqliteStore::open_in_memory(telemetry.clone()).unwrap();

        let err = Recorder::new(config(1.0), telemetry.clone())
            .with_clock(Arc::new(ManualClock::new()))
            .run(&mut device, &mut store)
            .unwrap_err();

        assert!(matches!(
            err,
            RecorderError::Session(SessionError::Protocol { .. })
        ));
        assert!(device.is_closed());
        assert!(matches!(store.metadata(), Err(crate::store::StoreError::Closed)));
        assert!(telemetry
            .events()
            .iter()
            .any(|e| matches!(e, Event::Fatal { .. })));
    }

    #[test]
    fn test_stop_requested_before_listening() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let recorder = Recorder::new(config(60.0), telemetry.clone())
            .with_clock(Arc::new(ManualClock::new()));
        recorder.stop_flag().request_stop();

        let summary = recorder
            .run(
                SimulatedDevice::new(),
                SqliteStore::open_in_memory(telemetry).unwrap(),
            )
            .unwrap();

        assert_eq!(summary.ingest.samples, 0);
        assert_eq!(summary.ingest.stop, Some(StopReason::Stopped));
    }
}
