//! Measurement ingestion
//!
//! The steady-state loop after the handshake. Each poll flushes stale bytes, checks the
//! stop conditions, reads one line and stages it if it decodes as a measurement. Every
//! `buffer_size` staged samples are committed together; whatever is left when the loop
//! stops is committed by [`IngestLoop::run`] before it returns.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::clock::Clock;
use crate::protocol::{
    classify, decode_measurement_frame, frame_text, Frame, ProtocolError, Transport,
};
use crate::store::{Store, StoreError};
use crate::telemetry::{CommitTrigger, Event, Telemetry};

/// Shared request to stop listening.
///
/// Checked once per poll; since every read is bounded by the transport's read timeout, a
/// request is honoured within one polling interval.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why listening ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The configured `MAX_TIME` elapsed
    MaxTime,
    /// A stop was requested through the [`StopFlag`]
    Stopped,
}

/// Outcome of a single poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Poll {
    /// Keep polling
    Continue,
    /// Stop polling
    Stop(StopReason),
}

/// Errors that end listening
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Transport failed while listening: {0}")]
    Transport(#[from] ProtocolError),

    #[error("Store failed while listening: {0}")]
    Store(#[from] StoreError),
}

/// Totals for one listening run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IngestSummary {
    /// Measurements decoded and staged
    pub samples: u64,
    /// Commits made, including the final flush
    pub commits: u64,
    /// Non-empty lines that were not measurements
    pub discarded: u64,
    /// Samples rejected by the store (duplicate timestamps)
    pub rejected: u64,
    /// Why listening ended, `None` while still running
    pub stop: Option<StopReason>,
}

/// Polls a transport for measurements and stages them in a store
pub struct IngestLoop<'a, T: Transport + ?Sized, S: Store + ?Sized> {
    transport: &'a mut T,
    store: &'a mut S,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
    buffer_size: usize,
    max_time: Option<Duration>,
    /// Samples staged since the last commit
    buffered: usize,
    started: Option<Instant>,
    summary: IngestSummary,
}

impl<'a, T: Transport + ?Sized, S: Store + ?Sized> IngestLoop<'a, T, S> {
    /// Create a loop committing every `buffer_size` samples (minimum 1)
    pub fn new(
        transport: &'a mut T,
        store: &'a mut S,
        telemetry: Arc<dyn Telemetry>,
        clock: Arc<dyn Clock>,
        buffer_size: usize,
    ) -> Self {
        Self {
            transport,
            store,
            telemetry,
            clock,
            stop: StopFlag::new(),
            buffer_size: buffer_size.max(1),
            max_time: None,
            buffered: 0,
            started: None,
            summary: IngestSummary::default(),
        }
    }

    /// Stop once this much time has elapsed since the first poll
    pub fn with_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }

    /// Stop when `stop` is set
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Samples staged since the last commit
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Totals so far
    pub fn summary(&self) -> IngestSummary {
        self.summary
    }

    /// Poll until a stop condition is met, then commit what is still buffered.
    ///
    /// A transport error also triggers the final commit before it is returned, since the
    /// staged samples are valid.
    pub fn run(mut self) -> Result<IngestSummary, IngestError> {
        self.telemetry.record(Event::ListenStarted {
            buffer_size: self.buffer_size,
            max_time: self.max_time,
        });

        let reason = loop {
            match self.poll_once() {
                Ok(Poll::Continue) => {}
                Ok(Poll::Stop(reason)) => break reason,
                Err(IngestError::Transport(e)) => {
                    // Logged first so a failing final commit cannot hide it
                    self.telemetry.record(Event::TransportFailed {
                        error: e.to_string(),
                    });
                    self.finish(CommitTrigger::Shutdown)?;
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            }
        };

        self.finish(CommitTrigger::Shutdown)?;
        self.summary.stop = Some(reason);
        self.telemetry.record(Event::ListenStopped {
            reason,
            samples: self.summary.samples,
        });
        Ok(self.summary)
    }

    /// Run one iteration of the loop
    pub fn poll_once(&mut self) -> Result<Poll, IngestError> {
        let now = self.clock.now();
        let started = *self.started.get_or_insert(now);

        // Stale bytes are dropped on purpose: the newest reading matters more than
        // completeness
        self.transport.flush()?;

        if self.stop.is_stop_requested() {
            return Ok(Poll::Stop(StopReason::Stopped));
        }
        if let Some(max_time) = self.max_time {
            if self.clock.now().duration_since(started) > max_time {
                return Ok(Poll::Stop(StopReason::MaxTime));
            }
        }

        let line = self.transport.read_line()?;
        if line.is_empty() {
            return Ok(Poll::Continue);
        }

        let text = frame_text(&line);
        let decoded = match classify(&text) {
            Frame::Configuration(raw) => {
                self.discard(raw, "configuration frame while listening");
                return Ok(Poll::Continue);
            }
            // Blank line from out-of-range blanking
            Frame::Candidate("") => return Ok(Poll::Continue),
            Frame::Candidate(raw) => decode_measurement_frame(raw),
        };

        match decoded {
            Ok(sample) => {
                self.store.insert_sample(sample)?;
                self.buffered += 1;
                self.summary.samples += 1;
                self.telemetry.record(Event::Measurement(sample));
            }
            Err(e) => {
                self.discard(&text, &e.to_string());
                return Ok(Poll::Continue);
            }
        }

        if self.buffered >= self.buffer_size {
            self.commit(CommitTrigger::BufferFull)?;
        }
        Ok(Poll::Continue)
    }

    fn discard(&mut self, line: &str, reason: &str) {
        self.summary.discarded += 1;
        self.telemetry.record(Event::FrameDiscarded {
            line: line.to_string(),
            reason: reason.to_string(),
        });
    }

    fn finish(&mut self, trigger: CommitTrigger) -> Result<(), IngestError> {
        if self.buffered > 0 || self.store.pending() > 0 {
            self.commit(trigger)?;
        }
        Ok(())
    }

    /// Commit the buffer. Constraint violations are reported and counted; the other
    /// rows of the batch are already durable, so listening continues.
    fn commit(&mut self, trigger: CommitTrigger) -> Result<(), IngestError> {
        self.buffered = 0;
        self.summary.commits += 1;

        let rows = match self.store.commit() {
            Ok(report) => report.rows,
            Err(StoreError::Constraint {
                committed,
                violations,
            }) => {
                self.summary.rejected += violations.len() as u64;
                for violation in violations {
                    self.telemetry.record(Event::ConstraintViolation {
                        detail: violation.to_string(),
                    });
                }
                committed
            }
            Err(e) => return Err(e.into()),
        };

        self.telemetry.record(Event::Committed { rows, trigger });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::simulator::SimulatedDevice;
    use crate::store::{CommitReport, MetadataRecord, PendingPolicy, SpeedSample, SqliteStore};
    use crate::telemetry::RecordingTelemetry;
    use pretty_assertions::assert_eq;

    fn streaming_device() -> SimulatedDevice {
        let mut device = SimulatedDevice::new();
        device.write(b"C=0\n").unwrap();
        device
    }

    /// Holds one staged row that can never be committed
    struct BrokenStore;

    impl Store for BrokenStore {
        fn create_schema(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn insert_metadata(&mut self, _record: MetadataRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn insert_sample(&mut self, _sample: SpeedSample) -> Result<(), StoreError> {
            Ok(())
        }

        fn commit(&mut self) -> Result<CommitReport, StoreError> {
            Err(StoreError::Closed)
        }

        fn pending(&self) -> usize {
            1
        }

        fn close(&mut self, _policy: PendingPolicy) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn store(telemetry: &Arc<RecordingTelemetry>) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory(telemetry.clone()).unwrap();
        store.create_schema().unwrap();
        store
    }

    #[test]
    fn test_commits_every_buffer_size_samples() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device();
        let mut store = store(&telemetry);

        {
            let mut ingest = IngestLoop::new(
                &mut device,
                &mut store,
                telemetry.clone(),
                Arc::new(ManualClock::new()),
                10,
            );
            for _ in 0..25 {
                assert_eq!(ingest.poll_once().unwrap(), Poll::Continue);
            }
            assert_eq!(ingest.buffered(), 5);
            assert_eq!(ingest.summary().samples, 25);
            assert_eq!(ingest.summary().commits, 2);
        }

        assert_eq!(store.pending(), 5);
        assert_eq!(
            telemetry.commits(),
            vec![(10, CommitTrigger::BufferFull), (10, CommitTrigger::BufferFull)]
        );
        assert_eq!(store.samples().unwrap().len(), 20);
    }

    #[test]
    fn test_run_flushes_partial_buffer() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device()
            .with_measurement_limit(7)
            .with_clock(clock.clone(), Duration::from_millis(100));
        let mut store = store(&telemetry);

        let summary = IngestLoop::new(&mut device, &mut store, telemetry.clone(), clock, 5)
            .with_max_time(Some(Duration::from_secs(2)))
            .run()
            .unwrap();

        assert_eq!(summary.samples, 7);
        assert_eq!(summary.commits, 2);
        assert_eq!(summary.stop, Some(StopReason::MaxTime));
        assert_eq!(store.pending(), 0);
        assert_eq!(store.samples().unwrap().len(), 7);
        assert_eq!(
            telemetry.commits(),
            vec![(5, CommitTrigger::BufferFull), (2, CommitTrigger::Shutdown)]
        );
    }

    #[test]
    fn test_noise_is_discarded() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device().with_measurement_limit(1);
        device.push_stream_line("\r\n");
        device.push_stream_line("garbage\r\n");
        device.push_stream_line("{\"Units\":\"mph\"}\r\n");
        device.push_stream_line("1.0,2.0,3.0\r\n");
        let mut store = store(&telemetry);

        let mut ingest = IngestLoop::new(
            &mut device,
            &mut store,
            telemetry.clone(),
            Arc::new(ManualClock::new()),
            10,
        );
        for _ in 0..6 {
            ingest.poll_once().unwrap();
        }

        let summary = ingest.summary();
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.discarded, 3);
    }

    #[test]
    fn test_stop_flag_honoured() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device();
        let mut store = store(&telemetry);
        let stop = StopFlag::new();

        let mut ingest = IngestLoop::new(
            &mut device,
            &mut store,
            telemetry,
            Arc::new(ManualClock::new()),
            10,
        )
        .with_stop_flag(stop.clone());

        assert_eq!(ingest.poll_once().unwrap(), Poll::Continue);
        stop.request_stop();
        assert_eq!(ingest.poll_once().unwrap(), Poll::Stop(StopReason::Stopped));
    }

    #[test]
    fn test_flushes_before_every_read() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device();
        let mut store = store(&telemetry);

        {
            let mut ingest = IngestLoop::new(
                &mut device,
                &mut store,
                telemetry,
                Arc::new(ManualClock::new()),
                10,
            );
            for _ in 0..4 {
                ingest.poll_once().unwrap();
            }
        }
        assert_eq!(device.flush_count(), 4);
    }

    #[test]
    fn test_duplicate_timestamp_reported_and_listening_continues() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device().with_measurement_limit(0);
        device.push_stream_line("1.0,20.0\r\n");
        device.push_stream_line("1.0,21.0\r\n");
        device.push_stream_line("1.1,22.0\r\n");
        let mut store = store(&telemetry);

        {
            let mut ingest = IngestLoop::new(
                &mut device,
                &mut store,
                telemetry.clone(),
                Arc::new(ManualClock::new()),
                3,
            );
            for _ in 0..3 {
                assert_eq!(ingest.poll_once().unwrap(), Poll::Continue);
            }
            assert_eq!(ingest.summary().rejected, 1);
        }

        assert_eq!(
            store.samples().unwrap(),
            vec![SpeedSample::new(1.0, 20.0), SpeedSample::new(1.1, 22.0)]
        );
        let violations: Vec<String> = telemetry
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ConstraintViolation { detail } => Some(detail),
                _ => None,
            })
            .collect();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("speed_samples.time"));
    }

    #[test]
    fn test_transport_error_reported_when_final_commit_fails() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut device = streaming_device();
        device.close();
        let mut store = BrokenStore;

        let err = IngestLoop::new(
            &mut device,
            &mut store,
            telemetry.clone(),
            Arc::new(ManualClock::new()),
            10,
        )
        .run()
        .unwrap_err();

        assert!(matches!(err, IngestError::Store(StoreError::Closed)));
        let failures: Vec<String> = telemetry
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TransportFailed { error } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0], ProtocolError::NotConnected.to_string());
    }
}
