//! Tests for the listening loop

#[cfg(test)]
mod tests {
    use ops24x_core::ingest::{Poll, StopReason};
    use ops24x_core::prelude::*;
    use ops24x_core::telemetry::CommitTrigger;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// A device that has had its timer reset, with reads costing one timeout each
    fn streaming_device(clock: &Arc<ManualClock>) -> SimulatedDevice {
        let mut device = SimulatedDevice::new().with_clock(clock.clone(), READ_TIMEOUT);
        device.write(b"C=0\n").unwrap();
        device
    }

    fn memory_store(telemetry: &Arc<RecordingTelemetry>) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory(telemetry.clone()).unwrap();
        store.create_schema().unwrap();
        store
    }

    fn listen_for(
        device: &mut SimulatedDevice,
        clock: Arc<ManualClock>,
        max_time: u64,
    ) -> IngestSummary {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut store = memory_store(&telemetry);
        IngestLoop::new(device, &mut store, telemetry, clock, 10)
            .with_max_time(Some(Duration::from_secs(max_time)))
            .run()
            .unwrap()
    }

    #[test]
    fn test_max_time_with_data_flowing() {
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device(&clock);

        let summary = listen_for(&mut device, clock.clone(), 5);

        assert_eq!(summary.stop, Some(StopReason::MaxTime));
        assert!(summary.samples > 0);
        // Ends within one polling interval of the limit
        assert!(clock.elapsed() > Duration::from_secs(5));
        assert!(clock.elapsed() <= Duration::from_secs(5) + READ_TIMEOUT);
    }

    #[test]
    fn test_max_time_with_silent_device() {
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device(&clock).with_measurement_limit(0);

        let summary = listen_for(&mut device, clock.clone(), 5);

        assert_eq!(summary.stop, Some(StopReason::MaxTime));
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.commits, 0);
        assert!(clock.elapsed() <= Duration::from_secs(5) + READ_TIMEOUT);
    }

    #[test]
    fn test_twenty_five_samples_buffer_ten() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device(&clock);
        let mut store = memory_store(&telemetry);

        {
            let mut ingest =
                IngestLoop::new(&mut device, &mut store, telemetry.clone(), clock.clone(), 10);
            for _ in 0..25 {
                assert_eq!(ingest.poll_once().unwrap(), Poll::Continue);
            }
        }

        assert_eq!(telemetry.commits().len(), 2);
        assert_eq!(store.pending(), 5);
        assert_eq!(store.samples().unwrap().len(), 20);

        // Closing the store commits the rest
        store.close(PendingPolicy::Commit).unwrap();
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_run_commits_tail_on_stop() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device(&clock).with_measurement_limit(25);
        let mut store = memory_store(&telemetry);

        let summary = IngestLoop::new(&mut device, &mut store, telemetry.clone(), clock, 10)
            .with_max_time(Some(Duration::from_secs(30)))
            .run()
            .unwrap();

        assert_eq!(summary.samples, 25);
        assert_eq!(summary.commits, 3);
        assert_eq!(
            telemetry.commits(),
            vec![
                (10, CommitTrigger::BufferFull),
                (10, CommitTrigger::BufferFull),
                (5, CommitTrigger::Shutdown),
            ]
        );
        assert_eq!(store.samples().unwrap().len(), 25);
    }

    #[test]
    fn test_transport_error_still_commits_buffer() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let clock = Arc::new(ManualClock::new());
        let mut device = streaming_device(&clock);
        let mut store = memory_store(&telemetry);

        let mut ingest = IngestLoop::new(&mut device, &mut store, telemetry.clone(), clock, 10);
        for _ in 0..3 {
            ingest.poll_once().unwrap();
        }
        assert_eq!(ingest.buffered(), 3);
        drop(ingest);

        device.close();
        let err = IngestLoop::new(
            &mut device,
            &mut store,
            telemetry.clone(),
            Arc::new(ManualClock::new()),
            10,
        )
        .run()
        .unwrap_err();

        assert!(matches!(err, ops24x_core::ingest::IngestError::Transport(_)));
        assert_eq!(store.pending(), 0);
        assert_eq!(store.samples().unwrap().len(), 3);
    }
}
