//! Simulated OPS24x module for testing
//!
//! Speaks the same line protocol as real hardware without a serial port: it answers
//! configuration queries with brace-delimited frames, echoes other commands, and once
//! its timer has been reset streams `time,speed` lines of a vehicle passing the sensor.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::protocol::{Command, ProtocolError, QueryCode, Transport};

/// Time between generated measurements
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Default answer to each configuration query: one pair per query
fn default_config_response(query: QueryCode) -> String {
    let (key, value) = match query {
        QueryCode::ModuleInfo => ("Product", "OPS243-A"),
        QueryCode::Nyquist => ("SamplingRate", "10000"),
        QueryCode::Direction => ("DirectionControl", "Both"),
        QueryCode::Version => ("Version", "1.2.4"),
        QueryCode::Blanking => ("BlankLines", "Off"),
        QueryCode::SpeedFilter => ("SpeedFilter", "Off"),
        QueryCode::Precision => ("Precision", "2"),
        QueryCode::Format => ("Digits", "5"),
        QueryCode::Units => ("Units", "mph"),
        QueryCode::PowerMode => ("PowerMode", "Continuous"),
    };
    format!("{{\"{}\":\"{}\"}}", key, value)
}

/// In-memory stand-in for an OPS24x module
pub struct SimulatedDevice {
    /// Every command written, in order
    received: Vec<String>,
    /// Responses waiting to be read; cleared by `flush`
    outbox: VecDeque<Vec<u8>>,
    /// Lines emitted once streaming starts, ahead of generated measurements
    script: VecDeque<Vec<u8>>,
    config_responses: HashMap<QueryCode, String>,
    silenced: HashSet<QueryCode>,
    /// Writes allowed before every write times out
    writes_left: Option<usize>,
    /// Set by the timer reset command
    streaming: bool,
    generated: usize,
    measurement_limit: Option<usize>,
    /// Simulated time advanced on every read
    clock: Option<(Arc<ManualClock>, Duration)>,
    /// Sleep between generated samples (for interactive dry runs)
    paced: bool,
    flushes: usize,
    closed: bool,
    rng: StdRng,
    /// Speed of the current simulated vehicle
    vehicle_speed: f64,
}

impl SimulatedDevice {
    /// Create a device with the default configuration answers
    pub fn new() -> Self {
        Self {
            received: Vec::new(),
            outbox: VecDeque::new(),
            script: VecDeque::new(),
            config_responses: QueryCode::ALL
                .iter()
                .map(|&q| (q, default_config_response(q)))
                .collect(),
            silenced: HashSet::new(),
            writes_left: None,
            streaming: false,
            generated: 0,
            measurement_limit: None,
            clock: None,
            paced: false,
            flushes: 0,
            closed: false,
            rng: StdRng::seed_from_u64(0x0243),
            vehicle_speed: 30.0,
        }
    }

    /// Advance `clock` by `per_read` on every `read_line`, as a real port would block
    pub fn with_clock(mut self, clock: Arc<ManualClock>, per_read: Duration) -> Self {
        self.clock = Some((clock, per_read));
        self
    }

    /// Stop generating measurements after `limit` lines; reads then time out empty
    pub fn with_measurement_limit(mut self, limit: usize) -> Self {
        self.measurement_limit = Some(limit);
        self
    }

    /// Sleep for the sample interval on each generated measurement
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Replace the answer to one configuration query
    pub fn set_config_response(&mut self, query: QueryCode, response: &str) {
        self.config_responses.insert(query, response.to_string());
    }

    /// Never answer a configuration query
    pub fn silence_query(&mut self, query: QueryCode) {
        self.silenced.insert(query);
    }

    /// Let `count` writes succeed, then time out every write
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_left = Some(count);
    }

    /// Queue a raw line to be emitted once streaming has started.
    ///
    /// Scripted lines arrive after the ingest loop's flush, so they are never discarded by it.
    pub fn push_stream_line(&mut self, line: &str) {
        self.script.push_back(line.as_bytes().to_vec());
    }

    /// Commands written so far
    pub fn received(&self) -> Vec<String> {
        self.received.clone()
    }

    /// Number of times the buffers were flushed
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Measurement lines generated so far
    pub fn generated(&self) -> usize {
        self.generated
    }

    fn next_measurement(&mut self) -> Option<Vec<u8>> {
        if self.measurement_limit.is_some_and(|limit| self.generated >= limit) {
            return None;
        }

        // A new vehicle every 50 samples
        if self.generated % 50 == 0 {
            self.vehicle_speed = self.rng.gen_range(15.0..45.0);
        }
        let speed = self.vehicle_speed + self.rng.gen_range(-0.5..0.5);
        let time = self.generated as f64 * SAMPLE_INTERVAL.as_secs_f64();
        self.generated += 1;

        if self.paced {
            std::thread::sleep(SAMPLE_INTERVAL);
        }
        Some(format!("{:.3},{:.2}\r\n", time, speed).into_bytes())
    }

    fn check_open(&self) -> Result<(), ProtocolError> {
        if self.closed {
            Err(ProtocolError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDevice {
    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.check_open()?;
        self.outbox.clear();
        self.flushes += 1;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.check_open()?;
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(ProtocolError::WriteTimeout {
                    sent: 0,
                    total: bytes.len(),
                });
            }
            *left -= 1;
        }

        let command = String::from_utf8_lossy(bytes).to_string();
        self.received.push(command.clone());

        if let Some(query) = QueryCode::from_code(command.trim()) {
            if !self.silenced.contains(&query) {
                if let Some(response) = self.config_responses.get(&query) {
                    self.outbox.push_back(format!("{}\r\n", response).into_bytes());
                }
            }
        } else if command == Command::ResetTimer.as_str() {
            self.streaming = true;
            self.generated = 0;
        } else {
            self.outbox
                .push_back(format!("{{\"Command\":\"{}\"}}\r\n", command.trim()).into_bytes());
        }

        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.check_open()?;
        if let Some((clock, per_read)) = &self.clock {
            clock.advance(*per_read);
        }

        if let Some(line) = self.outbox.pop_front() {
            return Ok(line);
        }
        if !self.streaming {
            return Ok(Vec::new());
        }
        if let Some(line) = self.script.pop_front() {
            return Ok(line);
        }
        Ok(self.next_measurement().unwrap_or_default())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
