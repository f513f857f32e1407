//! Telemetry
//!
//! Components report progress through a [`Telemetry`] handed to them at construction
//! instead of logging through global state. [`TracingTelemetry`] forwards events to
//! `tracing`; [`RecordingTelemetry`] keeps them in memory for inspection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::ingest::StopReason;
use crate::protocol::QueryCode;
use crate::session::SessionState;
use crate::store::SpeedSample;

/// Why a commit happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTrigger {
    /// Handshake step (start time or one configuration query)
    Handshake,
    /// The commit buffer reached its configured size
    BufferFull,
    /// Final flush when listening stops
    Shutdown,
}

/// Something worth reporting
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A command was written to the module
    CommandSent { name: String, command: String },
    /// What the module sent back after a command whose reply is not parsed
    CommandResponse {
        command: String,
        response: Option<String>,
    },
    /// The handshake moved to a new state
    StateChanged { state: SessionState },
    /// A configuration query was answered
    ConfigurationReceived { query: QueryCode, pairs: Vec<(String, String)> },
    /// A measurement was decoded and staged
    Measurement(SpeedSample),
    /// The link failed while listening; buffered samples are still committed
    TransportFailed { error: String },
    /// A received line was dropped
    FrameDiscarded { line: String, reason: String },
    /// Staged rows were committed
    Committed { rows: usize, trigger: CommitTrigger },
    /// A staged row was rejected by a table constraint
    ConstraintViolation { detail: String },
    /// Staged rows were dropped without being committed
    PendingDiscarded { rows: usize },
    /// The ingest loop started
    ListenStarted { buffer_size: usize, max_time: Option<Duration> },
    /// The ingest loop finished
    ListenStopped { reason: StopReason, samples: u64 },
    /// An unrecoverable error ended the recording
    Fatal { error: String },
}

/// Sink for [`Event`]s
pub trait Telemetry: Send + Sync {
    /// Report an event
    fn record(&self, event: Event);
}

/// Forwards events to `tracing` with structured fields
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    /// Shared handle, ready to pass to components
    pub fn shared() -> Arc<dyn Telemetry> {
        Arc::new(TracingTelemetry)
    }
}

impl Telemetry for TracingTelemetry {
    fn record(&self, event: Event) {
        match event {
            Event::CommandSent { name, command } => {
                tracing::info!(%name, command = %command.escape_debug(), "Send command");
            }
            Event::CommandResponse { command, response } => match response {
                Some(response) => tracing::debug!(
                    command = %command.escape_debug(),
                    response = %response.escape_debug(),
                    "Command response"
                ),
                None => tracing::debug!(command = %command.escape_debug(), "No command response"),
            },
            Event::StateChanged { state } => {
                tracing::info!(?state, "Handshake state");
            }
            Event::ConfigurationReceived { query, pairs } => {
                tracing::info!(%query, pairs = pairs.len(), "Configuration received");
                for (key, value) in &pairs {
                    tracing::debug!(%query, %key, %value, "Configuration value");
                }
            }
            Event::Measurement(sample) => {
                tracing::debug!(time = sample.time, speed = sample.speed, "Measurement");
            }
            Event::TransportFailed { error } => {
                tracing::error!(%error, "Link failed while listening");
            }
            Event::FrameDiscarded { line, reason } => {
                tracing::warn!(line = %line.escape_debug(), %reason, "Discarded frame");
            }
            Event::Committed { rows, trigger } => {
                tracing::info!(rows, ?trigger, "Commit");
            }
            Event::ConstraintViolation { detail } => {
                tracing::warn!(%detail, "Constraint violation");
            }
            Event::PendingDiscarded { rows } => {
                tracing::warn!(rows, "Uncommitted rows discarded");
            }
            Event::ListenStarted {
                buffer_size,
                max_time,
            } => {
                tracing::info!(buffer_size, ?max_time, "Listening for measurements");
            }
            Event::ListenStopped { reason, samples } => {
                tracing::info!(?reason, samples, "Stopped listening");
            }
            Event::Fatal { error } => {
                tracing::error!(%error, "Fatal error");
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<Event>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commits recorded so far, as `(rows, trigger)`
    pub fn commits(&self) -> Vec<(usize, CommitTrigger)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Committed { rows, trigger } => Some((rows, trigger)),
                _ => None,
            })
            .collect()
    }

    /// Commands written to the module so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::CommandSent { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
