//! Device handshake
//!
//! Brings a freshly opened module into a known configuration and records what it reports
//! about itself before any measurement is ingested:
//!
//! 1. send every configured parameter command, in configuration order, reading back
//!    each echo before the next command
//! 2. force time reporting and out-of-range blanking
//! 3. reset the module timer and store the wall-clock start time
//! 4. run every configuration query and store the answers
//!
//! Any transport or decoding failure is fatal and leaves the session [`SessionState::Faulted`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::DeviceParameters;
use crate::protocol::{
    classify, decode_configuration_frame, encode, frame_text, Command, Frame, ProtocolError,
    QueryCode, Transport,
};
use crate::store::{MetadataRecord, Store, StoreError};
use crate::telemetry::{CommitTrigger, Event, Telemetry};

/// Metadata parameter holding the wall-clock time the module timer was reset
pub const START_TIME_PARAMETER: &str = "OPS24X_STARTTIME";

/// Lines read while waiting for a configuration response before giving up
pub const DEFAULT_RESPONSE_ATTEMPTS: usize = 5;

/// Lines read after a fire-and-forget command while waiting for its echo
pub const DEFAULT_ECHO_ATTEMPTS: usize = 2;

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing sent yet
    Disconnected,
    /// Configured parameter commands sent
    ParametersApplied,
    /// Time reporting and blanking forced on
    ReportingForced,
    /// Module timer reset and start time stored
    TimeSynced,
    /// Every configuration query answered and stored
    ConfigCollected,
    /// Handshake complete
    Ready,
    /// Handshake failed
    Faulted,
}

/// Errors that abort the handshake
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Handshake failed after {state:?}: {source}")]
    Protocol {
        state: SessionState,
        #[source]
        source: ProtocolError,
    },

    #[error("Handshake failed after {state:?}: {source}")]
    Store {
        state: SessionState,
        #[source]
        source: StoreError,
    },

    #[error("Handshake already ran (state {0:?})")]
    AlreadyStarted(SessionState),
}

impl SessionError {
    /// Last state reached before the failure
    pub fn state(&self) -> SessionState {
        match self {
            SessionError::Protocol { state, .. }
            | SessionError::Store { state, .. }
            | SessionError::AlreadyStarted(state) => *state,
        }
    }
}

/// Failure inside a single handshake step, tagged with the state by the caller
enum StepError {
    Protocol(ProtocolError),
    Store(StoreError),
}

impl From<ProtocolError> for StepError {
    fn from(e: ProtocolError) -> Self {
        StepError::Protocol(e)
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        StepError::Store(e)
    }
}

/// What the handshake did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeReport {
    /// Commands written to the module
    pub commands_sent: usize,
    /// Metadata rows committed (start time included)
    pub metadata_rows: usize,
    /// Metadata rows rejected as duplicates, as human-readable descriptions
    pub rejected: Vec<String>,
}

/// Runs the handshake over a borrowed transport and store
pub struct DeviceSession<'a, T: Transport + ?Sized, S: Store + ?Sized> {
    transport: &'a mut T,
    store: &'a mut S,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn Clock>,
    state: SessionState,
    response_attempts: usize,
    echo_attempts: usize,
    report: HandshakeReport,
}

impl<'a, T: Transport + ?Sized, S: Store + ?Sized> DeviceSession<'a, T, S> {
    /// Create a session in the [`SessionState::Disconnected`] state
    pub fn new(
        transport: &'a mut T,
        store: &'a mut S,
        telemetry: Arc<dyn Telemetry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            store,
            telemetry,
            clock,
            state: SessionState::Disconnected,
            response_attempts: DEFAULT_RESPONSE_ATTEMPTS,
            echo_attempts: DEFAULT_ECHO_ATTEMPTS,
            report: HandshakeReport::default(),
        }
    }

    /// Lines to read per configuration query before giving up (minimum 1)
    pub fn with_response_attempts(mut self, attempts: usize) -> Self {
        self.response_attempts = attempts.max(1);
        self
    }

    /// Lines to read after each fire-and-forget command while waiting for its echo
    /// (minimum 1)
    pub fn with_echo_attempts(mut self, attempts: usize) -> Self {
        self.echo_attempts = attempts.max(1);
        self
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the complete handshake
    pub fn handshake(
        &mut self,
        parameters: &DeviceParameters,
    ) -> Result<HandshakeReport, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyStarted(self.state));
        }

        match self.run_steps(parameters) {
            Ok(()) => {
                self.transition(SessionState::Ready);
                Ok(std::mem::take(&mut self.report))
            }
            Err(e) => {
                let state = self.state;
                self.transition(SessionState::Faulted);
                Err(match e {
                    StepError::Protocol(source) => SessionError::Protocol { state, source },
                    StepError::Store(source) => SessionError::Store { state, source },
                })
            }
        }
    }

    fn run_steps(&mut self, parameters: &DeviceParameters) -> Result<(), StepError> {
        self.apply_parameters(parameters)?;
        self.transition(SessionState::ParametersApplied);

        self.force_reporting()?;
        self.transition(SessionState::ReportingForced);

        self.sync_time()?;
        self.transition(SessionState::TimeSynced);

        self.collect_configuration()?;
        self.transition(SessionState::ConfigCollected);

        Ok(())
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.telemetry.record(Event::StateChanged { state });
    }

    fn apply_parameters(&mut self, parameters: &DeviceParameters) -> Result<(), StepError> {
        for (name, command) in parameters.iter() {
            self.send_unanswered(name, command)?;
        }
        Ok(())
    }

    fn force_reporting(&mut self) -> Result<(), StepError> {
        // Sent even if the configured parameters already include them
        for command in [Command::EnableTimeReport, Command::EnableRangeBlanking] {
            self.send_unanswered(command.name(), command.as_str())?;
        }
        Ok(())
    }

    fn sync_time(&mut self) -> Result<(), StepError> {
        let command = Command::ResetTimer;
        self.send_unanswered(command.name(), command.as_str())?;
        let started = self.clock.wall().to_rfc3339();

        self.store
            .insert_metadata(MetadataRecord::new(START_TIME_PARAMETER, started))?;
        self.commit()
    }

    fn collect_configuration(&mut self) -> Result<(), StepError> {
        for query in QueryCode::ALL {
            let pairs = self.query(query)?;
            self.telemetry.record(Event::ConfigurationReceived {
                query,
                pairs: pairs.clone(),
            });

            for (key, value) in pairs {
                self.store.insert_metadata(MetadataRecord::new(key, value))?;
            }
            // One commit per query, not per pair
            self.commit()?;
        }
        Ok(())
    }

    /// Send a query and wait for its configuration frame
    fn query(&mut self, query: QueryCode) -> Result<Vec<(String, String)>, StepError> {
        let command = Command::ConfigQuery(query);

        // Drop echoes of earlier fire-and-forget commands
        self.transport.flush()?;
        self.send(command.name(), command.as_str())?;

        for _ in 0..self.response_attempts {
            let line = self.transport.read_line()?;
            if line.is_empty() {
                continue;
            }

            let text = frame_text(&line);
            match classify(&text) {
                Frame::Configuration(raw) => {
                    return Ok(decode_configuration_frame(raw).map_err(ProtocolError::from)?);
                }
                Frame::Candidate(raw) => {
                    if !raw.is_empty() {
                        self.telemetry.record(Event::FrameDiscarded {
                            line: raw.to_string(),
                            reason: format!("waiting for response to {}", query),
                        });
                    }
                }
            }
        }

        Err(ProtocolError::NoResponse {
            command: query.code().to_string(),
            attempts: self.response_attempts,
        }
        .into())
    }

    /// Send a command whose reply is not parsed, then consume its echo so a late echo
    /// cannot be taken for the answer to the next query
    fn send_unanswered(&mut self, name: &str, command: &str) -> Result<(), StepError> {
        self.send(name, command)?;

        let mut response = None;
        for _ in 0..self.echo_attempts {
            let line = self.transport.read_line()?;
            if !line.is_empty() {
                response = Some(frame_text(&line).into_owned());
                break;
            }
        }

        self.telemetry.record(Event::CommandResponse {
            command: command.to_string(),
            response,
        });
        Ok(())
    }

    fn send(&mut self, name: &str, command: &str) -> Result<(), StepError> {
        self.transport.write(&encode(command))?;
        self.report.commands_sent += 1;
        self.telemetry.record(Event::CommandSent {
            name: name.to_string(),
            command: command.to_string(),
        });
        Ok(())
    }

    /// Commit staged metadata. Duplicate parameters are reported but do not abort the
    /// handshake; the remaining rows of the batch are already committed.
    fn commit(&mut self) -> Result<(), StepError> {
        match self.store.commit() {
            Ok(report) => {
                self.report.metadata_rows += report.rows;
                self.telemetry.record(Event::Committed {
                    rows: report.rows,
                    trigger: CommitTrigger::Handshake,
                });
                Ok(())
            }
            Err(StoreError::Constraint {
                committed,
                violations,
            }) => {
                self.report.metadata_rows += committed;
                self.telemetry.record(Event::Committed {
                    rows: committed,
                    trigger: CommitTrigger::Handshake,
                });
                for violation in violations {
                    let detail = violation.to_string();
                    self.telemetry.record(Event::ConstraintViolation {
                        detail: detail.clone(),
                    });
                    self.report.rejected.push(detail);
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
