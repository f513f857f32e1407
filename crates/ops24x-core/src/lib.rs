//! # OPS24x Core Library
//!
//! Core functionality for recording speed samples from OPS24x Doppler radar modules.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport to the radar module
//! - Encoding of device commands and decoding of configuration / measurement frames
//! - The startup handshake that configures the module and records its settings
//! - Durable SQLite storage with caller-controlled commit boundaries
//! - The steady-state ingest loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use ops24x_core::prelude::*;
//!
//! let config = RecorderConfig::from_file("recorder.json")?;
//! let transport = SerialTransport::open(&config.port, SerialSettings::default())?;
//! let store = SqliteStore::open("recording.db", telemetry.clone())?;
//!
//! let summary = Recorder::new(config, telemetry).run(transport, store)?;
//! println!("{} samples recorded", summary.ingest.samples);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod simulator;
pub mod store;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{DeviceParameters, RecorderConfig};
    pub use crate::error::RecorderError;
    pub use crate::ingest::{IngestLoop, IngestSummary, StopFlag, StopReason};
    pub use crate::protocol::{Command, QueryCode, SerialSettings, SerialTransport, Transport};
    pub use crate::recorder::{Recorder, RecordingSummary};
    pub use crate::session::{DeviceSession, HandshakeReport, SessionState};
    pub use crate::simulator::SimulatedDevice;
    pub use crate::store::{MetadataRecord, PendingPolicy, SpeedSample, SqliteStore, Store};
    pub use crate::telemetry::{RecordingTelemetry, Telemetry, TracingTelemetry};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
