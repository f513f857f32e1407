//! OPS24x Serial Protocol
//!
//! Implements the line-oriented ASCII protocol spoken by OPS24x radar modules.
//!
//! Commands are short ASCII strings sent verbatim. Responses are either brace-delimited
//! configuration blocks (`{"Key":"Value"}`) or plain `time,speed` measurement lines.

pub mod codec;
pub mod commands;
mod error;
pub mod serial;
mod stream;

pub use codec::{
    classify, decode_configuration_frame, decode_measurement_frame, encode, frame_text, Frame,
    FrameError,
};
pub use commands::{Command, QueryCode};
pub use error::ProtocolError;
pub use serial::{SerialSettings, SerialTransport};
pub use stream::Transport;

/// Default port for OPS24x modules enumerated over USB CDC
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Default baud rate for OPS24x communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default write timeout in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;

/// Maximum length of a single response line before it is cut off
pub const MAX_LINE_LENGTH: usize = 4096;
