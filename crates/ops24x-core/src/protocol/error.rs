//! Protocol errors

use thiserror::Error;

use super::FrameError;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Write timed out after {sent} of {total} bytes")]
    WriteTimeout { sent: usize, total: usize },

    #[error("Not connected to device")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("No response to command '{command}' after {attempts} reads")]
    NoResponse { command: String, attempts: usize },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error means the device link itself is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotConnected
                | ProtocolError::ConnectionFailed(_)
                | ProtocolError::PortNotFound(_)
        )
    }
}
