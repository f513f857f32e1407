//! Serial port handling
//!
//! Provides the serial [`Transport`] used to talk to real OPS24x hardware.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use super::{
    ProtocolError, Transport, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_WRITE_TIMEOUT_MS, MAX_LINE_LENGTH,
};

/// Port-level read granularity. Reads and writes are retried in slices of this length
/// until their own deadline passes.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Serial line settings. The module always runs 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// How long `read_line` waits for a complete line
    pub read_timeout: Duration,
    /// How long `write` may take to hand all bytes to the driver
    pub write_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

/// Serial connection to an OPS24x module
pub struct SerialTransport {
    /// Port handle, `None` once closed
    port: Option<Box<dyn SerialPort>>,
    /// Port name, kept for error messages
    name: String,
    settings: SerialSettings,
    /// Bytes read past the last returned line
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open and configure a serial port
    pub fn open(name: &str, settings: SerialSettings) -> Result<Self, ProtocolError> {
        let mut port = serialport::new(name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(POLL_SLICE)
            .open()
            .map_err(|e| open_error(name, e))?;

        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        Ok(Self {
            port: Some(port),
            name: name.to_string(),
            settings,
            pending: Vec::new(),
        })
    }

    /// Port name this transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line settings in effect
    pub fn settings(&self) -> SerialSettings {
        self.settings
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotConnected)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        Some(self.pending.drain(..=pos).collect())
    }
}

fn open_error(name: &str, e: serialport::Error) -> ProtocolError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
        serialport::ErrorKind::Io(ErrorKind::NotFound) => {
            ProtocolError::PortNotFound(name.to_string())
        }
        _ => ProtocolError::ConnectionFailed(format!("{}: {}", name, e)),
    }
}

impl Transport for SerialTransport {
    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.pending.clear();
        self.port()?
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let deadline = Instant::now() + self.settings.write_timeout;
        let port = self.port()?;

        // No port.flush(): it blocks in tcdrain on some USB CDC drivers. Bytes handed
        // to the kernel are transmitted without it.
        let mut sent = 0;
        while sent < bytes.len() {
            match port.write(&bytes[sent..]) {
                Ok(0) => {
                    return Err(ProtocolError::WriteTimeout {
                        sent,
                        total: bytes.len(),
                    })
                }
                Ok(n) => sent += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e)
                    if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock =>
                {
                    if Instant::now() >= deadline {
                        return Err(ProtocolError::WriteTimeout {
                            sent,
                            total: bytes.len(),
                        });
                    }
                }
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }

        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let deadline = Instant::now() + self.settings.read_timeout;
        let mut buffer = [0u8; 256];

        loop {
            if Instant::now() >= deadline || self.pending.len() >= MAX_LINE_LENGTH {
                return Ok(std::mem::take(&mut self.pending));
            }

            let read = self.port()?.read(&mut buffer);
            match read {
                Ok(0) => {}
                Ok(n) => {
                    self.pending.extend_from_slice(&buffer[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(line);
                    }
                }
                Err(ref e)
                    if e.kind() == ErrorKind::TimedOut
                        || e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.port = None;
    }

    fn is_closed(&self) -> bool {
        self.port.is_none()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
