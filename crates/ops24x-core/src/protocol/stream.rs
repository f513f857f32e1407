use super::ProtocolError;

/// Line-oriented byte channel to an OPS24x module
///
/// Implemented by [`SerialTransport`](super::SerialTransport) for real hardware and by
/// [`SimulatedDevice`](crate::simulator::SimulatedDevice) for tests and dry runs.
pub trait Transport {
    /// Discard any buffered input and output
    fn flush(&mut self) -> Result<(), ProtocolError>;

    /// Send all bytes within the write timeout
    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns an empty buffer when the read timeout elapses with no data; that is not
    /// an error. A partial line is returned as-is when the timeout cuts it off.
    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError>;

    /// Release the underlying handle. Calling it more than once is a no-op.
    fn close(&mut self);

    /// Whether [`close`](Transport::close) has been called
    fn is_closed(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn flush(&mut self) -> Result<(), ProtocolError> {
        (**self).flush()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        (**self).write(bytes)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        (**self).read_line()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn flush(&mut self) -> Result<(), ProtocolError> {
        (**self).flush()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        (**self).write(bytes)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        (**self).read_line()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}
