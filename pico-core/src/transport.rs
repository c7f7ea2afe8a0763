//! Byte-link seam. The owner supplies the send primitive; the engine never reads from the link.

use crate::status::TransportError;

/// Synchronous send of one complete frame.
///
/// Called from inside `send_request`, `send_response` and `receive` (for automatic
/// replies), so it must not block for long: the engine has no queue of its own.
pub trait Transport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}
