//! Transport abstraction (component C8): the uniform contract the session engine depends on.
//!
//! Concrete byte-stream drivers (a TCP socket, a serial port) are an external concern; this
//! crate only defines the contract and the composite transports that wrap a C1+C3 or C4 state
//! machine around an arbitrary byte stream.

use std::time::Duration;

use crate::error::FbbError;

/// Default read timeout per §5: if no bytes arrive within this window the transport is
/// considered to have failed.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform transport contract. All methods may fail with [`FbbError::Transport`] or
/// [`FbbError::TransportTimeout`]; implementations choose the concrete I/O mechanism.
pub trait Transport {
    fn open(&mut self) -> Result<(), FbbError>;
    fn write(&mut self, bytes: &[u8]) -> Result<(), FbbError>;
    fn read(&mut self, max: usize) -> Result<Vec<u8>, FbbError>;
    fn close(&mut self) -> Result<(), FbbError>;
}
