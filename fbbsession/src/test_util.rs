//! Test-only [`Transport`] that performs no I/O, for exercising [`crate::engine`] without a
//! live peer.

use fbbcore::error::FbbError;
use fbbcore::transport::Transport;

#[derive(Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn open(&mut self) -> Result<(), FbbError> {
        Ok(())
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), FbbError> {
        Ok(())
    }

    fn read(&mut self, _max: usize) -> Result<Vec<u8>, FbbError> {
        Ok(Vec::new())
    }

    fn close(&mut self) -> Result<(), FbbError> {
        Ok(())
    }
}
