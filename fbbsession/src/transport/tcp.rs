//! Plain TCP transport, for F6FBB-over-telnet and as the carrier for [`super::agwpe`].

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use fbbcore::error::FbbError;
use fbbcore::transport::{Transport, DEFAULT_READ_TIMEOUT};

/// Connects lazily on `open()` rather than at construction, so a `TcpTransport` can be built
/// and handed to [`crate::engine::ForwardingEngine`] before the network is reachable.
pub struct TcpTransport {
    addr: String,
    read_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            stream: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn stream(&mut self) -> Result<&mut TcpStream, FbbError> {
        self.stream
            .as_mut()
            .ok_or_else(|| FbbError::Transport("TCP transport not open".into()))
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(), FbbError> {
        let stream = TcpStream::connect(&self.addr)
            .map_err(|e| FbbError::Transport(format!("connect {}: {}", self.addr, e)))?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| FbbError::Transport(format!("set_read_timeout: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), FbbError> {
        self.stream()?
            .write_all(bytes)
            .map_err(|e| FbbError::Transport(format!("write: {}", e)))
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, FbbError> {
        let mut buf = vec![0u8; max.max(1)];
        match self.stream()?.read(&mut buf) {
            Ok(0) => Err(FbbError::PeerClosedMidMessage),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(FbbError::TransportTimeout)
            }
            Err(e) => Err(FbbError::Transport(format!("read: {}", e))),
        }
    }

    fn close(&mut self) -> Result<(), FbbError> {
        self.stream = None;
        Ok(())
    }
}
