//! AGWPE transport (component C4): login, monitor a single connected-mode circuit through an
//! AGW packet engine, and surface its payload bytes as an ordinary byte stream.
//!
//! Unlike [`super::kiss_ax25`], there is no local data-link state machine: the AGW engine owns
//! connect/retransmit/disconnect, so this transport just manages the Login/Connect/Data/
//! Disconnect frame sequence and buffers inbound Data payloads.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use fbbcore::agwpe::{AgwpeBuffer, AgwpeFrame, DataKind};
use fbbcore::error::FbbError;
use fbbcore::transport::Transport;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct AgwpeTransport<S: Read + Write> {
    stream: S,
    port: u32,
    local_call: String,
    remote_call: String,
    buffer: AgwpeBuffer,
    delivered: Vec<u8>,
    connected: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl<S: Read + Write> AgwpeTransport<S> {
    pub fn new(stream: S, port: u32, local_call: impl Into<String>, remote_call: impl Into<String>) -> Self {
        AgwpeTransport {
            stream,
            port,
            local_call: local_call.into(),
            remote_call: remote_call.into(),
            buffer: AgwpeBuffer::new(),
            delivered: Vec::new(),
            connected: false,
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn send(&mut self, frame: AgwpeFrame) -> Result<(), FbbError> {
        self.stream
            .write_all(&frame.marshal())
            .map_err(|e| FbbError::Transport(format!("write: {}", e)))
    }

    /// Read whatever is immediately available, decode complete AGWPE frames, and apply any
    /// Data/Disconnect effects. Returns `true` if the circuit just went down.
    fn pump_once(&mut self) -> Result<bool, FbbError> {
        let mut scratch = [0u8; 4096];
        match self.stream.read(&mut scratch) {
            Ok(0) => return Err(FbbError::PeerClosedMidMessage),
            Ok(n) => self.buffer.feed(&scratch[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(FbbError::Transport(format!("read: {}", e))),
        }

        let mut disconnected = false;
        while let Some(frame) = self.buffer.next_frame()? {
            match frame.kind {
                DataKind::Connect => self.connected = true,
                DataKind::Data => self.delivered.extend(frame.payload),
                DataKind::Disconnect => {
                    self.connected = false;
                    disconnected = true;
                }
                _ => {
                    log::debug!("ignoring AGWPE frame kind {:?}", frame.kind);
                }
            }
        }
        Ok(disconnected)
    }

    fn pump_until(&mut self, deadline: Duration, mut done: impl FnMut(&Self) -> bool) -> Result<(), FbbError> {
        let start = Instant::now();
        while !done(self) {
            if start.elapsed() > deadline {
                return Err(FbbError::TransportTimeout);
            }
            self.pump_once()?;
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

impl<S: Read + Write> Transport for AgwpeTransport<S> {
    fn open(&mut self) -> Result<(), FbbError> {
        self.send(AgwpeFrame::login(&self.local_call.clone()))?;
        self.send(AgwpeFrame {
            port: self.port,
            kind: DataKind::Connect,
            call_from: self.local_call.clone(),
            call_to: self.remote_call.clone(),
            payload: Vec::new(),
        })?;
        let timeout = self.connect_timeout;
        self.pump_until(timeout, |t| t.connected)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), FbbError> {
        let frame = AgwpeFrame::data(self.port, &self.local_call.clone(), &self.remote_call.clone(), bytes.to_vec());
        self.send(frame)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, FbbError> {
        if self.delivered.is_empty() {
            let timeout = self.read_timeout;
            self.pump_until(timeout, |t| !t.delivered.is_empty() || !t.connected)?;
        }
        let n = max.min(self.delivered.len());
        Ok(self.delivered.drain(..n).collect())
    }

    fn close(&mut self) -> Result<(), FbbError> {
        if !self.connected {
            return Ok(());
        }
        let frame = AgwpeFrame {
            port: self.port,
            kind: DataKind::Disconnect,
            call_from: self.local_call.clone(),
            call_to: self.remote_call.clone(),
            payload: Vec::new(),
        };
        self.send(frame)?;
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct LoopbackStream {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl Read for LoopbackStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for LoopbackStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn open_sends_login_then_connect() {
        let stream = LoopbackStream {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        };
        let mut t = AgwpeTransport::new(stream, 0, "W1AW", "KE4AHR");
        t.connect_timeout = Duration::from_millis(50);
        let _ = t.open();
        let (login, consumed) = AgwpeFrame::parse(&t.stream.outbound).unwrap().unwrap();
        assert_eq!(login.kind, DataKind::Login);
        let (connect, _) = AgwpeFrame::parse(&t.stream.outbound[consumed..]).unwrap().unwrap();
        assert_eq!(connect.kind, DataKind::Connect);
    }

    #[test]
    fn inbound_data_frame_is_delivered_on_read() {
        let frame = AgwpeFrame::data(0, "KE4AHR", "W1AW", b"hello".to_vec());
        let mut wire = frame.marshal();
        let connect = AgwpeFrame {
            port: 0,
            kind: DataKind::Connect,
            call_from: "KE4AHR".into(),
            call_to: "W1AW".into(),
            payload: Vec::new(),
        };
        let mut inbound = connect.marshal();
        inbound.append(&mut wire);

        let stream = LoopbackStream {
            inbound: inbound.into_iter().collect(),
            outbound: Vec::new(),
        };
        let mut t = AgwpeTransport::new(stream, 0, "W1AW", "KE4AHR");
        t.connect_timeout = Duration::from_millis(500);
        t.open().unwrap();
        let got = t.read(16).unwrap();
        assert_eq!(got, b"hello");
    }
}
