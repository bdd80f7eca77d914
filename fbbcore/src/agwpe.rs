//! AGWPE SoundCard-TNC framing (component C4).
//!
//! Every frame carries a fixed 36-byte header: a 4-byte port, a reserved byte, a one-byte
//! ASCII DataKind, two reserved bytes, 10-byte NUL-padded CallFrom/CallTo, a little-endian
//! 4-byte DataLen, and 4 more reserved bytes, followed by `DataLen` payload bytes. The core
//! treats AGWPE as an already-framed byte-stream transport: the AGW engine runs its own
//! connected-mode logic, so C3 is not layered on top of it.

use crate::error::FbbError;

pub const HEADER_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Login,
    Version,
    PortInfo,
    Connect,
    Data,
    Disconnect,
    MonitorEnable,
}

impl DataKind {
    fn as_byte(&self) -> u8 {
        match self {
            DataKind::Login => b'X',
            DataKind::Version => b'R',
            DataKind::PortInfo => b'G',
            DataKind::Connect => b'C',
            DataKind::Data => b'D',
            DataKind::Disconnect => b'd',
            DataKind::MonitorEnable => b'm',
        }
    }

    fn from_byte(b: u8) -> Result<Self, FbbError> {
        Ok(match b {
            b'X' => DataKind::Login,
            b'R' => DataKind::Version,
            b'G' => DataKind::PortInfo,
            b'C' => DataKind::Connect,
            b'D' => DataKind::Data,
            b'd' => DataKind::Disconnect,
            b'm' => DataKind::MonitorEnable,
            other => {
                return Err(FbbError::MalformedLine(format!(
                    "unrecognised AGWPE DataKind byte {:#04x}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgwpeFrame {
    pub port: u32,
    pub kind: DataKind,
    pub call_from: String,
    pub call_to: String,
    pub payload: Vec<u8>,
}

impl AgwpeFrame {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.port.to_le_bytes());
        out.push(0);
        out.push(self.kind.as_byte());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&nul_padded(&self.call_from));
        out.extend_from_slice(&nul_padded(&self.call_to));
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one frame from the front of `buf`. Returns `None` if fewer than a full header
    /// plus declared payload are available yet.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, FbbError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let port = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let kind = DataKind::from_byte(buf[5])?;
        let call_from = nul_trimmed(&buf[8..18]);
        let call_to = nul_trimmed(&buf[18..28]);
        let data_len = u32::from_le_bytes(buf[28..32].try_into().unwrap()) as usize;
        let total = HEADER_LEN + data_len;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = buf[HEADER_LEN..total].to_vec();
        Ok(Some((
            AgwpeFrame {
                port,
                kind,
                call_from,
                call_to,
                payload,
            },
            total,
        )))
    }

    pub fn login(callsign: &str) -> Self {
        AgwpeFrame {
            port: 0,
            kind: DataKind::Login,
            call_from: callsign.to_string(),
            call_to: String::new(),
            payload: Vec::new(),
        }
    }

    pub fn monitor_enable() -> Self {
        AgwpeFrame {
            port: 0,
            kind: DataKind::MonitorEnable,
            call_from: String::new(),
            call_to: String::new(),
            payload: Vec::new(),
        }
    }

    pub fn data(port: u32, call_from: &str, call_to: &str, payload: Vec<u8>) -> Self {
        AgwpeFrame {
            port,
            kind: DataKind::Data,
            call_from: call_from.to_string(),
            call_to: call_to.to_string(),
            payload,
        }
    }
}

fn nul_padded(s: &str) -> [u8; 10] {
    let mut out = [0u8; 10];
    let bytes = s.as_bytes();
    let n = bytes.len().min(10);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn nul_trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Streaming accumulator mirroring `KissBuffer`, for AGWPE's length-prefixed (rather than
/// delimiter-framed) wire format.
#[derive(Default)]
pub struct AgwpeBuffer {
    data: Vec<u8>,
}

impl AgwpeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Result<Option<AgwpeFrame>, FbbError> {
        match AgwpeFrame::parse(&self.data)? {
            Some((frame, consumed)) => {
                self.data.drain(..consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}
