//! Composite transport: AX.25 connected-mode (component C3) framed as KISS (component C1) over
//! an arbitrary byte stream such as a serial TNC or a TCP-attached one.
//!
//! The caller's stream is expected to return promptly from `read` (a short read timeout or a
//! non-blocking descriptor) so [`KissAx25Transport`] can interleave polling for inbound bytes
//! with advancing the data-link timer; a stream that blocks indefinitely on `read` will stall
//! T1 retransmission.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use fbbcore::ax25::datalink::{DataLink, LinkEvent, State};
use fbbcore::ax25::frame::Ax25Frame;
use fbbcore::callsign::{Callsign, DigiPath};
use fbbcore::error::FbbError;
use fbbcore::kiss::{KissBuffer, KissError, KissFrame};
use fbbcore::transport::Transport;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn kiss_err(context: &str, e: KissError) -> FbbError {
    FbbError::Transport(format!("{context}: {:?}", e))
}

/// Maps a data-link failure reason to a dedicated error when one applies, falling back to a
/// generic transport failure for anything the data link didn't specifically name.
fn link_failure(reason: String) -> FbbError {
    match reason.as_str() {
        "link retries exhausted" => FbbError::LinkRetriesExhausted,
        "SABM refused by peer" => FbbError::LinkRefused,
        _ => FbbError::Transport(reason),
    }
}

/// Drives one [`DataLink`] over KISS framing carried by `stream`.
pub struct KissAx25Transport<S: Read + Write> {
    stream: S,
    tnc_addr: u8,
    checksum: bool,
    datalink: DataLink,
    kiss_buf: KissBuffer,
    delivered: Vec<u8>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl<S: Read + Write> KissAx25Transport<S> {
    pub fn new(stream: S, local: Callsign, remote: Callsign, tnc_addr: u8, checksum: bool) -> Self {
        KissAx25Transport {
            stream,
            tnc_addr,
            checksum,
            datalink: DataLink::new(local, remote, DigiPath::default()),
            kiss_buf: KissBuffer::new(),
            delivered: Vec::new(),
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn send_frames(&mut self, frames: Vec<Ax25Frame>) -> Result<(), FbbError> {
        for frame in frames {
            let wire = frame.marshal()?;
            let kiss = KissFrame::new_data(self.tnc_addr, &wire, self.checksum)
                .map_err(|e| kiss_err("encoding outbound AX.25 frame", e))?;
            self.stream
                .write_all(kiss.as_bytes())
                .map_err(|e| FbbError::Transport(format!("write: {}", e)))?;
        }
        Ok(())
    }

    /// One iteration: read whatever bytes are immediately available, decode any complete KISS
    /// frames, feed each to the data link, and advance T1 by one poll interval. Returns the
    /// most recent [`LinkEvent`], if the data link raised one this tick.
    fn pump_once(&mut self) -> Result<Option<LinkEvent>, FbbError> {
        let mut event = None;
        let slot = self.kiss_buf.buf_remaining();
        match self.stream.read(slot) {
            Ok(0) => return Err(FbbError::PeerClosedMidMessage),
            Ok(n) => self.kiss_buf.did_write(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(FbbError::Transport(format!("read: {}", e))),
        }

        while let Some(frame) = self.kiss_buf.next_frame() {
            let payload = match frame.decode_payload(self.checksum) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    log::debug!("discarding KISS frame with bad checksum");
                    continue;
                }
                Err(e) => {
                    log::debug!("discarding malformed KISS frame: {:?}", e);
                    continue;
                }
            };
            let ax25 = match Ax25Frame::unmarshal(&payload) {
                Ok(f) => f,
                Err(e) => {
                    log::debug!("discarding malformed AX.25 frame: {:?}", e);
                    continue;
                }
            };
            let outcome = self.datalink.on_frame(ax25);
            self.send_frames(outcome.frames_to_send)?;
            self.delivered.extend(outcome.delivered);
            if outcome.event.is_some() {
                event = outcome.event;
            }
        }

        let timer_outcome = self.datalink.on_timer_tick(POLL_INTERVAL);
        self.send_frames(timer_outcome.frames_to_send)?;
        self.delivered.extend(timer_outcome.delivered);
        if timer_outcome.event.is_some() {
            event = timer_outcome.event;
        }
        Ok(event)
    }

    fn pump_until(&mut self, deadline: Duration, mut done: impl FnMut(&Self) -> bool) -> Result<(), FbbError> {
        let start = Instant::now();
        while !done(self) {
            if start.elapsed() > deadline {
                return Err(FbbError::TransportTimeout);
            }
            match self.pump_once()? {
                Some(LinkEvent::Failed(reason)) => return Err(link_failure(reason)),
                // A DISC we didn't ask for (the peer hanging up mid-session) is only benign if
                // it happens to satisfy what we were already waiting for, e.g. our own close().
                Some(LinkEvent::Disconnected) if !done(self) => return Err(FbbError::LinkDisconnected),
                _ => {}
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

impl<S: Read + Write> Transport for KissAx25Transport<S> {
    fn open(&mut self) -> Result<(), FbbError> {
        let outcome = self.datalink.connect();
        self.send_frames(outcome.frames_to_send)?;
        let timeout = self.connect_timeout;
        self.pump_until(timeout, |t| t.datalink.state() == State::Connected)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), FbbError> {
        let outcome = self.datalink.send_data(bytes.to_vec());
        self.send_frames(outcome.frames_to_send)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, FbbError> {
        if self.delivered.is_empty() {
            let timeout = self.read_timeout;
            self.pump_until(timeout, |t| !t.delivered.is_empty())?;
        }
        let n = max.min(self.delivered.len());
        Ok(self.delivered.drain(..n).collect())
    }

    fn close(&mut self) -> Result<(), FbbError> {
        if self.datalink.state() == State::Disconnected {
            return Ok(());
        }
        let outcome = self.datalink.close();
        self.send_frames(outcome.frames_to_send)?;
        let timeout = Duration::from_secs(15);
        // A peer that has vanished shouldn't prevent us from reporting close() as done.
        let _ = self.pump_until(timeout, |t| t.datalink.state() == State::Disconnected);
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
        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.outbound.extend_from_slice(buf);
            Ok(())
        }
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_all(buf)?;
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn local() -> Callsign {
        Callsign::new("W1AW", 0).unwrap()
    }
    fn remote() -> Callsign {
        Callsign::new("KE4AHR", 0).unwrap()
    }

    #[test]
    fn open_fails_with_timeout_when_peer_never_answers() {
        let stream = LoopbackStream {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        };
        let mut t = KissAx25Transport::new(stream, local(), remote(), 0, false)
            .with_read_timeout(Duration::from_millis(50));
        t.connect_timeout = Duration::from_millis(250);
        assert!(matches!(t.open(), Err(FbbError::TransportTimeout)));
    }

    #[test]
    fn peer_disc_mid_session_surfaces_link_disconnected() {
        use fbbcore::ax25::frame::Control;

        let stream = LoopbackStream {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        };
        let mut t = KissAx25Transport::new(stream, local(), remote(), 0, false)
            .with_read_timeout(Duration::from_millis(50));
        t.datalink = DataLink::new(local(), remote(), Default::default());
        t.datalink.connect();
        let ua = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: Default::default(),
            control: Control::UnnumberedAck { final_: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        t.datalink.on_frame(ua);
        assert_eq!(t.datalink.state(), State::Connected);

        let disc = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: Default::default(),
            control: Control::Disconnect { poll: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let wire = disc.marshal().unwrap();
        let kiss = KissFrame::new_data(0, &wire, false).unwrap();
        t.stream.inbound.extend(kiss.as_bytes());

        let err = t.read(16).unwrap_err();
        assert!(matches!(err, FbbError::LinkDisconnected));
    }

    #[test]
    fn open_transmits_sabm_as_a_kiss_frame() {
        let stream = LoopbackStream {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        };
        let mut t = KissAx25Transport::new(stream, local(), remote(), 0, false);
        t.connect_timeout = Duration::from_millis(50);
        let _ = t.open();
        assert!(!t.stream.outbound.is_empty());
        assert_eq!(t.stream.outbound[0], 0xC0);
    }
}
