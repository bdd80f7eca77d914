//! FBB/B2F session engine (component C7): SID negotiation, proposal batching, the FS verdict
//! loop, authentication, resume, traffic limiting, and role inversion.
//!
//! The engine is strictly sequential - it alternates blocking reads and writes against a single
//! [`Transport`] - matching the concurrency model in §5: any concurrency (AX.25 T1, KISS
//! polling, AGWPE monitor ingestion) lives below this layer.

use std::collections::{HashSet, VecDeque};

use md5::{Digest, Md5};

use crate::b2f::B2fMessage;
use crate::error::FbbError;
use crate::lzhuf;
use crate::proposal::{encode_fs_reply, parse_fs_reply, ProposalBatch, ProposalEntry, ProposalKind, Verdict};
use crate::resume::ResumeStore;
use crate::sid::{Sid, FLAG_CHECKSUM, FLAG_GZIP, FLAG_TRAFFIC_LIMIT};
use crate::transport::Transport;

const CTRL_Z: u8 = 0x1A;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub local_software: String,
    pub local_version: String,
    pub local_flags: String,
    pub shared_secret: Option<String>,
    pub traffic_limit: Option<usize>,
    /// Whether to invite the peer to become proposer after we've offered everything we have
    /// (the `FF` role-inversion handshake). Disabled in tests that only exercise one direction.
    pub enable_reverse: bool,
    pub use_gzip: bool,
    pub max_payload_ceiling: usize,
    pub max_batch: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            local_software: "PYF".to_string(),
            local_version: "0.1".to_string(),
            local_flags: "FB1".to_string(),
            shared_secret: None,
            traffic_limit: None,
            enable_reverse: true,
            use_gzip: false,
            max_payload_ceiling: 200 * 1024,
            max_batch: 5,
        }
    }
}

/// An outbound message paired with the proposal metadata that will be offered for it.
pub struct OutboundMessage {
    pub message: B2fMessage,
    pub binary: bool,
    pub from: String,
    pub to: String,
    pub routing: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Sent,
    Rejected(Verdict),
    TrafficLimited,
}

#[derive(Debug, Default)]
pub struct SessionReport {
    pub outbound: Vec<(String, MessageOutcome)>,
    pub received: Vec<B2fMessage>,
    pub bytes_sent: usize,
    /// Set when the peer asserted the traffic-limit flag and our own queue could not be
    /// fully drained as a result - not fatal, per §7's propagation policy.
    pub limit_error: bool,
}

/// Line- and byte-oriented I/O over a [`Transport`], buffering whatever arrives between
/// `transport.read` calls so callers can ask for a CRLF-terminated line or an exact byte count.
/// Supports pushing a single already-read line back for one-token-of-lookahead parsing.
struct LineIo<'a> {
    transport: &'a mut dyn Transport,
    buf: VecDeque<u8>,
    pushback: Option<String>,
}

impl<'a> LineIo<'a> {
    fn new(transport: &'a mut dyn Transport) -> Self {
        LineIo {
            transport,
            buf: VecDeque::new(),
            pushback: None,
        }
    }

    fn push_back(&mut self, line: String) {
        self.pushback = Some(line);
    }

    fn read_line(&mut self) -> Result<String, FbbError> {
        if let Some(line) = self.pushback.take() {
            return Ok(line);
        }
        loop {
            if let Some(pos) = self
                .buf
                .iter()
                .zip(self.buf.iter().skip(1))
                .position(|(a, b)| *a == b'\r' && *b == b'\n')
            {
                let line: Vec<u8> = self.buf.drain(..pos).collect();
                self.buf.drain(..2);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            let chunk = self.transport.read(4096)?;
            if chunk.is_empty() {
                return Err(FbbError::PeerClosedMidMessage);
            }
            self.buf.extend(chunk);
        }
    }

    fn read_until(&mut self, terminator: u8) -> Result<Vec<u8>, FbbError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == terminator) {
                let data: Vec<u8> = self.buf.drain(..pos).collect();
                self.buf.pop_front();
                return Ok(data);
            }
            let chunk = self.transport.read(4096)?;
            if chunk.is_empty() {
                return Err(FbbError::PeerClosedMidMessage);
            }
            self.buf.extend(chunk);
        }
    }

    fn fill_at_least(&mut self, n: usize) -> Result<(), FbbError> {
        while self.buf.len() < n {
            let chunk = self.transport.read(4096)?;
            if chunk.is_empty() {
                return Err(FbbError::PeerClosedMidMessage);
            }
            self.buf.extend(chunk);
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, FbbError> {
        self.fill_at_least(n)?;
        Ok(self.buf.drain(..n).collect())
    }

    fn write_line(&mut self, line: &str) -> Result<(), FbbError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.transport.write(&bytes)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), FbbError> {
        self.transport.write(bytes)
    }
}

pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session { config }
    }

    /// Drive one full session to completion: SID/auth handshake, then offer everything in
    /// `outbox`, then (if `enable_reverse`) accept whatever the peer offers, then terminate.
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        outbox: Vec<OutboundMessage>,
        resume: &mut dyn ResumeStore,
    ) -> Result<SessionReport, FbbError> {
        log::debug!("session starting, local flags {:?}", self.config.local_flags);
        transport.open()?;
        let mut io = LineIo::new(transport);
        let peer_sid = match self.negotiate(&mut io) {
            Ok(sid) => sid,
            Err(e) => {
                log::debug!("session negotiation failed: {}", e);
                io.transport.close()?;
                return Err(e);
            }
        };

        let result = self.drive(&mut io, outbox, resume, &peer_sid);
        io.write_line("FQ")?;
        io.transport.close()?;
        log::debug!("session closed");
        result
    }

    fn drive(
        &mut self,
        io: &mut LineIo,
        outbox: Vec<OutboundMessage>,
        resume: &mut dyn ResumeStore,
        peer_sid: &Sid,
    ) -> Result<SessionReport, FbbError> {
        let mut report = SessionReport::default();
        let mut pending: VecDeque<OutboundMessage> = outbox.into_iter().collect();

        while !pending.is_empty() {
            let keep_going = self.offer_batch(io, &mut pending, resume, peer_sid, &mut report)?;
            if !keep_going {
                break;
            }
        }

        if !pending.is_empty() {
            for item in pending.drain(..) {
                report.outbound.push((item.message.mid.clone(), MessageOutcome::TrafficLimited));
            }
            report.limit_error = true;
        }

        if self.config.enable_reverse {
            io.write_line("FF")?;
            let mut seen_mids: HashSet<String> = HashSet::new();
            loop {
                let line = io.read_line()?;
                if line == "FF" || line == "FQ" || line.is_empty() {
                    break;
                }
                io.push_back(line);
                let had_entries = self.accept_batch(io, resume, peer_sid, &mut seen_mids, &mut report)?;
                if !had_entries {
                    break;
                }
            }
        }

        Ok(report)
    }

    fn negotiate(&mut self, io: &mut LineIo) -> Result<Sid, FbbError> {
        let our_sid = Sid::new(&self.config.local_software, &self.config.local_version, &self.config.local_flags, true);
        io.write_line(&our_sid.encode())?;
        let peer_line = io.read_line()?;
        let peer_sid = Sid::parse(&peer_line)?;
        peer_sid.validate()?;

        let next_line = io.read_line()?;
        if let Some(nonce) = next_line.strip_prefix(";PQ") {
            log::debug!("peer issued auth challenge");
            let nonce = nonce.trim();
            let secret = self
                .config
                .shared_secret
                .as_ref()
                .ok_or(FbbError::AuthNoSecretConfigured)?;
            let response = md5_hex(nonce, secret);
            io.write_line(&format!(";PR {}", response))?;
        } else {
            io.push_back(next_line);
        }

        Ok(peer_sid)
    }

    /// Offer up to `max_batch` entries from `pending`, read the `FS` verdicts, and stream any
    /// accepted bodies. Entries already fully delivered (per `resume`) are dropped silently.
    /// Returns `false` when the peer asserted the traffic-limit flag and declined at least one
    /// entry in this batch - the caller should stop offering further batches in that case.
    fn offer_batch(
        &mut self,
        io: &mut LineIo,
        pending: &mut VecDeque<OutboundMessage>,
        resume: &mut dyn ResumeStore,
        peer_sid: &Sid,
        report: &mut SessionReport,
    ) -> Result<bool, FbbError> {
        let mut batch_msgs = Vec::new();
        let mut entries = Vec::new();
        for _ in 0..self.config.max_batch {
            let Some(item) = pending.pop_front() else {
                break;
            };
            let resume_offset = resume.offset_for(&item.message.mid);
            let total_len = item.message.body.len();
            if resume_offset == Some(total_len) {
                report.outbound.push((item.message.mid.clone(), MessageOutcome::Sent));
                continue;
            }
            let kind = if item.binary {
                ProposalKind::Binary
            } else {
                ProposalKind::Ascii
            };
            let entry = ProposalEntry {
                kind,
                msg_type: item.message.msg_type,
                size: total_len,
                from: item.from.clone(),
                to: item.to.clone(),
                routing: item.routing.clone(),
                mid: item.message.mid.clone(),
                compressed_size: None,
                resume_offset,
            };
            entries.push(entry);
            batch_msgs.push(item);
        }
        if entries.is_empty() {
            return Ok(true);
        }

        let batch = ProposalBatch { entries };
        io.write_bytes(&batch.to_wire())?;

        let reply_line = io.read_line()?;
        let verdicts = parse_fs_reply(&reply_line, batch_msgs.len())?;
        let mut declined = false;

        for (item, verdict) in batch_msgs.into_iter().zip(verdicts.into_iter()) {
            match verdict {
                Verdict::Accept => {
                    let sent = self.stream_body(io, &item, 0, peer_sid)?;
                    report.bytes_sent += sent;
                    report.outbound.push((item.message.mid.clone(), MessageOutcome::Sent));
                }
                Verdict::AcceptAtOffset(offset) => {
                    let sent = self.stream_body(io, &item, offset, peer_sid)?;
                    report.bytes_sent += sent;
                    resume.record_offset(&item.message.mid, item.message.body.len());
                    report.outbound.push((item.message.mid.clone(), MessageOutcome::Sent));
                }
                other => {
                    declined = true;
                    report.outbound.push((item.message.mid.clone(), MessageOutcome::Rejected(other)));
                }
            }
        }
        Ok(!(declined && peer_sid.has_flag(FLAG_TRAFFIC_LIMIT)))
    }

    fn stream_body(
        &self,
        io: &mut LineIo,
        item: &OutboundMessage,
        offset: usize,
        peer_sid: &Sid,
    ) -> Result<usize, FbbError> {
        let remaining = &item.message.body[offset.min(item.message.body.len())..];
        if item.binary {
            let compressed = if self.config.use_gzip && peer_sid.has_flag(FLAG_GZIP) {
                lzhuf::gzip_compress(remaining)
            } else {
                lzhuf::compress(remaining)
            };
            let wire = crate::b2f::frame_chunks(&compressed);
            io.write_bytes(&wire)?;
            Ok(wire.len())
        } else {
            io.write_bytes(remaining)?;
            io.write_bytes(&[CTRL_Z])?;
            Ok(remaining.len() + 1)
        }
    }

    /// Read one batch of incoming proposals (the first line may have been pushed back by the
    /// caller for lookahead), verdict them, and receive any accepted bodies. Returns whether any
    /// proposal lines were actually present.
    fn accept_batch(
        &mut self,
        io: &mut LineIo,
        resume: &mut dyn ResumeStore,
        peer_sid: &Sid,
        seen_mids: &mut HashSet<String>,
        report: &mut SessionReport,
    ) -> Result<bool, FbbError> {
        let mut lines = Vec::new();
        let mut entries = Vec::new();
        loop {
            let line = io.read_line()?;
            if let Some(hex) = line.strip_prefix("F> ").or_else(|| line.strip_prefix("F>")) {
                let hex = hex.trim();
                if peer_sid.has_flag(FLAG_CHECKSUM) && ProposalBatch::verify_checksum(&lines, hex).is_err() {
                    let rejects = encode_fs_reply(&vec![Verdict::RejectFormat; entries.len()]);
                    io.write_line(&rejects)?;
                    return Ok(!entries.is_empty());
                }
                break;
            }
            if line.is_empty() {
                return Ok(false);
            }
            match ProposalEntry::parse_line(&line) {
                Ok(e) => entries.push(Some(e)),
                Err(_) => entries.push(None),
            }
            lines.push(line);
        }

        if entries.is_empty() {
            return Ok(false);
        }

        let mut verdicts = Vec::with_capacity(entries.len());
        for entry in &entries {
            let verdict = match entry {
                None => Verdict::RejectFormat,
                Some(e) => self.verdict_for(e, resume, seen_mids, report),
            };
            verdicts.push(verdict);
        }
        io.write_line(&encode_fs_reply(&verdicts))?;

        for (entry, verdict) in entries.into_iter().zip(verdicts.into_iter()) {
            let Some(entry) = entry else { continue };
            if matches!(verdict, Verdict::Accept | Verdict::AcceptAtOffset(_)) {
                seen_mids.insert(entry.mid.clone());
                let received = self.receive_body(io, &entry)?;
                report.received.push(received);
            }
        }
        Ok(true)
    }

    fn verdict_for(
        &self,
        entry: &ProposalEntry,
        resume: &mut dyn ResumeStore,
        seen_mids: &HashSet<String>,
        report: &SessionReport,
    ) -> Verdict {
        if seen_mids.contains(&entry.mid) {
            return Verdict::AlreadyHave;
        }
        if let Some(limit) = self.config.traffic_limit {
            if report.bytes_sent + entry.size > limit {
                return Verdict::TrafficLimited;
            }
        }
        match resume.offset_for(&entry.mid) {
            Some(offset) => Verdict::AcceptAtOffset(offset),
            None => Verdict::Accept,
        }
    }

    fn receive_body(&self, io: &mut LineIo, entry: &ProposalEntry) -> Result<B2fMessage, FbbError> {
        let body = match entry.kind {
            ProposalKind::Ascii => io.read_until(CTRL_Z)?,
            ProposalKind::Binary | ProposalKind::B2f => {
                let framed = self.read_framed_block(io)?;
                let decompressed = crate::b2f::deframe_chunks(&framed)?;
                lzhuf::decompress(&decompressed).or_else(|e| {
                    log::debug!("LZHUF decompress failed ({}), trying gzip", e);
                    lzhuf::gzip_decompress(&decompressed)
                })?
            }
        };
        Ok(B2fMessage {
            mid: entry.mid.clone(),
            date: String::new(),
            msg_type: entry.msg_type,
            from: entry.from.clone(),
            to: vec![entry.to.clone()],
            cc: Vec::new(),
            subject: String::new(),
            mbo: None,
            body,
            files: Vec::new(),
        })
    }

    fn read_framed_block(&self, io: &mut LineIo) -> Result<Vec<u8>, FbbError> {
        let mut out = Vec::new();
        loop {
            let header = io.read_exact(2)?;
            let marker = header[0];
            let len = header[1] as usize;
            out.push(marker);
            out.push(header[1]);
            if marker == crate::b2f::ETX && len == 0 {
                break;
            }
            let rest = io.read_exact(len + 1)?;
            out.extend_from_slice(&rest);
        }
        Ok(out)
    }
}

fn md5_hex(nonce: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce.as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::InMemoryResumeStore;

    struct MockTransport {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl MockTransport {
        fn new(script: &[u8]) -> Self {
            MockTransport {
                inbound: script.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<(), FbbError> {
            Ok(())
        }
        fn write(&mut self, bytes: &[u8]) -> Result<(), FbbError> {
            self.outbound.extend_from_slice(bytes);
            Ok(())
        }
        fn read(&mut self, max: usize) -> Result<Vec<u8>, FbbError> {
            let n = max.min(self.inbound.len());
            Ok(self.inbound.drain(..n).collect())
        }
        fn close(&mut self) -> Result<(), FbbError> {
            Ok(())
        }
    }

    fn sample_message(mid: &str, body: &str) -> B2fMessage {
        B2fMessage {
            mid: mid.to_string(),
            date: "2026/07/26 12:00".into(),
            msg_type: 'P',
            from: "W1AW".into(),
            to: vec!["KE4AHR@N4XYZ".into()],
            cc: Vec::new(),
            subject: "Hello".into(),
            mbo: None,
            body: body.as_bytes().to_vec(),
            files: Vec::new(),
        }
    }

    #[test]
    fn sid_line_is_emitted_with_configured_flags() {
        let config = SessionConfig {
            local_flags: "FB1".into(),
            enable_reverse: false,
            ..Default::default()
        };
        let mut session = Session::new(config);
        let script = b"[FBB-7.0-AB1FHM$]\r\nFQ\r\n".to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let report = session.run(&mut transport, Vec::new(), &mut resume).unwrap();
        assert!(transport.outbound.starts_with(b"[PYF-0.1-FB1$]\r\n"));
        assert!(report.outbound.is_empty());
    }

    #[test]
    fn auth_challenge_without_secret_is_fatal() {
        let mut session = Session::new(SessionConfig::default());
        let script = b"[FBB-7.0-AB1FHM$]\r\n;PQ 12345678\r\n".to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let err = session.run(&mut transport, Vec::new(), &mut resume).unwrap_err();
        assert!(matches!(err, FbbError::AuthNoSecretConfigured));
    }

    #[test]
    fn plain_ascii_forward_accepts_and_streams_body() {
        let config = SessionConfig {
            enable_reverse: false,
            ..Default::default()
        };
        let mut session = Session::new(config);
        let script = b"[FBB-7.0-AB1FHM$]\r\nFS +\r\nFQ\r\n".to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let outbox = vec![OutboundMessage {
            message: sample_message("TEST001", "Hello\r\n73"),
            binary: false,
            from: "W1AW".into(),
            to: "KE4AHR".into(),
            routing: "N4XYZ".into(),
        }];
        let report = session.run(&mut transport, outbox, &mut resume).unwrap();
        assert_eq!(report.outbound, vec![("TEST001".to_string(), MessageOutcome::Sent)]);
        let sent_text = String::from_utf8_lossy(&transport.outbound);
        assert!(sent_text.contains("FA P 9 W1AW KE4AHR @N4XYZ TEST001"));
        assert!(transport.outbound.ends_with(&[CTRL_Z, b'F', b'Q', b'\r', b'\n']));
    }

    #[test]
    fn resume_offset_is_honoured_and_recorded() {
        let config = SessionConfig {
            enable_reverse: false,
            ..Default::default()
        };
        let mut session = Session::new(config);
        let script = b"[FBB-7.0-AB1FHM$]\r\nFS !500\r\nFQ\r\n".to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let mut body = vec![0u8; 2048];
        for (i, b) in body.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let outbox = vec![OutboundMessage {
            message: B2fMessage {
                mid: "RES42".into(),
                date: String::new(),
                msg_type: 'P',
                from: "W1AW".into(),
                to: vec!["KE4AHR".into()],
                cc: Vec::new(),
                subject: String::new(),
                mbo: None,
                body,
                files: vec![],
            },
            binary: true,
            from: "W1AW".into(),
            to: "KE4AHR".into(),
            routing: "N4XYZ".into(),
        }];
        let report = session.run(&mut transport, outbox, &mut resume).unwrap();
        assert_eq!(report.outbound, vec![("RES42".to_string(), MessageOutcome::Sent)]);
        assert_eq!(resume.offset_for("RES42"), Some(2048));
    }

    #[test]
    fn traffic_limited_peer_flags_remaining_queue() {
        let config = SessionConfig {
            enable_reverse: false,
            max_batch: 1,
            ..Default::default()
        };
        let mut session = Session::new(config);
        let script = b"[FBB-7.0-AB1FHMH$]\r\nFS -\r\nFQ\r\n".to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let outbox = vec![
            OutboundMessage {
                message: sample_message("ONE", "x"),
                binary: false,
                from: "W1AW".into(),
                to: "KE4AHR".into(),
                routing: "N4XYZ".into(),
            },
            OutboundMessage {
                message: sample_message("TWO", "y"),
                binary: false,
                from: "W1AW".into(),
                to: "KE4AHR".into(),
                routing: "N4XYZ".into(),
            },
        ];
        let report = session.run(&mut transport, outbox, &mut resume).unwrap();
        // Only one FS reply was scripted, so the first batch of 1 consumes it; the second
        // message is left pending and should surface as traffic-limited once the peer's SID
        // carries the H capability flag, per §7's "not fully drained" rule.
        assert!(report.limit_error);
        assert!(report
            .outbound
            .iter()
            .any(|(mid, outcome)| mid == "TWO" && *outcome == MessageOutcome::TrafficLimited));
    }

    #[test]
    fn accepts_an_incoming_ascii_proposal() {
        let config = SessionConfig {
            enable_reverse: true,
            ..Default::default()
        };
        let mut session = Session::new(config);
        let script = concat!(
            "[FBB-7.0-AB1$]\r\n",
            "FA P 5 KE4AHR W1AW @N4XYZ INBOX1\r\n",
            "F> 00\r\n",
            "Howdy",
            "\x1a",
            "FQ\r\n",
        )
        .as_bytes()
        .to_vec();
        let mut transport = MockTransport::new(&script);
        let mut resume = InMemoryResumeStore::new();
        let report = session.run(&mut transport, Vec::new(), &mut resume).unwrap();
        assert_eq!(report.received.len(), 1);
        assert_eq!(report.received[0].body, b"Howdy");
    }
}
