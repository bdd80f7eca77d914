//! KISS / XKISS TNC framing (component C1).
//!
//! A KISS frame is bracketed by FEND; inside, FESC escapes any literal FEND or FESC byte.
//! The first unescaped byte is a header: the low nibble is the command, the high nibble is
//! the TNC address for multi-drop setups. With checksum mode enabled the last byte before
//! the closing FEND is `sum(header..payload) & 0xFF`; on mismatch the frame is discarded
//! without surfacing an error, matching the XKISS convention.

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

pub const CMD_DATA: u8 = 0x00;
pub const CMD_TXDELAY: u8 = 0x01;
pub const CMD_P: u8 = 0x02;
pub const CMD_SLOTTIME: u8 = 0x03;
pub const CMD_TXTAIL: u8 = 0x04;
pub const CMD_FULLDUPLEX: u8 = 0x05;
pub const CMD_SETHARDWARE: u8 = 0x06;
pub const CMD_POLL: u8 = 0x0E;
pub const CMD_RETURN: u8 = 0x0F;

/// Largest frame this layer will ever build or accept: an AX.25 information field (max 256
/// bytes of B2F payload per proposal chunk plus framing headers, conservatively rounded up to
/// cover digipeater paths) doubled for worst-case escaping, plus header and checksum bytes.
pub const MAX_FRAME_LEN: usize = 2048;

/// Holder for a single KISS frame's wire bytes, including the bracketing FENDs.
///
/// As in other frame-oriented layers here, `data`/`len` are exposed directly so callers can
/// stream bytes in or copy the frame out without an extra allocation on the hot path.
pub struct KissFrame {
    pub data: [u8; MAX_FRAME_LEN],
    pub len: usize,
}

impl KissFrame {
    /// Build a data frame carrying an already-framed AX.25 packet as payload.
    pub fn new_data(tnc_addr: u8, payload: &[u8], checksum: bool) -> Result<Self, KissError> {
        let mut body = Vec::with_capacity(payload.len() + 2);
        body.push(header_byte(tnc_addr, CMD_DATA));
        body.extend_from_slice(payload);
        if checksum {
            let sum: u8 = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            body.push(sum);
        }
        Self::from_body(&body)
    }

    /// Build a one-byte parameter-setting frame (TXDelay, Persistence, SlotTime, TxTail,
    /// FullDuplex, or an opaque SetHardware byte).
    pub fn new_param(tnc_addr: u8, command: u8, value: u8) -> Result<Self, KissError> {
        Self::from_body(&[header_byte(tnc_addr, command), value])
    }

    /// Build an XKISS poll frame: a single header byte, command nibble 0xE, no payload.
    pub fn new_poll(tnc_addr: u8) -> Result<Self, KissError> {
        Self::from_body(&[header_byte(tnc_addr, CMD_POLL)])
    }

    fn from_body(body: &[u8]) -> Result<Self, KissError> {
        let mut data = [0u8; MAX_FRAME_LEN];
        let mut i = 0;
        push(&mut data, &mut i, FEND)?;
        i += escape(body, &mut data[i..]).ok_or(KissError::PayloadTooBig)?;
        push(&mut data, &mut i, FEND)?;
        Ok(KissFrame { data, len: i })
    }

    /// Command nibble, one of the `CMD_*` constants.
    pub fn command(&self) -> Result<u8, KissError> {
        Ok(self.header_byte()? & 0x0f)
    }

    /// TNC address nibble for multi-drop configurations.
    pub fn tnc_addr(&self) -> Result<u8, KissError> {
        Ok(self.header_byte()? >> 4)
    }

    /// Unescaped payload following the header byte, with the checksum trailer (if present)
    /// validated and stripped. Returns `Ok(None)` on checksum mismatch: the frame is
    /// well-formed KISS but must be silently discarded, not treated as an error.
    pub fn decode_payload(&self, checksum: bool) -> Result<Option<Vec<u8>>, KissError> {
        let inner = self.inner_bytes()?;
        let mut out = vec![0u8; inner.len()];
        let n = unescape(inner, &mut out);
        out.truncate(n);
        if out.is_empty() {
            return Err(KissError::MalformedKissFrame);
        }
        let header = out[0];
        let mut rest = &out[1..];
        if checksum {
            if rest.is_empty() {
                return Err(KissError::MalformedKissFrame);
            }
            let (payload, sum_byte) = rest.split_at(rest.len() - 1);
            let computed = std::iter::once(header)
                .chain(payload.iter().copied())
                .fold(0u8, |acc, b| acc.wrapping_add(b));
            if computed != sum_byte[0] {
                log::debug!("KISS checksum mismatch: computed {:#04x}, frame claims {:#04x}", computed, sum_byte[0]);
                return Ok(None);
            }
            rest = payload;
        }
        Ok(Some(rest.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    fn inner_bytes(&self) -> Result<&[u8], KissError> {
        let body = self.as_bytes();
        let start = body.iter().position(|b| *b != FEND).ok_or(KissError::MalformedKissFrame)?;
        let end = body[start..]
            .iter()
            .position(|b| *b == FEND)
            .map(|p| p + start)
            .unwrap_or(body.len());
        Ok(&body[start..end])
    }

    fn header_byte(&self) -> Result<u8, KissError> {
        let inner = self.inner_bytes()?;
        inner.first().copied().ok_or(KissError::MalformedKissFrame)
    }
}

fn header_byte(tnc_addr: u8, command: u8) -> u8 {
    (tnc_addr << 4) | (command & 0x0f)
}

fn push(data: &mut [u8], idx: &mut usize, value: u8) -> Result<(), KissError> {
    if *idx >= data.len() {
        return Err(KissError::PayloadTooBig);
    }
    data[*idx] = value;
    *idx += 1;
    Ok(())
}

/// Streaming accumulator that turns an arbitrary byte stream from a transport into complete
/// `KissFrame`s. Bytes arrive in whatever chunks the transport hands over; `did_write` commits
/// them and `next_frame` pulls out anything complete so far, sliding the remainder down.
pub struct KissBuffer {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl KissBuffer {
    pub fn new() -> Self {
        KissBuffer {
            data: [0u8; MAX_FRAME_LEN],
            len: 0,
        }
    }

    /// Writable tail of the internal buffer; copy newly-read transport bytes in here.
    pub fn buf_remaining(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Commit `n` bytes just written into `buf_remaining()`.
    pub fn did_write(&mut self, n: usize) {
        self.len += n;
    }

    /// Extract the next complete FEND-delimited frame, if one has accumulated. Leading
    /// FENDs (idle-line padding) are skipped. Returns `None` when only a partial frame is
    /// buffered so far.
    pub fn next_frame(&mut self) -> Option<KissFrame> {
        let mut start = 0;
        while start < self.len && self.data[start] == FEND {
            start += 1;
        }
        let end = self.data[start..self.len].iter().position(|b| *b == FEND)? + start;
        if end == start {
            // Empty frame between two FENDs; drop it and keep scanning.
            self.consume_through(end + 1);
            return self.next_frame();
        }
        let mut frame = [0u8; MAX_FRAME_LEN];
        frame[0] = FEND;
        let body_len = end - start;
        frame[1..1 + body_len].copy_from_slice(&self.data[start..end]);
        frame[1 + body_len] = FEND;
        self.consume_through(end + 1);
        Some(KissFrame {
            data: frame,
            len: body_len + 2,
        })
    }

    fn consume_through(&mut self, upto: usize) {
        self.data.copy_within(upto..self.len, 0);
        self.len -= upto;
    }
}

impl Default for KissBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// KISS command codes as a closed enumeration, where `KissFrame::command`/`new_param` deal in
/// the raw nibble for ports that ignore ones this stack doesn't issue (e.g. vendor SetHardware
/// payloads forwarded verbatim).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissCommand {
    DataFrame,
    TxDelay,
    Persistence,
    SlotTime,
    TxTail,
    FullDuplex,
    SetHardware,
    Poll,
    Return,
}

impl KissCommand {
    pub fn from_proto(value: u8) -> Result<Self, KissError> {
        Ok(match value {
            CMD_DATA => KissCommand::DataFrame,
            CMD_TXDELAY => KissCommand::TxDelay,
            CMD_P => KissCommand::Persistence,
            CMD_SLOTTIME => KissCommand::SlotTime,
            CMD_TXTAIL => KissCommand::TxTail,
            CMD_FULLDUPLEX => KissCommand::FullDuplex,
            CMD_SETHARDWARE => KissCommand::SetHardware,
            CMD_POLL => KissCommand::Poll,
            CMD_RETURN => KissCommand::Return,
            _ => return Err(KissError::UnsupportedKissCommand),
        })
    }

    pub fn proto_value(&self) -> u8 {
        match self {
            KissCommand::DataFrame => CMD_DATA,
            KissCommand::TxDelay => CMD_TXDELAY,
            KissCommand::Persistence => CMD_P,
            KissCommand::SlotTime => CMD_SLOTTIME,
            KissCommand::TxTail => CMD_TXTAIL,
            KissCommand::FullDuplex => CMD_FULLDUPLEX,
            KissCommand::SetHardware => CMD_SETHARDWARE,
            KissCommand::Poll => CMD_POLL,
            KissCommand::Return => CMD_RETURN,
        }
    }
}

#[derive(Debug)]
pub enum KissError {
    MalformedKissFrame,
    UnsupportedKissCommand,
    PayloadTooBig,
}

/// Value-only record for the parameters a KISS TNC is configured with at startup.
#[derive(Debug, Clone)]
pub struct KissTncConfig {
    pub tnc_addr: u8,
    pub checksum_enabled: bool,
    pub tx_delay: u8,
    pub persistence: u8,
    pub slot_time: u8,
    pub tx_tail: u8,
    pub full_duplex: bool,
    pub poll_interval_ms: u64,
    pub poll_addresses: Vec<u8>,
}

impl Default for KissTncConfig {
    fn default() -> Self {
        KissTncConfig {
            tnc_addr: 0,
            checksum_enabled: false,
            tx_delay: 50,
            persistence: 63,
            slot_time: 10,
            tx_tail: 5,
            full_duplex: false,
            poll_interval_ms: 100,
            poll_addresses: Vec::new(),
        }
    }
}

/// Pure, tick-driven round-robin poll scheduler for XKISS multi-drop TNCs.
///
/// The session engine or its runtime shell is responsible for calling `tick` at whatever
/// granularity it likes (or once per transport select-loop iteration) and writing out any
/// frame returned; this struct holds no I/O of its own.
pub struct PollScheduler {
    addresses: Vec<u8>,
    interval_ms: u64,
    next_index: usize,
    elapsed_ms: u64,
}

impl PollScheduler {
    pub fn new(addresses: Vec<u8>, interval_ms: u64) -> Self {
        PollScheduler {
            addresses,
            interval_ms,
            next_index: 0,
            elapsed_ms: 0,
        }
    }

    /// Advance the scheduler by `delta_ms`. Returns the next poll frame to send once the
    /// interval has elapsed, cycling through configured addresses round-robin.
    pub fn tick(&mut self, delta_ms: u64) -> Option<KissFrame> {
        if self.addresses.is_empty() {
            return None;
        }
        self.elapsed_ms += delta_ms;
        if self.elapsed_ms < self.interval_ms {
            return None;
        }
        self.elapsed_ms = 0;
        let addr = self.addresses[self.next_index];
        self.next_index = (self.next_index + 1) % self.addresses.len();
        KissFrame::new_poll(addr).ok()
    }
}

fn escape(src: &[u8], dst: &mut [u8]) -> Option<usize> {
    let mut i = 0;
    let mut j = 0;
    while i < src.len() {
        match src[i] {
            FEND => {
                *dst.get_mut(j)? = FESC;
                j += 1;
                *dst.get_mut(j)? = TFEND;
            }
            FESC => {
                *dst.get_mut(j)? = FESC;
                j += 1;
                *dst.get_mut(j)? = TFESC;
            }
            b => *dst.get_mut(j)? = b,
        }
        i += 1;
        j += 1;
    }
    Some(j)
}

fn unescape(src: &[u8], dst: &mut [u8]) -> usize {
    let mut i = 0;
    let mut j = 0;
    while i < src.len() && j < dst.len() {
        if src[i] == FESC {
            if i == src.len() - 1 {
                break;
            }
            i += 1;
            match src[i] {
                TFEND => dst[j] = FEND,
                TFESC => dst[j] = FESC,
                other => dst[j] = other,
            }
        } else {
            dst[j] = src[i];
        }
        i += 1;
        j += 1;
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_passes_through_plain_bytes() {
        let mut buf = [0u8; 64];
        let src = [0, 1, 2, 3, 4, 5];
        let n = escape(&src, &mut buf).unwrap();
        assert_eq!(&buf[..n], &src);
    }

    #[test]
    fn escape_substitutes_fend_and_fesc() {
        let mut buf = [0u8; 64];
        let src = [0, 1, FEND, 3, 4, FESC];
        let n = escape(&src, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0, 1, FESC, TFEND, 3, 4, FESC, TFESC]);
    }

    #[test]
    fn unescape_is_escape_inverse() {
        let mut buf = [0u8; 64];
        let src = [0, 1, FESC, TFEND, 3, 4, FESC, TFESC];
        let n = unescape(&src, &mut buf);
        assert_eq!(&buf[..n], &[0, 1, FEND, 3, 4, FESC]);
    }

    #[test]
    fn random_roundtrip_via_escape_unescape() {
        let src: Vec<u8> = (0..=255u8).cycle().take(600).collect();
        let mut escaped = [0u8; 1400];
        let n = escape(&src, &mut escaped).unwrap();
        let mut back = vec![0u8; src.len()];
        let m = unescape(&escaped[..n], &mut back);
        assert_eq!(m, src.len());
        assert_eq!(back, src);
    }

    #[test]
    fn data_frame_roundtrip_no_checksum() {
        let f = KissFrame::new_data(0, &[0xAA, 0xBB, 0xCC], false).unwrap();
        assert_eq!(f.command().unwrap(), CMD_DATA);
        let payload = f.decode_payload(false).unwrap().unwrap();
        assert_eq!(payload, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn data_frame_roundtrip_with_checksum() {
        let f = KissFrame::new_data(3, &[1, 2, 3], true).unwrap();
        assert_eq!(f.tnc_addr().unwrap(), 3);
        let payload = f.decode_payload(true).unwrap().unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn checksum_mismatch_is_silently_discarded() {
        // C0 00 48 69 00 C0 with checksum enabled: declared checksum 0x00, actual sum differs.
        let mut kiss_buf = KissBuffer::new();
        let wire = [0xC0, 0x00, 0x48, 0x69, 0x00, 0xC0];
        kiss_buf.buf_remaining()[..wire.len()].copy_from_slice(&wire);
        kiss_buf.did_write(wire.len());
        let frame = kiss_buf.next_frame().unwrap();
        let decoded = frame.decode_payload(true).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn kiss_buffer_yields_frame_across_two_writes() {
        let mut kiss_buf = KissBuffer::new();
        kiss_buf.buf_remaining()[..3].copy_from_slice(&[0xC0, 0x00, 0xAA]);
        kiss_buf.did_write(3);
        assert!(kiss_buf.next_frame().is_none());
        kiss_buf.buf_remaining()[..2].copy_from_slice(&[0xBB, 0xC0]);
        kiss_buf.did_write(2);
        let frame = kiss_buf.next_frame().unwrap();
        let payload = frame.decode_payload(false).unwrap().unwrap();
        assert_eq!(payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn poll_scheduler_round_robins_after_interval() {
        let mut sched = PollScheduler::new(vec![1, 2], 100);
        assert!(sched.tick(50).is_none());
        let f1 = sched.tick(50).unwrap();
        assert_eq!(f1.tnc_addr().unwrap(), 1);
        assert_eq!(f1.command().unwrap(), CMD_POLL);
        let f2 = sched.tick(100).unwrap();
        assert_eq!(f2.tnc_addr().unwrap(), 2);
    }
}
