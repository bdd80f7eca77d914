//! AX.25 v2.0 frame marshalling: address field, control octet, FCS (component C2/C3 boundary).

use crate::callsign::{Callsign, DigiHop, DigiPath};
use crate::error::FbbError;
use crate::fcs;

/// Supervisory/unnumbered control octet values, per AX.25 v2.0 §4.2.
pub const CTRL_SABM: u8 = 0x2F | 0x10;
pub const CTRL_UA: u8 = 0x63 | 0x10;
pub const CTRL_DISC: u8 = 0x43 | 0x10;
pub const CTRL_DM: u8 = 0x0F | 0x10;

const RR_BASE: u8 = 0x01;
const RNR_BASE: u8 = 0x05;
const REJ_BASE: u8 = 0x09;
const POLL_FINAL_BIT: u8 = 0x10;

/// A decoded control field. I-frames and the three supervisory kinds are the only ones this
/// stack emits or needs to recognise; anything else maps to `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Information { ns: u8, nr: u8, poll: bool },
    ReceiveReady { nr: u8, pf: bool },
    ReceiveNotReady { nr: u8, pf: bool },
    Reject { nr: u8, pf: bool },
    SetAsyncBalancedMode { poll: bool },
    UnnumberedAck { final_: bool },
    Disconnect { poll: bool },
    DisconnectedMode { final_: bool },
}

impl Control {
    pub fn encode(&self) -> u8 {
        match *self {
            Control::Information { ns, nr, poll } => {
                ((nr & 0x07) << 5) | ((poll as u8) << 4) | ((ns & 0x07) << 1)
            }
            Control::ReceiveReady { nr, pf } => RR_BASE | ((nr & 0x07) << 5) | pf_bit(pf),
            Control::ReceiveNotReady { nr, pf } => RNR_BASE | ((nr & 0x07) << 5) | pf_bit(pf),
            Control::Reject { nr, pf } => REJ_BASE | ((nr & 0x07) << 5) | pf_bit(pf),
            Control::SetAsyncBalancedMode { poll } => CTRL_SABM | pf_bit(poll),
            Control::UnnumberedAck { final_ } => CTRL_UA | pf_bit(final_),
            Control::Disconnect { poll } => CTRL_DISC | pf_bit(poll),
            Control::DisconnectedMode { final_ } => CTRL_DM | pf_bit(final_),
        }
    }

    pub fn decode(byte: u8) -> Result<Self, FbbError> {
        if byte & 0x01 == 0 {
            // I-frame: low bit is always 0.
            return Ok(Control::Information {
                ns: (byte >> 1) & 0x07,
                nr: (byte >> 5) & 0x07,
                poll: byte & POLL_FINAL_BIT != 0,
            });
        }
        if byte & 0x03 == 0x01 {
            // S-frame: low two bits are 01.
            let nr = (byte >> 5) & 0x07;
            let pf = byte & POLL_FINAL_BIT != 0;
            return Ok(match byte & 0x0F {
                RR_BASE => Control::ReceiveReady { nr, pf },
                RNR_BASE => Control::ReceiveNotReady { nr, pf },
                REJ_BASE => Control::Reject { nr, pf },
                _ => {
                    return Err(FbbError::MalformedLine(format!(
                        "unrecognised S-frame control octet {:#04x}",
                        byte
                    )))
                }
            });
        }
        // U-frame: low two bits are 11.
        let masked = byte & !POLL_FINAL_BIT;
        let pf = byte & POLL_FINAL_BIT != 0;
        Ok(match masked {
            m if m == CTRL_SABM & !POLL_FINAL_BIT => Control::SetAsyncBalancedMode { poll: pf },
            m if m == CTRL_UA & !POLL_FINAL_BIT => Control::UnnumberedAck { final_: pf },
            m if m == CTRL_DISC & !POLL_FINAL_BIT => Control::Disconnect { poll: pf },
            m if m == CTRL_DM & !POLL_FINAL_BIT => Control::DisconnectedMode { final_: pf },
            _ => {
                return Err(FbbError::MalformedLine(format!(
                    "unrecognised U-frame control octet {:#04x}",
                    byte
                )))
            }
        })
    }
}

fn pf_bit(set: bool) -> u8 {
    (set as u8) << 4
}

/// PID value for no layer-3 protocol, used on every I-frame this stack sends.
pub const PID_NO_LAYER3: u8 = 0xF0;

/// A fully decoded/encoded AX.25 frame, excluding the KISS or HDLC-flag framing around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub dest: Callsign,
    pub src: Callsign,
    pub digipeaters: DigiPath,
    pub control: u8,
    pub pid: Option<u8>,
    pub info: Vec<u8>,
}

impl Ax25Frame {
    pub fn marshal(&self) -> Result<Vec<u8>, FbbError> {
        let mut out = Vec::with_capacity(16 + self.info.len());
        let no_digis = self.digipeaters.is_empty();
        out.extend_from_slice(&self.dest.encode(true, no_digis));
        out.extend_from_slice(&self.src.encode(false, no_digis));
        let last = self.digipeaters.len().saturating_sub(1);
        for (i, hop) in self.digipeaters.0.iter().enumerate() {
            out.extend_from_slice(&hop_bytes(hop, i == last));
        }
        out.push(self.control);
        if let Some(pid) = self.pid {
            out.push(pid);
        }
        out.extend_from_slice(&self.info);
        fcs::append_fcs(&mut out);
        Ok(out)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, FbbError> {
        if !fcs::verify_fcs(bytes) {
            return Err(FbbError::MalformedLine("AX.25 FCS mismatch".into()));
        }
        let body = &bytes[..bytes.len() - 2];
        if body.len() < 15 {
            return Err(FbbError::MalformedLine("AX.25 frame shorter than two addresses".into()));
        }
        let dest_bytes: [u8; 7] = body[0..7].try_into().unwrap();
        let src_bytes: [u8; 7] = body[7..14].try_into().unwrap();
        let (dest, _dest_cr, dest_last) = Callsign::decode(&dest_bytes)?;
        let (src, _src_cr, mut last) = Callsign::decode(&src_bytes)?;
        last = last || dest_last;
        let mut offset = 14;
        let mut digis = Vec::new();
        while !last {
            if body.len() < offset + 7 {
                return Err(FbbError::MalformedLine("truncated digipeater address".into()));
            }
            let hop_bytes: [u8; 7] = body[offset..offset + 7].try_into().unwrap();
            let (callsign, has_been_repeated, hop_last) = Callsign::decode(&hop_bytes)?;
            digis.push(DigiHop {
                callsign,
                has_been_repeated,
            });
            last = hop_last;
            offset += 7;
        }
        if body.len() <= offset {
            return Err(FbbError::MalformedLine("AX.25 frame missing control octet".into()));
        }
        let control = body[offset];
        offset += 1;
        let is_information_or_ui = control & 0x01 == 0 || control & 0xEF == 0x03;
        let pid = if is_information_or_ui {
            if body.len() <= offset {
                return Err(FbbError::MalformedLine("I/UI frame missing PID".into()));
            }
            let p = body[offset];
            offset += 1;
            Some(p)
        } else {
            None
        };
        let info = body[offset..].to_vec();
        Ok(Ax25Frame {
            dest,
            src,
            digipeaters: DigiPath::new(digis)?,
            control,
            pid,
            info,
        })
    }
}

fn hop_bytes(hop: &DigiHop, is_last: bool) -> [u8; 7] {
    hop.callsign.encode(hop.has_been_repeated, is_last)
}
