//! FBB proposal grammar: `FA`/`FB`/`FC` entries, `F>` batch checksum, `FS` verdicts.

use crate::error::FbbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalKind {
    Ascii,
    Binary,
    B2f,
}

impl ProposalKind {
    fn letter(&self) -> char {
        match self {
            ProposalKind::Ascii => 'A',
            ProposalKind::Binary => 'B',
            ProposalKind::B2f => 'C',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalEntry {
    pub kind: ProposalKind,
    pub msg_type: char,
    pub size: usize,
    pub from: String,
    pub to: String,
    pub routing: String,
    pub mid: String,
    pub compressed_size: Option<usize>,
    pub resume_offset: Option<usize>,
}

impl ProposalEntry {
    pub fn to_line(&self) -> String {
        let size_field = match self.resume_offset {
            Some(off) => format!("{}@{}", self.size, off),
            None => self.size.to_string(),
        };
        match self.kind {
            ProposalKind::Ascii | ProposalKind::Binary => format!(
                "F{} {} {} {} {} @{} {}",
                self.kind.letter(),
                self.msg_type,
                size_field,
                self.from,
                self.to,
                self.routing,
                self.mid
            ),
            ProposalKind::B2f => format!(
                "FC {} {} {} {}",
                self.msg_type,
                self.mid,
                self.size,
                self.compressed_size.unwrap_or(self.size)
            ),
        }
    }

    pub fn parse_line(line: &str) -> Result<Self, FbbError> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or_else(|| FbbError::MalformedLine(line.to_string()))?;
        let kind = match command {
            "FA" => ProposalKind::Ascii,
            "FB" => ProposalKind::Binary,
            "FC" => ProposalKind::B2f,
            other => {
                return Err(FbbError::MalformedLine(format!(
                    "unrecognised proposal command {:?}",
                    other
                )))
            }
        };
        let err = || FbbError::MalformedLine(line.to_string());
        match kind {
            ProposalKind::Ascii | ProposalKind::Binary => {
                let msg_type = parts.next().ok_or_else(err)?.chars().next().ok_or_else(err)?;
                let size_field = parts.next().ok_or_else(err)?;
                let (size, resume_offset) = parse_size_field(size_field)?;
                let from = parts.next().ok_or_else(err)?.to_string();
                let to = parts.next().ok_or_else(err)?.to_string();
                let routing = parts
                    .next()
                    .ok_or_else(err)?
                    .trim_start_matches('@')
                    .to_string();
                let mid = parts.next().ok_or_else(err)?.to_string();
                Ok(ProposalEntry {
                    kind,
                    msg_type,
                    size,
                    from,
                    to,
                    routing,
                    mid,
                    compressed_size: None,
                    resume_offset,
                })
            }
            ProposalKind::B2f => {
                let msg_type = parts.next().ok_or_else(err)?.chars().next().ok_or_else(err)?;
                let mid = parts.next().ok_or_else(err)?.to_string();
                let size = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
                let compressed_size = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
                Ok(ProposalEntry {
                    kind,
                    msg_type,
                    size,
                    from: String::new(),
                    to: String::new(),
                    routing: String::new(),
                    mid,
                    compressed_size: Some(compressed_size),
                    resume_offset: None,
                })
            }
        }
    }
}

fn parse_size_field(field: &str) -> Result<(usize, Option<usize>), FbbError> {
    let err = || FbbError::MalformedLine(format!("bad size field {:?}", field));
    match field.split_once('@') {
        Some((size, offset)) => Ok((
            size.parse().map_err(|_| err())?,
            Some(offset.parse().map_err(|_| err())?),
        )),
        None => Ok((field.parse().map_err(|_| err())?, None)),
    }
}

/// One verdict in an `FS` reply; `XfwdOffset` is the `!<offset>` resume extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    RejectFormat,
    AlreadyHave,
    RejectResource,
    TrafficLimited,
    Error,
    AcceptAtOffset(usize),
}

impl Verdict {
    fn parse_all(body: &str) -> Result<Vec<Self>, FbbError> {
        let mut out = Vec::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '+' => out.push(Verdict::Accept),
                '-' => out.push(Verdict::Reject),
                '=' => out.push(Verdict::RejectFormat),
                'L' => out.push(Verdict::AlreadyHave),
                'R' => out.push(Verdict::RejectResource),
                'H' => out.push(Verdict::TrafficLimited),
                'E' => out.push(Verdict::Error),
                '!' => {
                    let mut digits = String::new();
                    while chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                        digits.push(chars.next().unwrap());
                    }
                    let offset = digits
                        .parse()
                        .map_err(|_| FbbError::MalformedLine(format!("bad !offset in FS reply: {:?}", body)))?;
                    out.push(Verdict::AcceptAtOffset(offset));
                }
                other => {
                    return Err(FbbError::MalformedLine(format!(
                        "unrecognised verdict character {:?}",
                        other
                    )))
                }
            }
        }
        Ok(out)
    }

    fn to_char_string(self) -> String {
        match self {
            Verdict::Accept => "+".to_string(),
            Verdict::Reject => "-".to_string(),
            Verdict::RejectFormat => "=".to_string(),
            Verdict::AlreadyHave => "L".to_string(),
            Verdict::RejectResource => "R".to_string(),
            Verdict::TrafficLimited => "H".to_string(),
            Verdict::Error => "E".to_string(),
            Verdict::AcceptAtOffset(off) => format!("!{}", off),
        }
    }
}

/// Parse an `FS ` reply line's verdict characters, checking the count against the number of
/// proposals that were offered.
pub fn parse_fs_reply(line: &str, expected: usize) -> Result<Vec<Verdict>, FbbError> {
    let rest = line
        .strip_prefix("FS ")
        .or_else(|| line.strip_prefix("FS"))
        .ok_or_else(|| FbbError::MalformedLine(line.to_string()))?;
    let verdicts = Verdict::parse_all(rest.trim_end())?;
    if verdicts.len() != expected {
        return Err(FbbError::VerdictCountMismatch {
            expected,
            got: verdicts.len(),
        });
    }
    Ok(verdicts)
}

pub fn encode_fs_reply(verdicts: &[Verdict]) -> String {
    let body: String = verdicts.iter().map(|v| v.to_char_string()).collect();
    format!("FS {}", body)
}

/// Batch up to 5 proposal entries with the `F>` checksum terminator.
pub struct ProposalBatch {
    pub entries: Vec<ProposalEntry>,
}

impl ProposalBatch {
    /// Render the batch as CRLF-terminated proposal lines followed by `F> XX`, where `XX` is
    /// the two-uppercase-hex-digit checksum of every proposal line's bytes (CRLF included).
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.entries.is_empty() {
            return out;
        }
        for entry in &self.entries {
            out.extend_from_slice(entry.to_line().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        let sum: u8 = out.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        out.extend_from_slice(format!("F> {:02X}\r\n", sum).as_bytes());
        out
    }

    /// Verify a received batch's checksum against its proposal lines.
    pub fn verify_checksum(lines: &[String], claimed_hex: &str) -> Result<(), FbbError> {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        let computed: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let claimed = u8::from_str_radix(claimed_hex, 16)
            .map_err(|_| FbbError::MalformedLine(format!("bad F> checksum digits {:?}", claimed_hex)))?;
        if claimed != computed {
            return Err(FbbError::BatchChecksumMismatch {
                sent: claimed,
                computed,
            });
        }
        Ok(())
    }
}
