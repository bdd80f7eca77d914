//! B2F message codec (component C6): header assembly/parsing and binary block chunk framing.

use crate::error::FbbError;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
const MAX_CHUNK_DATA: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub len: usize,
    pub bytes: Vec<u8>,
}

/// A single B2F message: ordered headers, a body, and zero or more attachments, exactly as
/// read off (or written to) the wire in canonical header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B2fMessage {
    pub mid: String,
    pub date: String,
    pub msg_type: char,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub mbo: Option<String>,
    pub body: Vec<u8>,
    pub files: Vec<FileAttachment>,
}

impl B2fMessage {
    /// Assemble the canonical-order header block, then body, then each file's bytes in
    /// declared order, then a trailing CRLF.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("Mid: {}\r\n", self.mid).as_bytes());
        out.extend_from_slice(format!("Date: {}\r\n", self.date).as_bytes());
        out.extend_from_slice(format!("Type: {}\r\n", self.msg_type).as_bytes());
        out.extend_from_slice(format!("From: {}\r\n", self.from).as_bytes());
        for to in &self.to {
            out.extend_from_slice(format!("To: {}\r\n", to).as_bytes());
        }
        for cc in &self.cc {
            out.extend_from_slice(format!("Cc: {}\r\n", cc).as_bytes());
        }
        out.extend_from_slice(format!("Subject: {}\r\n", self.subject).as_bytes());
        if let Some(mbo) = &self.mbo {
            out.extend_from_slice(format!("Mbo: {}\r\n", mbo).as_bytes());
        }
        out.extend_from_slice(format!("Body: {}\r\n", self.body.len()).as_bytes());
        for file in &self.files {
            out.extend_from_slice(format!("File: {} {}\r\n", file.name, file.len).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        for file in &self.files {
            out.extend_from_slice(&file.bytes);
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Parse a message from its canonical-order wire bytes, validating the invariants spelled
    /// out in §4.6: required headers present, Mid appears at most once, Body/File lengths are
    /// non-negative integers, and the declared total payload does not exceed `max_payload`.
    pub fn decode(bytes: &[u8], max_payload: usize) -> Result<Self, FbbError> {
        let header_end = find_header_end(bytes)?;
        let header_block = std::str::from_utf8(&bytes[..header_end])
            .map_err(|_| FbbError::InvalidHeaders("headers are not valid UTF-8".into()))?;

        let mut mid = None;
        let mut date = None;
        let mut msg_type = None;
        let mut from = None;
        let mut to = Vec::new();
        let mut cc = Vec::new();
        let mut subject = None;
        let mut mbo = None;
        let mut body_len = None;
        let mut file_headers: Vec<(String, usize)> = Vec::new();

        for line in header_block.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FbbError::InvalidHeaders(format!("no ':' in header line {:?}", line)))?;
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "mid" => {
                    if mid.is_some() {
                        return Err(FbbError::DuplicateMid(value.to_string()));
                    }
                    mid = Some(value.to_string());
                }
                "date" => date = Some(value.to_string()),
                "type" => {
                    msg_type = Some(
                        value
                            .chars()
                            .next()
                            .ok_or_else(|| FbbError::InvalidHeaders("empty Type header".into()))?,
                    )
                }
                "from" => from = Some(value.to_string()),
                "to" => to.push(value.to_string()),
                "cc" => cc.push(value.to_string()),
                "subject" => subject = Some(value.to_string()),
                "mbo" => mbo = Some(value.to_string()),
                "body" => {
                    body_len = Some(
                        value
                            .parse::<usize>()
                            .map_err(|_| FbbError::InvalidHeaders(format!("Body length {:?} not an integer", value)))?,
                    )
                }
                "file" => {
                    let (name, len) = value
                        .rsplit_once(' ')
                        .ok_or_else(|| FbbError::InvalidHeaders(format!("malformed File header {:?}", value)))?;
                    let len = len
                        .parse::<usize>()
                        .map_err(|_| FbbError::InvalidHeaders(format!("File length {:?} not an integer", len)))?;
                    file_headers.push((name.to_string(), len));
                }
                other => {
                    return Err(FbbError::InvalidHeaders(format!("unrecognised header {:?}", other)));
                }
            }
        }

        let mid = mid.ok_or_else(|| FbbError::InvalidHeaders("missing Mid".into()))?;
        let date = date.ok_or_else(|| FbbError::InvalidHeaders("missing Date".into()))?;
        let msg_type = msg_type.ok_or_else(|| FbbError::InvalidHeaders("missing Type".into()))?;
        let from = from.ok_or_else(|| FbbError::InvalidHeaders("missing From".into()))?;
        let subject = subject.ok_or_else(|| FbbError::InvalidHeaders("missing Subject".into()))?;
        let body_len = body_len.ok_or_else(|| FbbError::InvalidHeaders("missing Body".into()))?;

        let declared_total: usize = body_len + file_headers.iter().map(|(_, n)| n).sum::<usize>();
        if declared_total > max_payload {
            return Err(FbbError::InvalidHeaders(format!(
                "declared payload {} exceeds ceiling {}",
                declared_total, max_payload
            )));
        }

        let mut cursor = header_end;
        let body = take_slice(bytes, &mut cursor, body_len)?;
        let mut files = Vec::with_capacity(file_headers.len());
        for (name, len) in file_headers {
            let file_bytes = take_slice(bytes, &mut cursor, len)?;
            files.push(FileAttachment {
                name,
                len,
                bytes: file_bytes,
            });
        }

        Ok(B2fMessage {
            mid,
            date,
            msg_type,
            from,
            to,
            cc,
            subject,
            mbo,
            body,
            files,
        })
    }
}

fn find_header_end(bytes: &[u8]) -> Result<usize, FbbError> {
    bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .ok_or_else(|| FbbError::InvalidHeaders("no blank line terminating headers".into()))
}

fn take_slice(bytes: &[u8], cursor: &mut usize, len: usize) -> Result<Vec<u8>, FbbError> {
    if bytes.len() < *cursor + len {
        return Err(FbbError::ShortBody {
            expected: len,
            got: bytes.len().saturating_sub(*cursor),
        });
    }
    let slice = bytes[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(slice)
}

/// Split `data` into binary-framed chunks: `<STX><len:1><data:len><cksum:1>` repeated, with a
/// final zero-length `<ETX>` chunk marking the end. `cksum` is the two's-complement of the
/// 8-bit sum of the chunk's data bytes.
pub fn frame_chunks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_CHUNK_DATA * 3 + 2);
    for chunk in data.chunks(MAX_CHUNK_DATA) {
        out.push(STX);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
        out.push(chunk_checksum(chunk));
    }
    out.push(ETX);
    out.push(0);
    out
}

fn chunk_checksum(data: &[u8]) -> u8 {
    let sum: u8 = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Reassemble chunks produced by [`frame_chunks`]. Returns an error (and the session engine is
/// expected to reject the batch with `FS =`) on a checksum mismatch in any chunk.
pub fn deframe_chunks(wire: &[u8]) -> Result<Vec<u8>, FbbError> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let marker = *wire
            .get(i)
            .ok_or_else(|| FbbError::MalformedLine("truncated binary block".into()))?;
        i += 1;
        let len = *wire
            .get(i)
            .ok_or_else(|| FbbError::MalformedLine("truncated binary block length".into()))?
            as usize;
        i += 1;
        if marker == ETX && len == 0 {
            break;
        }
        if marker != STX {
            return Err(FbbError::MalformedLine(format!(
                "expected STX or terminating ETX, found {:#04x}",
                marker
            )));
        }
        if wire.len() < i + len + 1 {
            return Err(FbbError::MalformedLine("truncated binary block data".into()));
        }
        let chunk = &wire[i..i + len];
        let checksum = wire[i + len];
        if chunk_checksum(chunk) != checksum {
            return Err(FbbError::BatchChecksumMismatch {
                sent: checksum,
                computed: chunk_checksum(chunk),
            });
        }
        out.extend_from_slice(chunk);
        i += len + 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> B2fMessage {
        B2fMessage {
            mid: "TEST001".into(),
            date: "2026/07/26 12:00".into(),
            msg_type: 'P',
            from: "W1AW".into(),
            to: vec!["KE4AHR@N4XYZ".into()],
            cc: Vec::new(),
            subject: "Hello".into(),
            mbo: None,
            body: b"Hello\r\n73".to_vec(),
            files: Vec::new(),
        }
    }

    #[test]
    fn encode_decode_roundtrip_no_attachments() {
        let msg = sample();
        let wire = msg.encode();
        let back = B2fMessage::decode(&wire, 1 << 20).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn encode_decode_roundtrip_with_attachment() {
        let mut msg = sample();
        msg.files.push(FileAttachment {
            name: "photo.jpg".into(),
            len: 5,
            bytes: vec![1, 2, 3, 4, 5],
        });
        let wire = msg.encode();
        let back = B2fMessage::decode(&wire, 1 << 20).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn missing_required_header_is_rejected() {
        let wire = b"Mid: X\r\nDate: 2026/01/01 00:00\r\nType: P\r\nFrom: W1AW\r\nBody: 0\r\n\r\n\r\n";
        assert!(B2fMessage::decode(wire, 1 << 20).is_err());
    }

    #[test]
    fn declared_payload_exceeding_ceiling_is_rejected() {
        let msg = sample();
        let wire = msg.encode();
        assert!(B2fMessage::decode(&wire, 1).is_err());
    }

    #[test]
    fn duplicate_mid_header_is_rejected() {
        let wire = b"Mid: X\r\nMid: Y\r\nDate: D\r\nType: P\r\nFrom: W1AW\r\nSubject: s\r\nBody: 0\r\n\r\n\r\n";
        let err = B2fMessage::decode(wire, 1 << 20).unwrap_err();
        assert!(matches!(err, FbbError::DuplicateMid(ref v) if v == "Y"));
    }

    #[test]
    fn short_body_is_a_distinct_error() {
        let wire = b"Mid: X\r\nDate: D\r\nType: P\r\nFrom: W1AW\r\nSubject: s\r\nBody: 100\r\n\r\nshort";
        let err = B2fMessage::decode(wire, 1 << 20).unwrap_err();
        assert!(matches!(err, FbbError::ShortBody { .. }));
    }

    #[test]
    fn chunk_roundtrip_single_chunk() {
        let data = b"binary B2F payload".to_vec();
        let wire = frame_chunks(&data);
        assert_eq!(deframe_chunks(&wire).unwrap(), data);
    }

    #[test]
    fn chunk_roundtrip_multiple_chunks() {
        let data: Vec<u8> = (0..600u32).map(|i| (i % 256) as u8).collect();
        let wire = frame_chunks(&data);
        assert_eq!(deframe_chunks(&wire).unwrap(), data);
    }

    #[test]
    fn corrupted_chunk_checksum_is_detected() {
        let data = b"abc".to_vec();
        let mut wire = frame_chunks(&data);
        // Corrupt the single data byte so its checksum no longer matches.
        wire[2] ^= 0xFF;
        assert!(matches!(
            deframe_chunks(&wire),
            Err(FbbError::BatchChecksumMismatch { .. })
        ));
    }
}
