//! AX.25 Frame Check Sequence: CRC-16 CCITT (the HDLC/X.25 variant), little-endian on the wire.

pub const AX25_FCS_ALG: crc::Algorithm<u16> = crc::Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF,
    check: 0x906E,
    residue: 0xF0B8,
};

/// Compute the FCS over a frame's address+control+PID+payload bytes (everything between the
/// opening flag and the FCS itself).
pub fn compute_fcs(frame_bytes: &[u8]) -> u16 {
    let crc = crc::Crc::<u16>::new(&AX25_FCS_ALG);
    let mut digest = crc.digest();
    digest.update(frame_bytes);
    digest.finalize()
}

/// Append the little-endian FCS to a frame buffer.
pub fn append_fcs(frame: &mut Vec<u8>) {
    let fcs = compute_fcs(frame);
    frame.extend_from_slice(&fcs.to_le_bytes());
}

/// Verify a received frame's trailing little-endian FCS. `frame_with_fcs` is the full frame
/// including the two trailing FCS bytes.
pub fn verify_fcs(frame_with_fcs: &[u8]) -> bool {
    if frame_with_fcs.len() < 2 {
        return false;
    }
    let (body, fcs_bytes) = frame_with_fcs.split_at(frame_with_fcs.len() - 2);
    let received = u16::from_le_bytes([fcs_bytes[0], fcs_bytes[1]]);
    compute_fcs(body) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_catalog() {
        assert_eq!(compute_fcs(b"123456789"), 0x906E);
    }

    #[test]
    fn append_then_verify_roundtrip() {
        let mut frame = b"hello ax.25 world".to_vec();
        append_fcs(&mut frame);
        assert!(verify_fcs(&frame));
    }

    #[test]
    fn corrupted_frame_fails_verify() {
        let mut frame = b"hello ax.25 world".to_vec();
        append_fcs(&mut frame);
        let last = frame.len() - 1;
        frame[0] ^= 0xFF;
        let _ = last;
        assert!(!verify_fcs(&frame));
    }
}
