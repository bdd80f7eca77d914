//! Error kinds for the FBB/B2F engine.
//!
//! A single flat enumeration rather than an exception hierarchy - each variant carries
//! whatever fields are needed to reconstruct a useful message. See spec.md section 7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FbbError {
    #[error("malformed line from peer: {0}")]
    MalformedLine(String),

    #[error("FS reply had {got} verdicts, expected {expected}")]
    VerdictCountMismatch { expected: usize, got: usize },

    #[error("proposal batch checksum mismatch: peer sent {sent:02X}, computed {computed:02X}")]
    BatchChecksumMismatch { sent: u8, computed: u8 },

    #[error("invalid B2F header block: {0}")]
    InvalidHeaders(String),

    #[error("peer proposed duplicate mid {0}")]
    DuplicateMid(String),

    #[error("received body shorter than declared: expected {expected}, got {got}")]
    ShortBody { expected: usize, got: usize },

    #[error("transport read/write failure: {0}")]
    Transport(String),

    #[error("transport timed out waiting for peer")]
    TransportTimeout,

    #[error("peer closed connection mid-message")]
    PeerClosedMidMessage,

    #[error("auth challenge received but no shared secret is configured")]
    AuthNoSecretConfigured,

    #[error("AX.25 link retries exhausted")]
    LinkRetriesExhausted,

    #[error("AX.25 SABM refused by peer (DM)")]
    LinkRefused,

    #[error("AX.25 DISC received mid-session")]
    LinkDisconnected,

    #[error("invalid callsign {0:?}: not uppercase alphanumeric, 1-6 characters")]
    InvalidCallsign(String),

    #[error("SSID {0} out of range 0-15")]
    InvalidSsid(u8),

    #[error("contradictory capability flags in SID: {0}")]
    ContradictoryCapabilities(String),

    #[error("lzhuf decompression failed: {0}")]
    Lzhuf(String),

    #[error("gzip decompression failed: {0}")]
    Gzip(String),
}

/// Aggregates independent failures from a call that fans out across several components,
/// e.g. closing a transport and flushing a resume store at the same time.
#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct FbbErrors(pub Vec<FbbError>);
