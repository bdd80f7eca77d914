//! Threaded runtime for forwarding engine over F6FBB/B2F sessions (component C7 in motion):
//! concrete transports for TCP, KISS-framed AX.25, and AGWPE; a background-thread runner for
//! [`fbbcore::session::Session`]; and a file-backed resume store.

pub mod engine;
pub mod error;
pub mod observer;
pub mod resume;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use fbbcore::session::{OutboundMessage, Session, SessionConfig, SessionReport};
