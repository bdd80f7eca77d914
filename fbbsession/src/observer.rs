//! Observer hook for a running forwarding session: every registered observer is notified of
//! lifecycle events as [`crate::engine::ForwardingEngine`] drives a session to completion.
//!
//! Unlike the packet/stream adapter split this runtime used to have, a session is one-shot
//! rather than continuous, so every method here has a default no-op body - most observers only
//! care about one or two of them.

use fbbcore::error::FbbError;
use fbbcore::session::{MessageOutcome, SessionReport};

pub trait SessionObserver: Send + Sync {
    fn session_started(&self) {}
    fn message_sent(&self, _mid: &str, _outcome: &MessageOutcome) {}
    fn message_received(&self, _mid: &str) {}
    fn session_completed(&self, _report: &SessionReport) {}
    fn session_failed(&self, _error: &FbbError) {}
}
