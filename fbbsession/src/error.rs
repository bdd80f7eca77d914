use thiserror::Error;

use fbbcore::error::FbbError;

/// Errors that can surface from driving a session on a background thread, beyond whatever
/// [`FbbError`] the session engine itself raises.
#[derive(Debug, Error)]
pub enum SessionRuntimeError {
    #[error(transparent)]
    Session(#[from] FbbError),

    #[error("session thread panicked before completing")]
    ThreadPanicked,
}
