//! Resume/offset persistence hook.
//!
//! Filesystem I/O for storing resume state is out of scope for this crate; the session engine
//! only depends on this trait, and the caller supplies whatever backing store it likes.

use std::collections::HashMap;

pub trait ResumeStore {
    fn offset_for(&self, mid: &str) -> Option<usize>;
    fn record_offset(&mut self, mid: &str, offset: usize);
}

/// A trivial in-process store, useful in tests and as a default for callers that don't need
/// resume state to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryResumeStore {
    offsets: HashMap<String, usize>,
}

impl InMemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumeStore for InMemoryResumeStore {
    fn offset_for(&self, mid: &str) -> Option<usize> {
        self.offsets.get(mid).copied()
    }

    fn record_offset(&mut self, mid: &str, offset: usize) {
        self.offsets.insert(mid.to_string(), offset);
    }
}
