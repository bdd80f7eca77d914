//! Threaded runtime driving [`fbbcore::session::Session`] (component C7) to completion in the
//! background, notifying registered [`SessionObserver`]s as it goes.

use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use fbbcore::error::FbbError;
use fbbcore::resume::ResumeStore;
use fbbcore::session::{OutboundMessage, Session, SessionConfig, SessionReport};
use fbbcore::transport::Transport;

use crate::error::SessionRuntimeError;
use crate::observer::SessionObserver;

/// Owns the set of observers a forwarding run notifies; the session itself is single-use and
/// lives only for the duration of one `run_background` call.
#[derive(Default)]
pub struct ForwardingEngine {
    observers: Arc<RwLock<Vec<Arc<dyn SessionObserver>>>>,
}

impl ForwardingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer<O: SessionObserver + 'static>(&self, observer: O) {
        self.observers.write().unwrap().push(Arc::new(observer));
    }

    /// Runs one session to completion on a dedicated thread: negotiate, offer the outbox,
    /// accept whatever the peer offers back, and report. The returned handle's `join()` yields
    /// the same [`SessionReport`] every observer was notified of.
    pub fn run_background(
        &self,
        mut transport: Box<dyn Transport + Send>,
        config: SessionConfig,
        outbox: Vec<OutboundMessage>,
        mut resume: Box<dyn ResumeStore + Send>,
    ) -> JoinHandle<Result<SessionReport, FbbError>> {
        let observers = Arc::clone(&self.observers);
        thread::spawn(move || {
            for observer in observers.read().unwrap().iter() {
                observer.session_started();
            }
            let mut session = Session::new(config);
            let result = session.run(transport.as_mut(), outbox, resume.as_mut());
            let observers = observers.read().unwrap();
            match &result {
                Ok(report) => {
                    for (mid, outcome) in &report.outbound {
                        for observer in observers.iter() {
                            observer.message_sent(mid, outcome);
                        }
                    }
                    for message in &report.received {
                        for observer in observers.iter() {
                            observer.message_received(&message.mid);
                        }
                    }
                    for observer in observers.iter() {
                        observer.session_completed(report);
                    }
                }
                Err(e) => {
                    for observer in observers.iter() {
                        observer.session_failed(e);
                    }
                }
            }
            result
        })
    }

    /// Joins a handle from [`run_background`](Self::run_background), turning a panicked session
    /// thread into [`SessionRuntimeError::ThreadPanicked`] instead of propagating the panic.
    pub fn join(handle: JoinHandle<Result<SessionReport, FbbError>>) -> Result<SessionReport, SessionRuntimeError> {
        match handle.join() {
            Ok(result) => result.map_err(SessionRuntimeError::from),
            Err(_) => Err(SessionRuntimeError::ThreadPanicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::NullTransport;
    use fbbcore::resume::InMemoryResumeStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagObserver(Arc<AtomicBool>);
    impl SessionObserver for FlagObserver {
        fn session_started(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn observers_are_notified_of_session_start() {
        let engine = ForwardingEngine::new();
        let flag = Arc::new(AtomicBool::new(false));
        engine.add_observer(FlagObserver(Arc::clone(&flag)));

        let handle = engine.run_background(
            Box::new(NullTransport::default()),
            SessionConfig::default(),
            Vec::new(),
            Box::new(InMemoryResumeStore::new()),
        );
        let _ = ForwardingEngine::join(handle).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn join_reports_thread_panic_instead_of_propagating() {
        let handle: JoinHandle<Result<SessionReport, FbbError>> =
            thread::spawn(|| panic!("session thread panicked before completing"));
        let err = ForwardingEngine::join(handle).unwrap_err();
        assert!(matches!(err, crate::error::SessionRuntimeError::ThreadPanicked));
    }
}
