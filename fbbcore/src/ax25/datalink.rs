//! AX.25 v2.0 connected-mode data-link state machine (component C3).
//!
//! This module holds no I/O of its own. The caller drives it with `connect`/`send_data`/
//! `close` for user-initiated actions, `on_frame` for inbound frames off the transport, and
//! `on_timer_tick` once per elapsed unit of time; each call returns an `Outcome` describing
//! what to transmit, what user data was delivered, and any link-lifecycle event.

use std::collections::VecDeque;
use std::time::Duration;

use crate::ax25::frame::{Ax25Frame, Control, PID_NO_LAYER3};
use crate::callsign::{Callsign, DigiPath};
use crate::error::FbbError;

pub const DEFAULT_T1: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_WINDOW: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    AwaitingConnect,
    Connected,
    TimerRecovery,
    AwaitingRelease,
}

/// A link-lifecycle event surfaced to the caller; distinct from the per-call `Outcome` so the
/// session engine can match on `Connected`/`Disconnected`/`Failed` without parsing deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Failed(String),
}

/// Everything that can fall out of feeding one event to the data link: frames that must be
/// handed to the transport, bytes that have newly become available to `recv`, and at most one
/// lifecycle event.
#[derive(Debug, Default)]
pub struct Outcome {
    pub frames_to_send: Vec<Ax25Frame>,
    pub delivered: Vec<u8>,
    pub event: Option<LinkEvent>,
}

impl Outcome {
    fn with_frame(frame: Ax25Frame) -> Self {
        Outcome {
            frames_to_send: vec![frame],
            ..Default::default()
        }
    }
}

struct Unacked {
    ns: u8,
    payload: Vec<u8>,
}

/// One connected-mode AX.25 link to a single remote station.
pub struct DataLink {
    state: State,
    local: Callsign,
    remote: Callsign,
    digipeaters: DigiPath,

    vs: u8,
    vr: u8,
    va: u8,
    window: u8,

    t1: Duration,
    max_retries: u32,
    retries: u32,
    t1_running: bool,
    t1_elapsed: Duration,

    rejected_once: bool,
    unacked: VecDeque<Unacked>,
    pending: VecDeque<Vec<u8>>,
    recv_buffer: VecDeque<u8>,
}

impl DataLink {
    pub fn new(local: Callsign, remote: Callsign, digipeaters: DigiPath) -> Self {
        DataLink {
            state: State::Disconnected,
            local,
            remote,
            digipeaters,
            vs: 0,
            vr: 0,
            va: 0,
            window: DEFAULT_WINDOW,
            t1: DEFAULT_T1,
            max_retries: DEFAULT_MAX_RETRIES,
            retries: 0,
            t1_running: false,
            t1_elapsed: Duration::ZERO,
            rejected_once: false,
            unacked: VecDeque::new(),
            pending: VecDeque::new(),
            recv_buffer: VecDeque::new(),
        }
    }

    pub fn with_window(mut self, window: u8) -> Self {
        self.window = window.min(7);
        self
    }

    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Initiate a connection: send SABM P=1, start T1.
    pub fn connect(&mut self) -> Outcome {
        log::debug!("{} -> {}: sending SABM", self.local, self.remote);
        self.retries = 0;
        self.vs = 0;
        self.vr = 0;
        self.va = 0;
        self.state = State::AwaitingConnect;
        self.start_t1();
        Outcome::with_frame(self.frame(Control::SetAsyncBalancedMode { poll: true }, None, Vec::new()))
    }

    /// Queue a user payload for transmission as an I-frame, sending immediately if the window
    /// allows, otherwise holding it until capacity frees up.
    pub fn send_data(&mut self, payload: Vec<u8>) -> Outcome {
        self.pending.push_back(payload);
        self.drain_pending()
    }

    /// Close the link: send DISC P=1, start T1.
    pub fn close(&mut self) -> Outcome {
        if self.state != State::Connected && self.state != State::TimerRecovery {
            self.state = State::Disconnected;
            return Outcome::default();
        }
        log::debug!("{} -> {}: sending DISC", self.local, self.remote);
        self.state = State::AwaitingRelease;
        self.start_t1();
        Outcome::with_frame(self.frame(Control::Disconnect { poll: true }, None, Vec::new()))
    }

    /// Drain up to `max` bytes of delivered I-frame payload, in AX.25 delivery order.
    pub fn recv(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.recv_buffer.len());
        self.recv_buffer.drain(..n).collect()
    }

    /// Advance the T1 timer by `delta`. Returns any frames/events produced by expiry.
    pub fn on_timer_tick(&mut self, delta: Duration) -> Outcome {
        if !self.t1_running {
            return Outcome::default();
        }
        self.t1_elapsed += delta;
        if self.t1_elapsed < self.t1 {
            return Outcome::default();
        }
        self.t1_elapsed = Duration::ZERO;
        self.on_t1_expiry()
    }

    fn on_t1_expiry(&mut self) -> Outcome {
        log::debug!("{} -> {}: T1 expired in state {:?}, retry {}/{}", self.local, self.remote, self.state, self.retries, self.max_retries);
        match self.state {
            State::AwaitingConnect => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    self.start_t1();
                    Outcome::with_frame(self.frame(
                        Control::SetAsyncBalancedMode { poll: true },
                        None,
                        Vec::new(),
                    ))
                } else {
                    self.state = State::Disconnected;
                    self.t1_running = false;
                    Outcome {
                        event: Some(LinkEvent::Failed("link retries exhausted".into())),
                        ..Default::default()
                    }
                }
            }
            State::Connected => {
                self.state = State::TimerRecovery;
                self.retries = 0;
                self.start_t1();
                Outcome::with_frame(self.frame(
                    Control::ReceiveReady {
                        nr: self.vr,
                        pf: true,
                    },
                    None,
                    Vec::new(),
                ))
            }
            State::TimerRecovery => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    self.start_t1();
                    Outcome::with_frame(self.frame(
                        Control::ReceiveReady {
                            nr: self.vr,
                            pf: true,
                        },
                        None,
                        Vec::new(),
                    ))
                } else {
                    self.state = State::Disconnected;
                    self.t1_running = false;
                    Outcome {
                        frames_to_send: vec![self.frame(
                            Control::DisconnectedMode { final_: true },
                            None,
                            Vec::new(),
                        )],
                        event: Some(LinkEvent::Failed("link retries exhausted".into())),
                        ..Default::default()
                    }
                }
            }
            State::AwaitingRelease => {
                self.state = State::Disconnected;
                self.t1_running = false;
                Outcome {
                    event: Some(LinkEvent::Disconnected),
                    ..Default::default()
                }
            }
            State::Disconnected => Outcome::default(),
        }
    }

    /// Feed one received AX.25 frame addressed to this link.
    pub fn on_frame(&mut self, frame: Ax25Frame) -> Outcome {
        let control = match Control::decode(frame.control) {
            Ok(c) => c,
            Err(_) => return Outcome::default(),
        };
        match (self.state, control) {
            (State::AwaitingConnect, Control::UnnumberedAck { .. }) => {
                self.vs = 0;
                self.vr = 0;
                self.va = 0;
                self.state = State::Connected;
                self.t1_running = false;
                Outcome {
                    event: Some(LinkEvent::Connected),
                    ..Default::default()
                }
            }
            (State::AwaitingConnect, Control::DisconnectedMode { .. }) => {
                self.state = State::Disconnected;
                self.t1_running = false;
                Outcome {
                    event: Some(LinkEvent::Failed("SABM refused by peer".into())),
                    ..Default::default()
                }
            }
            (State::Connected, Control::Information { ns, nr, poll: _ }) => {
                let mut outcome = self.absorb_ack(nr);
                if ns == self.vr {
                    self.recv_buffer.extend(frame.info.iter().copied());
                    self.vr = (self.vr + 1) % 8;
                    self.rejected_once = false;
                    outcome.frames_to_send.push(self.frame(
                        Control::ReceiveReady {
                            nr: self.vr,
                            pf: false,
                        },
                        None,
                        Vec::new(),
                    ));
                } else if !self.rejected_once {
                    log::debug!("{} -> {}: out-of-sequence I-frame ns={}, expected {}, sending REJ", self.local, self.remote, ns, self.vr);
                    self.rejected_once = true;
                    outcome.frames_to_send.push(self.frame(
                        Control::Reject {
                            nr: self.vr,
                            pf: false,
                        },
                        None,
                        Vec::new(),
                    ));
                }
                outcome
            }
            (State::Connected, Control::ReceiveReady { nr, pf: _ }) => self.absorb_ack(nr),
            (State::Connected, Control::ReceiveNotReady { nr, pf: _ }) => {
                self.va = nr;
                Outcome::default()
            }
            (State::Connected, Control::Reject { nr, pf: _ }) => self.retransmit_from(nr),
            (State::Connected, Control::Disconnect { poll }) => {
                self.state = State::Disconnected;
                self.t1_running = false;
                Outcome {
                    frames_to_send: vec![self.frame(Control::UnnumberedAck { final_: poll }, None, Vec::new())],
                    event: Some(LinkEvent::Disconnected),
                    ..Default::default()
                }
            }
            (State::TimerRecovery, Control::ReceiveReady { nr, pf })
            | (State::TimerRecovery, Control::ReceiveNotReady { nr, pf })
                if pf =>
            {
                self.va = nr;
                self.state = State::Connected;
                self.t1_running = false;
                let mut outcome = self.retransmit_from(nr);
                outcome.event = Some(LinkEvent::Connected);
                outcome
            }
            (State::AwaitingRelease, Control::UnnumberedAck { .. })
            | (State::AwaitingRelease, Control::DisconnectedMode { .. }) => {
                self.state = State::Disconnected;
                self.t1_running = false;
                Outcome {
                    event: Some(LinkEvent::Disconnected),
                    ..Default::default()
                }
            }
            (_, Control::SetAsyncBalancedMode { poll }) => {
                // Remote re-establishing while we think we're connected: accept and reset.
                self.vs = 0;
                self.vr = 0;
                self.va = 0;
                self.unacked.clear();
                self.state = State::Connected;
                self.t1_running = false;
                Outcome {
                    frames_to_send: vec![self.frame(Control::UnnumberedAck { final_: poll }, None, Vec::new())],
                    event: Some(LinkEvent::Connected),
                    ..Default::default()
                }
            }
            _ => Outcome::default(),
        }
    }

    fn absorb_ack(&mut self, nr: u8) -> Outcome {
        while self.va != nr {
            self.unacked.pop_front();
            self.va = (self.va + 1) % 8;
        }
        if self.va == self.vs {
            self.t1_running = false;
        } else {
            self.start_t1();
        }
        self.drain_pending()
    }

    fn retransmit_from(&mut self, nr: u8) -> Outcome {
        while self.va != nr {
            self.unacked.pop_front();
            self.va = (self.va + 1) % 8;
        }
        let frames = self
            .unacked
            .iter()
            .map(|u| self.frame(Control::Information { ns: u.ns, nr: self.vr, poll: false }, Some(PID_NO_LAYER3), u.payload.clone()))
            .collect();
        self.start_t1();
        Outcome {
            frames_to_send: frames,
            ..Default::default()
        }
    }

    fn drain_pending(&mut self) -> Outcome {
        let mut outcome = Outcome::default();
        if self.state != State::Connected {
            return outcome;
        }
        while self.unacked.len() < self.window as usize {
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            let ns = self.vs;
            self.vs = (self.vs + 1) % 8;
            self.unacked.push_back(Unacked {
                ns,
                payload: payload.clone(),
            });
            outcome.frames_to_send.push(self.frame(
                Control::Information {
                    ns,
                    nr: self.vr,
                    poll: false,
                },
                Some(PID_NO_LAYER3),
                payload,
            ));
            if !self.t1_running {
                self.start_t1();
            }
        }
        outcome
    }

    fn start_t1(&mut self) {
        self.t1_running = true;
        self.t1_elapsed = Duration::ZERO;
    }

    fn frame(&self, control: Control, pid: Option<u8>, info: Vec<u8>) -> Ax25Frame {
        Ax25Frame {
            dest: self.remote.clone(),
            src: self.local.clone(),
            digipeaters: self.digipeaters.clone(),
            control: control.encode(),
            pid,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> Callsign {
        Callsign::new("W1AW", 0).unwrap()
    }
    fn remote() -> Callsign {
        Callsign::new("KE4AHR", 0).unwrap()
    }

    fn link() -> DataLink {
        DataLink::new(local(), remote(), DigiPath::default())
    }

    #[test]
    fn connect_sends_sabm_and_ua_completes_it() {
        let mut dl = link();
        let out = dl.connect();
        assert_eq!(dl.state(), State::AwaitingConnect);
        assert_eq!(out.frames_to_send.len(), 1);

        let ua = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::UnnumberedAck { final_: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let out = dl.on_frame(ua);
        assert_eq!(dl.state(), State::Connected);
        assert_eq!(out.event, Some(LinkEvent::Connected));
    }

    #[test]
    fn dm_while_awaiting_connect_reports_refusal() {
        let mut dl = link();
        dl.connect();
        let dm = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::DisconnectedMode { final_: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let out = dl.on_frame(dm);
        assert_eq!(dl.state(), State::Disconnected);
        assert!(matches!(out.event, Some(LinkEvent::Failed(_))));
    }

    #[test]
    fn retry_exhaustion_reports_failure() {
        let mut dl = link().with_max_retries(2).with_t1(Duration::from_millis(10));
        dl.connect();
        for _ in 0..2 {
            let out = dl.on_timer_tick(Duration::from_millis(10));
            assert!(out.frames_to_send.iter().any(|f| f.control == Control::SetAsyncBalancedMode { poll: true }.encode()));
        }
        let out = dl.on_timer_tick(Duration::from_millis(10));
        assert_eq!(dl.state(), State::Disconnected);
        assert!(matches!(out.event, Some(LinkEvent::Failed(_))));
    }

    fn connected_link() -> DataLink {
        let mut dl = link();
        dl.connect();
        let ua = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::UnnumberedAck { final_: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        dl.on_frame(ua);
        dl
    }

    #[test]
    fn in_sequence_iframe_is_delivered_and_acked() {
        let mut dl = connected_link();
        let i = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::Information { ns: 0, nr: 0, poll: false }.encode(),
            pid: Some(PID_NO_LAYER3),
            info: b"hello".to_vec(),
        };
        let out = dl.on_frame(i);
        assert_eq!(dl.recv(16), b"hello");
        assert!(out
            .frames_to_send
            .iter()
            .any(|f| Control::decode(f.control).unwrap() == Control::ReceiveReady { nr: 1, pf: false }));
    }

    #[test]
    fn out_of_sequence_iframe_triggers_single_reject() {
        let mut dl = connected_link();
        let bad = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::Information { ns: 3, nr: 0, poll: false }.encode(),
            pid: Some(PID_NO_LAYER3),
            info: b"out-of-order".to_vec(),
        };
        let out1 = dl.on_frame(bad.clone());
        assert!(dl.recv(16).is_empty());
        assert_eq!(out1.frames_to_send.len(), 1);
        let out2 = dl.on_frame(bad);
        assert!(out2.frames_to_send.is_empty());
    }

    #[test]
    fn data_is_queued_and_sent_within_window() {
        let mut dl = connected_link().with_window(2);
        let out = dl.send_data(b"one".to_vec());
        assert_eq!(out.frames_to_send.len(), 1);
        let out = dl.send_data(b"two".to_vec());
        assert_eq!(out.frames_to_send.len(), 1);
        // Window now full; a third payload is held, not transmitted immediately.
        let out = dl.send_data(b"three".to_vec());
        assert!(out.frames_to_send.is_empty());
    }

    #[test]
    fn rr_ack_releases_window_for_pending_data() {
        let mut dl = connected_link().with_window(1);
        dl.send_data(b"one".to_vec());
        let out = dl.send_data(b"two".to_vec());
        assert!(out.frames_to_send.is_empty());

        let rr = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::ReceiveReady { nr: 1, pf: false }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let out = dl.on_frame(rr);
        assert_eq!(out.frames_to_send.len(), 1);
    }

    #[test]
    fn reject_retransmits_only_from_nr_onward() {
        let mut dl = connected_link().with_window(4);
        dl.send_data(b"one".to_vec());
        dl.send_data(b"two".to_vec());
        dl.send_data(b"three".to_vec());

        let rej = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::Reject { nr: 1, pf: false }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let out = dl.on_frame(rej);
        // Only ns=1 ("two") and ns=2 ("three") should go back out; ns=0 ("one") is already acked.
        assert_eq!(out.frames_to_send.len(), 2);
        for frame in &out.frames_to_send {
            match Control::decode(frame.control).unwrap() {
                Control::Information { ns, .. } => assert!(ns == 1 || ns == 2),
                other => panic!("unexpected control {:?}", other),
            }
        }
    }

    #[test]
    fn disc_closes_link_cleanly() {
        let mut dl = connected_link();
        let out = dl.close();
        assert_eq!(dl.state(), State::AwaitingRelease);
        assert_eq!(out.frames_to_send.len(), 1);

        let ua = Ax25Frame {
            dest: local(),
            src: remote(),
            digipeaters: DigiPath::default(),
            control: Control::UnnumberedAck { final_: true }.encode(),
            pid: None,
            info: Vec::new(),
        };
        let out = dl.on_frame(ua);
        assert_eq!(dl.state(), State::Disconnected);
        assert_eq!(out.event, Some(LinkEvent::Disconnected));
    }
}
