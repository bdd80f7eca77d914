//! AX.25 v2.0 connected-mode link layer: address/control/FCS framing plus the data-link
//! state machine that rides on top of it (components C2 and C3).

pub mod datalink;
pub mod frame;
