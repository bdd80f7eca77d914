#![allow(clippy::needless_range_loop)]

pub mod agwpe;
pub mod ax25;
pub mod b2f;
pub mod callsign;
pub mod error;
pub mod fcs;
pub mod kiss;
pub mod lzhuf;
pub mod proposal;
pub mod resume;
pub mod session;
pub mod sid;
pub mod transport;
