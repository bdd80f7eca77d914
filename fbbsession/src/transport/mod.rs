//! Concrete [`fbbcore::transport::Transport`] implementations: the bytes-in/bytes-out side of
//! the three carriers named in component C8 - a raw TCP stream, KISS-framed AX.25 over any
//! `Read + Write` byte stream, and AGWPE.

pub mod agwpe;
pub mod kiss_ax25;
pub mod tcp;

pub use agwpe::AgwpeTransport;
pub use kiss_ax25::KissAx25Transport;
pub use tcp::TcpTransport;
