//! Transport module - Unix stream sockets with descriptor passing.
//!
//! Each started channel owns one connected socket pair. The server keeps
//! one end, the client receives the other over the control channel.

mod socket;

pub use socket::DataSocket;
