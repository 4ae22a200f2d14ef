//! Payload codecs.
//!
//! Frame payloads are opaque bytes on the wire. When a payload carries
//! structured metadata (see [`crate::protocol::Packet`]) it is encoded with
//! [`MsgPackCodec`].

mod msgpack;

pub use msgpack::MsgPackCodec;
