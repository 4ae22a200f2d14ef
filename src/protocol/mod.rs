//! Protocol module - wire format, frames, and the receive slot.
//!
//! This module implements the data-plane framing:
//! - 4-byte length header encoding/decoding
//! - Owned and borrowed frame types
//! - Single-slot receive buffer
//! - MsgPack buffer-metadata packets

mod frame;
mod frame_buffer;
mod packet;
mod wire_format;

pub use frame::{build_frame, Frame, FrameRef};
pub use frame_buffer::FrameSlot;
pub use packet::{decode_packets, encode_packets, BufferBuilder, Packet};
pub use wire_format::{Header, ABSOLUTE_MAX_PAYLOAD_SIZE, FRAME_MAGIC, HEADER_SIZE};
