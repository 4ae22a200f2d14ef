//! Structured buffer payloads.
//!
//! Most producers put media metadata in the frame payload as a short list
//! of packets: a timing header, a description of a payload slice living in
//! the attached descriptor, a release for a slice handed out earlier, or an
//! in-band format change. Packets are MsgPack encoded; raw payloads that do
//! not follow this layout are still valid frames.
//!
//! ```
//! use streamport::protocol::{Packet, decode_packets, encode_packets};
//!
//! let packets = vec![
//!     Packet::Header { seq: 1, pts: 0, dts_offset: 0 },
//!     Packet::FdPayload { id: 0, offset: 0, size: 4096 },
//! ];
//! let bytes = encode_packets(&packets).unwrap();
//! assert_eq!(decode_packets(&bytes).unwrap(), packets);
//! ```

use std::os::fd::OwnedFd;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// One metadata record inside a frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packet {
    /// Timing information for the buffer.
    Header { seq: u32, pts: i64, dts_offset: i64 },
    /// `size` bytes at `offset` inside the descriptor attached to the frame.
    FdPayload { id: u32, offset: u64, size: u64 },
    /// The receiver is done with the slice `id`.
    ReleaseFdPayload { id: u32 },
    /// In-band format switch, serialized caps.
    FormatChange { id: u8, format: String },
}

pub fn encode_packets(packets: &[Packet]) -> Result<Bytes> {
    Ok(Bytes::from(MsgPackCodec::encode(&packets)?))
}

pub fn decode_packets(payload: &[u8]) -> Result<Vec<Packet>> {
    MsgPackCodec::decode(payload)
}

/// Accumulates packets and produces a frame.
#[derive(Debug, Default)]
pub struct BufferBuilder {
    packets: Vec<Packet>,
    fd: Option<OwnedFd>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, seq: u32, pts: i64, dts_offset: i64) -> Self {
        self.packets.push(Packet::Header {
            seq,
            pts,
            dts_offset,
        });
        self
    }

    /// Describe a slice of `fd` and attach it to the frame.
    ///
    /// A frame carries one descriptor; a second call replaces the first.
    pub fn fd_payload(mut self, id: u32, fd: OwnedFd, offset: u64, size: u64) -> Self {
        self.packets.push(Packet::FdPayload { id, offset, size });
        self.fd = Some(fd);
        self
    }

    pub fn release_fd_payload(mut self, id: u32) -> Self {
        self.packets.push(Packet::ReleaseFdPayload { id });
        self
    }

    pub fn format_change(mut self, id: u8, format: impl Into<String>) -> Self {
        self.packets.push(Packet::FormatChange {
            id,
            format: format.into(),
        });
        self
    }

    pub fn build(self) -> Result<Frame> {
        let payload = encode_packets(&self.packets)?;
        Ok(match self.fd {
            Some(fd) => Frame::with_fd(payload, fd),
            None => Frame::new(payload),
        })
    }
}
