//! Wire format of the data-plane header.
//!
//! Every frame on a data socket starts with a fixed-size header:
//! ```text
//! ┌──────────────────┐
//! │ Length           │
//! │ 4 bytes, u32 NE  │
//! └──────────────────┘
//! ```
//! followed by exactly `length` payload bytes. At most one file descriptor
//! travels as ancillary data on the same send.
//!
//! The header mirrors the in-memory layout of `struct { uint32_t length; }`
//! on the host, so it is native endian. Both ends of a data socket always
//! live on the same machine.

use crate::error::{Result, StreamportError};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Largest payload the wire format can describe.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = u32::MAX;

/// Tag stored in a frame slot while it holds a complete, unconsumed frame.
pub const FRAME_MAGIC: u32 = 0x5350_4652; // "SPFR"

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes.
    pub length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(length: u32) -> Self {
        Self { length }
    }

    /// Header describing `payload`.
    ///
    /// Fails if the payload does not fit the length field.
    pub fn for_payload(payload: &[u8]) -> Result<Self> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            StreamportError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                ABSOLUTE_MAX_PAYLOAD_SIZE
            ))
        })?;
        Ok(Self { length })
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use streamport::protocol::{Header, HEADER_SIZE};
    ///
    /// let bytes = Header::new(100).encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.length.to_ne_bytes()
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let bytes: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            length: u32::from_ne_bytes(bytes),
        })
    }

    /// Check the announced payload against a receiver limit.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.length > max_payload_size {
            return Err(StreamportError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.length, max_payload_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(4096);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_matches_native_layout() {
        let bytes = Header::new(0x0102_0304).encode();
        assert_eq!(bytes, 0x0102_0304u32.to_ne_bytes());
        assert_eq!(HEADER_SIZE, 4);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = Header::new(7).encode().to_vec();
        buf.extend_from_slice(b"payload");
        assert_eq!(Header::decode(&buf), Some(Header::new(7)));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let result = Header::new(1_000_000).validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
        assert!(Header::new(100).validate(100).is_ok());
    }

    #[test]
    fn test_for_payload() {
        assert_eq!(Header::for_payload(b"hello").unwrap(), Header::new(5));
        assert_eq!(Header::for_payload(b"").unwrap(), Header::new(0));
    }
}
