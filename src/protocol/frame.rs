//! Frame types: an owned frame for sending, a borrowed view for receiving.
//!
//! A frame is a payload plus at most one file descriptor. The owned
//! [`Frame`] uses `bytes::Bytes` so payloads can be shared without copying.
//! [`FrameRef`] is what a stream hands out for the frame it just read; it
//! borrows the stream's single receive slot and cannot outlive it.
//!
//! # Example
//!
//! ```
//! use streamport::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Bytes::from_static(b"hello"));
//! assert_eq!(frame.payload(), b"hello");
//! assert!(frame.fd().is_none());
//! ```

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};
use crate::error::Result;

/// A complete frame owned by the caller.
#[derive(Debug)]
pub struct Frame {
    payload: Bytes,
    fd: Option<OwnedFd>,
}

impl Frame {
    /// Create a frame without a descriptor.
    pub fn new(payload: Bytes) -> Self {
        Self { payload, fd: None }
    }

    /// Create a frame that carries `fd` alongside the payload.
    pub fn with_fd(payload: Bytes, fd: OwnedFd) -> Self {
        Self {
            payload,
            fd: Some(fd),
        }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_slice(payload: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(payload))
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Borrow the attached descriptor, if any.
    #[inline]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Detach the descriptor, transferring ownership to the caller.
    pub fn take_fd(&mut self) -> Option<OwnedFd> {
        self.fd.take()
    }

    /// Header that precedes this frame on the wire.
    pub fn header(&self) -> Result<Header> {
        Header::for_payload(&self.payload)
    }

    /// Duplicate the frame. The payload is shared, the descriptor is dup'ed.
    pub fn try_clone(&self) -> Result<Frame> {
        let fd = match &self.fd {
            Some(fd) => Some(fd.try_clone()?),
            None => None,
        };
        Ok(Frame {
            payload: self.payload.clone(),
            fd,
        })
    }
}

/// A frame borrowed from a receive slot.
///
/// Valid until the owning stream is polled again; use [`FrameRef::to_owned`]
/// to keep the data longer.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    payload: &'a [u8],
    fd: Option<BorrowedFd<'a>>,
}

impl<'a> FrameRef<'a> {
    pub(crate) fn new(payload: &'a [u8], fd: Option<BorrowedFd<'a>>) -> Self {
        Self { payload, fd }
    }

    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn fd(&self) -> Option<BorrowedFd<'a>> {
        self.fd
    }

    /// Copy the payload and duplicate the descriptor into an owned frame.
    pub fn to_owned(&self) -> Result<Frame> {
        let fd = match self.fd {
            Some(fd) => Some(fd.try_clone_to_owned()?),
            None => None,
        };
        Ok(Frame {
            payload: Bytes::copy_from_slice(self.payload),
            fd,
        })
    }
}

/// Build header and payload as a single byte vector.
///
/// # Example
///
/// ```
/// use streamport::protocol::{build_frame, HEADER_SIZE};
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_payload(payload)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}
