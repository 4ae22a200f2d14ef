//! Single-slot receive buffer.
//!
//! A stream owns exactly one [`FrameSlot`]. Reading a frame fills the slot
//! and marks it valid; handing the frame to the consumer and returning to
//! the event loop invalidates it again. Storage grows to the largest payload
//! seen and is never shrunk, so steady-state reads do not allocate.
//!
//! State machine:
//! - `Empty`: magic cleared, no descriptor held
//! - `Filling`: storage sized for the announced payload, bytes arriving
//! - `Valid`: magic set, payload and optional descriptor readable

use std::os::fd::{AsFd, OwnedFd};

use bytes::BytesMut;

use super::frame::FrameRef;
use super::wire_format::FRAME_MAGIC;

/// Reusable storage for the most recently received frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    storage: BytesMut,
    len: usize,
    fd: Option<OwnedFd>,
    magic: u32,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot with preallocated storage.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut storage = BytesMut::with_capacity(capacity);
        storage.resize(capacity, 0);
        Self {
            storage,
            ..Self::default()
        }
    }

    /// Whether the slot holds a complete, unconsumed frame.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_MAGIC
    }

    /// Bytes of storage currently allocated.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Drop the current frame. Releases the held descriptor, keeps storage.
    pub fn invalidate(&mut self) {
        self.magic = 0;
        self.len = 0;
        self.fd = None;
    }

    /// Size storage for a `len`-byte payload and return it for filling.
    ///
    /// Invalidates any previous frame first.
    pub(crate) fn prepare(&mut self, len: usize) -> &mut [u8] {
        self.invalidate();
        if self.storage.len() < len {
            self.storage.resize(len, 0);
        }
        self.len = len;
        &mut self.storage[..len]
    }

    /// Mark the prepared payload complete and attach the received descriptor.
    pub(crate) fn commit(&mut self, fd: Option<OwnedFd>) {
        self.fd = fd;
        self.magic = FRAME_MAGIC;
    }

    /// Borrow the frame, if the slot is valid.
    pub fn peek(&self) -> Option<FrameRef<'_>> {
        if !self.is_valid() {
            return None;
        }
        Some(FrameRef::new(
            &self.storage[..self.len],
            self.fd.as_ref().map(|fd| fd.as_fd()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn fill(slot: &mut FrameSlot, payload: &[u8], fd: Option<OwnedFd>) {
        slot.prepare(payload.len()).copy_from_slice(payload);
        slot.commit(fd);
    }

    #[test]
    fn test_empty_slot_is_invalid() {
        let slot = FrameSlot::new();
        assert!(!slot.is_valid());
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_fill_and_peek() {
        let mut slot = FrameSlot::new();
        fill(&mut slot, b"hello", None);

        let frame = slot.peek().unwrap();
        assert_eq!(frame.payload(), b"hello");
        assert!(frame.fd().is_none());
    }

    #[test]
    fn test_invalidate_releases_descriptor() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut slot = FrameSlot::new();
        fill(&mut slot, b"x", Some(OwnedFd::from(a)));
        assert!(slot.peek().unwrap().fd().is_some());

        slot.invalidate();
        assert!(!slot.is_valid());
        assert!(slot.fd.is_none());
    }

    #[test]
    fn test_storage_grows_and_never_shrinks() {
        let mut slot = FrameSlot::with_capacity(8);
        assert_eq!(slot.capacity(), 8);

        fill(&mut slot, &[7u8; 100], None);
        assert_eq!(slot.capacity(), 100);

        fill(&mut slot, b"tiny", None);
        assert_eq!(slot.capacity(), 100);
        assert_eq!(slot.peek().unwrap().payload(), b"tiny");
    }

    #[test]
    fn test_prepare_invalidates_previous_frame() {
        let mut slot = FrameSlot::new();
        fill(&mut slot, b"first", None);
        slot.prepare(3);
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_zero_length_frame() {
        let mut slot = FrameSlot::new();
        fill(&mut slot, b"", None);
        assert_eq!(slot.peek().unwrap().payload_len(), 0);
    }
}
