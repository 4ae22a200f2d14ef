//! Data socket with descriptor passing.
//!
//! A [`DataSocket`] is one end of a connected Unix stream socket pair. Frames
//! are written with a single `sendmsg` that carries the header, the payload
//! and at most one descriptor as `SCM_RIGHTS` ancillary data. On the read
//! side the header is taken with `recvmsg` so the descriptor arrives with it,
//! then the payload is read to completion.
//!
//! # Example
//!
//! ```no_run
//! use streamport::protocol::{Frame, FrameSlot};
//! use streamport::transport::DataSocket;
//!
//! # async fn demo() -> streamport::error::Result<()> {
//! let (a, b) = DataSocket::pair()?;
//! a.send_frame(&Frame::from_slice(b"hello")).await?;
//!
//! let mut slot = FrameSlot::new();
//! b.recv_frame(&mut slot, 1024).await?;
//! assert_eq!(slot.peek().unwrap().payload(), b"hello");
//! # Ok(())
//! # }
//! ```

use std::io::{self, ErrorKind};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use tokio::io::Interest;
use tokio::net::UnixStream;

use crate::error::{Result, StreamportError};
use crate::protocol::{Frame, FrameSlot, Header, HEADER_SIZE};

/// Descriptors accepted per header read. Anything above one is closed.
const MAX_RECV_FDS: usize = 8;

/// Connected Unix stream socket carrying length-prefixed frames.
#[derive(Debug)]
pub struct DataSocket {
    stream: UnixStream,
}

impl DataSocket {
    /// Create a connected pair. Must be called within a tokio runtime.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = StdUnixStream::pair()?;
        Ok((Self::from_std(a)?, Self::from_std(b)?))
    }

    /// Wrap a std socket, switching it to non-blocking mode.
    pub fn from_std(stream: StdUnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: UnixStream::from_std(stream)?,
        })
    }

    /// Adopt a received socket descriptor.
    pub fn from_owned_fd(fd: OwnedFd) -> Result<Self> {
        Self::from_std(StdUnixStream::from(fd))
    }

    /// Open a second handle on the same socket.
    pub fn try_clone(&self) -> Result<Self> {
        Self::from_owned_fd(self.stream.as_fd().try_clone_to_owned()?)
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &UnixStream {
        &self.stream
    }

    /// Wait until the socket has data (or EOF) to read.
    ///
    /// Cancel safe. Readiness may be spurious.
    pub async fn readable(&self) -> Result<()> {
        Ok(self.stream.readable().await?)
    }

    /// Send one frame.
    ///
    /// Frames from concurrent senders on the same socket may interleave;
    /// callers serialize sends.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_parts(frame.payload(), frame.fd()).await
    }

    /// Send `payload` with an optional descriptor as one frame.
    pub async fn send_parts(&self, payload: &[u8], fd: Option<BorrowedFd<'_>>) -> Result<()> {
        let header = Header::for_payload(payload)?.encode();
        let fds: Vec<RawFd> = fd.iter().map(|fd| fd.as_raw_fd()).collect();
        let raw = self.stream.as_raw_fd();

        let sent = loop {
            self.stream.writable().await?;
            match self.stream.try_io(Interest::WRITABLE, || {
                sendmsg_with_fds(raw, &[&header, payload], &fds)
            }) {
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
                Ok(n) => break n,
            }
        };

        // The descriptor went out with the first byte; the rest is plain data.
        if sent < HEADER_SIZE {
            self.write_all(&header[sent..]).await?;
            self.write_all(payload).await?;
        } else {
            self.write_all(&payload[sent - HEADER_SIZE..]).await?;
        }
        Ok(())
    }

    /// Wait for and read one complete frame into `slot`.
    ///
    /// Returns [`StreamportError::Closed`] if the peer closed the socket
    /// cleanly between frames.
    pub async fn recv_frame(&self, slot: &mut FrameSlot, max_payload_size: u32) -> Result<()> {
        loop {
            self.stream.readable().await?;
            if self.try_recv_frame(slot, max_payload_size).await? {
                return Ok(());
            }
        }
    }

    /// Read one frame if a header is available right now.
    ///
    /// Returns `Ok(false)` without consuming anything when the socket has no
    /// data. Once a header has been read, the payload is awaited to
    /// completion, so the future must not be dropped half way.
    pub async fn try_recv_frame(&self, slot: &mut FrameSlot, max_payload_size: u32) -> Result<bool> {
        let raw = self.stream.as_raw_fd();
        let mut header_buf = [0u8; HEADER_SIZE];

        let (n, fds) = match self.stream.try_io(Interest::READABLE, || {
            recvmsg_with_fds(raw, &mut header_buf, MAX_RECV_FDS)
        }) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
            Ok(r) => r,
        };

        if n == 0 {
            return Err(StreamportError::Closed);
        }
        let fd = retain_first_fd(fds);
        if n < HEADER_SIZE {
            return Err(StreamportError::Protocol(format!(
                "short header read: {} of {} bytes",
                n, HEADER_SIZE
            )));
        }

        let header = Header::decode(&header_buf)
            .ok_or_else(|| StreamportError::Protocol("short header read".into()))?;
        header.validate(max_payload_size)?;

        let buf = slot.prepare(header.length as usize);
        self.read_exact(buf).await?;
        slot.commit(fd);

        tracing::trace!(len = header.length, "frame received");
        Ok(true)
    }

    async fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Ok(0) => return Err(StreamportError::Closed),
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            self.stream.readable().await?;
            match self.stream.try_read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(StreamportError::Protocol(format!(
                        "short payload read: {} of {} bytes",
                        filled,
                        buf.len()
                    )))
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl AsRawFd for DataSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for DataSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Keep the first descriptor of a message and close the rest.
fn retain_first_fd(fds: Vec<OwnedFd>) -> Option<OwnedFd> {
    let total = fds.len();
    let mut fds = fds.into_iter();
    let first = fds.next();
    if total > 1 {
        tracing::warn!(
            discarded = total - 1,
            "frame carried more than one descriptor, closing extras"
        );
    }
    first
}

fn sendmsg_with_fds(sock: RawFd, bufs: &[&[u8]], fds: &[RawFd]) -> io::Result<usize> {
    let mut iovs: Vec<libc::iovec> = bufs
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| libc::iovec {
            iov_base: b.as_ptr() as *mut libc::c_void,
            iov_len: b.len(),
        })
        .collect();

    // SAFETY: zeroed msghdr is valid before assigning pointers.
    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = iovs.as_mut_ptr();
    msghdr.msg_iovlen = iovs.len() as _;

    // u64 storage keeps the cmsghdr aligned.
    let mut control: Vec<u64> = Vec::new();
    if !fds.is_empty() {
        let data_len = std::mem::size_of_val(fds);
        // SAFETY: CMSG_SPACE is a pure size computation.
        let space = unsafe { libc::CMSG_SPACE(data_len as u32) } as usize;
        control.resize(space.div_ceil(std::mem::size_of::<u64>()), 0);
        msghdr.msg_control = control.as_mut_ptr().cast();
        msghdr.msg_controllen = space as _;

        // SAFETY: control buffer sized with CMSG_SPACE and owned here.
        let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msghdr) };
        if cmsg.is_null() {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "failed to allocate SCM_RIGHTS cmsg",
            ));
        }
        // SAFETY: cmsg points into `control`, which has room for `fds`.
        unsafe {
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(data_len as u32) as _;
            std::ptr::copy_nonoverlapping(
                fds.as_ptr(),
                libc::CMSG_DATA(cmsg).cast::<RawFd>(),
                fds.len(),
            );
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    // SAFETY: msghdr points to live iov/control buffers.
    let n = unsafe { libc::sendmsg(sock, &msghdr, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn recvmsg_with_fds(sock: RawFd, buf: &mut [u8], max_fds: usize) -> io::Result<(usize, Vec<OwnedFd>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    // SAFETY: CMSG_SPACE is a pure size computation.
    let space =
        unsafe { libc::CMSG_SPACE((max_fds * std::mem::size_of::<RawFd>()) as u32) } as usize;
    let mut control = vec![0u64; space.div_ceil(std::mem::size_of::<u64>())];

    // SAFETY: zeroed msghdr is valid before assigning pointers.
    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;
    msghdr.msg_control = control.as_mut_ptr().cast();
    msghdr.msg_controllen = space as _;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_CMSG_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    // SAFETY: msghdr points to live iov/control buffers.
    let n = unsafe { libc::recvmsg(sock, &mut msghdr, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    if (msghdr.msg_flags & libc::MSG_CTRUNC) != 0 {
        tracing::warn!("ancillary data truncated, descriptors were dropped by the kernel");
    }

    let fds = parse_fds(&msghdr)
        .into_iter()
        // SAFETY: SCM_RIGHTS hands us freshly installed descriptors we own.
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect();
    Ok((n as usize, fds))
}

fn parse_fds(msghdr: &libc::msghdr) -> Vec<RawFd> {
    let mut out = Vec::new();
    // SAFETY: msghdr points at a valid control buffer owned by caller.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msghdr);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let cmsg_len = (*cmsg).cmsg_len as usize;
                let base_len = libc::CMSG_LEN(0) as usize;
                if cmsg_len >= base_len + std::mem::size_of::<RawFd>() {
                    let count = (cmsg_len - base_len) / std::mem::size_of::<RawFd>();
                    let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    for i in 0..count {
                        out.push(std::ptr::read_unaligned(data.add(i)));
                    }
                }
            }
            cmsg = libc::CMSG_NXTHDR(msghdr, cmsg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::{Read, Write};
    use std::time::Duration;

    const MAX: u32 = 1024 * 1024;

    #[tokio::test]
    async fn test_frame_without_fd() {
        let (a, b) = DataSocket::pair().unwrap();
        a.send_frame(&Frame::from_slice(b"hello")).await.unwrap();

        let mut slot = FrameSlot::new();
        b.recv_frame(&mut slot, MAX).await.unwrap();
        let frame = slot.peek().unwrap();
        assert_eq!(frame.payload(), b"hello");
        assert!(frame.fd().is_none());
    }

    #[tokio::test]
    async fn test_frames_of_varying_length_in_order() {
        let (a, b) = DataSocket::pair().unwrap();
        let lengths = [0usize, 1, 3, 4, 5, 4096, 70_000];

        let sender = tokio::spawn(async move {
            for (i, len) in lengths.iter().enumerate() {
                let payload = vec![i as u8; *len];
                a.send_frame(&Frame::from_slice(&payload)).await.unwrap();
            }
            a
        });

        let mut slot = FrameSlot::new();
        for (i, len) in lengths.iter().enumerate() {
            b.recv_frame(&mut slot, MAX).await.unwrap();
            let frame = slot.peek().unwrap();
            assert_eq!(frame.payload_len(), *len);
            assert!(frame.payload().iter().all(|&x| x == i as u8));
        }
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_fd_travels_with_frame() {
        let (a, b) = DataSocket::pair().unwrap();
        let (mut local, remote) = StdUnixStream::pair().unwrap();

        a.send_frame(&Frame::with_fd(Bytes::from_static(b"fd"), OwnedFd::from(remote)))
            .await
            .unwrap();

        let mut slot = FrameSlot::new();
        b.recv_frame(&mut slot, MAX).await.unwrap();
        let received = slot.peek().unwrap().to_owned().unwrap();
        assert_eq!(received.payload(), b"fd");

        let mut passed = StdUnixStream::from(received.fd().unwrap().try_clone_to_owned().unwrap());
        passed.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        local.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_excess_fds_keep_first() {
        let (a, b) = DataSocket::pair().unwrap();
        let mut pairs: Vec<_> = (0..3).map(|_| StdUnixStream::pair().unwrap()).collect();
        let raw: Vec<RawFd> = pairs.iter().map(|(_, r)| r.as_raw_fd()).collect();

        let header = Header::new(3).encode();
        let n = sendmsg_with_fds(a.as_raw_fd(), &[&header, b"abc"], &raw).unwrap();
        assert_eq!(n, HEADER_SIZE + 3);

        let mut slot = FrameSlot::new();
        b.recv_frame(&mut slot, MAX).await.unwrap();
        let frame = slot.peek().unwrap();
        assert_eq!(frame.payload(), b"abc");

        let mut passed = StdUnixStream::from(frame.fd().unwrap().try_clone_to_owned().unwrap());
        passed.write_all(b"1").unwrap();
        let mut first = pairs[0].0.try_clone().unwrap();
        let mut buf = [0u8; 1];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"1");

        // Once our copies are gone the extra descriptors have no holder left.
        for (mut far, near) in pairs.drain(1..) {
            drop(near);
            far.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
            assert_eq!(far.read(&mut buf).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (a, b) = DataSocket::pair().unwrap();
        a.send_frame(&Frame::from_slice(&[0u8; 64])).await.unwrap();

        let mut slot = FrameSlot::new();
        let err = b.recv_frame(&mut slot, 16).await.unwrap_err();
        assert!(matches!(err, StreamportError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_clean_eof_is_closed() {
        let (a, b) = DataSocket::pair().unwrap();
        drop(a);

        let mut slot = FrameSlot::new();
        let err = b.recv_frame(&mut slot, MAX).await.unwrap_err();
        assert!(matches!(err, StreamportError::Closed));
    }

    #[tokio::test]
    async fn test_short_header_is_protocol_error() {
        let (a, b) = DataSocket::pair().unwrap();
        a.write_all(&[1, 0]).await.unwrap();
        drop(a);

        let mut slot = FrameSlot::new();
        let err = b.recv_frame(&mut slot, MAX).await.unwrap_err();
        assert!(err.to_string().contains("short header read"));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_protocol_error() {
        let (a, b) = DataSocket::pair().unwrap();
        a.write_all(&Header::new(10).encode()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let mut slot = FrameSlot::new();
        let err = b.recv_frame(&mut slot, MAX).await.unwrap_err();
        assert!(err.to_string().contains("short payload read"));
        assert!(!slot.is_valid());
    }

    #[tokio::test]
    async fn test_try_recv_without_data() {
        let (_a, b) = DataSocket::pair().unwrap();
        let mut slot = FrameSlot::new();
        assert!(!b.try_recv_frame(&mut slot, MAX).await.unwrap());
    }

    #[test]
    fn test_retain_first_fd() {
        assert!(retain_first_fd(Vec::new()).is_none());

        let fds: Vec<OwnedFd> = (0..3)
            .map(|_| OwnedFd::from(StdUnixStream::pair().unwrap().0))
            .collect();
        let first = fds[0].as_raw_fd();
        assert_eq!(retain_first_fd(fds).unwrap().as_raw_fd(), first);
    }
}
