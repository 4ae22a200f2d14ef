//! Server-side channel: one client's negotiated session on a port.
//!
//! A channel remembers the client's filter so it can re-derive its candidate
//! formats whenever the owning port changes what it advertises. Starting a
//! channel fixes a format and opens the data socket pair; the server keeps
//! one end, the client gets the other.

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream as StdUnixStream;

use crate::control::{PortDirection, StartReply};
use crate::error::{Result, StreamportError};
use crate::format::Caps;
use crate::properties::Properties;
use crate::protocol::Frame;
use crate::transport::DataSocket;

/// A negotiated client session on a [`Port`](super::Port).
#[derive(Debug)]
pub struct Channel {
    path: String,
    port_path: String,
    client: String,
    direction: PortDirection,
    filter: Option<Caps>,
    possible_formats: Caps,
    format: Option<Caps>,
    properties: Properties,
    socket: Option<DataSocket>,
}

impl Channel {
    /// Build an unstarted channel. Used by [`ChannelFactory`](super::ChannelFactory)
    /// implementations; the port registers it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: String,
        port_path: String,
        client: String,
        direction: PortDirection,
        filter: Option<Caps>,
        possible_formats: Caps,
        properties: Properties,
    ) -> Self {
        Self {
            path,
            port_path,
            client,
            direction,
            filter,
            possible_formats,
            format: None,
            properties,
            socket: None,
        }
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the owning port.
    #[inline]
    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    /// Identity of the client that requested this channel.
    #[inline]
    pub fn client(&self) -> &str {
        &self.client
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Candidate formats: port formats intersected with the client filter.
    #[inline]
    pub fn possible_formats(&self) -> &Caps {
        &self.possible_formats
    }

    /// Negotiated format, present while started.
    #[inline]
    pub fn format(&self) -> Option<&Caps> {
        self.format.as_ref()
    }

    #[inline]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.socket.is_some()
    }

    /// Re-derive the candidate set from new port formats.
    pub(crate) fn set_possible_formats(&mut self, port_formats: &Caps) {
        self.possible_formats = match &self.filter {
            Some(filter) => port_formats.intersect(filter),
            None => port_formats.clone(),
        };
        tracing::debug!(
            channel = %self.path,
            formats = %self.possible_formats,
            "channel formats updated"
        );
    }

    /// Negotiate `requested` and open the data socket.
    ///
    /// Starting an already started channel renegotiates and replaces the
    /// socket; the previous client end sees EOF.
    pub fn start(&mut self, requested: &str) -> Result<StartReply> {
        let requested: Caps = requested.parse()?;
        let negotiated = self.possible_formats.intersect(&requested);
        if negotiated.is_empty() {
            return Err(StreamportError::NotFound(format!(
                "format {} not compatible with {}",
                requested, self.possible_formats
            )));
        }
        let negotiated = negotiated.fixate();

        let (local, remote) = StdUnixStream::pair()?;
        self.socket = Some(DataSocket::from_std(local)?);
        self.format = Some(negotiated.clone());

        tracing::debug!(channel = %self.path, format = %negotiated, "channel started");
        Ok(StartReply {
            fd: OwnedFd::from(remote),
            format: negotiated.to_wire(),
            properties: self.properties.clone(),
        })
    }

    /// Close the server end of the data socket and clear the format.
    pub fn stop(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(channel = %self.path, "channel stopped");
        }
        self.format = None;
    }

    /// Borrow the server end of the data socket.
    pub fn data_socket(&self) -> Option<&DataSocket> {
        self.socket.as_ref()
    }

    /// Open a second handle on the data socket, for use outside the server task.
    pub fn clone_data_socket(&self) -> Result<DataSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| StreamportError::precondition("channel is not started"))?
            .try_clone()
    }

    /// Push a frame to the client.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        match &self.socket {
            Some(socket) => socket.send_frame(frame).await,
            None => Err(StreamportError::precondition("channel is not started")),
        }
    }
}
