//! Request, reply and event types exchanged over the control channel.

use std::fmt;
use std::os::fd::OwnedFd;

use serde::{Deserialize, Serialize};

use crate::properties::Properties;

/// What a stream does with media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Receive media produced by a server-side source.
    Capture,
    /// Send media to the server.
    Provide,
}

impl StreamDirection {
    /// Direction of the port a stream of this kind attaches to.
    ///
    /// Capturing reads from a port that outputs media; providing writes into
    /// a port that takes media in.
    pub fn port_direction(self) -> PortDirection {
        match self {
            Self::Capture => PortDirection::Output,
            Self::Provide => PortDirection::Input,
        }
    }
}

/// Direction of a server-side port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Ask the server for a channel on an existing port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    /// Identity of the requesting client.
    pub client: String,
    pub direction: StreamDirection,
    /// Explicit port; `None` lets the server pick a compatible one.
    pub port_path: Option<String>,
    /// Serialized caps the client can handle.
    pub possible_formats: String,
    pub properties: Properties,
}

/// Ask the server to create a port fed by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUploadRequest {
    pub client: String,
    /// Serialized caps the client will produce.
    pub possible_formats: String,
    pub properties: Properties,
}

/// Remote view of a channel, as cached by the client after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Object path of the channel.
    pub path: String,
    /// Object path of the owning port.
    pub owner: String,
    /// Serialized candidate caps.
    pub possible_formats: String,
    pub properties: Properties,
}

/// Successful answer to a start request.
#[derive(Debug)]
pub struct StartReply {
    /// Client end of the data socket.
    pub fd: OwnedFd,
    /// Serialized negotiated caps.
    pub format: String,
    pub properties: Properties,
}

/// Kind of a published server object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Node,
    Port,
    Channel,
}

/// Object lifecycle notification broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ObjectEvent {
    Added { path: String, kind: ObjectKind },
    Removed { path: String, kind: ObjectKind },
}

impl ObjectEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } => path,
        }
    }

    /// Whether this reports the removal of the channel at `path`.
    pub fn is_channel_removed(&self, path: &str) -> bool {
        matches!(self, Self::Removed { path: p, kind: ObjectKind::Channel } if p == path)
    }
}
