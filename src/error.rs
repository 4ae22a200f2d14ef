//! Error types for streamport.

use thiserror::Error;

/// Main error type for all streamport operations.
#[derive(Debug, Error)]
pub enum StreamportError {
    /// Malformed argument, e.g. a capability filter that does not parse.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No compatible format after intersection, or an unknown object path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not implemented by this port variant.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The remote channel disappeared without being asked to.
    #[error("Peer gone: {0}")]
    PeerGone(String),

    /// The other end of a socket or command queue closed.
    #[error("Connection closed")]
    Closed,

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing desynchronized (short header read, oversized payload, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Entry point called in a state that forbids it.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// JSON serialization/deserialization error (configuration, properties).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Payload-free discriminant of [`StreamportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NotSupported,
    PeerGone,
    Closed,
    Io,
    Protocol,
    Precondition,
    Serialization,
}

impl StreamportError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::PeerGone(_) => ErrorKind::PeerGone,
            Self::Closed => ErrorKind::Closed,
            Self::Io(_) => ErrorKind::Io,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Json(_) | Self::MsgPackEncode(_) | Self::MsgPackDecode(_) => {
                ErrorKind::Serialization
            }
        }
    }

    /// Whether this is a programmer error rather than a protocol/transport fault.
    #[inline]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    pub(crate) fn precondition(what: impl Into<String>) -> Self {
        Self::Precondition(what.into())
    }

    /// Copy of this error for when it is both recorded and returned.
    ///
    /// Serialization errors carry foreign payloads that cannot be cloned and
    /// are copied as [`StreamportError::Protocol`] with the same message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::InvalidArgument(m) => Self::InvalidArgument(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::NotSupported(m) => Self::NotSupported(m.clone()),
            Self::PeerGone(m) => Self::PeerGone(m.clone()),
            Self::Closed => Self::Closed,
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Precondition(m) => Self::Precondition(m.clone()),
            Self::Json(_) | Self::MsgPackEncode(_) | Self::MsgPackDecode(_) => {
                Self::Protocol(self.to_string())
            }
        }
    }
}

/// Result type alias using StreamportError.
pub type Result<T> = std::result::Result<T, StreamportError>;
