//! Stream states, modes and notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a [`Stream`](super::Stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Unconnected,
    Connecting,
    Ready,
    Starting,
    Streaming,
    Error,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How frames reach the owner once streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// The owner gets the raw data socket and does its own framing.
    Socket,
    /// The stream reads frames itself and reports each one.
    #[default]
    Buffer,
}

/// Notification returned by [`Stream::next_event`](super::Stream::next_event).
///
/// Every notification is delivered after the value it reports has been
/// updated on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    StateChanged { old: StreamState, new: StreamState },
    PossibleFormatsChanged,
    FormatChanged,
    PropertiesChanged,
    /// The data socket appeared or went away (socket mode only).
    SocketChanged,
    /// A frame is waiting in the receive slot (buffer mode only).
    NewBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        let names: Vec<&str> = [
            StreamState::Unconnected,
            StreamState::Connecting,
            StreamState::Ready,
            StreamState::Starting,
            StreamState::Streaming,
            StreamState::Error,
        ]
        .iter()
        .map(|s| s.as_str())
        .collect();
        assert_eq!(
            names,
            ["unconnected", "connecting", "ready", "starting", "streaming", "error"]
        );
        assert_eq!(StreamState::Ready.to_string(), "ready");
    }

    #[test]
    fn test_serde_uses_names() {
        assert_eq!(
            serde_json::to_string(&StreamState::Streaming).unwrap(),
            r#""streaming""#
        );
        assert_eq!(
            serde_json::from_str::<StreamMode>(r#""socket""#).unwrap(),
            StreamMode::Socket
        );
    }
}
