//! Runtime configuration for streams and the server.
//!
//! Both configs have sensible defaults, fluent setters, and can be loaded
//! from JSON with missing keys falling back to the defaults.
//!
//! ```
//! use streamport::config::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "object_prefix": "/test" }"#).unwrap();
//! assert_eq!(config.object_prefix, "/test");
//! assert_eq!(config.command_capacity, 64);
//! ```

use serde::Deserialize;

use crate::error::Result;

/// Default maximum frame payload a stream accepts (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Default capacity of the pending-notification queue of a stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default capacity of a command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default capacity of the server's object-event broadcast.
pub const DEFAULT_OBJECT_EVENT_CAPACITY: usize = 256;

/// Default root of the server's object namespace.
pub const DEFAULT_OBJECT_PREFIX: &str = "/org/streamport";

/// Client-side stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Largest frame payload accepted before the stream is failed.
    pub max_payload_size: u32,
    /// Capacity of the queue feeding `StreamHandle` commands into the session.
    pub command_capacity: usize,
    /// Number of pending notifications the session preallocates room for.
    /// The queue grows past it; nothing is dropped.
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StreamConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn max_payload_size(mut self, limit: u32) -> Self {
        self.max_payload_size = limit;
        self
    }

    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Server-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Capacity of the server command queue.
    pub command_capacity: usize,
    /// Capacity of the object-event broadcast channel.
    pub event_capacity: usize,
    /// Root of the object namespace (nodes live at `<prefix>/node<N>`).
    pub object_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_OBJECT_EVENT_CAPACITY,
            object_prefix: DEFAULT_OBJECT_PREFIX.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn object_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.object_prefix = prefix.into();
        self
    }
}
