//! Client context: the control channel and settings shared by streams.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::session::Stream;
use crate::config::StreamConfig;
use crate::control::ControlChannel;
use crate::properties::Properties;

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(0);

/// Connection to a server, shared by the streams created from it.
#[derive(Clone)]
pub struct Context {
    control: Arc<dyn ControlChannel>,
    client: String,
    config: StreamConfig,
}

impl Context {
    /// Create a context around a control channel, with a fresh client name.
    pub fn new(control: impl ControlChannel) -> Self {
        Self::from_arc(Arc::new(control))
    }

    pub fn from_arc(control: Arc<dyn ControlChannel>) -> Self {
        let n = NEXT_CLIENT.fetch_add(1, Ordering::Relaxed);
        Self {
            control,
            client: format!("client-{}-{}", std::process::id(), n),
            config: StreamConfig::default(),
        }
    }

    /// Identify this client to the server.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client = name.into();
        self
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    pub fn client(&self) -> &str {
        &self.client
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn control(&self) -> &Arc<dyn ControlChannel> {
        &self.control
    }

    /// Create an unconnected stream on this context.
    pub fn create_stream(&self, name: &str, properties: Option<Properties>) -> Stream {
        Stream::new(self, name, properties)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("client", &self.client)
            .field("config", &self.config)
            .finish()
    }
}
