//! Server-side port: a directional endpoint on a node that hosts channels.
//!
//! A port advertises the formats it can handle and negotiates every new
//! channel against them. How channels are built is delegated to a
//! [`ChannelFactory`] chosen when the port is created: [`DefaultChannelFactory`]
//! negotiates and registers a channel, [`NoChannels`] refuses.
//!
//! Observers registered with [`Port::add_observer`] see format requests,
//! channel additions and removals, and format changes. Removal is reported
//! while the channel is still a member of the port.
//!
//! # Example
//!
//! ```
//! use streamport::control::PortDirection;
//! use streamport::properties::Properties;
//! use streamport::server::Port;
//!
//! let mut port = Port::new("/org/streamport/node0", 0, "src", PortDirection::Output)
//!     .with_possible_formats("audio/x-raw, rate=44100".parse().unwrap());
//!
//! let formats = port.get_formats(Some("audio/x-raw")).unwrap();
//! assert_eq!(formats.to_string(), "audio/x-raw, rate=44100");
//!
//! let channel = port.create_channel("client0", Some("audio/x-raw"), Properties::new()).unwrap();
//! assert_eq!(channel.port_path(), "/org/streamport/node0/port0");
//! ```

use std::fmt;
use std::sync::Arc;

use super::channel::Channel;
use crate::control::PortDirection;
use crate::error::{Result, StreamportError};
use crate::format::Caps;
use crate::properties::Properties;

/// Notification delivered to port observers.
#[derive(Debug)]
pub enum PortEvent<'a> {
    /// Formats are about to be read; a format provider may refresh them.
    FormatRequest,
    ChannelAdded(&'a Channel),
    /// The channel is still a member of the port when this fires.
    ChannelRemoved(&'a Channel),
    FormatsChanged(&'a Caps),
    PropertiesChanged(&'a Properties),
}

/// Port observer callback.
pub type PortObserver = Box<dyn FnMut(&PortEvent<'_>) + Send>;

/// Lazily supplies fresh formats when a port is asked for them.
pub type FormatProvider = Box<dyn FnMut() -> Option<Caps> + Send>;

/// How a port builds and tears down channels.
pub trait ChannelFactory: Send + Sync {
    /// Build a channel for `client` and register it with `port`.
    ///
    /// Returns the path of the new channel.
    fn create_channel(
        &self,
        port: &mut Port,
        client: &str,
        filter: Option<&str>,
        properties: Properties,
    ) -> Result<String>;

    /// Dispose of a channel that was already removed from `port`.
    fn release_channel(&self, _port: &mut Port, _channel: Channel) {}
}

/// Negotiates the client filter against the port and registers the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChannelFactory;

impl ChannelFactory for DefaultChannelFactory {
    fn create_channel(
        &self,
        port: &mut Port,
        client: &str,
        filter: Option<&str>,
        properties: Properties,
    ) -> Result<String> {
        let formats = port.get_formats(filter)?;
        let filter = filter.map(str::parse::<Caps>).transpose()?;

        let channel = Channel::new(
            port.allocate_channel_path(),
            port.path().to_string(),
            client.to_string(),
            port.direction(),
            filter,
            formats,
            port.properties().merged(&properties),
        );
        let path = channel.path().to_string();
        port.insert_channel(channel);
        Ok(path)
    }
}

/// Port variant that does not host channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChannels;

impl ChannelFactory for NoChannels {
    fn create_channel(
        &self,
        port: &mut Port,
        _client: &str,
        _filter: Option<&str>,
        _properties: Properties,
    ) -> Result<String> {
        Err(StreamportError::NotSupported(format!(
            "port {} does not create channels",
            port.path()
        )))
    }
}

/// A directional media endpoint on a node.
pub struct Port {
    node_path: String,
    path: String,
    name: String,
    direction: PortDirection,
    possible_formats: Option<Caps>,
    properties: Properties,
    channels: Vec<Channel>,
    next_channel: u32,
    factory: Arc<dyn ChannelFactory>,
    format_provider: Option<FormatProvider>,
    observers: Vec<PortObserver>,
}

impl Port {
    /// Create port number `index` of the node at `node_path`.
    pub fn new(
        node_path: impl Into<String>,
        index: u32,
        name: impl Into<String>,
        direction: PortDirection,
    ) -> Self {
        let node_path = node_path.into();
        Self {
            path: format!("{}/port{}", node_path, index),
            node_path,
            name: name.into(),
            direction,
            possible_formats: None,
            properties: Properties::new(),
            channels: Vec::new(),
            next_channel: 0,
            factory: Arc::new(DefaultChannelFactory),
            format_provider: None,
            observers: Vec::new(),
        }
    }

    pub fn with_possible_formats(mut self, formats: Caps) -> Self {
        self.possible_formats = Some(formats);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Choose how channels are built on this port.
    pub fn with_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Install a callback consulted on every format request.
    pub fn with_format_provider(mut self, provider: FormatProvider) -> Self {
        self.format_provider = Some(provider);
        self
    }

    pub fn add_observer(&mut self, observer: PortObserver) {
        self.observers.push(observer);
    }

    /// Path of the owning node.
    #[inline]
    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Advertised formats; `None` means anything.
    #[inline]
    pub fn possible_formats(&self) -> Option<&Caps> {
        self.possible_formats.as_ref()
    }

    #[inline]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, path: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.path() == path)
    }

    pub fn channel_mut(&mut self, path: &str) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.path() == path)
    }

    /// Replace the advertised formats and re-derive every channel's candidates.
    pub fn set_possible_formats(&mut self, formats: Option<Caps>) {
        self.possible_formats = formats;
        let advertised = self.advertised();
        for channel in &mut self.channels {
            channel.set_possible_formats(&advertised);
        }
        tracing::debug!(port = %self.path, formats = %advertised, "port formats changed");
        emit(
            &mut self.observers,
            &PortEvent::FormatsChanged(&advertised),
        );
    }

    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
        emit(
            &mut self.observers,
            &PortEvent::PropertiesChanged(&self.properties),
        );
    }

    /// Formats this port can offer, narrowed by an optional filter.
    ///
    /// Fails with `InvalidArgument` if the filter does not parse and with
    /// `NotFound` if nothing is left after intersection.
    pub fn get_formats(&mut self, filter: Option<&str>) -> Result<Caps> {
        let filter = filter.map(str::parse::<Caps>).transpose()?;

        emit(&mut self.observers, &PortEvent::FormatRequest);
        let fresh = self.format_provider.as_mut().and_then(|provider| provider());
        if let Some(fresh) = fresh {
            self.set_possible_formats(Some(fresh));
        }

        let advertised = self.advertised();
        let result = match &filter {
            Some(filter) => advertised.intersect(filter),
            None => advertised,
        };
        if result.is_empty() {
            return Err(StreamportError::NotFound(format!(
                "no format of port {} matches the filter",
                self.path
            )));
        }
        Ok(result)
    }

    /// Create a channel for `client` through this port's factory.
    pub fn create_channel(
        &mut self,
        client: &str,
        filter: Option<&str>,
        properties: Properties,
    ) -> Result<&Channel> {
        let factory = Arc::clone(&self.factory);
        let path = factory.create_channel(self, client, filter, properties)?;

        let index = self
            .channels
            .iter()
            .position(|c| c.path() == path)
            .ok_or_else(|| {
                StreamportError::NotFound(format!("factory did not register channel {}", path))
            })?;
        tracing::debug!(port = %self.path, channel = %path, client, "channel added");
        emit(
            &mut self.observers,
            &PortEvent::ChannelAdded(&self.channels[index]),
        );
        Ok(&self.channels[index])
    }

    /// Remove a channel from this port.
    ///
    /// Observers see the removal before the channel leaves the port.
    pub fn release_channel(&mut self, path: &str) -> Result<()> {
        let index = self
            .channels
            .iter()
            .position(|c| c.path() == path)
            .ok_or_else(|| {
                StreamportError::NotFound(format!("channel {} not on port {}", path, self.path))
            })?;

        emit(
            &mut self.observers,
            &PortEvent::ChannelRemoved(&self.channels[index]),
        );
        let channel = self.channels.remove(index);
        tracing::debug!(port = %self.path, channel = %path, "channel removed");

        let factory = Arc::clone(&self.factory);
        factory.release_channel(self, channel);
        Ok(())
    }

    /// Release every channel, returning the removed paths.
    pub fn release_all_channels(&mut self) -> Vec<String> {
        let paths: Vec<String> = self.channels.iter().map(|c| c.path().to_string()).collect();
        for path in &paths {
            if let Err(e) = self.release_channel(path) {
                tracing::warn!(port = %self.path, "failed to release {}: {}", path, e);
            }
        }
        paths
    }

    /// Next unused channel path under this port.
    pub fn allocate_channel_path(&mut self) -> String {
        let path = format!("{}/channel{}", self.path, self.next_channel);
        self.next_channel += 1;
        path
    }

    /// Register a channel built by a factory.
    pub fn insert_channel(&mut self, channel: Channel) {
        self.channels.insert(0, channel);
    }

    fn advertised(&self) -> Caps {
        self.possible_formats.clone().unwrap_or_default()
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("possible_formats", &self.possible_formats)
            .field("channels", &self.channels.len())
            .finish()
    }
}

fn emit(observers: &mut [PortObserver], event: &PortEvent<'_>) {
    for observer in observers.iter_mut() {
        observer(event);
    }
}
