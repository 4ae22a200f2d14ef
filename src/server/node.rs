//! Server-side node: a published object that owns ports.

use std::sync::Arc;

use super::port::{ChannelFactory, Port};
use crate::control::PortDirection;
use crate::format::Caps;
use crate::properties::Properties;

/// A group of ports, usually one device or one uploading client.
#[derive(Debug)]
pub struct Node {
    path: String,
    name: String,
    properties: Properties,
    ports: Vec<Port>,
    next_port: u32,
}

impl Node {
    pub fn new(path: impl Into<String>, name: impl Into<String>, properties: Properties) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            properties,
            ports: Vec::new(),
            next_port: 0,
        }
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
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    pub fn port(&self, path: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.path() == path)
    }

    pub fn port_mut(&mut self, path: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.path() == path)
    }

    /// Create and register a port with the default channel factory.
    pub fn add_port(
        &mut self,
        name: &str,
        direction: PortDirection,
        possible_formats: Option<Caps>,
        properties: Properties,
    ) -> &mut Port {
        self.add_port_with(name, direction, possible_formats, properties, None)
    }

    /// Create and register a port, optionally with its own channel factory.
    pub fn add_port_with(
        &mut self,
        name: &str,
        direction: PortDirection,
        possible_formats: Option<Caps>,
        properties: Properties,
        factory: Option<Arc<dyn ChannelFactory>>,
    ) -> &mut Port {
        let mut port = Port::new(self.path.clone(), self.next_port, name, direction)
            .with_properties(properties);
        self.next_port += 1;
        if let Some(formats) = possible_formats {
            port = port.with_possible_formats(formats);
        }
        if let Some(factory) = factory {
            port = port.with_factory(factory);
        }
        tracing::debug!(node = %self.path, port = %port.path(), "port added");

        self.ports.push(port);
        let last = self.ports.len() - 1;
        &mut self.ports[last]
    }

    /// Tear down a port: release its channels first, then deregister it.
    ///
    /// Returns the port and the paths of the channels it still had.
    pub fn remove_port(&mut self, path: &str) -> Option<(Port, Vec<String>)> {
        let index = self.ports.iter().position(|p| p.path() == path)?;
        let channels = self.ports[index].release_all_channels();
        let port = self.ports.remove(index);
        tracing::debug!(node = %self.path, port = %path, "port removed");
        Some((port, channels))
    }
}
