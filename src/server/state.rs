//! Object tree owned by the server task.
//!
//! Everything here runs on the server task only; other tasks reach it
//! through [`ServerHandle`](super::ServerHandle) commands.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::channel::Channel;
use super::node::Node;
use super::port::{ChannelFactory, Port};
use crate::config::ServerConfig;
use crate::control::{
    ChannelInfo, CreateChannelRequest, CreateUploadRequest, ObjectEvent, ObjectKind,
    PortDirection, StartReply, StreamDirection,
};
use crate::error::{Result, StreamportError};
use crate::format::Caps;
use crate::properties::Properties;

/// Nodes, ports and channels, plus the object-event broadcast.
#[derive(Debug)]
pub struct ServerState {
    config: ServerConfig,
    nodes: Vec<Node>,
    next_node: u32,
    /// Nodes created for upload channels; removed with their last channel.
    uploads: Vec<String>,
    events: broadcast::Sender<ObjectEvent>,
}

impl ServerState {
    pub(crate) fn new(config: ServerConfig, events: broadcast::Sender<ObjectEvent>) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            next_node: 0,
            uploads: Vec::new(),
            events,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.path() == path)
    }

    pub fn node_mut(&mut self, path: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.path() == path)
    }

    /// Publish a new node, returning its path.
    pub fn add_node(&mut self, name: &str, properties: Properties) -> String {
        let path = format!("{}/node{}", self.config.object_prefix, self.next_node);
        self.next_node += 1;
        self.nodes.push(Node::new(path.clone(), name, properties));
        self.publish(ObjectEvent::Added {
            path: path.clone(),
            kind: ObjectKind::Node,
        });
        path
    }

    /// Remove a node with all its ports and channels.
    pub fn remove_node(&mut self, path: &str) -> Result<()> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.path() == path)
            .ok_or_else(|| not_found("node", path))?;

        let ports: Vec<String> = self.nodes[index]
            .ports()
            .iter()
            .map(|p| p.path().to_string())
            .collect();
        for port in ports {
            self.remove_port(&port)?;
        }
        self.nodes.remove(index);
        self.uploads.retain(|n| n != path);
        self.publish(ObjectEvent::Removed {
            path: path.to_string(),
            kind: ObjectKind::Node,
        });
        Ok(())
    }

    /// Add a port with the default channel factory.
    pub fn add_port(
        &mut self,
        node_path: &str,
        name: &str,
        direction: PortDirection,
        possible_formats: Option<Caps>,
        properties: Properties,
    ) -> Result<String> {
        self.add_port_with(node_path, name, direction, possible_formats, properties, None)
    }

    /// Add a port, optionally with its own channel factory.
    pub fn add_port_with(
        &mut self,
        node_path: &str,
        name: &str,
        direction: PortDirection,
        possible_formats: Option<Caps>,
        properties: Properties,
        factory: Option<Arc<dyn ChannelFactory>>,
    ) -> Result<String> {
        let node = self
            .node_mut(node_path)
            .ok_or_else(|| not_found("node", node_path))?;
        let path = node
            .add_port_with(name, direction, possible_formats, properties, factory)
            .path()
            .to_string();
        self.publish(ObjectEvent::Added {
            path: path.clone(),
            kind: ObjectKind::Port,
        });
        Ok(path)
    }

    /// Destroy a port. Its channels are removed first and their clients
    /// see them disappear.
    pub fn remove_port(&mut self, path: &str) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.port(path).is_some())
            .ok_or_else(|| not_found("port", path))?;
        let (_port, channels) = node
            .remove_port(path)
            .ok_or_else(|| not_found("port", path))?;

        for channel in channels {
            self.publish(ObjectEvent::Removed {
                path: channel,
                kind: ObjectKind::Channel,
            });
        }
        self.publish(ObjectEvent::Removed {
            path: path.to_string(),
            kind: ObjectKind::Port,
        });
        Ok(())
    }

    pub fn port(&self, path: &str) -> Option<&Port> {
        self.nodes.iter().find_map(|n| n.port(path))
    }

    pub fn port_mut(&mut self, path: &str) -> Option<&mut Port> {
        self.nodes.iter_mut().find_map(|n| n.port_mut(path))
    }

    /// Replace a port's advertised formats.
    pub fn set_port_formats(&mut self, path: &str, formats: Option<Caps>) -> Result<()> {
        self.port_mut(path)
            .ok_or_else(|| not_found("port", path))?
            .set_possible_formats(formats);
        Ok(())
    }

    pub fn channel(&self, path: &str) -> Option<&Channel> {
        self.port(owner_of(path)?)?.channel(path)
    }

    pub fn channel_mut(&mut self, path: &str) -> Option<&mut Channel> {
        self.port_mut(owner_of(path)?)?.channel_mut(path)
    }

    /// Drop a channel as if its owning process had exited.
    ///
    /// Unlike a client's own remove request, the client is not asking for
    /// this and will see its channel disappear.
    pub fn unpublish_channel(&mut self, path: &str) -> Result<()> {
        tracing::debug!(channel = %path, "unpublishing channel");
        self.remove_channel(path)
    }

    pub(crate) fn create_channel(&mut self, request: CreateChannelRequest) -> Result<ChannelInfo> {
        let port_path = match request.port_path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => self.find_port(request.direction.port_direction(), &request.possible_formats)?,
        };
        let port = self
            .port_mut(&port_path)
            .ok_or_else(|| not_found("port", &port_path))?;

        let channel = port.create_channel(
            &request.client,
            Some(&request.possible_formats),
            request.properties,
        )?;
        let info = channel_info(channel);
        self.publish(ObjectEvent::Added {
            path: info.path.clone(),
            kind: ObjectKind::Channel,
        });
        Ok(info)
    }

    pub(crate) fn create_upload_channel(
        &mut self,
        request: CreateUploadRequest,
    ) -> Result<ChannelInfo> {
        let formats: Caps = request.possible_formats.parse()?;
        let node = self.add_node("upload", request.properties.clone());
        let port = self.add_port(
            &node,
            "upload",
            PortDirection::Output,
            Some(formats),
            Properties::new(),
        )?;

        let result = self.create_channel(CreateChannelRequest {
            client: request.client,
            direction: StreamDirection::Capture,
            port_path: Some(port),
            possible_formats: request.possible_formats,
            properties: request.properties,
        });
        match result {
            Ok(info) => {
                self.uploads.push(node);
                Ok(info)
            }
            Err(e) => {
                self.remove_node(&node)?;
                Err(e)
            }
        }
    }

    pub(crate) fn start_channel(&mut self, path: &str, format: &str) -> Result<StartReply> {
        self.channel_mut(path)
            .ok_or_else(|| not_found("channel", path))?
            .start(format)
    }

    pub(crate) fn stop_channel(&mut self, path: &str) -> Result<()> {
        self.channel_mut(path)
            .ok_or_else(|| not_found("channel", path))?
            .stop();
        Ok(())
    }

    pub(crate) fn remove_channel(&mut self, path: &str) -> Result<()> {
        let port_path = owner_of(path).ok_or_else(|| not_found("channel", path))?;
        self.port_mut(port_path)
            .ok_or_else(|| not_found("channel", path))?
            .release_channel(path)?;
        self.publish(ObjectEvent::Removed {
            path: path.to_string(),
            kind: ObjectKind::Channel,
        });

        let node_path = owner_of(port_path).unwrap_or_default();
        let drained = self
            .port(port_path)
            .map_or(false, |port| port.channels().is_empty());
        if drained && self.uploads.iter().any(|n| n == node_path) {
            tracing::debug!(node = %node_path, "removing drained upload node");
            self.remove_node(node_path)?;
        }
        Ok(())
    }

    /// First port with the wanted direction that can satisfy `formats`.
    fn find_port(&self, direction: PortDirection, formats: &str) -> Result<String> {
        let wanted: Caps = formats.parse()?;
        self.nodes
            .iter()
            .flat_map(|n| n.ports())
            .filter(|p| p.direction() == direction)
            .find(|p| {
                p.possible_formats()
                    .map_or(true, |advertised| advertised.can_intersect(&wanted))
            })
            .map(|p| p.path().to_string())
            .ok_or_else(|| {
                StreamportError::NotFound(format!(
                    "no {} port can handle {}",
                    direction, formats
                ))
            })
    }

    fn publish(&self, event: ObjectEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn channel_info(channel: &Channel) -> ChannelInfo {
    ChannelInfo {
        path: channel.path().to_string(),
        owner: channel.port_path().to_string(),
        possible_formats: channel.possible_formats().to_wire(),
        properties: channel.properties().clone(),
    }
}

/// Port path of a channel path (`<port>/channel<N>`).
fn owner_of(channel_path: &str) -> Option<&str> {
    channel_path.rsplit_once('/').map(|(port, _)| port)
}

fn not_found(kind: &str, path: &str) -> StreamportError {
    StreamportError::NotFound(format!("no {} at {}", kind, path))
}
