//! Server side: nodes, ports, channels, and the task that owns them.
//!
//! All server objects live in one [`ServerState`] owned by a single task.
//! Control requests from streams and direct manipulation by the hosting
//! application both arrive as commands on that task's queue, so the object
//! tree is never touched from two places at once.
//!
//! ```text
//! Stream A ─┐
//! Stream B ─┼─► mpsc::Sender<Command> ─► Server Task (ServerState)
//! Host app ─┘                                  │
//!                                              └─► broadcast<ObjectEvent>
//! ```
//!
//! # Example
//!
//! ```ignore
//! use streamport::control::PortDirection;
//! use streamport::config::ServerConfig;
//! use streamport::server::spawn_server;
//!
//! let (server, _task) = spawn_server(ServerConfig::default());
//! let node = server.add_node("mic").await?;
//! let port = server
//!     .add_port(&node, "capture", PortDirection::Output, "audio/x-raw, rate=44100")
//!     .await?;
//! ```

mod channel;
mod node;
mod port;
mod state;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::control::{
    BoxFuture, ChannelInfo, ControlChannel, CreateChannelRequest, CreateUploadRequest,
    ObjectEvent, PortDirection, StartReply,
};
use crate::error::{Result, StreamportError};
use crate::format::Caps;
use crate::properties::Properties;
use crate::transport::DataSocket;

pub use channel::Channel;
pub use node::Node;
pub use port::{
    ChannelFactory, DefaultChannelFactory, FormatProvider, NoChannels, Port, PortEvent,
    PortObserver,
};
pub use state::ServerState;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work item for the server task.
enum Command {
    CreateChannel {
        request: CreateChannelRequest,
        reply: Reply<ChannelInfo>,
    },
    CreateUploadChannel {
        request: CreateUploadRequest,
        reply: Reply<ChannelInfo>,
    },
    Start {
        path: String,
        format: String,
        reply: Reply<StartReply>,
    },
    Stop {
        path: String,
        reply: Reply<()>,
    },
    Remove {
        path: String,
        reply: Reply<()>,
    },
    Invoke(Box<dyn FnOnce(&mut ServerState) + Send>),
}

/// Handle for talking to the server task.
///
/// Cheap to clone. Implements [`ControlChannel`] for streams and offers
/// invoke-and-wait / invoke-and-forget access to the [`ServerState`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<ObjectEvent>,
}

/// Spawn the server task.
///
/// The task runs until every [`ServerHandle`] has been dropped.
pub fn spawn_server(config: ServerConfig) -> (ServerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_capacity);
    let (events, _) = broadcast::channel(config.event_capacity);
    let state = ServerState::new(config, events.clone());
    let task = tokio::spawn(server_loop(state, rx));
    (ServerHandle { tx, events }, task)
}

async fn server_loop(mut state: ServerState, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::CreateChannel { request, reply } => {
                tracing::debug!(client = %request.client, "create channel request");
                let _ = reply.send(state.create_channel(request));
            }
            Command::CreateUploadChannel { request, reply } => {
                tracing::debug!(client = %request.client, "create upload channel request");
                let _ = reply.send(state.create_upload_channel(request));
            }
            Command::Start {
                path,
                format,
                reply,
            } => {
                let _ = reply.send(state.start_channel(&path, &format));
            }
            Command::Stop { path, reply } => {
                let _ = reply.send(state.stop_channel(&path));
            }
            Command::Remove { path, reply } => {
                let _ = reply.send(state.remove_channel(&path));
            }
            Command::Invoke(f) => f(&mut state),
        }
    }
    tracing::debug!("server task finished");
}

impl ServerHandle {
    /// Run `f` on the server task and wait for its result.
    pub async fn invoke<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ServerState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move |state| {
            let _ = tx.send(f(state));
        })
        .await?;
        rx.await.map_err(|_| StreamportError::Closed)
    }

    /// Queue `f` on the server task without waiting for it to run.
    pub async fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ServerState) + Send + 'static,
    {
        self.tx
            .send(Command::Invoke(Box::new(f)))
            .await
            .map_err(|_| StreamportError::Closed)
    }

    /// Publish a node, returning its path.
    pub async fn add_node(&self, name: &str) -> Result<String> {
        let name = name.to_string();
        self.invoke(move |state| state.add_node(&name, Properties::new()))
            .await
    }

    /// Add a port with the default factory. `formats` is a caps string.
    pub async fn add_port(
        &self,
        node_path: &str,
        name: &str,
        direction: PortDirection,
        formats: &str,
    ) -> Result<String> {
        let formats: Caps = formats.parse()?;
        let node_path = node_path.to_string();
        let name = name.to_string();
        self.invoke(move |state| {
            state.add_port(&node_path, &name, direction, Some(formats), Properties::new())
        })
        .await?
    }

    pub async fn remove_port(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.invoke(move |state| state.remove_port(&path)).await?
    }

    pub async fn set_port_formats(&self, path: &str, formats: &str) -> Result<()> {
        let formats: Caps = formats.parse()?;
        let path = path.to_string();
        self.invoke(move |state| state.set_port_formats(&path, Some(formats)))
            .await?
    }

    /// Remove a channel without the client asking for it.
    pub async fn unpublish_channel(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.invoke(move |state| state.unpublish_channel(&path))
            .await?
    }

    /// Server end of a started channel's data socket, as a separate handle.
    pub async fn channel_socket(&self, path: &str) -> Result<DataSocket> {
        let path = path.to_string();
        self.invoke(move |state| {
            state
                .channel(&path)
                .ok_or_else(|| StreamportError::NotFound(format!("no channel at {}", path)))?
                .clone_data_socket()
        })
        .await?
    }

    fn request<T, F>(&self, make: F) -> BoxFuture<'static, Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(Reply<T>) -> Command,
    {
        let tx = self.tx.clone();
        let (reply, rx) = oneshot::channel();
        let command = make(reply);
        Box::pin(async move {
            tx.send(command)
                .await
                .map_err(|_| StreamportError::Closed)?;
            rx.await.map_err(|_| StreamportError::Closed)?
        })
    }
}

impl ControlChannel for ServerHandle {
    fn create_channel(&self, request: CreateChannelRequest) -> BoxFuture<'static, Result<ChannelInfo>> {
        self.request(|reply| Command::CreateChannel { request, reply })
    }

    fn create_upload_channel(
        &self,
        request: CreateUploadRequest,
    ) -> BoxFuture<'static, Result<ChannelInfo>> {
        self.request(|reply| Command::CreateUploadChannel { request, reply })
    }

    fn start(&self, channel_path: &str, format: &str) -> BoxFuture<'static, Result<StartReply>> {
        let path = channel_path.to_string();
        let format = format.to_string();
        self.request(|reply| Command::Start {
            path,
            format,
            reply,
        })
    }

    fn stop(&self, channel_path: &str) -> BoxFuture<'static, Result<()>> {
        let path = channel_path.to_string();
        self.request(|reply| Command::Stop { path, reply })
    }

    fn remove(&self, channel_path: &str) -> BoxFuture<'static, Result<()>> {
        let path = channel_path.to_string();
        self.request(|reply| Command::Remove { path, reply })
    }

    fn channel_exists(&self, channel_path: &str) -> BoxFuture<'static, Result<bool>> {
        let path = channel_path.to_string();
        self.request(|reply| {
            Command::Invoke(Box::new(move |state| {
                let _ = reply.send(Ok(state.channel(&path).is_some()));
            }))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.events.subscribe()
    }
}
