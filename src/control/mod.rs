//! Control plane - the request/response contract between streams and the server.
//!
//! A stream never talks to server objects directly. Every remote operation
//! goes through a [`ControlChannel`], which returns a future that resolves
//! once the server has answered. The returned futures are `'static` so the
//! stream can spawn them and keep serving events while a request is in
//! flight.
//!
//! # Workflow
//!
//! 1. Client creates a channel on a port (or an upload port)
//! 2. Client starts the channel with a format and receives a socket
//! 3. Frames flow over the socket
//! 4. Client stops and finally removes the channel
//!
//! Object removals are broadcast to every subscriber so a client notices
//! when its channel disappears underneath it.

mod messages;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use crate::error::Result;

pub use messages::{
    ChannelInfo, CreateChannelRequest, CreateUploadRequest, ObjectEvent, ObjectKind,
    PortDirection, StartReply, StreamDirection,
};

/// Boxed future for control requests.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Client-side proxy to the server.
pub trait ControlChannel: Send + Sync + 'static {
    /// Create a channel on an existing port.
    fn create_channel(&self, request: CreateChannelRequest) -> BoxFuture<'static, Result<ChannelInfo>>;

    /// Create a port fed by the caller, plus a channel on it.
    fn create_upload_channel(
        &self,
        request: CreateUploadRequest,
    ) -> BoxFuture<'static, Result<ChannelInfo>>;

    /// Negotiate `format` on the channel and open its data socket.
    fn start(&self, channel_path: &str, format: &str) -> BoxFuture<'static, Result<StartReply>>;

    /// Close the data socket and clear the negotiated format.
    fn stop(&self, channel_path: &str) -> BoxFuture<'static, Result<()>>;

    /// Release the channel.
    fn remove(&self, channel_path: &str) -> BoxFuture<'static, Result<()>>;

    /// Whether the channel is still published.
    ///
    /// Used to resynchronize after missing object events.
    fn channel_exists(&self, channel_path: &str) -> BoxFuture<'static, Result<bool>>;

    /// Subscribe to object lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent>;
}
