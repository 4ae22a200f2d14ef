//! # streamport
//!
//! Client/server core for moving media between processes.
//!
//! A server publishes nodes with ports. A client [`Stream`] asks for a
//! channel on a port, negotiates a format from the port's capabilities and
//! then receives (or sends) length-prefixed frames over a Unix socket. Each
//! frame may carry one file descriptor.
//!
//! ## Architecture
//!
//! - **Control plane** ([`control::ControlChannel`]): channel creation,
//!   start/stop/remove requests and object-removal events
//! - **Data plane** ([`transport::DataSocket`]): `[u32 length][payload]`
//!   frames, descriptors passed with `SCM_RIGHTS`
//!
//! ## Example
//!
//! ```ignore
//! use streamport::{spawn_server, Context, ServerConfig, StreamDirection, StreamMode, StreamState};
//! use streamport::control::PortDirection;
//!
//! #[tokio::main]
//! async fn main() -> streamport::Result<()> {
//!     let (server, _task) = spawn_server(ServerConfig::default());
//!     let node = server.add_node("camera").await?;
//!     server
//!         .add_port(&node, "out", PortDirection::Output, "video/x-raw, width=640, height=480")
//!         .await?;
//!
//!     let context = Context::new(server.clone());
//!     let mut stream = context.create_stream("viewer", None);
//!     stream.connect(StreamDirection::Capture, None, "video/x-raw".parse()?)?;
//!     stream.wait_for_state(StreamState::Ready).await?;
//!
//!     let format = stream.possible_formats().unwrap().fixate();
//!     stream.start(format, StreamMode::Buffer)?;
//!     stream.wait_for_state(StreamState::Streaming).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod format;
pub mod properties;
pub mod protocol;
pub mod server;
pub mod stream;
pub mod transport;

pub use config::{ServerConfig, StreamConfig};
pub use control::{ControlChannel, StreamDirection};
pub use error::{Result, StreamportError};
pub use format::Caps;
pub use properties::Properties;
pub use server::{spawn_server, ServerHandle};
pub use stream::{Context, Stream, StreamEvent, StreamMode, StreamState};
