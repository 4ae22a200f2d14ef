//! Client side: contexts and stream sessions.
//!
//! A [`Context`] wraps a [`ControlChannel`](crate::control::ControlChannel)
//! and creates [`Stream`]s. Each stream is owned by one task that polls
//! [`Stream::next_event`]; other tasks reach it through a [`StreamHandle`].

mod context;
mod handle;
mod session;
mod state;

pub use context::Context;
pub use handle::{StreamHandle, StreamRequest};
pub use session::Stream;
pub use state::{StreamEvent, StreamMode, StreamState};
