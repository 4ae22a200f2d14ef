//! Cross-task access to a stream.
//!
//! A [`Stream`](super::Stream) is owned by one task. Other tasks drive it
//! through a [`StreamHandle`], which queues requests that the owner runs the
//! next time it polls [`Stream::next_event`](super::Stream::next_event).

use tokio::sync::{mpsc, oneshot};

use super::state::StreamMode;
use crate::control::StreamDirection;
use crate::error::{Result, StreamportError};
use crate::format::Caps;

/// A lifecycle call to run on the owning task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    Connect {
        direction: StreamDirection,
        port_path: Option<String>,
        formats: Caps,
    },
    ConnectProvide {
        formats: Caps,
    },
    Start {
        format: Caps,
        mode: StreamMode,
    },
    Stop,
    Disconnect,
}

#[derive(Debug)]
pub(crate) struct StreamCommand {
    pub(crate) request: StreamRequest,
    pub(crate) reply: Option<oneshot::Sender<Result<()>>>,
}

/// Sendable, cloneable handle to a stream owned by another task.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    tx: mpsc::Sender<StreamCommand>,
}

impl StreamHandle {
    pub(crate) fn new(tx: mpsc::Sender<StreamCommand>) -> Self {
        Self { tx }
    }

    /// Run `request` on the owning task and wait for its immediate result.
    ///
    /// The result only reports whether the request was accepted; the state
    /// transition it starts completes later.
    pub async fn invoke(&self, request: StreamRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StreamCommand {
                request,
                reply: Some(reply),
            })
            .await
            .map_err(|_| StreamportError::Closed)?;
        rx.await.map_err(|_| StreamportError::Closed)?
    }

    /// Queue `request` without waiting for it to run.
    pub async fn post(&self, request: StreamRequest) -> Result<()> {
        self.tx
            .send(StreamCommand {
                request,
                reply: None,
            })
            .await
            .map_err(|_| StreamportError::Closed)
    }

    pub async fn connect(
        &self,
        direction: StreamDirection,
        port_path: Option<&str>,
        formats: Caps,
    ) -> Result<()> {
        self.invoke(StreamRequest::Connect {
            direction,
            port_path: port_path.map(str::to_string),
            formats,
        })
        .await
    }

    pub async fn start(&self, format: Caps, mode: StreamMode) -> Result<()> {
        self.invoke(StreamRequest::Start { format, mode }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.invoke(StreamRequest::Stop).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.invoke(StreamRequest::Disconnect).await
    }
}
