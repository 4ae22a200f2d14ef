//! Client-side stream session.
//!
//! A [`Stream`] is owned by one task and driven by calling
//! [`Stream::next_event`] in a loop. Lifecycle calls (`connect`, `start`,
//! `stop`, `disconnect`) check their preconditions, send the request to the
//! server and return at once; the state change they cause is applied when
//! the reply comes back, inside a later `next_event` call. Requests run as
//! spawned tasks that post their result back to the stream, so the owner
//! keeps receiving frames and notifications while a request is in flight.
//!
//! ```text
//!             connect            reply ok            start
//! UNCONNECTED ──────► CONNECTING ───────► READY ──────────► STARTING
//!      ▲                   │                ▲  ▲                │ reply ok
//!      │ disconnect ok     │ reply err      │  └── stop ok ─────┤
//!      │                   ▼                │                   ▼
//!      └──────────────── ERROR ◄────────────┴────────────── STREAMING
//!                              peer removed / data-plane fault
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut stream = context.create_stream("recorder", None);
//! stream.connect(StreamDirection::Capture, None, "audio/x-raw".parse()?)?;
//! stream.wait_for_state(StreamState::Ready).await?;
//!
//! let format = stream.possible_formats().unwrap().fixate();
//! stream.start(format, StreamMode::Buffer)?;
//! loop {
//!     if let StreamEvent::NewBuffer = stream.next_event().await {
//!         let frame = stream.peek_buffer()?;
//!         println!("{} bytes", frame.payload_len());
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::context::Context;
use super::handle::{StreamCommand, StreamHandle, StreamRequest};
use super::state::{StreamEvent, StreamMode, StreamState};
use crate::control::{
    BoxFuture, ChannelInfo, ControlChannel, CreateChannelRequest, CreateUploadRequest,
    ObjectEvent, StartReply, StreamDirection,
};
use crate::error::{Result, StreamportError};
use crate::format::Caps;
use crate::properties::Properties;
use crate::protocol::{Frame, FrameRef, FrameSlot};
use crate::transport::DataSocket;

static NEXT_STREAM: AtomicU64 = AtomicU64::new(1);

/// Result of a control request, tagged with the connection it belongs to.
struct Completion {
    epoch: u64,
    outcome: Outcome,
}

enum Outcome {
    Created(Result<ChannelInfo>),
    Started(Result<StartReply>),
    Stopped(Result<()>),
    Removed(Result<()>),
    /// Whether `path` still exists, asked after object events were missed.
    Checked { path: String, result: Result<bool> },
}

enum Wake {
    Completion(Completion),
    Command(StreamCommand),
    Object(std::result::Result<ObjectEvent, broadcast::error::RecvError>),
    Readable(Result<()>),
}

/// One client connection to a server channel.
pub struct Stream {
    context: Context,
    id: u64,
    name: String,
    properties: Properties,

    state: StreamState,
    error: Option<StreamportError>,
    direction: Option<StreamDirection>,
    mode: StreamMode,
    port_path: Option<String>,
    possible_formats: Option<Caps>,
    format: Option<Caps>,
    channel: Option<String>,
    disconnecting: bool,
    stopping: bool,
    epoch: u64,

    socket: Option<DataSocket>,
    watching: bool,
    slot: FrameSlot,
    pending: VecDeque<StreamEvent>,

    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    commands_tx: mpsc::Sender<StreamCommand>,
    commands_rx: mpsc::Receiver<StreamCommand>,
    objects: broadcast::Receiver<ObjectEvent>,
    objects_open: bool,
}

impl Stream {
    /// Create an unconnected stream.
    ///
    /// `media.name` defaults to `name` if the properties do not set it.
    pub fn new(context: &Context, name: &str, properties: Option<Properties>) -> Self {
        let mut properties = properties.unwrap_or_default();
        properties.ensure_media_name(name);

        let config = context.config();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));

        Self {
            id: NEXT_STREAM.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            properties,
            state: StreamState::Unconnected,
            error: None,
            direction: None,
            mode: StreamMode::default(),
            port_path: None,
            possible_formats: None,
            format: None,
            channel: None,
            disconnecting: false,
            stopping: false,
            epoch: 0,
            socket: None,
            watching: false,
            slot: FrameSlot::new(),
            pending: VecDeque::with_capacity(config.event_capacity),
            completions_tx,
            completions_rx,
            commands_tx,
            commands_rx,
            objects: context.control().subscribe(),
            objects_open: true,
            context: context.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Error that put the stream into `ERROR`, if any.
    #[inline]
    pub fn error(&self) -> Option<&StreamportError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[inline]
    pub fn direction(&self) -> Option<StreamDirection> {
        self.direction
    }

    #[inline]
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Formats offered on connect, replaced by the channel's candidates once
    /// `READY`.
    #[inline]
    pub fn possible_formats(&self) -> Option<&Caps> {
        self.possible_formats.as_ref()
    }

    /// Negotiated format; set only while `STREAMING`.
    #[inline]
    pub fn format(&self) -> Option<&Caps> {
        self.format.as_ref()
    }

    /// Path of the remote channel while connected.
    #[inline]
    pub fn channel_path(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Path of the port the channel lives on.
    #[inline]
    pub fn port_path(&self) -> Option<&str> {
        self.port_path.as_deref()
    }

    /// The data socket, while streaming.
    ///
    /// In [`StreamMode::Socket`] the owner reads frames from it directly.
    #[inline]
    pub fn data_socket(&self) -> Option<&DataSocket> {
        self.socket.as_ref()
    }

    /// Handle for driving this stream from other tasks.
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.commands_tx.clone())
    }

    /// Ask the server for a channel and move to `CONNECTING`.
    ///
    /// With no `port_path` the server picks the first compatible port.
    pub fn connect(
        &mut self,
        direction: StreamDirection,
        port_path: Option<&str>,
        formats: Caps,
    ) -> Result<()> {
        self.require_state(StreamState::Unconnected, "connect")?;
        self.begin_connect(direction, port_path, &formats);

        let request = CreateChannelRequest {
            client: self.context.client().to_string(),
            direction,
            port_path: port_path.map(str::to_string),
            possible_formats: formats.to_wire(),
            properties: self.properties.clone(),
        };
        tracing::debug!(stream = %self.name, formats = %formats, "connecting");
        let request = self.context.control().create_channel(request);
        self.spawn_request(request, Outcome::Created);
        self.set_state(StreamState::Connecting, None);
        Ok(())
    }

    /// Ask the server for an upload port fed by this stream.
    pub fn connect_provide(&mut self, formats: Caps) -> Result<()> {
        self.require_state(StreamState::Unconnected, "connect_provide")?;
        self.begin_connect(StreamDirection::Provide, None, &formats);

        let request = CreateUploadRequest {
            client: self.context.client().to_string(),
            possible_formats: formats.to_wire(),
            properties: self.properties.clone(),
        };
        tracing::debug!(stream = %self.name, formats = %formats, "connecting upload");
        let request = self.context.control().create_upload_channel(request);
        self.spawn_request(request, Outcome::Created);
        self.set_state(StreamState::Connecting, None);
        Ok(())
    }

    /// Start the channel with `format` and move to `STARTING`.
    pub fn start(&mut self, format: Caps, mode: StreamMode) -> Result<()> {
        self.require_state(StreamState::Ready, "start")?;
        let channel = self.require_channel("start")?;

        self.mode = mode;
        tracing::debug!(stream = %self.name, format = %format, ?mode, "starting");
        let request = self.context.control().start(&channel, &format.to_wire());
        self.spawn_request(request, Outcome::Started);
        self.set_state(StreamState::Starting, None);
        Ok(())
    }

    /// Stop streaming. The stream returns to `READY` once the server agrees.
    pub fn stop(&mut self) -> Result<()> {
        self.require_state(StreamState::Streaming, "stop")?;
        if self.stopping || self.disconnecting {
            return Err(StreamportError::precondition("stop already in progress"));
        }
        let channel = self.require_channel("stop")?;

        self.stopping = true;
        tracing::debug!(stream = %self.name, "stopping");
        let request = self.context.control().stop(&channel);
        self.spawn_request(request, Outcome::Stopped);
        Ok(())
    }

    /// Release the channel. The stream becomes `UNCONNECTED` once the server
    /// agrees.
    ///
    /// Allowed whenever a channel is held, including in `ERROR`.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.disconnecting {
            return Err(StreamportError::precondition("disconnect already in progress"));
        }
        let channel = self.require_channel("disconnect")?;

        self.disconnecting = true;
        tracing::debug!(stream = %self.name, channel = %channel, "disconnecting");
        let request = self.context.control().remove(&channel);
        self.spawn_request(request, Outcome::Removed);
        Ok(())
    }

    /// Borrow the frame announced by the last [`StreamEvent::NewBuffer`].
    ///
    /// The frame is dropped on the next call to [`Stream::next_event`].
    pub fn peek_buffer(&self) -> Result<FrameRef<'_>> {
        self.require_state(StreamState::Streaming, "peek_buffer")?;
        self.slot
            .peek()
            .ok_or_else(|| StreamportError::precondition("no frame pending"))
    }

    /// Send a frame to the server.
    ///
    /// A transport failure puts the stream into `ERROR`.
    pub async fn send_buffer(&mut self, frame: &Frame) -> Result<()> {
        self.require_state(StreamState::Streaming, "send_buffer")?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| StreamportError::precondition("no data socket"))?;

        match socket.send_frame(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(stream = %self.name, "send failed: {}", e);
                let returned = e.replicate();
                self.set_state(StreamState::Error, Some(e));
                Err(returned)
            }
        }
    }

    /// Wait for the next notification.
    ///
    /// This is where request replies, queued [`StreamHandle`] calls,
    /// object-removal events and incoming frames are processed. Any frame
    /// from a previous [`StreamEvent::NewBuffer`] is dropped on entry.
    ///
    /// Not cancel safe while a frame payload is being read; drop the future
    /// only between events.
    pub async fn next_event(&mut self) -> StreamEvent {
        self.slot.invalidate();
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            let wake = tokio::select! {
                biased;
                Some(done) = self.completions_rx.recv() => Wake::Completion(done),
                Some(command) = self.commands_rx.recv() => Wake::Command(command),
                event = self.objects.recv(), if self.objects_open => Wake::Object(event),
                ready = socket_readable(self.socket.as_ref()), if self.watching => {
                    Wake::Readable(ready)
                }
            };

            match wake {
                Wake::Completion(done) => self.complete(done),
                Wake::Command(command) => {
                    let result = self.apply(command.request);
                    if let Some(reply) = command.reply {
                        let _ = reply.send(result);
                    }
                }
                Wake::Object(event) => self.object_event(event),
                Wake::Readable(Ok(())) => {
                    if self.read_frame().await {
                        return StreamEvent::NewBuffer;
                    }
                }
                Wake::Readable(Err(e)) => self.fail(e),
            }
        }
    }

    /// Pump events until the stream reaches `wanted`.
    ///
    /// Fails with a copy of the stored error if the stream lands in `ERROR`
    /// first. Frames arriving meanwhile are dropped.
    pub async fn wait_for_state(&mut self, wanted: StreamState) -> Result<()> {
        loop {
            if self.state == wanted {
                return Ok(());
            }
            if self.state == StreamState::Error {
                return Err(self
                    .error
                    .as_ref()
                    .map_or(StreamportError::Closed, StreamportError::replicate));
            }
            self.next_event().await;
        }
    }

    fn apply(&mut self, request: StreamRequest) -> Result<()> {
        match request {
            StreamRequest::Connect {
                direction,
                port_path,
                formats,
            } => self.connect(direction, port_path.as_deref(), formats),
            StreamRequest::ConnectProvide { formats } => self.connect_provide(formats),
            StreamRequest::Start { format, mode } => self.start(format, mode),
            StreamRequest::Stop => self.stop(),
            StreamRequest::Disconnect => self.disconnect(),
        }
    }

    fn begin_connect(&mut self, direction: StreamDirection, port_path: Option<&str>, formats: &Caps) {
        self.epoch += 1;
        self.direction = Some(direction);
        self.port_path = port_path.map(str::to_string);
        self.possible_formats = Some(formats.clone());
        self.stopping = false;
        self.disconnecting = false;
    }

    fn spawn_request<T, F>(&self, request: BoxFuture<'static, Result<T>>, wrap: F)
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) -> Outcome + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        let control = self.context.control().clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = wrap(request.await);
            if let Err(mpsc::error::SendError(done)) = tx.send(Completion { epoch, outcome }) {
                // The stream is gone; a channel created for it has no owner.
                release_orphan(control, done.outcome).await;
            }
        });
    }

    /// Drop a reply nobody will act on, releasing any channel it created.
    fn discard(&self, outcome: Outcome) {
        if !matches!(outcome, Outcome::Created(Ok(_))) {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(release_orphan(self.context.control().clone(), outcome));
        }
    }

    fn complete(&mut self, done: Completion) {
        if done.epoch != self.epoch {
            tracing::debug!(stream = %self.name, "dropping reply from an earlier connection");
            self.discard(done.outcome);
            return;
        }
        match done.outcome {
            Outcome::Created(result) => self.on_created(result),
            Outcome::Started(result) => self.on_started(result),
            Outcome::Stopped(result) => self.on_stopped(result),
            Outcome::Removed(result) => self.on_removed(result),
            Outcome::Checked { path, result } => self.on_checked(path, result),
        }
    }

    fn on_created(&mut self, result: Result<ChannelInfo>) {
        if self.state != StreamState::Connecting {
            tracing::debug!(stream = %self.name, state = %self.state, "stale create reply");
            self.discard(Outcome::Created(result));
            return;
        }
        let info = match result {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(stream = %self.name, "failed to create channel: {}", e);
                self.fail(e);
                return;
            }
        };

        self.channel = Some(info.path);
        self.port_path = Some(info.owner);
        match info.possible_formats.parse::<Caps>() {
            Ok(formats) => {
                self.possible_formats = Some(formats);
                self.pending.push_back(StreamEvent::PossibleFormatsChanged);
            }
            Err(e) => {
                self.fail(e);
                return;
            }
        }
        self.properties = info.properties;
        self.pending.push_back(StreamEvent::PropertiesChanged);
        self.set_state(StreamState::Ready, None);
    }

    fn on_started(&mut self, result: Result<StartReply>) {
        if self.state != StreamState::Starting || self.disconnecting {
            // Dropping the reply closes the descriptor it carries.
            tracing::debug!(stream = %self.name, state = %self.state, "stale start reply");
            return;
        }
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(stream = %self.name, "failed to start: {}", e);
                self.fail(e);
                return;
            }
        };

        let format = match reply.format.parse::<Caps>() {
            Ok(format) => format,
            Err(e) => return self.fail(e),
        };
        let socket = match DataSocket::from_owned_fd(reply.fd) {
            Ok(socket) => socket,
            Err(e) => return self.fail(e),
        };

        self.format = Some(format);
        self.pending.push_back(StreamEvent::FormatChanged);
        self.properties = reply.properties;
        self.pending.push_back(StreamEvent::PropertiesChanged);

        self.socket = Some(socket);
        match self.mode {
            StreamMode::Socket => self.pending.push_back(StreamEvent::SocketChanged),
            StreamMode::Buffer => self.watching = true,
        }
        self.set_state(StreamState::Streaming, None);
    }

    fn on_stopped(&mut self, result: Result<()>) {
        self.stopping = false;
        if self.state != StreamState::Streaming || self.disconnecting {
            tracing::debug!(stream = %self.name, state = %self.state, "stale stop reply");
            return;
        }
        match result {
            Ok(()) => {
                self.release_data_plane();
                self.set_state(StreamState::Ready, None);
            }
            Err(e) => {
                tracing::warn!(stream = %self.name, "failed to stop: {}", e);
                self.fail(e);
            }
        }
    }

    fn on_removed(&mut self, result: Result<()>) {
        self.disconnecting = false;
        match result {
            Ok(()) => {
                self.channel = None;
                self.release_data_plane();
                self.set_state(StreamState::Unconnected, None);
            }
            Err(e) => {
                tracing::warn!(stream = %self.name, "failed to disconnect: {}", e);
                self.fail(e);
            }
        }
    }

    fn on_checked(&mut self, path: String, result: Result<bool>) {
        if self.disconnecting || self.channel.as_deref() != Some(path.as_str()) {
            return;
        }
        match result {
            Ok(true) => {
                tracing::debug!(stream = %self.name, channel = %path, "channel still present");
            }
            Ok(false) => self.peer_gone(path),
            Err(e) => {
                tracing::warn!(stream = %self.name, "failed to look up channel: {}", e);
                self.fail(e);
            }
        }
    }

    fn object_event(&mut self, event: std::result::Result<ObjectEvent, broadcast::error::RecvError>) {
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(stream = %self.name, missed = n, "object events lagged");
                self.recheck_channel();
                return;
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.objects_open = false;
                return;
            }
        };

        let Some(channel) = self.channel.as_deref() else {
            return;
        };
        if self.disconnecting || !event.is_channel_removed(channel) {
            return;
        }

        let path = channel.to_string();
        self.peer_gone(path);
    }

    /// Ask the server whether our channel survived events we never saw.
    fn recheck_channel(&mut self) {
        if self.disconnecting {
            return;
        }
        let Some(path) = self.channel.clone() else {
            return;
        };
        let request = self.context.control().channel_exists(&path);
        self.spawn_request(request, move |result| Outcome::Checked { path, result });
    }

    fn peer_gone(&mut self, path: String) {
        tracing::warn!(stream = %self.name, channel = %path, "channel disappeared");
        self.channel = None;
        self.fail(StreamportError::PeerGone(format!("channel {} disappeared", path)));
    }

    /// Read one frame after the socket reported readiness.
    async fn read_frame(&mut self) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        let max = self.context.config().max_payload_size;
        let result = socket.try_recv_frame(&mut self.slot, max).await;
        match result {
            Ok(got) => got,
            Err(StreamportError::Closed) => {
                tracing::debug!(stream = %self.name, "data socket closed by peer");
                self.watching = false;
                false
            }
            Err(e) => {
                tracing::error!(stream = %self.name, "data plane fault: {}", e);
                self.fail(e);
                false
            }
        }
    }

    fn fail(&mut self, error: StreamportError) {
        self.set_state(StreamState::Error, Some(error));
    }

    /// Change state, queueing exactly one notification per actual change.
    ///
    /// Setting the current state again is a no-op and `error` is dropped.
    fn set_state(&mut self, new: StreamState, error: Option<StreamportError>) {
        if self.state == new {
            if let Some(e) = error {
                tracing::debug!(stream = %self.name, state = %new, "ignoring error: {}", e);
            }
            return;
        }
        if let Some(e) = error {
            self.error = Some(e);
        }
        let old = std::mem::replace(&mut self.state, new);
        if new == StreamState::Error {
            self.release_data_plane();
        }
        tracing::debug!(stream = %self.name, from = %old, to = %new, "state changed");
        self.pending.push_back(StreamEvent::StateChanged { old, new });
    }

    fn release_data_plane(&mut self) {
        self.watching = false;
        self.slot.invalidate();
        if self.socket.take().is_some() && self.mode == StreamMode::Socket {
            self.pending.push_back(StreamEvent::SocketChanged);
        }
        if self.format.take().is_some() {
            self.pending.push_back(StreamEvent::FormatChanged);
        }
    }

    fn require_state(&self, wanted: StreamState, op: &str) -> Result<()> {
        if self.state != wanted {
            return Err(StreamportError::precondition(format!(
                "{} requires state {}, stream is {}",
                op, wanted, self.state
            )));
        }
        Ok(())
    }

    fn require_channel(&self, op: &str) -> Result<String> {
        self.channel
            .clone()
            .ok_or_else(|| StreamportError::precondition(format!("{} requires a channel", op)))
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !matches!(self.state, StreamState::Unconnected | StreamState::Error) {
            tracing::warn!(stream = %self.name, state = %self.state, "stream dropped while active");
        }
        // Replies already queued are never processed; later ones fail to send
        // and are released by their request task.
        self.completions_rx.close();
        while let Ok(done) = self.completions_rx.try_recv() {
            self.discard(done.outcome);
        }

        let Some(channel) = self.channel.take() else {
            return;
        };
        if self.disconnecting {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let request = self.context.control().remove(&channel);
            runtime.spawn(async move {
                if let Err(e) = request.await {
                    tracing::debug!(channel = %channel, "release on drop failed: {}", e);
                }
            });
        }
    }
}

async fn release_orphan(control: Arc<dyn ControlChannel>, outcome: Outcome) {
    if let Outcome::Created(Ok(info)) = outcome {
        tracing::debug!(channel = %info.path, "releasing channel of a dropped stream");
        if let Err(e) = control.remove(&info.path).await {
            tracing::debug!(channel = %info.path, "release failed: {}", e);
        }
    }
}

async fn socket_readable(socket: Option<&DataSocket>) -> Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StreamConfig};
    use crate::control::PortDirection;
    use crate::error::ErrorKind;
    use crate::properties::MEDIA_NAME;
    use crate::server::{spawn_server, ServerHandle};

    async fn setup(formats: &str) -> (ServerHandle, Context, String) {
        let (server, _task) = spawn_server(ServerConfig::default());
        let node = server.add_node("src").await.unwrap();
        let port = server
            .add_port(&node, "out", PortDirection::Output, formats)
            .await
            .unwrap();
        let context = Context::new(server.clone()).with_client_name("test-client");
        (server, context, port)
    }

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_new_defaults_media_name() {
        let (_server, context, _port) = setup("ANY").await;
        let stream = Stream::new(&context, "mic", None);
        assert_eq!(stream.properties().get(MEDIA_NAME), Some("mic"));
        assert_eq!(stream.state(), StreamState::Unconnected);

        let props = Properties::from_pairs([(MEDIA_NAME, "custom")]);
        let stream = Stream::new(&context, "mic", Some(props));
        assert_eq!(stream.properties().get(MEDIA_NAME), Some("custom"));
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let (_server, context, port) = setup("audio/x-raw, rate=44100").await;
        let mut stream = Stream::new(&context, "rec", None);

        stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Connecting);
        assert_eq!(
            stream.next_event().await,
            StreamEvent::StateChanged {
                old: StreamState::Unconnected,
                new: StreamState::Connecting
            }
        );

        stream.wait_for_state(StreamState::Ready).await.unwrap();
        assert_eq!(stream.port_path(), Some(port.as_str()));
        assert!(stream.channel_path().unwrap().starts_with(&port));
        assert_eq!(
            stream.possible_formats().unwrap().to_string(),
            "audio/x-raw, rate=44100"
        );
        assert!(stream.format().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_stores_error() {
        let (_server, context, _port) = setup("audio/x-raw").await;
        let mut stream = Stream::new(&context, "rec", None);

        stream
            .connect(StreamDirection::Capture, None, caps("video/x-raw"))
            .unwrap();
        let err = stream.wait_for_state(StreamState::Ready).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(stream.state(), StreamState::Error);
        assert_eq!(stream.error().unwrap().kind(), ErrorKind::NotFound);
        assert!(stream.channel_path().is_none());
    }

    #[tokio::test]
    async fn test_events_beyond_preallocation_are_kept() {
        let (_server, context, _port) = setup("audio/x-raw").await;
        let context = context.with_config(StreamConfig::default().event_capacity(1));
        let mut stream = Stream::new(&context, "rec", None);

        stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap();
        let mut events = Vec::new();
        while stream.state() != StreamState::Ready || !stream.pending.is_empty() {
            events.push(stream.next_event().await);
        }
        assert_eq!(
            events,
            [
                StreamEvent::StateChanged {
                    old: StreamState::Unconnected,
                    new: StreamState::Connecting
                },
                StreamEvent::PossibleFormatsChanged,
                StreamEvent::PropertiesChanged,
                StreamEvent::StateChanged {
                    old: StreamState::Connecting,
                    new: StreamState::Ready
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_preconditions_leave_state_unchanged() {
        let (_server, context, _port) = setup("audio/x-raw").await;
        let mut stream = Stream::new(&context, "rec", None);

        let err = stream.start(caps("audio/x-raw"), StreamMode::Buffer).unwrap_err();
        assert!(err.is_precondition());
        assert!(stream.stop().unwrap_err().is_precondition());
        assert!(stream.disconnect().unwrap_err().is_precondition());
        assert!(stream.peek_buffer().unwrap_err().is_precondition());
        assert!(stream
            .send_buffer(&Frame::from_slice(b"x"))
            .await
            .unwrap_err()
            .is_precondition());
        assert_eq!(stream.state(), StreamState::Unconnected);
        assert!(stream.error().is_none());

        stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap();
        let err = stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(stream
            .start(caps("audio/x-raw"), StreamMode::Buffer)
            .unwrap_err()
            .is_precondition());
        assert_eq!(stream.state(), StreamState::Connecting);
    }

    #[tokio::test]
    async fn test_same_state_is_not_notified_and_error_dropped() {
        let (_server, context, _port) = setup("ANY").await;
        let mut stream = Stream::new(&context, "s", None);

        stream.set_state(StreamState::Unconnected, Some(StreamportError::Closed));
        assert!(stream.pending.is_empty());
        assert!(stream.error().is_none());

        stream.set_state(StreamState::Error, Some(StreamportError::Closed));
        stream.set_state(StreamState::Error, Some(StreamportError::Protocol("x".into())));
        assert_eq!(stream.pending.len(), 1);
        assert_eq!(stream.error().unwrap().kind(), ErrorKind::Closed);
    }

    #[tokio::test]
    async fn test_error_replaces_previous_error() {
        let (_server, context, _port) = setup("ANY").await;
        let mut stream = Stream::new(&context, "s", None);

        stream.set_state(StreamState::Error, Some(StreamportError::Closed));
        stream.set_state(StreamState::Unconnected, None);
        stream.set_state(StreamState::Error, Some(StreamportError::PeerGone("p".into())));
        assert_eq!(stream.error().unwrap().kind(), ErrorKind::PeerGone);
    }

    #[tokio::test]
    async fn test_socket_mode_exposes_socket() {
        let (server, context, _port) = setup("audio/x-raw").await;
        let mut stream = Stream::new(&context, "s", None);
        stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap();
        stream.wait_for_state(StreamState::Ready).await.unwrap();

        stream.start(caps("audio/x-raw"), StreamMode::Socket).unwrap();
        let mut saw_socket = false;
        while stream.state() != StreamState::Streaming {
            if stream.next_event().await == StreamEvent::SocketChanged {
                saw_socket = true;
            }
        }
        assert!(saw_socket);

        let channel = stream.channel_path().unwrap().to_string();
        let server_end = server.channel_socket(&channel).await.unwrap();
        server_end.send_frame(&Frame::from_slice(b"raw")).await.unwrap();

        let mut slot = FrameSlot::new();
        stream
            .data_socket()
            .unwrap()
            .recv_frame(&mut slot, 1024)
            .await
            .unwrap();
        assert_eq!(slot.peek().unwrap().payload(), b"raw");
    }

    #[tokio::test]
    async fn test_handle_drives_stream() {
        let (_server, context, _port) = setup("audio/x-raw").await;
        let mut stream = Stream::new(&context, "s", None);
        let handle = stream.handle();

        let remote = tokio::spawn(async move {
            handle
                .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
                .await
        });
        stream.wait_for_state(StreamState::Connecting).await.unwrap();
        remote.await.unwrap().unwrap();
        stream.wait_for_state(StreamState::Ready).await.unwrap();

        let handle = stream.handle();
        let remote = tokio::spawn(async move { handle.stop().await });
        while !remote.is_finished() {
            tokio::select! {
                _ = stream.next_event() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
            }
        }
        assert!(remote.await.unwrap().unwrap_err().is_precondition());
        assert_eq!(stream.state(), StreamState::Ready);
    }

    #[tokio::test]
    async fn test_disconnect_from_error_after_failed_start() {
        let (_server, context, _port) = setup("audio/x-raw").await;
        let mut stream = Stream::new(&context, "s", None);
        stream
            .connect(StreamDirection::Capture, None, caps("audio/x-raw"))
            .unwrap();
        stream.wait_for_state(StreamState::Ready).await.unwrap();

        stream.start(caps("video/x-raw"), StreamMode::Buffer).unwrap();
        let err = stream.wait_for_state(StreamState::Streaming).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(stream.format().is_none());

        stream.disconnect().unwrap();
        stream.wait_for_state(StreamState::Unconnected).await.unwrap();
        assert!(stream.channel_path().is_none());
    }
}
