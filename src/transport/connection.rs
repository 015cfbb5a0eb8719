//! WebSocket channel and event loop.
//!
//! A [`Channel`] owns exactly one socket attempt. It spawns a tokio task that:
//!
//! - connects the socket and sends the `connect` handshake
//! - transmits outgoing requests from [`Channel::send`]
//! - resolves pending requests from response frames
//! - hands every other frame to the [`ChannelObserver`]
//! - on close, fails all pending requests and reports to the observer
//!
//! # State Machine
//!
//! ```text
//! Connecting ──► Handshaking ──► Open ──► Closed
//!      │              │                     ▲
//!      └──────────────┴─────────────────────┘
//! ```
//!
//! `Closed` is terminal. Reconnecting means opening a new `Channel`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, to_value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{CONNECT_METHOD, ConnectParams, Frame, HelloOk, RequestFrame, ResponseFrame};

use super::backoff::saturating_millis;
use super::pending::{Completion, PendingTable};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for establishing the socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket is being established.
    Connecting,
    /// Socket is ready; the `connect` handshake is in flight.
    Handshaking,
    /// Handshake accepted.
    Open,
    /// Socket is gone. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if frames can be written to the socket.
    #[inline]
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Handshaking | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ChannelObserver
// ============================================================================

/// Receives lifecycle notifications and pushed frames from a channel.
///
/// Callbacks run on the channel's task, in frame arrival order.
pub trait ChannelObserver: Send + Sync {
    /// An event frame (or an inbound request frame) arrived.
    fn on_frame(&self, frame: Frame);

    /// The handshake was accepted.
    fn on_connected(&self, hello: HelloOk);

    /// The handshake was rejected. The socket is closed right after.
    fn on_handshake_failed(&self, response: ResponseFrame);

    /// The socket closed. `was_open` is `true` if the handshake had succeeded.
    fn on_closed(&self, was_open: bool);
}

// ============================================================================
// ChannelConfig
// ============================================================================

/// Settings for each socket attempt.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Gateway WebSocket URL.
    pub url: Url,
    /// Handshake parameters.
    pub connect_params: ConnectParams,
    /// Time allowed to establish the socket.
    pub connect_timeout: Duration,
    /// Time allowed for the gateway to answer `connect`.
    pub handshake_timeout: Duration,
}

// ============================================================================
// PendingResponse
// ============================================================================

/// Deferred result of [`Channel::send`].
///
/// Resolves with the matching response frame, or [`Error::Disconnected`] if
/// the socket closes first. Dropping it discards the result.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<ResponseFrame>>,
}

impl PendingResponse {
    /// Id of the request this response belongs to.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<ResponseFrame>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(Error::Disconnected)))
    }
}

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the event loop.
enum ChannelCommand {
    /// Register and transmit a request.
    Send {
        request: RequestFrame,
        completion: Completion,
    },
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Channel
// ============================================================================

/// Handle to one socket attempt.
///
/// Cheap to clone; all clones refer to the same socket.
#[derive(Clone)]
pub struct Channel {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Lifecycle state (shared with event loop).
    state: Arc<Mutex<ConnectionState>>,
    /// Pending request table (shared with event loop and later channels).
    pending: Arc<Mutex<PendingTable>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Channel {
    /// Starts a socket attempt in [`ConnectionState::Connecting`].
    ///
    /// Spawns the event loop task, so it must be called within a tokio
    /// runtime. The observer is held weakly; the loop stops reporting once it
    /// is gone.
    pub fn open(
        config: Arc<ChannelConfig>,
        pending: Arc<Mutex<PendingTable>>,
        observer: Weak<dyn ChannelObserver>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));

        let event_loop = EventLoop {
            config,
            state: Arc::clone(&state),
            pending: Arc::clone(&pending),
            observer,
            handshake_id: None,
            was_open: false,
        };
        tokio::spawn(event_loop.run(command_rx));

        Self {
            command_tx,
            state,
            pending,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Returns `true` until the channel reaches [`ConnectionState::Closed`].
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Issues one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] immediately if the socket is not ready.
    /// Nothing is queued.
    pub fn send(&self, method: impl Into<String>, params: Value) -> Result<PendingResponse> {
        if !self.state().is_ready() {
            return Err(Error::NotConnected);
        }

        let request = RequestFrame::new(method, params);
        let id = request.id.clone();
        let (completion, rx) = oneshot::channel();

        self.command_tx
            .send(ChannelCommand::Send {
                request,
                completion,
            })
            .map_err(|_| Error::NotConnected)?;

        Ok(PendingResponse { id, rx })
    }

    /// Closes the socket.
    ///
    /// Pending requests fail with [`Error::Disconnected`] and the observer
    /// sees `on_closed`.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Whether the loop keeps the socket.
enum Flow {
    Continue,
    Close,
}

/// State owned by the channel task.
struct EventLoop {
    config: Arc<ChannelConfig>,
    state: Arc<Mutex<ConnectionState>>,
    pending: Arc<Mutex<PendingTable>>,
    observer: Weak<dyn ChannelObserver>,
    /// Id of the in-flight `connect` request.
    handshake_id: Option<RequestId>,
    was_open: bool,
}

impl EventLoop {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>) {
        if let Some(ws_stream) = self.connect(&mut command_rx).await {
            self.serve(ws_stream, &mut command_rx).await;
        }

        self.set_state(ConnectionState::Closed);

        // Requests queued after the last loop iteration never reached the socket.
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let ChannelCommand::Send { completion, .. } = command {
                let _ = completion.send(Err(Error::Disconnected));
            }
        }

        self.pending.lock().fail_all();

        debug!(was_open = self.was_open, "Channel closed");

        if let Some(observer) = self.observer.upgrade() {
            observer.on_closed(self.was_open);
        }
    }

    /// Establishes the socket, honoring shutdown while waiting.
    async fn connect(
        &self,
        command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    ) -> Option<WsStream> {
        let url = self.config.url.as_str();

        debug!(%url, "Connecting to gateway");

        let connecting = self.connect_socket();
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(ws_stream) => Some(ws_stream),
                        Err(e) => {
                            warn!(%url, error = %e, "Gateway connection failed");
                            None
                        }
                    };
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Send { completion, .. }) => {
                            let _ = completion.send(Err(Error::NotConnected));
                        }
                        Some(ChannelCommand::Shutdown) | None => {
                            debug!("Shutdown while connecting");
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Opens the WebSocket within the connect timeout.
    async fn connect_socket(&self) -> Result<WsStream> {
        let connect_timeout = self.config.connect_timeout;

        let (ws_stream, _response) = timeout(connect_timeout, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(saturating_millis(connect_timeout)))?
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        Ok(ws_stream)
    }

    /// Runs the handshake and the frame loop until the socket closes.
    async fn serve(
        &mut self,
        ws_stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        self.set_state(ConnectionState::Handshaking);

        if let Flow::Close = self.send_handshake(&mut ws_write).await {
            let _ = ws_write.close().await;
            return;
        }

        let handshake_deadline = sleep(self.config.handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            let flow = tokio::select! {
                // Incoming frames from gateway
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_incoming_message(&text),

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by gateway");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        Some(Ok(_)) => Flow::Continue,
                    }
                }

                // Commands from the caller-facing API
                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Send { request, completion }) => {
                            self.handle_send_command(request, completion, &mut ws_write).await
                        }

                        Some(ChannelCommand::Shutdown) | None => {
                            debug!("Shutdown command received");
                            Flow::Close
                        }
                    }
                }

                () = &mut handshake_deadline, if self.handshake_id.is_some() => {
                    warn!(
                        timeout_ms = saturating_millis(self.config.handshake_timeout),
                        "Handshake timed out"
                    );
                    Flow::Close
                }
            };

            if let Flow::Close = flow {
                let _ = ws_write.close().await;
                break;
            }
        }
    }

    /// Sends the `connect` request.
    async fn send_handshake(&mut self, ws_write: &mut WsSink) -> Flow {
        let params = match to_value(&self.config.connect_params) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Failed to serialize connect params");
                return Flow::Close;
            }
        };

        let request = RequestFrame::new(CONNECT_METHOD, params);
        let id = request.id.clone();

        let json = match Frame::from(request).encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode handshake");
                return Flow::Close;
            }
        };

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            warn!(error = %e, "Failed to send handshake");
            return Flow::Close;
        }

        trace!(%id, "Handshake sent");
        self.handshake_id = Some(id);
        Flow::Continue
    }

    /// Routes one text message.
    fn handle_incoming_message(&mut self, text: &str) -> Flow {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "Dropping malformed frame");
                return Flow::Continue;
            }
        };

        match frame {
            Frame::Response(response) if self.handshake_id.as_ref() == Some(&response.id) => {
                self.handshake_id = None;
                self.handle_handshake_response(response)
            }

            Frame::Response(response) => {
                let id = response.id.clone();
                let matched = self.pending.lock().resolve(response);
                if !matched {
                    trace!(%id, "Discarding response for unknown request");
                }
                Flow::Continue
            }

            frame => {
                let Some(observer) = self.observer.upgrade() else {
                    return Flow::Close;
                };
                observer.on_frame(frame);
                Flow::Continue
            }
        }
    }

    fn handle_handshake_response(&mut self, response: ResponseFrame) -> Flow {
        let Some(observer) = self.observer.upgrade() else {
            return Flow::Close;
        };

        match HelloOk::from_response(&response) {
            Ok(hello) => {
                self.set_state(ConnectionState::Open);
                self.was_open = true;

                info!(
                    protocol = hello.protocol,
                    server_version = hello.server.as_ref().map(|s| s.version.as_str()),
                    "Connected to gateway"
                );

                observer.on_connected(hello);
                Flow::Continue
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                observer.on_handshake_failed(response);
                Flow::Close
            }
        }
    }

    /// Registers and transmits a caller request.
    async fn handle_send_command(
        &self,
        request: RequestFrame,
        completion: Completion,
        ws_write: &mut WsSink,
    ) -> Flow {
        let id = request.id.clone();

        let json = match Frame::from(request).encode() {
            Ok(json) => json,
            Err(e) => {
                let _ = completion.send(Err(e));
                return Flow::Continue;
            }
        };

        // Store correlation before sending
        let registered = self.pending.lock().register(id.clone(), completion);
        if let Err(e) = registered {
            warn!(%id, error = %e, "Request not registered");
            return Flow::Continue;
        }

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            warn!(%id, error = %e, "Failed to send request");
            return Flow::Close;
        }

        trace!(%id, "Request sent");
        Flow::Continue
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        trace!(%state, "Channel state changed");
    }
}

// ============================================================================
// Tests
// ============================================================================
