//! Gateway handle: the caller-facing API.
//!
//! The [`Gateway`] owns the long-lived parts of the connection (pending
//! request table, backoff controller, handlers) and replaces its
//! [`Channel`] on every reconnect.
//!
//! # Example
//!
//! ```no_run
//! use gateway_channel::Gateway;
//! use serde_json::json;
//!
//! # async fn example() -> gateway_channel::Result<()> {
//! let gateway = Gateway::builder().url("ws://127.0.0.1:18789/ws").build()?;
//!
//! gateway.on_connected(|hello| println!("connected: protocol {:?}", hello.protocol));
//! gateway.on_disconnected(|was_open| println!("disconnected (was open: {was_open})"));
//! gateway.on_frame(|frame| println!("event: {}", frame.kind()));
//! gateway.open();
//!
//! let status = gateway.request("status", json!({})).await?;
//! println!("{status}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::{Frame, HelloOk, ResponseFrame};
use crate::transport::{
    Backoff, Channel, ChannelConfig, ChannelObserver, ConnectionState, PendingResponse,
    PendingTable,
};

use super::builder::{GatewayBuilder, GatewayConfig};

// ============================================================================
// Types
// ============================================================================

/// Handler for pushed frames.
pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

/// Handler for an accepted handshake.
pub type ConnectedHandler = Arc<dyn Fn(HelloOk) + Send + Sync>;

/// Handler for a rejected handshake; receives the raw response frame.
pub type HandshakeFailedHandler = Arc<dyn Fn(ResponseFrame) + Send + Sync>;

/// Handler for socket closure; receives whether the handshake had succeeded.
pub type DisconnectedHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Registered callbacks.
#[derive(Default)]
struct Handlers {
    frame: Option<FrameHandler>,
    connected: Option<ConnectedHandler>,
    handshake_failed: Option<HandshakeFailedHandler>,
    disconnected: Option<DisconnectedHandler>,
}

/// Internal shared state for the gateway.
struct GatewayInner {
    /// Per-socket settings.
    config: Arc<ChannelConfig>,
    /// Reconnect scheduler, outlives every channel.
    backoff: Backoff,
    /// Pending requests, shared with the live channel.
    pending: Arc<Mutex<PendingTable>>,
    /// The live (or most recently closed) channel.
    channel: Mutex<Option<Channel>>,
    /// User callbacks.
    handlers: RwLock<Handlers>,
    /// Set by the first `open`.
    opened: AtomicBool,
    /// Set by `dispose`; no further connects.
    disposed: AtomicBool,
    /// Weak self reference handed to channels and reconnect timers.
    self_ref: Weak<GatewayInner>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Self-healing request/response channel to a gateway.
///
/// Cheap to clone; clones share one connection.
///
/// # Lifecycle
///
/// 1. [`Gateway::builder`] / [`GatewayBuilder::build`] - configure
/// 2. `on_*` - register handlers
/// 3. [`Gateway::open`] - connect and handshake; reconnects with backoff
/// 4. [`Gateway::send`] / [`Gateway::request`] - issue RPCs
/// 5. [`Gateway::dispose`] - stop reconnecting and close
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("backoff", &self.inner.backoff)
            .finish()
    }
}

// ============================================================================
// Gateway - Constructor
// ============================================================================

impl Gateway {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Creates a gateway from a validated configuration.
    ///
    /// Nothing connects until [`Gateway::open`].
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let inner = Arc::new_cyclic(|self_ref| GatewayInner {
            config: Arc::new(config.channel),
            backoff: Backoff::new(config.backoff),
            pending: Arc::new(Mutex::new(PendingTable::new())),
            channel: Mutex::new(None),
            handlers: RwLock::new(Handlers::default()),
            opened: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        Self { inner }
    }
}

// ============================================================================
// Gateway - Handlers
// ============================================================================

impl Gateway {
    /// Sets the handler for pushed frames.
    ///
    /// Receives event frames and any request frame the gateway sends, in
    /// arrival order.
    pub fn on_frame(&self, handler: impl Fn(Frame) + Send + Sync + 'static) {
        self.inner.handlers.write().frame = Some(Arc::new(handler));
    }

    /// Sets the handler called once per accepted handshake.
    pub fn on_connected(&self, handler: impl Fn(HelloOk) + Send + Sync + 'static) {
        self.inner.handlers.write().connected = Some(Arc::new(handler));
    }

    /// Sets the handler called when the gateway rejects the handshake.
    pub fn on_handshake_failed(&self, handler: impl Fn(ResponseFrame) + Send + Sync + 'static) {
        self.inner.handlers.write().handshake_failed = Some(Arc::new(handler));
    }

    /// Sets the handler called every time a socket closes.
    pub fn on_disconnected(&self, handler: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.handlers.write().disconnected = Some(Arc::new(handler));
    }

    /// Removes every handler.
    pub fn clear_handlers(&self) {
        *self.inner.handlers.write() = Handlers::default();
    }
}

// ============================================================================
// Gateway - Public API
// ============================================================================

impl Gateway {
    /// Starts connecting.
    ///
    /// Idempotent: only the first call has an effect. Must be called within
    /// a tokio runtime.
    pub fn open(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            debug!("Ignoring open on disposed gateway");
            return;
        }

        if self.inner.opened.swap(true, Ordering::SeqCst) {
            trace!("Gateway already opened");
            return;
        }

        self.inner.connect();
    }

    /// Issues one request.
    ///
    /// The returned [`PendingResponse`] resolves with the matching response
    /// frame, whether `ok` or not, or fails with
    /// [`Error::Disconnected`](crate::Error::Disconnected) if the socket
    /// closes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`](crate::Error::NotConnected) right away
    /// if no socket is ready: before `open`, while connecting, or after close.
    pub fn send(&self, method: impl Into<String>, params: Value) -> Result<PendingResponse> {
        let channel = self.inner.channel.lock().clone();

        match channel {
            Some(channel) => channel.send(method, params),
            None => Err(crate::Error::NotConnected),
        }
    }

    /// Issues one request and returns its payload.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) if no socket is ready
    /// - [`Error::Disconnected`](crate::Error::Disconnected) if the socket closed first
    /// - [`Error::Rpc`](crate::Error::Rpc) if the gateway answered `ok: false`
    pub async fn request(&self, method: impl Into<String>, params: Value) -> Result<Value> {
        self.send(method, params)?.await?.into_result()
    }

    /// Reconnects immediately, skipping the backoff delay.
    ///
    /// No-op before [`Gateway::open`], after [`Gateway::dispose`], or while a
    /// socket is connecting, handshaking or open.
    pub fn force_reconnect(&self) {
        if !self.inner.opened.load(Ordering::SeqCst) || self.inner.disposed.load(Ordering::SeqCst)
        {
            return;
        }

        if self.inner.has_live_channel() {
            trace!("Channel live, ignoring forced reconnect");
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.backoff.force_now(move || inner.connect());
    }

    /// Stops reconnecting and closes the socket.
    ///
    /// Pending requests fail with [`Error::Disconnected`](crate::Error::Disconnected).
    /// A disposed gateway cannot be reopened.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.backoff.cancel();

        if let Some(channel) = self.inner.channel.lock().as_ref() {
            channel.shutdown();
        }

        debug!("Gateway disposed");
    }

    /// Returns the state of the current channel.
    ///
    /// [`ConnectionState::Closed`] before the first `open`.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner
            .channel
            .lock()
            .as_ref()
            .map_or(ConnectionState::Closed, Channel::state)
    }

    /// Returns `true` once the handshake has been accepted on the current socket.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns `true` after [`Gateway::dispose`].
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the delay the next scheduled reconnect will wait.
    #[inline]
    #[must_use]
    pub fn next_reconnect_delay(&self) -> Duration {
        self.inner.backoff.current_delay()
    }

    /// Returns `true` while a reconnect timer is pending.
    #[inline]
    #[must_use]
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.backoff.is_scheduled()
    }
}

// ============================================================================
// GatewayInner
// ============================================================================

impl GatewayInner {
    /// Opens a new channel unless one is already live.
    fn connect(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let mut slot = self.channel.lock();

        if slot.as_ref().is_some_and(Channel::is_live) {
            trace!("Channel already live, skipping connect");
            return;
        }

        let observer: Weak<dyn ChannelObserver> = self.self_ref.clone();
        *slot = Some(Channel::open(
            Arc::clone(&self.config),
            Arc::clone(&self.pending),
            observer,
        ));
    }

    fn has_live_channel(&self) -> bool {
        self.channel.lock().as_ref().is_some_and(Channel::is_live)
    }

    fn schedule_reconnect(&self) {
        let weak = self.self_ref.clone();

        self.backoff.schedule_next(move || {
            if let Some(inner) = weak.upgrade() {
                inner.connect();
            }
        });

        // `dispose` may have cancelled the backoff before the timer existed.
        if self.disposed.load(Ordering::SeqCst) {
            self.backoff.cancel();
        }
    }
}

impl ChannelObserver for GatewayInner {
    fn on_frame(&self, frame: Frame) {
        let handler = self.handlers.read().frame.clone();
        if let Some(handler) = handler {
            handler(frame);
        }
    }

    fn on_connected(&self, hello: HelloOk) {
        self.backoff.reset();

        let handler = self.handlers.read().connected.clone();
        if let Some(handler) = handler {
            handler(hello);
        }
    }

    fn on_handshake_failed(&self, response: ResponseFrame) {
        let handler = self.handlers.read().handshake_failed.clone();
        if let Some(handler) = handler {
            handler(response);
        }
    }

    fn on_closed(&self, was_open: bool) {
        let handler = self.handlers.read().disconnected.clone();
        if let Some(handler) = handler {
            handler(was_open);
        }

        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        self.schedule_reconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
