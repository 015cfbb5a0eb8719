//! Gateway Channel - self-healing JSON request/response over WebSocket.
//!
//! This library keeps a persistent WebSocket connection to a gateway server,
//! performs the `connect` handshake on every socket, correlates requests with
//! responses, delivers server-pushed frames, and reconnects with exponential
//! backoff when the socket drops.
//!
//! # Architecture
//!
//! - **Gateway**: caller-facing handle; owns handlers, backoff, pending table
//! - **Channel**: one socket attempt, from connect to close
//! - **Frame codec**: `req` / `res` / `event` JSON text frames
//!
//! Key invariants:
//!
//! - Every request resolves exactly once: with its response, or with
//!   [`Error::Disconnected`] when the socket closes first
//! - `send` never queues: with no ready socket it fails with
//!   [`Error::NotConnected`]
//! - At most one socket is live at a time
//!
//! # Quick Start
//!
//! ```no_run
//! use gateway_channel::{Gateway, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let gateway = Gateway::builder()
//!         .url("ws://127.0.0.1:18789/ws")
//!         .build()?;
//!
//!     gateway.on_connected(|hello| println!("hello-ok, protocol {:?}", hello.protocol));
//!     gateway.on_frame(|frame| println!("pushed {}", frame.kind()));
//!     gateway.open();
//!
//!     let health = gateway.request("health", json!({})).await?;
//!     println!("{health}");
//!
//!     gateway.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Gateway`], [`GatewayBuilder`], [`ClientOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request id wrapper |
//! | [`protocol`] | Frame types, codec and handshake messages |
//! | [`transport`] | Channel, pending table and backoff (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Caller-facing gateway API.
///
/// Use [`Gateway::builder()`] to create a configured gateway.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Gateway wire protocol.
///
/// Frame envelope, codec and handshake messages.
pub mod protocol;

/// WebSocket transport layer.
///
/// Channel event loop, pending request table and reconnect backoff.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientOptions, Gateway, GatewayBuilder, GatewayConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::RequestId;

// Protocol types
pub use protocol::{
    ErrorShape, EventFrame, Frame, HelloOk, PROTOCOL_VERSION, RequestFrame, ResponseFrame,
};

// Transport types
pub use transport::{BackoffConfig, ConnectionState, PendingResponse};
