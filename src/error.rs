//! Error types for the gateway channel.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use gateway_channel::{Gateway, Result};
//!
//! async fn example(gateway: &Gateway) -> Result<()> {
//!     let sessions = gateway.request("sessions.list", serde_json::json!({})).await?;
//!     println!("{sessions}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Channel | [`Error::NotConnected`], [`Error::Disconnected`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`] |
//! | Protocol | [`Error::HandshakeRejected`], [`Error::MalformedFrame`], [`Error::Protocol`], [`Error::Rpc`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`GatewayBuilder::build`](crate::GatewayBuilder::build)
    /// when the configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// A request was issued while no socket was ready.
    ///
    /// Reported synchronously by `send`; nothing is queued.
    #[error("Not connected")]
    NotConnected,

    /// The socket closed while the request was outstanding.
    #[error("Disconnected")]
    Disconnected,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out while connecting or handshaking.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The gateway declined the handshake.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected {
        /// Reason reported by the gateway, or a description of the bad payload.
        message: String,
    },

    /// Inbound data that is not a valid frame.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// What was wrong with the frame.
        message: String,
    },

    /// Protocol violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The gateway answered a request with `ok: false`.
    #[error("RPC error: {message}")]
    Rpc {
        /// Error code, when the gateway supplied one.
        code: Option<String>,
        /// Error message from the gateway.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Gateway URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an RPC error.
    #[inline]
    pub fn rpc(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Disconnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if reissuing the request after a reconnect may succeed.
    ///
    /// The channel never retries on its own; callers decide.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Disconnected | Self::ConnectionTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
