//! Builder pattern for gateway configuration.
//!
//! Provides a fluent API for configuring and creating [`Gateway`] instances.
//!
//! # Example
//!
//! ```no_run
//! use gateway_channel::{BackoffConfig, Gateway};
//!
//! # fn example() -> gateway_channel::Result<()> {
//! let gateway = Gateway::builder()
//!     .url("ws://127.0.0.1:18789/ws")
//!     .backoff(BackoffConfig::from_millis(1000, 1.5, 5000))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::handshake::HANDSHAKE_TIMEOUT_MS;
use crate::transport::{BackoffConfig, ChannelConfig, DEFAULT_CONNECT_TIMEOUT};

use super::core::Gateway;
use super::options::ClientOptions;

// ============================================================================
// GatewayConfig
// ============================================================================

/// Validated gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Per-socket settings.
    pub channel: ChannelConfig,
    /// Reconnect delays.
    pub backoff: BackoffConfig,
}

// ============================================================================
// GatewayBuilder
// ============================================================================

/// Builder for configuring a [`Gateway`] instance.
///
/// Use [`Gateway::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct GatewayBuilder {
    /// Gateway WebSocket URL.
    url: Option<String>,
    /// Handshake identity.
    client: ClientOptions,
    /// Reconnect delays.
    backoff: BackoffConfig,
    /// Socket establishment timeout.
    connect_timeout: Duration,
    /// Handshake response timeout.
    handshake_timeout: Duration,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// GatewayBuilder Implementation
// ============================================================================

impl GatewayBuilder {
    /// Creates a new builder with default settings and no URL.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: None,
            client: ClientOptions::new(),
            backoff: BackoffConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        }
    }

    /// Sets the gateway WebSocket URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the identity presented in the handshake.
    #[inline]
    #[must_use]
    pub fn client(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the socket establishment timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long to wait for the handshake response.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Validates the configuration without creating a gateway.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is missing or not `ws`/`wss`, or is
    ///   `wss` without the `rustls` feature
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if client options, backoff or timeouts are invalid
    pub fn into_config(self) -> Result<GatewayConfig> {
        let url = self.validate_url()?;

        self.client
            .validate()
            .map_err(|message| Error::config(format!("invalid client options: {message}")))?;

        self.backoff.validate()?;

        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be positive"));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake timeout must be positive"));
        }

        Ok(GatewayConfig {
            channel: ChannelConfig {
                url,
                connect_params: self.client.to_connect_params(),
                connect_timeout: self.connect_timeout,
                handshake_timeout: self.handshake_timeout,
            },
            backoff: self.backoff,
        })
    }

    /// Builds the gateway with validation.
    ///
    /// Nothing connects until [`Gateway::open`] is called.
    ///
    /// # Errors
    ///
    /// See [`GatewayBuilder::into_config`].
    pub fn build(self) -> Result<Gateway> {
        Ok(Gateway::new(self.into_config()?))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl GatewayBuilder {
    /// Validates the URL configuration.
    fn validate_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "Gateway URL is required. Use .url() to set it.\n\
                 Example: Gateway::builder().url(\"ws://127.0.0.1:18789/ws\")",
            )
        })?;

        let url = Url::parse(raw)?;

        match url.scheme() {
            "ws" => Ok(url),
            "wss" if cfg!(feature = "rustls") => Ok(url),
            "wss" => Err(Error::config(
                "wss:// URLs need TLS support. Enable the `rustls` feature.",
            )),
            other => Err(Error::config(format!(
                "Gateway URL must use ws:// or wss://, got {other}://"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
