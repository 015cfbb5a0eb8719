//! Caller-facing gateway API and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`GatewayBuilder`] and validated [`GatewayConfig`] |
//! | `core` | [`Gateway`] handle |
//! | `options` | [`ClientOptions`] handshake identity |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for gateway configuration.
pub mod builder;

/// Gateway handle.
pub mod core;

/// Client identity and handshake options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{GatewayBuilder, GatewayConfig};
pub use core::{
    ConnectedHandler, DisconnectedHandler, FrameHandler, Gateway, HandshakeFailedHandler,
};
pub use options::ClientOptions;
