//! Gateway wire protocol.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `RequestFrame` | Client → Gateway | RPC call |
//! | `ResponseFrame` | Gateway → Client | RPC result |
//! | `EventFrame` | Gateway → Client | Server push |
//!
//! The first request on every socket is the `connect` handshake.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame envelope and codec |
//! | `handshake` | `connect` parameters and `hello-ok` payload |

// ============================================================================
// Submodules
// ============================================================================

/// Frame envelope and codec.
pub mod frame;

/// Connect handshake messages.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame};
pub use handshake::{
    CONNECT_METHOD, ClientInfo, ConnectParams, Features, HELLO_OK, HelloOk, PROTOCOL_VERSION,
    Policy, ServerInfo,
};
