//! WebSocket transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐                    ┌─────────────┐
//! │ Gateway                      │                    │             │
//! │  ├─ PendingTable (shared)    │     WebSocket      │   Gateway   │
//! │  ├─ Backoff (shared)         │◄──────────────────►│   server    │
//! │  └─ Channel (one per socket) │   JSON text frames │             │
//! └──────────────────────────────┘                    └─────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Channel::open` - connect, then send the `connect` handshake
//! 2. `hello-ok` - channel is `Open`, backoff resets
//! 3. `Channel::send` - requests correlate through the `PendingTable`
//! 4. Socket closes - pending requests fail, `Backoff` schedules a new `Channel`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Reconnect delay and timer |
//! | `connection` | Channel and event loop |
//! | `pending` | Pending request table |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff.
pub mod backoff;

/// WebSocket channel and event loop.
pub mod connection;

/// Pending request table.
pub mod pending;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, BackoffConfig, BackoffState};
pub use connection::{
    Channel, ChannelConfig, ChannelObserver, ConnectionState, DEFAULT_CONNECT_TIMEOUT,
    PendingResponse,
};
pub use pending::PendingTable;
