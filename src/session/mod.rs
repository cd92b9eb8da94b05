//! Cloud session: state, buffering and the connection state machine.
//!
//! # Modules
//!
//! | Module | Description |
//! |----------|------------------------------------------------|
//! | `config` | Identity, reconnect policy, validating builder |
//! | `core` | [`CloudSession`] and its event loop |
//! | `queue` | FIFO buffer for packets awaiting a transport |
//! | `store` | Name → value map, last-writer-wins |

// ============================================================================
// Submodules
// ============================================================================

/// Session configuration and builder.
pub mod config;

/// Cloud session and its event loop.
pub mod core;

/// Outgoing packet queue.
pub mod queue;

/// Variable store.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{Identity, ReconnectPolicy, SessionBuilder, SessionConfig};
pub use core::{CloudSession, SetListener};
pub use queue::OutgoingQueue;
pub use store::VariableStore;
