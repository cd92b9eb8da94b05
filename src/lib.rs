//! Cloud variable synchronization client.
//!
//! This library keeps a live, self-healing connection to a creative-coding
//! platform's cloud variable server and mirrors the project's variable
//! state locally.
//!
//! # Architecture
//!
//! The protocol is newline-delimited JSON over a WebSocket:
//!
//! - **Outbound**: local `set` calls apply write-through to the store,
//!   then serialize into `set` packets, sent immediately or queued
//!   while the transport is down.
//! - **Inbound**: transport chunks are reassembled on `\n` boundaries,
//!   decoded, and applied to the store; change listeners fire per
//!   applied set.
//! - **Lifecycle**: the server drops idle connections periodically; the
//!   session reconnects on its own, re-sends the handshake and flushes
//!   its backlog. Only [`CloudSession::end`] stops it.
//!
//! The server is authoritative: the store mirrors whatever it last
//! reported, last writer wins, no conflict detection.
//!
//! # Quick Start
//!
//! ```no_run
//! use cloudvars::{CloudSession, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = CloudSession::builder()
//!         .server_url("wss://clouddata.example.org")
//!         .username("griffpatch")
//!         .credential("sessionid=abc123;")
//!         .project_id(104)
//!         .connect()
//!         .await?;
//!
//!     session.on_set(|name, value| println!("{name} = {value}"));
//!     session.set("score", "42")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------------|---------------------------------------------------|
//! | [`session`] | [`CloudSession`], config, store, outgoing queue |
//! | [`protocol`] | Packet codec and line framing (internal) |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! # Guarantees
//!
//! - **Write-through**: `set` then `get` reflects the new value with no
//!   round trip.
//! - **At-most-once**: packets in flight when a transport dies are lost;
//!   queued packets survive into the next connection's flush.
//! - **Non-fatal decode**: a malformed inbound line is dropped; the
//!   session and all other variables are unaffected.

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Cloud variable wire protocol.
///
/// Packet envelope encode/decode and newline-delimited reassembly.
pub mod protocol;

/// Cloud session: state, buffering and the connection state machine.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    CloudSession, Identity, ReconnectPolicy, SessionBuilder, SessionConfig, SetListener,
};

// Error types
pub use error::{Error, Result};
