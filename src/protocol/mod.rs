//! Cloud variable wire protocol.
//!
//! This module defines the newline-delimited JSON packet format spoken
//! between a session and the cloud server.
//!
//! # Protocol Overview
//!
//! One packet per line, lines separated by `\n`:
//!
//! ```text
//! {"user":<string>,"project_id":<string>,"method":<string>, ...method fields}
//! ```
//!
//! | Method | Direction | Fields | Purpose |
//! |-------------|---------------|------------------|------------------------------|
//! | `handshake` | Client → Srv | envelope only | Identify after connect |
//! | `set` | Both | `name`, `value` | Variable update |
//!
//! Unrecognized methods are decoded as [`Inbound::Unknown`] and ignored
//! by the session, so new server packet types never break old clients.
//!
//! # Modules
//!
//! | Module | Description |
//! |-----------|-----------------------------------------------|
//! | `packet` | Envelope encode / tolerant decode |
//! | `framing` | `\n`-delimited stream reassembly |

// ============================================================================
// Submodules
// ============================================================================

/// Packet encoding and decoding.
pub mod packet;

/// Newline-delimited stream reassembly.
pub mod framing;

// ============================================================================
// Re-exports
// ============================================================================

pub use framing::LineReassembler;
pub use packet::{Inbound, PacketCodec, decode};
