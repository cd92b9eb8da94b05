//! Error types for the cloud variable client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cloudvars::{Result, CloudSession};
//!
//! fn example(session: &CloudSession) -> Result<()> {
//!     session.set("score", "42")?;
//!     let value = session.get("score")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::AlreadyClosed`] |
//! | Protocol | [`Error::MalformedPacket`], [`Error::UnknownMethod`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! # Propagation Policy
//!
//! Network failures are recovered internally by reconnecting and are
//! never surfaced mid-session. Malformed or unrecognized packets are
//! logged and dropped. Only caller misuse ([`Error::AlreadyClosed`]) and
//! construction-time problems ([`Error::Config`]) reach the application.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    ///
    /// Returned when the WebSocket connection cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport connection closed unexpectedly.
    ///
    /// Used internally when the event loop goes away mid-operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation attempted after explicit [`end()`](crate::CloudSession::end).
    ///
    /// Once ended, a session never reconnects and rejects all further
    /// `set`/`get` calls with this error.
    #[error("Session already closed")]
    AlreadyClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// A line failed JSON decoding.
    ///
    /// Never fatal to the session: the line is logged and dropped.
    #[error("Malformed packet: {line}")]
    MalformedPacket {
        /// The offending line (truncated for logging).
        line: String,
    },

    /// A structurally valid packet with an unrecognized `method`.
    ///
    /// Logged and ignored for forward compatibility.
    #[error("Unknown packet method: {method}")]
    UnknownMethod {
        /// The unrecognized method name.
        method: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
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

    /// Creates a malformed packet error, truncating long lines.
    pub fn malformed_packet(line: &str) -> Self {
        const MAX_LOGGED: usize = 128;

        let line = if line.len() > MAX_LOGGED {
            let mut end = MAX_LOGGED;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &line[..end])
        } else {
            line.to_string()
        };

        Self::MalformedPacket { line }
    }

    /// Creates an unknown method error.
    #[inline]
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are absorbed by the session's reconnect loop;
    /// they never terminate a session that has not been ended.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::MalformedPacket { .. }
                | Self::UnknownMethod { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
