//! Packet encoding and decoding.
//!
//! Every packet is a single compact JSON object carrying the fixed
//! envelope (`user`, `project_id`, `method`) plus method-specific
//! fields, framed by a trailing `\n`.
//!
//! # Format
//!
//! ```json
//! {"user":"griffpatch","project_id":"12345678","method":"set","name":"score","value":"42"}
//! ```
//!
//! Outbound lines always end with `\n` and never contain an interior
//! newline: JSON string escaping turns any `\n` inside a value into
//! `\\n`, so the frame delimiter is unambiguous.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Wire Structs
// ============================================================================

/// Outbound packet layout.
///
/// Field order matches the envelope-first layout the server expects.
/// `token`, `name` and `value` are omitted when absent rather than
/// serialized as null.
#[derive(Debug, Serialize)]
struct OutboundPacket<'a> {
    /// Opaque cloud credential, when the project requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,

    /// User name the session authenticated as.
    user: &'a str,

    /// Project identifier, normalized to a string.
    project_id: &'a str,

    /// Packet method (`handshake` or `set`).
    method: &'a str,

    /// Variable name (only for `set`).
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,

    /// Variable value (only for `set`).
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

// ============================================================================
// Inbound
// ============================================================================

/// A decoded inbound packet.
///
/// Unrecognized methods decode to [`Inbound::Unknown`] instead of
/// failing, so future server packet types never kill the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A variable update: apply `value` under `name`.
    Set {
        /// Variable name.
        name: String,
        /// New value.
        value: String,
    },

    /// Handshake echo. Carries no payload beyond the envelope.
    Handshake,

    /// Structurally valid packet with an unrecognized method.
    Unknown {
        /// The method the server sent.
        method: String,
    },
}

/// Decodes one line into an [`Inbound`] packet.
///
/// The `value` field of a `set` is normalized to a string: the protocol
/// only transports string scalars, but some server builds emit bare
/// numbers for numeric-looking values.
///
/// # Errors
///
/// Returns [`Error::MalformedPacket`] if the line is not valid JSON, has
/// no string `method`, or is a `set` missing `name`/`value`.
pub fn decode(line: &str) -> Result<Inbound> {
    let packet: Value =
        serde_json::from_str(line).map_err(|_| Error::malformed_packet(line))?;

    let method = packet
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed_packet(line))?;

    match method {
        "set" => {
            let name = packet
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::malformed_packet(line))?;

            let value = match packet.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(Error::malformed_packet(line)),
            };

            Ok(Inbound::Set {
                name: name.to_string(),
                value,
            })
        }
        "handshake" => Ok(Inbound::Handshake),
        other => Ok(Inbound::Unknown {
            method: other.to_string(),
        }),
    }
}

// ============================================================================
// PacketCodec
// ============================================================================

/// Encoder holding the session envelope.
///
/// Built once per session; every outbound line merges this envelope with
/// the method-specific fields.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    /// User name for the envelope.
    user: String,
    /// Project identifier for the envelope.
    project_id: String,
    /// Optional cloud credential attached to every packet.
    token: Option<String>,
}

impl PacketCodec {
    /// Creates a codec for the given identity and project.
    #[inline]
    #[must_use]
    pub fn new(user: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            project_id: project_id.into(),
            token: None,
        }
    }

    /// Attaches an opaque cloud credential to every outbound packet.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Encodes a `handshake` packet (envelope only).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn handshake_line(&self) -> Result<String> {
        self.encode("handshake", None, None)
    }

    /// Encodes a `set` packet for `name` = `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn set_line(&self, name: &str, value: &str) -> Result<String> {
        self.encode("set", Some(name), Some(value))
    }

    /// Serializes one packet to a `\n`-terminated line.
    fn encode(&self, method: &str, name: Option<&str>, value: Option<&str>) -> Result<String> {
        let packet = OutboundPacket {
            token: self.token.as_deref(),
            user: &self.user,
            project_id: &self.project_id,
            method,
            name,
            value,
        };

        let mut line = serde_json::to_string(&packet)?;
        debug_assert!(!line.contains('\n'), "JSON escaping must prevent interior newlines");
        line.push('\n');

        Ok(line)
    }
}

// ============================================================================
// Tests
// ============================================================================
