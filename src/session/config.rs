//! Session configuration and builder.
//!
//! All connection parameters are explicit; there are no module-level
//! server constants. A session is configured with the transport URL, an
//! authenticated identity, the target project, and a reconnect policy.
//!
//! # Example
//!
//! ```no_run
//! use cloudvars::CloudSession;
//!
//! # async fn example() -> cloudvars::Result<()> {
//! let session = CloudSession::builder()
//!     .server_url("wss://clouddata.example.org")
//!     .username("griffpatch")
//!     .credential("sessionid=abc123;")
//!     .project_id(104)
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

use super::core::CloudSession;

// ============================================================================
// Identity
// ============================================================================

/// An authenticated identity for the cloud server.
///
/// Produced by the platform's session-management layer (login is out of
/// scope here). The credential is opaque: it is attached verbatim as the
/// `Cookie` header on the transport handshake.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable user name, sent in every packet envelope.
    pub username: String,
    /// Opaque credential used as the `Cookie` header value.
    pub credential: String,
}

impl Identity {
    /// Creates an identity from a user name and opaque credential.
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: credential.into(),
        }
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Backoff schedule for automatic reconnection.
///
/// The delay starts at `initial_delay`, doubles per consecutive failure
/// up to `max_delay`, and resets after a successful open. Retries are
/// unbounded: a session keeps trying until [`end()`] is called.
///
/// [`end()`]: crate::CloudSession::end
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that reconnects immediately, with no backoff.
    ///
    /// Matches the historical client behavior. Risky against a server
    /// that rejects connections outright: the retry loop spins as fast
    /// as connects fail.
    #[inline]
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Returns the delay before reconnect attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated configuration for a [`CloudSession`].
///
/// Built through [`SessionBuilder`]; all fields are known-good.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the cloud server.
    pub server_url: Url,
    /// Authenticated identity.
    pub identity: Identity,
    /// Target project identifier, normalized to a string.
    pub project_id: String,
    /// Optional per-project cloud credential for the packet envelope.
    pub token: Option<String>,
    /// Reconnect backoff schedule.
    pub reconnect: ReconnectPolicy,
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring and opening a [`CloudSession`].
///
/// Use [`CloudSession::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct SessionBuilder {
    /// WebSocket endpoint.
    server_url: Option<String>,
    /// User name for the envelope.
    username: Option<String>,
    /// Opaque transport credential.
    credential: Option<String>,
    /// Project identifier.
    project_id: Option<String>,
    /// Optional envelope token.
    token: Option<String>,
    /// Reconnect schedule override.
    reconnect: Option<ReconnectPolicy>,
}

impl SessionBuilder {
    /// Creates a new session builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket URL of the cloud server.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint URL (e.g., "wss://clouddata.example.org")
    #[inline]
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the user name the session identifies as.
    #[inline]
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the opaque credential attached as the `Cookie` header.
    #[inline]
    #[must_use]
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Sets the identity in one call.
    #[inline]
    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.username = Some(identity.username);
        self.credential = Some(identity.credential);
        self
    }

    /// Sets the target project.
    ///
    /// Accepts anything displayable; numeric ids are normalized to
    /// strings for the packet envelope.
    #[inline]
    #[must_use]
    pub fn project_id(mut self, id: impl ToString) -> Self {
        self.project_id = Some(id.to_string());
        self
    }

    /// Attaches a per-project cloud credential to every packet envelope.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the default reconnect backoff schedule.
    #[inline]
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Validates the configuration without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any required field is missing or the
    /// server URL is not a `ws`/`wss` endpoint.
    pub fn build(self) -> Result<SessionConfig> {
        let server_url = self.validate_server_url()?;
        let identity = self.validate_identity()?;
        let project_id = self.validate_project_id()?;

        Ok(SessionConfig {
            server_url,
            identity,
            project_id,
            token: self.token,
            reconnect: self.reconnect.unwrap_or_default(),
        })
    }

    /// Validates and opens the session.
    ///
    /// The first connection attempt happens here; once this returns, the
    /// session keeps itself connected until [`CloudSession::end`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Connection`] if the initial connect fails
    pub async fn connect(self) -> Result<CloudSession> {
        let config = self.build()?;
        CloudSession::connect(config).await
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionBuilder {
    /// Validates the server URL.
    fn validate_server_url(&self) -> Result<Url> {
        let raw = self.server_url.as_deref().ok_or_else(|| {
            Error::config(
                "Server URL is required. Use .server_url() to set it.\n\
                 Example: CloudSession::builder().server_url(\"wss://clouddata.example.org\")",
            )
        })?;

        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("Invalid server URL '{raw}': {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Server URL must use ws:// or wss://, got '{other}://'"
            ))),
        }
    }

    /// Validates the identity fields.
    fn validate_identity(&self) -> Result<Identity> {
        let username = self
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                Error::config("User name is required. Use .username() or .identity() to set it.")
            })?;

        let credential = self.credential.as_deref().unwrap_or_default();

        Ok(Identity::new(username, credential))
    }

    /// Validates the project id.
    fn validate_project_id(&self) -> Result<String> {
        self.project_id
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::config("Project id is required. Use .project_id() to set it.")
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
