//! Variable store.
//!
//! The authoritative local mapping of variable name → current value.
//! Last writer wins: the store always reflects the most recently applied
//! packet for each name, whether it came from the server or a local
//! `set`. There is no version tracking and no conflict detection: the
//! server is authoritative and this store mirrors it.
//!
//! Variables are never deleted; the protocol has no delete packet.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

// ============================================================================
// VariableStore
// ============================================================================

/// Name → value map with last-writer-wins semantics.
///
/// Owned by the session; the application reads through
/// [`CloudSession::get`](crate::CloudSession::get) and snapshots, never
/// through direct map access, since a direct write would bypass packet
/// serialization and silently never reach the server.
#[derive(Debug, Default)]
pub struct VariableStore {
    /// Current value per variable name.
    variables: FxHashMap<String, String>,
}

impl VariableStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a `set`, creating the variable on first sight.
    ///
    /// Returns `true` if the name was new to the store.
    pub fn apply(&mut self, name: &str, value: &str) -> bool {
        self.variables
            .insert(name.to_string(), value.to_string())
            .is_none()
    }

    /// Returns the last known value for `name`, if ever observed.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Returns an owned snapshot of the current variable state.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, String> {
        self.variables.clone()
    }

    /// Number of known variables.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns `true` if no variable has been observed yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
