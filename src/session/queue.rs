//! Outgoing packet queue.
//!
//! Serialized packet lines that cannot be sent because no transport is
//! open wait here. The queue is drained exactly once per
//! connection-open, in FIFO order, immediately after the handshake.
//!
//! No deduplication and no coalescing: repeated sets to the same name
//! flush in enqueue order, last one winning on the server.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

// ============================================================================
// OutgoingQueue
// ============================================================================

/// FIFO buffer of serialized packet lines awaiting a live transport.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    /// Lines in enqueue order.
    lines: VecDeque<String>,
}

impl OutgoingQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a serialized line to the tail.
    #[inline]
    pub fn push(&mut self, line: String) {
        self.lines.push_back(line);
    }

    /// Takes every queued line in FIFO order, leaving the queue empty.
    ///
    /// Called once per connection-open to flush the backlog.
    #[inline]
    pub fn drain(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// Number of queued lines.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
