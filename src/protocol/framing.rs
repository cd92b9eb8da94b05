//! Newline-delimited stream reassembly.
//!
//! Transport messages carry zero or more `\n`-terminated packet lines
//! and possibly a trailing partial line. [`LineReassembler`] accumulates
//! chunks and yields only complete lines; the trailing fragment is
//! carried over to the next chunk.
//!
//! A partial line is never handed to the decoder. The reassembler is
//! reset per connection, so a fragment from a dead transport can never
//! prefix data from its replacement.

// ============================================================================
// LineReassembler
// ============================================================================

/// Accumulates raw inbound text and splits it on `\n` boundaries.
///
/// Retained state is bounded by the longest distance between two
/// delimiters the server produces: everything before a `\n` is yielded
/// and dropped immediately.
#[derive(Debug, Default)]
pub struct LineReassembler {
    /// Trailing fragment from the previous chunk, not yet terminated.
    buffer: String,
}

impl LineReassembler {
    /// Creates an empty reassembler.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completes, in order.
    ///
    /// Lines are returned without their terminating `\n`. Data after the
    /// last delimiter stays buffered for the next call.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop(); // strip the delimiter
            lines.push(line);
        }

        lines
    }

    /// Number of buffered bytes awaiting a delimiter.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any buffered fragment.
    ///
    /// Called when the transport is replaced: a half-received line from
    /// the old connection must not leak into the new one.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
