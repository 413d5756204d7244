//! Stream framing on the `<EOC>` end-of-message marker
//!
//! TCP delivers an unstructured byte stream, so a single read can hold part of
//! a message, exactly one message, or several coalesced ones. The decoder
//! keeps whatever follows the last marker and prepends it to the next read.
//! Every marker found produces one message, in arrival order.

use crate::END_OF_COMMAND;

/// Errors raised while accumulating a frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("undelimited message of {len} bytes exceeds the {limit} byte limit")]
    MessageTooLong { len: usize, limit: usize },
}

/// Per-connection accumulation buffer
#[derive(Debug)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
        }
    }

    /// Appends one raw read and returns every message it completed
    ///
    /// Markers are stripped, surrounding ASCII whitespace is trimmed and bytes
    /// are decoded lossily as UTF-8. Empty messages are returned as empty
    /// strings; callers decide what they mean.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, FrameError> {
        // A marker may straddle the previous read, so rescan from just before it
        let resume = self
            .pending
            .len()
            .saturating_sub(END_OF_COMMAND.len() - 1);
        self.pending.extend_from_slice(bytes);

        let marker = END_OF_COMMAND.as_bytes();
        let mut messages = Vec::new();
        let mut start = 0;
        let mut cursor = resume;

        while let Some(offset) = find(&self.pending[cursor..], marker) {
            let end = cursor + offset;
            messages.push(decode(&self.pending[start..end]));
            start = end + marker.len();
            cursor = start;
        }

        self.pending.drain(..start);

        if self.pending.len() > self.max_len {
            let len = self.pending.len();
            self.pending.clear();
            return Err(FrameError::MessageTooLong {
                len,
                limit: self.max_len,
            });
        }

        Ok(messages)
    }

    /// Bytes received after the last marker
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
