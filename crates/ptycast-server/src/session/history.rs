//! Bounded replay history for late-joining observers.
//!
//! Stores sanitized output chunks in arrival order, capped by both a total
//! byte ceiling and a chunk count. Eviction is oldest-first, so what remains
//! is always a suffix of what was appended. The session manager is the sole
//! mutator; everyone else sees copies.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct HistoryBuffer {
    chunks: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    max_chunks: usize,
}

impl HistoryBuffer {
    pub fn new(max_bytes: usize, max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            max_bytes,
            max_chunks,
        }
    }

    /// Append a chunk, then evict from the oldest end until both caps hold
    /// (or the buffer is empty).
    pub fn push(&mut self, chunk: String) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);

        while !self.chunks.is_empty()
            && (self.bytes > self.max_bytes || self.chunks.len() > self.max_chunks)
        {
            if let Some(evicted) = self.chunks.pop_front() {
                self.bytes -= evicted.len();
            }
        }
    }

    /// Copy of the current chunk sequence, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.chunks.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.bytes
    }
}
