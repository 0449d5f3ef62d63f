//! Bounded output history for session replay.
//!
//! Keeps the most recent PTY output chunks so that a newly attaching client
//! can be sent everything it missed, without the daemon holding unbounded
//! history. Two limits apply at once: a maximum number of chunks and a
//! maximum total byte count. Whichever is exceeded first triggers eviction of
//! the oldest chunks, but the newest chunk is always retained, even when it
//! alone is larger than both limits.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default maximum number of chunks retained per session.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default maximum number of bytes retained per session (1 MiB).
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Eviction limits for a [`RingBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferLimits {
    /// Maximum number of chunks to keep
    pub max_items: usize,
    /// Maximum total bytes to keep
    pub max_bytes: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Snapshot of buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferStats {
    pub items: usize,
    pub bytes: usize,
}

/// FIFO of output chunks with dual (count, bytes) eviction.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    items: VecDeque<String>,
    limits: BufferLimits,
    total_bytes: usize,
}

impl RingBuffer {
    /// Creates an empty buffer with the given limits.
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self::with_limits(BufferLimits {
            max_items,
            max_bytes,
        })
    }

    /// Creates an empty buffer from a [`BufferLimits`] value.
    pub fn with_limits(limits: BufferLimits) -> Self {
        Self {
            items: VecDeque::new(),
            limits,
            total_bytes: 0,
        }
    }

    /// Appends a chunk, then evicts from the front until both limits hold
    /// or only one chunk is left.
    pub fn push(&mut self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        self.total_bytes = self.total_bytes.saturating_add(chunk.len());
        self.items.push_back(chunk);

        while self.items.len() > 1
            && (self.items.len() > self.limits.max_items
                || self.total_bytes > self.limits.max_bytes)
        {
            match self.items.pop_front() {
                Some(evicted) => {
                    self.total_bytes = self.total_bytes.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }

    /// Returns the concatenation of all retained chunks, oldest first.
    pub fn contents(&self) -> String {
        let mut out = String::with_capacity(self.total_bytes);
        for item in &self.items {
            out.push_str(item);
        }
        out
    }

    /// Returns the current item and byte counts.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            items: self.items.len(),
            bytes: self.total_bytes,
        }
    }

    /// Drops all retained chunks.
    pub fn clear(&mut self) {
        self.items.clear();
        self.total_bytes = 0;
    }

    /// Number of retained chunks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no chunk is retained.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The limits this buffer enforces.
    pub fn limits(&self) -> BufferLimits {
        self.limits
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::with_limits(BufferLimits::default())
    }
}
