//! Fixed-capacity append buffers used by the logging pipeline.

use std::fmt;

/// Capacity of the per-statement record buffer.
pub const SMALL_BUFFER: usize = 4 * 1024;

/// Capacity of the buffers exchanged between log producers and the drainer.
pub const LARGE_BUFFER: usize = 4 * 1024 * 1024;

/// A heap-allocated byte region with an append cursor.
///
/// `append` is all-or-nothing: a line either fits entirely or is refused,
/// so a buffer never holds a torn record. Formatting through [`fmt::Write`]
/// instead truncates, which is the right behavior for a single oversized
/// log statement.
pub struct FixedBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl FixedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Copies `bytes` in if the remaining space holds all of them.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.available() > bytes.len() {
            self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            true
        } else {
            false
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes still writable.
    pub fn available(&self) -> usize {
        self.data.len() - self.len
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Shortens the buffer; no-op if `len` is not smaller.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }
}

impl fmt::Write for FixedBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let take = s.len().min(self.available());
        self.data[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}
