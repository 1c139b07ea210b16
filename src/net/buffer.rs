//! Growable byte buffer with read/write cursors and cheap prepend space.
//!
//! Layout:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0        <=     reader_index  <=  writer_index   <=   capacity
//! ```
//!
//! The first [`CHEAP_PREPEND`] bytes are reserved so a length or checksum
//! header can be prepended after the payload is known, without moving it.
//! Integer accessors convert to and from network byte order.

use std::io;
use std::os::fd::RawFd;

pub const CHEAP_PREPEND: usize = 8;
pub const INITIAL_SIZE: usize = 1024;

/// Scratch size for [`Buffer::read_fd`]'s overflow iovec.
const EXTRA_BUF_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct Buffer {
    data: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(initial_size: usize) -> Self {
        Self {
            data: vec![0u8; CHEAP_PREPEND + initial_size],
            reader_index: CHEAP_PREPEND,
            writer_index: CHEAP_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.writer_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader_index
    }

    /// The readable span.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.reader_index..self.writer_index]
    }

    /// First occurrence of `\r\n` in the readable span.
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(2).position(|w| w == b"\r\n")
    }

    /// First occurrence of `\n` in the readable span.
    pub fn find_eol(&self) -> Option<usize> {
        self.peek().iter().position(|&b| b == b'\n')
    }

    /// Consumes `len` readable bytes; consuming everything resets both
    /// cursors to the prepend floor.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_bytes());
        if len < self.readable_bytes() {
            self.reader_index += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_index = CHEAP_PREPEND;
        self.writer_index = CHEAP_PREPEND;
    }

    pub fn retrieve_as_string(&mut self, len: usize) -> String {
        assert!(len <= self.readable_bytes());
        let result = String::from_utf8_lossy(&self.peek()[..len]).into_owned();
        self.retrieve(len);
        result
    }

    pub fn retrieve_all_as_string(&mut self) -> String {
        self.retrieve_as_string(self.readable_bytes())
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable_bytes(data.len());
        self.data[self.writer_index..self.writer_index + data.len()].copy_from_slice(data);
        self.has_written(data.len());
    }

    pub fn ensure_writable_bytes(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    /// Marks `len` bytes of the writable span as filled (used after writing
    /// into [`writable_mut`](Self::writable_mut) directly).
    pub fn has_written(&mut self, len: usize) {
        assert!(len <= self.writable_bytes());
        self.writer_index += len;
    }

    /// Rolls back `len` written-but-unconsumed bytes.
    pub fn unwrite(&mut self, len: usize) {
        assert!(len <= self.readable_bytes());
        self.writer_index -= len;
    }

    /// The writable span, for direct fills followed by
    /// [`has_written`](Self::has_written).
    pub fn writable_mut(&mut self) -> &mut [u8] {
        let start = self.writer_index;
        let end = self.data.len();
        &mut self.data[start..end]
    }

    pub fn append_i8(&mut self, x: i8) {
        self.append(&x.to_be_bytes());
    }

    pub fn append_i16(&mut self, x: i16) {
        self.append(&x.to_be_bytes());
    }

    pub fn append_i32(&mut self, x: i32) {
        self.append(&x.to_be_bytes());
    }

    pub fn append_i64(&mut self, x: i64) {
        self.append(&x.to_be_bytes());
    }

    pub fn peek_i8(&self) -> i8 {
        assert!(self.readable_bytes() >= 1);
        self.peek()[0] as i8
    }

    pub fn peek_i16(&self) -> i16 {
        assert!(self.readable_bytes() >= 2);
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&self.peek()[..2]);
        i16::from_be_bytes(bytes)
    }

    pub fn peek_i32(&self) -> i32 {
        assert!(self.readable_bytes() >= 4);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.peek()[..4]);
        i32::from_be_bytes(bytes)
    }

    pub fn peek_i64(&self) -> i64 {
        assert!(self.readable_bytes() >= 8);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.peek()[..8]);
        i64::from_be_bytes(bytes)
    }

    pub fn read_i8(&mut self) -> i8 {
        let x = self.peek_i8();
        self.retrieve(1);
        x
    }

    pub fn read_i16(&mut self) -> i16 {
        let x = self.peek_i16();
        self.retrieve(2);
        x
    }

    pub fn read_i32(&mut self) -> i32 {
        let x = self.peek_i32();
        self.retrieve(4);
        x
    }

    pub fn read_i64(&mut self) -> i64 {
        let x = self.peek_i64();
        self.retrieve(8);
        x
    }

    /// Copies `data` into the prepend space, in front of the readable span.
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(data.len() <= self.prependable_bytes());
        self.reader_index -= data.len();
        let start = self.reader_index;
        self.data[start..start + data.len()].copy_from_slice(data);
    }

    pub fn prepend_i8(&mut self, x: i8) {
        self.prepend(&x.to_be_bytes());
    }

    pub fn prepend_i16(&mut self, x: i16) {
        self.prepend(&x.to_be_bytes());
    }

    pub fn prepend_i32(&mut self, x: i32) {
        self.prepend(&x.to_be_bytes());
    }

    pub fn prepend_i64(&mut self, x: i64) {
        self.prepend(&x.to_be_bytes());
    }

    /// Discards excess capacity, keeping `reserve` writable bytes.
    pub fn shrink(&mut self, reserve: usize) {
        let mut other = Buffer::with_capacity(self.readable_bytes() + reserve);
        other.append(self.peek());
        *self = other;
    }

    pub fn internal_capacity(&self) -> usize {
        self.data.len()
    }

    /// Grows or compacts. Compaction is chosen when the writable span plus
    /// the slack in front of the readable span already covers the need;
    /// afterwards `reader_index == CHEAP_PREPEND`.
    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + CHEAP_PREPEND {
            self.data.resize(self.writer_index + len, 0);
        } else {
            debug_assert!(CHEAP_PREPEND < self.reader_index);
            let readable = self.readable_bytes();
            self.data
                .copy_within(self.reader_index..self.writer_index, CHEAP_PREPEND);
            self.reader_index = CHEAP_PREPEND;
            self.writer_index = CHEAP_PREPEND + readable;
            debug_assert_eq!(readable, self.readable_bytes());
        }
    }

    /// Drains a readable descriptor with one vectored read: the writable
    /// span first, then a stack scratch region for whatever overflows.
    /// With a 64 KiB scratch this reads at least that much, so one call per
    /// readiness event is usually enough.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra = [0u8; EXTRA_BUF_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.writable_mut().as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extra.as_mut_ptr() as *mut libc::c_void,
                iov_len: extra.len(),
            },
        ];
        // Skip the scratch iovec when the buffer alone can take a full read.
        let iovcnt = if writable < EXTRA_BUF_SIZE { 2 } else { 1 };

        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iovcnt) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let n = n as usize;
        if n <= writable {
            self.writer_index += n;
        } else {
            self.writer_index = self.data.len();
            self.append(&extra[..n - writable]);
        }
        Ok(n)
    }
}
