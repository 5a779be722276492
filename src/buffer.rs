//! Growable byte FIFO with prependable headroom and scatter-read overflow.
//!
//! ```text
//! +----------------+-------------+-------------+
//! |Prependable     |Readable     |Writable     |
//! +----------------+-------------+-------------+
//! 0                read_pos      write_pos     capacity
//! ```

use std::os::unix::io::RawFd;

/// Size of the stack-allocated overflow segment used by `read_from_fd`'s
/// scatter read. Large enough that a single `readv` drains a typical
/// request in one syscall even when the buffer itself is still small.
const OVERFLOW_LEN: usize = 65535;

/// A contiguous byte region with independent read/write cursors.
///
/// `[0, read_pos)` is prependable (reclaimable by shifting), `[read_pos,
/// write_pos)` is readable, `[write_pos, capacity)` is writable. Cursors are
/// non-decreasing between calls to [`Buffer::retrieve_all`].
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer { data: vec![0; capacity], read_pos: 0, write_pos: 0 }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// Address of the first readable byte. Valid until the next mutating
    /// call (any `retrieve*`, `append`, `ensure_writable`, or `has_written`).
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Mutable view of the writable region, for callers that write directly
    /// (e.g. `snprintf`-style formatting) before calling `has_written`.
    pub fn writable_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// Ensures `writable_bytes() >= len` by shifting the readable region
    /// down to reclaim prependable space, or reallocating if that isn't
    /// enough.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        self.make_space(len);
        debug_assert!(self.writable_bytes() >= len);
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.data.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Advances `write_pos` by `len`. Precondition: `len <= writable_bytes()`.
    pub fn has_written(&mut self, len: usize) {
        debug_assert!(len <= self.writable_bytes());
        self.write_pos += len;
    }

    /// Advances `read_pos` by `len`. Precondition: `len <= readable_bytes()`.
    pub fn retrieve(&mut self, len: usize) {
        debug_assert!(len <= self.readable_bytes());
        self.read_pos += len;
    }

    /// Retrieves up to (but not including) `end`, an offset into the
    /// readable region measured from `peek()`'s start.
    pub fn retrieve_until(&mut self, end: usize) {
        debug_assert!(end <= self.readable_bytes());
        self.retrieve(end);
    }

    /// Resets both cursors to zero and zeroes the underlying bytes.
    pub fn retrieve_all(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Returns the readable region as an owned `String`, then clears the
    /// buffer exactly as `retrieve_all` does.
    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.has_written(bytes.len());
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Scatter-reads from `fd` into the writable region plus a 65535-byte
    /// stack overflow segment, guaranteeing forward progress on inbound
    /// messages larger than the buffer's current capacity.
    ///
    /// Returns the number of bytes read, or the `io::Error` on failure
    /// (including `WouldBlock`, which the caller treats as "no data yet").
    pub fn read_from_fd(&mut self, fd: RawFd) -> std::io::Result<usize> {
        let writable = self.writable_bytes();
        let mut overflow = [0u8; OVERFLOW_LEN];

        let mut iov = [
            libc::iovec { iov_base: self.data[self.write_pos..].as_mut_ptr() as *mut _, iov_len: writable },
            libc::iovec { iov_base: overflow.as_mut_ptr() as *mut _, iov_len: overflow.len() },
        ];

        // SAFETY: both iovec entries point into live, uniquely-borrowed
        // buffers (`self.data`'s tail and the local `overflow` array) that
        // outlive the syscall.
        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as i32) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&overflow[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `fd` in a single `write(2)`, advancing
    /// `read_pos` by the number of bytes actually written.
    pub fn write_to_fd(&mut self, fd: RawFd) -> std::io::Result<usize> {
        let readable = self.peek();
        // SAFETY: `readable` is a valid slice for the duration of the call.
        let n = unsafe { libc::write(fd, readable.as_ptr() as *const _, readable.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let n = n as usize;
        self.read_pos += n;
        Ok(n)
    }
}
