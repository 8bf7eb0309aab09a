//! Fixed-capacity circular byte buffer with zero-copy reads.
//!
//! [`RingBuffer`] is the internal FIFO of the harness. Bytes drained from the
//! upstream dataport are appended with [`write`](RingBuffer::write) and handed
//! to validation in place through [`contiguous`](RingBuffer::contiguous),
//! followed by a [`flush`](RingBuffer::flush) of the bytes that were examined.
//!
//! # Invariants
//!
//! - `used <= capacity`
//! - `head < capacity` whenever `capacity > 0`
//! - the valid bytes occupy `[head, head + used) mod capacity`
//!
//! # Sequencing
//!
//! `used` is updated with a plain read-modify-write, so the buffer is not a
//! concurrent queue. Every mutating method takes `&mut self`, and the slice
//! returned by `contiguous` borrows the buffer, which makes "no mutation between
//! obtaining the span and flushing it" a compile-time guarantee. A true
//! cross-thread producer/consumer pair needs separate head and tail cursors
//! instead; see [`crate::fifo`].

use std::fmt;

/// Occupancy of a [`RingBuffer`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    /// Index of the oldest unread byte.
    pub head: usize,
    /// Number of valid bytes.
    pub used: usize,
    /// Size of the backing store.
    pub capacity: usize,
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "head={} used={} capacity={}",
            self.head, self.used, self.capacity
        )
    }
}

/// Circular byte buffer over a caller-supplied backing store.
///
/// The store is assigned once at construction and never reallocated. The
/// control loop owns a `RingBuffer<[u8; N]>` by value; tests and embedders may
/// use any `S: AsRef<[u8]> + AsMut<[u8]>`, e.g. a `Vec<u8>` or `&mut [u8]`.
pub struct RingBuffer<S> {
    storage: S,
    head: usize,
    used: usize,
}

impl<const N: usize> RingBuffer<[u8; N]> {
    /// Creates an empty buffer backed by an inline, zero-initialized array.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            storage: [0; N],
            head: 0,
            used: 0,
        }
    }
}

impl<const N: usize> Default for RingBuffer<[u8; N]> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> RingBuffer<S> {
    /// Creates an empty buffer over `storage`. Its length is the capacity.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            head: 0,
            used: 0,
        }
    }

    /// Drops all buffered data. The backing bytes are left as they are.
    pub fn clear(&mut self) {
        self.head = 0;
        self.used = 0;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().len()
    }

    #[inline]
    pub fn used(&self) -> usize {
        debug_assert!(self.used <= self.capacity());
        self.used
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used() == self.capacity()
    }

    /// Index of the oldest unread byte.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    #[must_use]
    pub fn snapshot(&self) -> Occupancy {
        Occupancy {
            head: self.head,
            used: self.used,
            capacity: self.capacity(),
        }
    }

    /// Length of the linear run starting at `pos`, capped at the end of the
    /// backing store.
    #[inline]
    fn capped_len(&self, pos: usize, len: usize) -> usize {
        let capacity = self.capacity();
        debug_assert!(pos < capacity);
        len.min(capacity - pos)
    }

    /// Appends as much of `src` as fits and returns the number of bytes taken.
    ///
    /// Never blocks and never retries: a short count means the buffer filled
    /// up and the caller owns the remainder.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(self.free());
        if len == 0 {
            return 0;
        }

        // len > 0 implies free > 0, so capacity is nonzero here
        let pos = (self.head + self.used) % self.capacity();
        let first = self.capped_len(pos, len);

        let buf = self.storage.as_mut();
        buf[pos..pos + first].copy_from_slice(&src[..first]);
        if len > first {
            debug_assert_eq!(pos + first, buf.len());
            buf[..len - first].copy_from_slice(&src[first..len]);
        }

        self.used += len;
        debug_assert!(self.used <= self.capacity());
        len
    }

    /// Copies up to `dst.len()` bytes out of the buffer, oldest first, and
    /// releases them. Returns the number of bytes copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(self.used);
        if len == 0 {
            return 0;
        }

        let first = self.capped_len(self.head, len);
        let buf = self.storage.as_ref();
        dst[..first].copy_from_slice(&buf[self.head..self.head + first]);
        if len > first {
            dst[first..len].copy_from_slice(&buf[..len - first]);
        }

        self.advance(len)
    }

    /// Releases up to `len` bytes without copying them. Returns the number of
    /// bytes released.
    pub fn discard(&mut self, len: usize) -> usize {
        let len = len.min(self.used);
        if len == 0 {
            return 0;
        }
        self.advance(len)
    }

    /// Marks `len` bytes obtained from [`contiguous`](Self::contiguous) as
    /// consumed. Same as [`discard`](Self::discard).
    #[inline]
    pub fn flush(&mut self, len: usize) -> usize {
        self.discard(len)
    }

    fn advance(&mut self, len: usize) -> usize {
        debug_assert!(len > 0 && len <= self.used);
        self.head = (self.head + len) % self.capacity();
        self.used -= len;
        len
    }

    /// Returns the first linear run of buffered bytes, starting at `head`.
    ///
    /// The run stops at the end of the backing store even if more data wraps
    /// around to index 0; call again after flushing to get the remainder.
    #[must_use]
    pub fn contiguous(&self) -> &[u8] {
        if self.used == 0 {
            return &[];
        }
        let len = self.capped_len(self.head, self.used);
        &self.storage.as_ref()[self.head..self.head + len]
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> fmt::Debug for RingBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("head", &self.head)
            .field("used", &self.used)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all<S: AsRef<[u8]> + AsMut<[u8]>>(rb: &mut RingBuffer<S>) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let span = rb.contiguous();
            if span.is_empty() {
                return out;
            }
            let n = span.len();
            out.extend_from_slice(span);
            rb.flush(n);
        }
    }

    #[test]
    fn test_write_then_read() {
        let mut rb = RingBuffer::<[u8; 8]>::zeroed();

        assert_eq!(rb.write(b"ABCDE"), 5);
        assert_eq!(rb.snapshot(), Occupancy { head: 0, used: 5, capacity: 8 });

        let mut out = [0u8; 3];
        assert_eq!(rb.read(&mut out), 3);
        assert_eq!(&out, b"ABC");
        assert_eq!(rb.head(), 3);
        assert_eq!(rb.used(), 2);
    }

    #[test]
    fn test_partial_write_when_nearly_full() {
        let mut rb = RingBuffer::<[u8; 8]>::zeroed();
        rb.write(b"ABCDE");
        let mut out = [0u8; 3];
        rb.read(&mut out);

        // free is exactly 6
        assert_eq!(rb.write(b"FGHIJK"), 6);
        assert!(rb.is_full());
        assert_eq!(rb.write(b"L"), 0);
        assert_eq!(rb.used(), 8);
    }

    #[test]
    fn test_contiguous_span_stops_at_store_end() {
        let mut rb = RingBuffer::<[u8; 8]>::zeroed();
        rb.write(b"ABCDE");
        let mut out = [0u8; 3];
        rb.read(&mut out);
        rb.write(b"FGHIJK");

        // head=3, used=8: the linear run is indices 3..8, the rest wraps
        let span = rb.contiguous();
        assert_eq!(span, b"DEFGH");
        assert!(rb.head() + span.len() <= rb.capacity());

        // consuming just D and E leaves the run ending at the same boundary
        assert_eq!(rb.flush(2), 2);
        assert_eq!(rb.contiguous(), b"FGH");

        rb.flush(3);
        assert_eq!(rb.head(), 0);
        assert_eq!(rb.contiguous(), b"IJK");
        rb.flush(3);
        assert!(rb.is_empty());
        assert!(rb.contiguous().is_empty());
    }

    #[test]
    fn test_read_across_wrap() {
        let mut rb = RingBuffer::new(vec![0u8; 5]);
        rb.write(&[1, 2, 3, 4]);
        rb.discard(3);
        rb.write(&[5, 6, 7, 8]);

        let mut out = [0u8; 5];
        assert_eq!(rb.read(&mut out), 5);
        assert_eq!(out, [4, 5, 6, 7, 8]);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_zero_length_operations_do_not_mutate() {
        let mut rb = RingBuffer::<[u8; 4]>::zeroed();
        rb.write(&[9, 9, 9]);
        rb.discard(2);
        let before = rb.snapshot();

        assert_eq!(rb.flush(0), 0);
        assert_eq!(rb.read(&mut [0u8; 0]), 0);
        assert_eq!(rb.write(&[]), 0);
        assert_eq!(rb.snapshot(), before);
    }

    #[test]
    fn test_requests_are_capped_by_used() {
        let mut rb = RingBuffer::<[u8; 4]>::zeroed();
        rb.write(&[1, 2]);

        let mut out = [0u8; 10];
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(rb.flush(7), 0);
        assert_eq!(rb.discard(usize::MAX), 0);
    }

    #[test]
    fn test_zero_capacity_never_indexes() {
        let mut rb = RingBuffer::<[u8; 0]>::zeroed();

        assert_eq!(rb.capacity(), 0);
        assert!(rb.is_empty());
        assert!(rb.is_full());
        assert_eq!(rb.write(b"abc"), 0);
        assert_eq!(rb.read(&mut [0u8; 4]), 0);
        assert_eq!(rb.flush(3), 0);
        assert!(rb.contiguous().is_empty());
    }

    #[test]
    fn test_clear_keeps_backing_bytes() {
        let mut backing = [0u8; 4];
        {
            let mut rb = RingBuffer::new(&mut backing[..]);
            rb.write(&[7, 8, 9]);
            rb.discard(1);
            rb.clear();
            assert_eq!(rb.snapshot(), Occupancy { head: 0, used: 0, capacity: 4 });
        }
        assert_eq!(backing, [7, 8, 9, 0]);
    }

    #[test]
    fn test_single_byte_capacity() {
        let mut rb = RingBuffer::<[u8; 1]>::zeroed();
        for value in 0..=255u8 {
            assert_eq!(rb.write(&[value, value]), 1);
            assert_eq!(drain_all(&mut rb), vec![value]);
            assert_eq!(rb.head(), 0);
        }
    }
}
