//! Capabilities the control loop consumes from its environment.
//!
//! The harness never touches the upstream producer directly. It sees a narrow
//! FIFO view ([`FifoSource`]) and a payload-free wakeup ([`EventWait`]), which
//! keeps the loop testable without a real device. Concrete implementations live
//! in [`crate::sync::dataport`] (in-process) and [`crate::ipc::dataport`]
//! (shared memory).

/// Read side of the upstream FIFO that the producer fills.
pub trait FifoSource {
    /// Returns the longest linear run of unread bytes, empty if none.
    ///
    /// The run may be shorter than [`size`](Self::size) when the producer's
    /// data wraps around its own buffer.
    fn contiguous(&self) -> &[u8];

    /// Releases the first `n` bytes of the current run back to the producer.
    fn remove(&mut self, n: usize);

    /// Number of unread bytes. Diagnostic only.
    fn size(&self) -> usize;

    /// Size of the producer's buffer. Diagnostic only.
    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Raw overflow byte at its fixed offset in the FIFO region.
    ///
    /// `0` means normal operation; anything else means the producer overran
    /// its buffer and accepts no further data until externally reset.
    fn overflow_byte(&self) -> u8;
}

/// Blocking wait for an unspecified "something changed" notification.
///
/// Implementations may return without anything having changed. Callers must
/// re-evaluate their state after every return.
pub trait EventWait {
    fn wait(&mut self);
}

impl<F: FifoSource + ?Sized> FifoSource for &mut F {
    fn contiguous(&self) -> &[u8] {
        (**self).contiguous()
    }

    fn remove(&mut self, n: usize) {
        (**self).remove(n);
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn overflow_byte(&self) -> u8 {
        (**self).overflow_byte()
    }
}

impl<W: EventWait + ?Sized> EventWait for &mut W {
    fn wait(&mut self) {
        (**self).wait();
    }
}

/// Waits by yielding the thread once. Every wake is spurious.
///
/// Useful when the producer runs on another thread and no event counter is
/// available.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldWait;

impl EventWait for YieldWait {
    fn wait(&mut self) {
        std::thread::yield_now();
    }
}
