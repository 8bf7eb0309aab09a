//! Heap-backed dataport for feeding the harness from another thread.
//!
//! ```
//! use uartcheck::source::FifoSource;
//! use uartcheck::sync::dataport;
//!
//! let (writer, mut reader) = dataport::channel::<64>();
//! writer.push(&[0, 1, 2]);
//! assert_eq!(reader.contiguous(), &[0, 1, 2]);
//! reader.remove(3);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::fifo::ring::{ByteFifo, CapacityCheck};
use crate::fifo::EventWaiter;
use crate::source::FifoSource;

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Creates a dataport of `N` bytes and returns its two ends.
///
/// Fails to compile unless `N` is a nonzero power of two.
pub fn channel<const N: usize>() -> (Writer<N>, Reader<N>) {
    let () = CapacityCheck::<N>::OK;
    let fifo = Arc::new(ByteFifo::<N>::new());
    (
        Writer {
            fifo: Arc::clone(&fifo),
            _unsync: PhantomData,
        },
        Reader {
            fifo,
            _unsync: PhantomData,
        },
    )
}

/// Producer end. `Send` but not `Sync`.
pub struct Writer<const N: usize> {
    fifo: Arc<ByteFifo<N>>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> Writer<N> {
    /// Appends as much of `bytes` as fits; see [`ByteFifo::push`].
    pub fn push(&self, bytes: &[u8]) -> usize {
        // SAFETY: Writer is !Sync and not Clone, so it is the only producer
        unsafe { self.fifo.push(bytes) }
    }

    /// Clears a latched overflow.
    pub fn reset_overflow(&self) {
        self.fifo.reset_overflow();
    }

    pub fn is_overflowed(&self) -> bool {
        self.fifo.overflow_byte() != 0
    }

    /// Bytes the next push can take without overflowing.
    pub fn free(&self) -> usize {
        N - self.fifo.len()
    }
}

/// Consumer end. `Send` but not `Sync`.
pub struct Reader<const N: usize> {
    fifo: Arc<ByteFifo<N>>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> Reader<N> {
    /// Wakeup tied to this dataport's change counter.
    pub fn waiter(&self) -> EventWaiter<Arc<ByteFifo<N>>> {
        EventWaiter::new(Arc::clone(&self.fifo))
    }
}

impl<const N: usize> FifoSource for Reader<N> {
    fn contiguous(&self) -> &[u8] {
        // SAFETY: Reader is the only consumer, and `remove` needs &mut self
        // so the returned slice is gone before the tail moves.
        unsafe { self.fifo.contiguous() }
    }

    fn remove(&mut self, n: usize) {
        // SAFETY: single consumer
        unsafe { self.fifo.remove(n) };
    }

    fn size(&self) -> usize {
        self.fifo.len()
    }

    fn capacity(&self) -> usize {
        N
    }

    fn overflow_byte(&self) -> u8 {
        self.fifo.overflow_byte()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EventWait;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_writer_fills_reader_drains() {
        let (writer, mut reader) = channel::<8>();
        assert_eq!(writer.free(), 8);
        assert_eq!(writer.push(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(reader.size(), 5);
        assert_eq!(reader.capacity(), 8);

        let run = reader.contiguous().len();
        reader.remove(run);
        assert!(reader.is_empty());
        assert_eq!(writer.free(), 8);
    }

    #[test]
    fn test_short_push_latches_overflow() {
        let (writer, reader) = channel::<8>();
        assert_eq!(writer.push(&[0; 10]), 8);
        assert!(writer.is_overflowed());
        assert_eq!(reader.overflow_byte(), 1);
        assert_eq!(writer.push(&[0]), 0);

        writer.reset_overflow();
        assert!(!writer.is_overflowed());
    }

    #[test]
    fn test_waiter_sees_other_thread() {
        let (writer, mut reader) = channel::<64>();
        let mut waiter = reader.waiter().with_park_timeout(Duration::from_secs(5));

        let handle = thread::spawn(move || {
            for chunk in [[0u8, 1], [2, 3], [4, 5]] {
                while writer.free() < chunk.len() {
                    thread::yield_now();
                }
                writer.push(&chunk);
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 6 {
            let run = reader.contiguous();
            if run.is_empty() {
                waiter.wait();
                continue;
            }
            seen.extend_from_slice(run);
            let n = run.len();
            reader.remove(n);
        }
        handle.join().unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
