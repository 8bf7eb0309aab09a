//! Test-pattern producer: the other end of the dataport.
//!
//! Writes the incrementing sequence the [`Tester`](crate::Tester) expects,
//! optionally corrupting every n-th byte, into anything that implements
//! [`BytePort`].

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ipc::dataport::DataportWriter;
use crate::ipc::shmem::ShmMode;
use crate::sync::dataport::Writer;
use crate::trace::{debug, warn};

/// Write side of a dataport as seen by a producer.
pub trait BytePort {
    /// Appends as much of `bytes` as fits, returning the count stored.
    fn push(&self, bytes: &[u8]) -> usize;
    /// Space left before the next push overflows.
    fn free(&self) -> usize;
    fn is_overflowed(&self) -> bool;
}

impl<const N: usize> BytePort for Writer<N> {
    fn push(&self, bytes: &[u8]) -> usize {
        Writer::push(self, bytes)
    }

    fn free(&self) -> usize {
        Writer::free(self)
    }

    fn is_overflowed(&self) -> bool {
        Writer::is_overflowed(self)
    }
}

impl<const N: usize, M: ShmMode> BytePort for DataportWriter<N, M> {
    fn push(&self, bytes: &[u8]) -> usize {
        DataportWriter::push(self, bytes)
    }

    fn free(&self) -> usize {
        DataportWriter::free(self)
    }

    fn is_overflowed(&self) -> bool {
        DataportWriter::is_overflowed(self)
    }
}

/// Producer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// Largest single push.
    pub chunk: usize,
    /// Replace every n-th byte with a wrong value.
    pub corrupt_every: Option<NonZeroU64>,
    /// Only push what currently fits. Unpaced feeding behaves like a real
    /// UART and overflows the port when the consumer falls behind.
    pub paced: bool,
    /// Stop after this many bytes.
    pub total: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            chunk: 64,
            corrupt_every: None,
            paced: true,
            total: None,
        }
    }
}

/// How a feed ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Everything requested was accepted.
    Completed { bytes: u64 },
    /// Stopped from outside.
    Stopped { bytes: u64 },
    /// The port latched its overflow flag; `bytes` were accepted before that.
    Overflowed { bytes: u64 },
}

/// Generates the expected stream, offset by offset.
#[derive(Debug, Clone)]
pub struct SequenceFeeder {
    config: FeedConfig,
    offset: u64,
}

impl SequenceFeeder {
    #[must_use]
    pub fn new(config: FeedConfig) -> Self {
        Self { config, offset: 0 }
    }

    /// Stream position of the next generated byte.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Fills `buf` with the next bytes of the stream.
    ///
    /// A corrupted byte has its top bit flipped, so under resync it produces
    /// two mismatches: the bad byte and the good one after it.
    pub fn fill(&mut self, buf: &mut [u8]) {
        for slot in buf {
            let byte = self.offset as u8;
            self.offset += 1;
            *slot = match self.config.corrupt_every {
                Some(n) if self.offset % n.get() == 0 => byte ^ 0x80,
                _ => byte,
            };
        }
    }

    /// Pushes the stream into `port` until done, stopped or overflowed.
    pub fn feed<P: BytePort + ?Sized>(&mut self, port: &P, stop: &AtomicBool) -> FeedOutcome {
        let mut buf = vec![0u8; self.config.chunk.max(1)];
        let mut accepted = 0u64;

        loop {
            if stop.load(Ordering::Relaxed) {
                debug!(bytes = accepted, "feeder stopped");
                return FeedOutcome::Stopped { bytes: accepted };
            }

            let remaining = self
                .config
                .total
                .map_or(u64::MAX, |total| total.saturating_sub(self.offset));
            if remaining == 0 {
                debug!(bytes = accepted, "feeder completed");
                return FeedOutcome::Completed { bytes: accepted };
            }

            let mut want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            if self.config.paced {
                want = want.min(port.free());
                if want == 0 {
                    std::thread::yield_now();
                    continue;
                }
            }

            self.fill(&mut buf[..want]);
            let pushed = port.push(&buf[..want]);
            accepted += pushed as u64;

            if pushed < want || port.is_overflowed() {
                warn!(bytes = accepted, lost = want - pushed, "dataport overflowed");
                return FeedOutcome::Overflowed { bytes: accepted };
            }
        }
    }
}
