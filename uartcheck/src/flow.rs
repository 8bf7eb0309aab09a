//! Flow control between the upstream dataport and the internal buffer.
//!
//! Each loop iteration first drains the upstream FIFO into the
//! [`RingBuffer`], then validates a budgeted number of buffered bytes. The
//! balance matters: draining eagerly keeps the producer from overrunning its
//! small FIFO, while the budget grows once the internal buffer passes its
//! watermark so that processing catches up before it fills.
//!
//! ```text
//!  upstream FIFO ──drain──> RingBuffer ──process(budget)──> SequenceValidator
//!        │                      │
//!   overflow byte        used > watermark → bigger budget
//! ```

use crate::error::{Error, Result};
use crate::ring::RingBuffer;
use crate::sentinel::OverflowSentinel;
use crate::sink::DiagnosticSink;
use crate::source::{EventWait, FifoSource};
use crate::trace::trace;

/// How many buffered bytes one process step may validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// At most this many bytes.
    Bytes(usize),
    /// Everything currently buffered.
    Unlimited,
}

impl Budget {
    #[must_use]
    pub const fn limit(self) -> usize {
        match self {
            Self::Bytes(n) => n,
            Self::Unlimited => usize::MAX,
        }
    }

    /// Raises a zero byte budget to one so every step makes progress.
    #[must_use]
    pub const fn at_least_one(self) -> Self {
        match self {
            Self::Bytes(0) => Self::Bytes(1),
            other => other,
        }
    }

    /// Caps the budget at `n` bytes.
    #[must_use]
    pub fn at_most(self, n: usize) -> Self {
        Self::Bytes(self.limit().min(n))
    }
}

/// Tuning for [`FlowController`].
///
/// A `Bytes(0)` budget is raised to one byte by [`FlowController::new`];
/// otherwise a backlog with an idle upstream would never shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    /// Budget for iterations that found no fresh upstream data.
    pub idle_budget: Budget,
    /// Budget for iterations that drained fresh upstream data.
    pub fresh_budget: Budget,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_budget: Budget::Bytes(8),
            fresh_budget: Budget::Bytes(16),
        }
    }
}

impl FlowConfig {
    /// Configuration that validates everything buffered on every iteration.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            idle_budget: Budget::Unlimited,
            fresh_budget: Budget::Unlimited,
        }
    }
}

/// Occupancy above which processing is boosted: 75% of `capacity`.
#[must_use]
pub const fn watermark(capacity: usize) -> usize {
    capacity / 2 + capacity / 4
}

/// What a drain step achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Upstream had data; `copied` of `available` contiguous bytes were taken.
    Drained { available: usize, copied: usize },
    /// Upstream was empty but the internal buffer still holds unread data.
    Backlog,
}

/// Moves data from the upstream FIFO into the internal buffer.
#[derive(Debug, Clone, Default)]
pub struct FlowController {
    config: FlowConfig,
    sentinel: OverflowSentinel,
}

impl FlowController {
    #[must_use]
    pub fn new(config: FlowConfig) -> Self {
        let config = FlowConfig {
            idle_budget: config.idle_budget.at_least_one(),
            fresh_budget: config.fresh_budget.at_least_one(),
        };
        Self {
            config,
            sentinel: OverflowSentinel::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FlowConfig {
        &self.config
    }

    #[must_use]
    pub const fn sentinel(&self) -> &OverflowSentinel {
        &self.sentinel
    }

    /// Runs one drain step, blocking on `waiter` while there is nothing to do.
    ///
    /// Takes at most one contiguous upstream run per call and never retries
    /// with a remainder that did not fit. With both the upstream FIFO and the
    /// internal buffer empty it waits and re-checks after every wake, so
    /// spurious wakes are harmless.
    ///
    /// # Errors
    ///
    /// - [`Error::BufferOverflow`] once the overflow flag is set and the
    ///   internal buffer has been drained completely.
    /// - [`Error::Processing`] if upstream data can never be accepted because
    ///   the internal buffer has no capacity.
    pub fn drain<S, F, W, D>(
        &mut self,
        ring: &mut RingBuffer<S>,
        fifo: &mut F,
        waiter: &mut W,
        sink: &mut D,
    ) -> Result<Drain>
    where
        S: AsRef<[u8]> + AsMut<[u8]>,
        F: FifoSource + ?Sized,
        W: EventWait + ?Sized,
        D: DiagnosticSink + ?Sized,
    {
        loop {
            let run = fifo.contiguous();
            let available = run.len();
            if available > 0 {
                let copied = ring.write(run);
                fifo.remove(copied);

                if copied == 0 && ring.capacity() == 0 {
                    return Err(Error::Processing {
                        reason: "internal buffer has no capacity",
                    });
                }

                trace!(available, copied, used = ring.used(), "drained dataport");
                return Ok(Drain::Drained { available, copied });
            }

            // no new data will arrive after an overflow, but bytes published
            // before the flag was latched are visible once it has been seen
            if self.sentinel.check(&*fifo, sink) {
                if !fifo.contiguous().is_empty() {
                    continue;
                }
                if ring.is_empty() {
                    return Err(Error::BufferOverflow {
                        occupancy: ring.snapshot(),
                        fifo_used: fifo.size(),
                    });
                }
            }

            if !ring.is_empty() {
                return Ok(Drain::Backlog);
            }

            waiter.wait();
        }
    }

    /// Picks the process budget following a drain step.
    ///
    /// Above the watermark the budget grows to pull occupancy back down to it.
    /// If upstream also had more than fit, that is reported as backpressure,
    /// since it is the precursor of a real overflow.
    pub fn budget<S, D>(&self, drain: Drain, ring: &RingBuffer<S>, sink: &mut D) -> Budget
    where
        S: AsRef<[u8]> + AsMut<[u8]>,
        D: DiagnosticSink + ?Sized,
    {
        let Drain::Drained { available, copied } = drain else {
            return self.config.idle_budget;
        };

        let Budget::Bytes(fresh) = self.config.fresh_budget else {
            return Budget::Unlimited;
        };

        let used = ring.used();
        let mark = watermark(ring.capacity());
        if used <= mark {
            return Budget::Bytes(fresh);
        }

        let boosted = fresh.max(used - mark);
        if copied < available {
            sink.backpressure(available, copied, boosted);
        }
        Budget::Bytes(boosted)
    }
}
