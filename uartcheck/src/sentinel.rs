//! Upstream overflow detection.

use crate::sink::DiagnosticSink;
use crate::source::FifoSource;

/// Watches the producer's overflow byte.
///
/// Once the byte has been seen nonzero the sentinel latches: [`check`] keeps
/// returning `true` for the rest of the run and the sink hears about it only
/// the first time. The flag itself lives in the producer's region and is never
/// written from here.
///
/// [`check`]: OverflowSentinel::check
#[derive(Debug, Default, Clone, Copy)]
pub struct OverflowSentinel {
    latched: bool,
}

impl OverflowSentinel {
    #[must_use]
    pub const fn new() -> Self {
        Self { latched: false }
    }

    /// Reads the overflow byte and reports the first observed transition.
    pub fn check<F, D>(&mut self, source: &F, sink: &mut D) -> bool
    where
        F: FifoSource + ?Sized,
        D: DiagnosticSink + ?Sized,
    {
        if self.latched {
            return true;
        }
        if source.overflow_byte() != 0 {
            self.latched = true;
            sink.overflow_detected(source.size(), source.capacity());
        }
        self.latched
    }

    /// Whether an overflow has been observed so far.
    #[must_use]
    pub const fn is_latched(&self) -> bool {
        self.latched
    }
}
