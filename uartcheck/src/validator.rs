//! Sequence validation: the stream must count up by one, modulo 256.

use std::fmt;

use crate::error::{Error, Result};
use crate::flow::Budget;
use crate::ring::{Occupancy, RingBuffer};
use crate::sink::DiagnosticSink;
use crate::trace::trace;

/// Number of recently consumed bytes kept for mismatch diagnostics.
pub const WINDOW_LEN: usize = 6;

/// A throughput marker is emitted each time this many bytes were processed.
pub const THROUGHPUT_INTERVAL: u64 = 64 * 1024;

/// What to do after a byte breaks the sequence.
///
/// Both variants log the mismatch and resynchronize the expected byte to
/// `observed + 1`. They differ in whether the run goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// End the run with [`Error::ValidationMismatch`].
    #[default]
    Abort,
    /// Keep validating from the resynchronized position.
    Resync,
}

/// Everything known about a mismatch at the moment it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchReport {
    /// Zero-based position of the offending byte in the stream.
    pub offset: u64,
    pub expected: u8,
    pub observed: u8,
    /// The bytes consumed right before the offending one, oldest first.
    pub window: [u8; WINDOW_LEN],
    /// Internal buffer state while the offending byte was still buffered.
    pub occupancy: Occupancy,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at offset {:#x} expected {:#04x}, read {:#04x}, window {:02x?} ({})",
            self.offset, self.expected, self.observed, self.window, self.occupancy
        )
    }
}

/// Result of one byte comparison that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: u64,
    pub expected: u8,
    pub observed: u8,
    pub window: [u8; WINDOW_LEN],
}

/// Outcome of a [`SequenceValidator::process`] step that did not abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// Bytes examined and flushed from the buffer.
    pub processed: usize,
    /// Mismatches seen (and resynchronized past) during the step.
    pub mismatches: u64,
}

/// Validator state. Only [`SequenceValidator::consume`] mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ValidatorState {
    expected: u8,
    window: [u8; WINDOW_LEN],
    bytes_processed: u64,
    load: u8,
}

/// Checks that buffered bytes form the sequence 0, 1, 2, ... wrapping at 256.
#[derive(Debug, Clone)]
pub struct SequenceValidator {
    state: ValidatorState,
    policy: MismatchPolicy,
}

impl SequenceValidator {
    /// Creates a validator expecting `0` as the first byte.
    #[must_use]
    pub fn new(policy: MismatchPolicy) -> Self {
        Self {
            state: ValidatorState::default(),
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// The byte the next call to [`consume`](Self::consume) expects.
    #[must_use]
    pub const fn expected_next(&self) -> u8 {
        self.state.expected
    }

    /// Total bytes examined, mismatching ones included.
    #[must_use]
    pub const fn bytes_processed(&self) -> u64 {
        self.state.bytes_processed
    }

    /// The most recently consumed bytes, oldest first.
    #[must_use]
    pub const fn window(&self) -> [u8; WINDOW_LEN] {
        self.state.window
    }

    /// Accumulator of the synthetic per-byte workload.
    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.state.load
    }

    /// Examines one byte and advances the state.
    ///
    /// On a mismatch the expected byte is resynchronized to `byte + 1`, so a
    /// single corrupted byte yields a single mismatch.
    pub fn consume<D: DiagnosticSink + ?Sized>(
        &mut self,
        byte: u8,
        sink: &mut D,
    ) -> Option<Mismatch> {
        let state = &mut self.state;
        let offset = state.bytes_processed;

        let mismatch = (byte != state.expected).then(|| Mismatch {
            offset,
            expected: state.expected,
            observed: byte,
            window: state.window,
        });
        state.expected = byte.wrapping_add(1);

        state.window.copy_within(1.., 0);
        state.window[WINDOW_LEN - 1] = byte;

        state.load = synthetic_load(state.load, byte);

        state.bytes_processed += 1;
        if state.bytes_processed % THROUGHPUT_INTERVAL == 0 {
            sink.throughput(state.bytes_processed);
        }

        mismatch
    }

    /// Validates up to `budget` bytes straight out of `ring`.
    ///
    /// Works on the buffer's contiguous spans in place and flushes exactly the
    /// bytes that were examined. Under [`MismatchPolicy::Abort`] the step stops
    /// at the first mismatch: the offending byte is counted in
    /// [`bytes_processed`](Self::bytes_processed) but stays buffered along with
    /// everything after it.
    ///
    /// # Errors
    ///
    /// [`Error::ValidationMismatch`] under [`MismatchPolicy::Abort`].
    pub fn process<S, D>(
        &mut self,
        ring: &mut RingBuffer<S>,
        budget: Budget,
        sink: &mut D,
    ) -> Result<ProcessOutcome>
    where
        S: AsRef<[u8]> + AsMut<[u8]>,
        D: DiagnosticSink + ?Sized,
    {
        let mut remaining = budget.limit();
        let mut outcome = ProcessOutcome::default();

        while remaining > 0 {
            let span = ring.contiguous();
            if span.is_empty() {
                break;
            }
            let take = span.len().min(remaining);

            let mut examined = 0;
            let mut abort = None;
            for &byte in &span[..take] {
                examined += 1;
                let Some(m) = self.consume(byte, sink) else {
                    continue;
                };

                let report = MismatchReport {
                    offset: m.offset,
                    expected: m.expected,
                    observed: m.observed,
                    window: m.window,
                    occupancy: ring.snapshot(),
                };
                sink.mismatch(&report);
                outcome.mismatches += 1;

                if self.policy == MismatchPolicy::Abort {
                    abort = Some(report);
                    break;
                }
            }

            // the offending byte stays buffered for the fatal snapshot
            let flushed = examined - usize::from(abort.is_some());
            ring.flush(flushed);
            outcome.processed += flushed;
            remaining -= examined;

            if let Some(report) = abort {
                return Err(Error::ValidationMismatch(Box::new(report)));
            }
        }

        trace!(
            processed = outcome.processed,
            used = ring.used(),
            "process step done"
        );
        Ok(outcome)
    }
}

/// Stand-in for real per-byte work so validation runs under some load.
#[inline]
fn synthetic_load(acc: u8, byte: u8) -> u8 {
    let x = std::hint::black_box(byte).rotate_right(1);
    !x | acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Event, Recorder};

    fn ring_with(bytes: &[u8]) -> RingBuffer<[u8; 32]> {
        let mut ring = RingBuffer::zeroed();
        assert_eq!(ring.write(bytes), bytes.len());
        ring
    }

    #[test]
    fn test_single_bad_byte_yields_single_mismatch() {
        let mut validator = SequenceValidator::new(MismatchPolicy::Resync);
        let mut sink = Recorder::new();

        let results: Vec<_> = [0u8, 1, 2, 4, 5]
            .into_iter()
            .map(|b| validator.consume(b, &mut sink))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
        let m = results[3].expect("fourth byte mismatches");
        assert_eq!(m.offset, 3);
        assert_eq!(m.expected, 3);
        assert_eq!(m.observed, 4);
        assert!(results[4].is_none());
        assert_eq!(validator.expected_next(), 6);
        assert_eq!(validator.bytes_processed(), 5);
    }

    #[test]
    fn test_resync_sets_expected_past_observed() {
        let mut validator = SequenceValidator::new(MismatchPolicy::Resync);
        let mut sink = Recorder::new();

        for b in [0u8, 1, 2] {
            assert!(validator.consume(b, &mut sink).is_none());
        }
        assert!(validator.consume(4, &mut sink).is_some());
        assert_eq!(validator.expected_next(), 5);
        assert!(validator.consume(5, &mut sink).is_none());
    }

    #[test]
    fn test_sequence_wraps_at_256() {
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        for i in 0..600u32 {
            assert!(validator.consume(i as u8, &mut sink).is_none());
        }
        assert_eq!(validator.expected_next(), (600u32 % 256) as u8);
    }

    #[test]
    fn test_window_holds_bytes_before_mismatch() {
        let mut validator = SequenceValidator::new(MismatchPolicy::Resync);
        let mut sink = Recorder::new();

        for b in 0..8u8 {
            validator.consume(b, &mut sink);
        }
        let m = validator.consume(42, &mut sink).expect("mismatch");
        assert_eq!(m.window, [2, 3, 4, 5, 6, 7]);
        assert_eq!(validator.window(), [3, 4, 5, 6, 7, 42]);
    }

    #[test]
    fn test_throughput_marker_every_interval() {
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        for i in 0..(2 * THROUGHPUT_INTERVAL + 5) {
            validator.consume(i as u8, &mut sink);
        }
        assert_eq!(
            sink.events,
            vec![
                Event::Throughput(THROUGHPUT_INTERVAL),
                Event::Throughput(2 * THROUGHPUT_INTERVAL)
            ]
        );
    }

    #[test]
    fn test_process_resync_consumes_everything() {
        let mut ring = ring_with(&[0, 1, 2, 4, 5]);
        let mut validator = SequenceValidator::new(MismatchPolicy::Resync);
        let mut sink = Recorder::new();

        let outcome = validator
            .process(&mut ring, Budget::Unlimited, &mut sink)
            .unwrap();

        assert_eq!(outcome, ProcessOutcome { processed: 5, mismatches: 1 });
        assert!(ring.is_empty());

        let reports: Vec<_> = sink.mismatches().collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].expected, 3);
        assert_eq!(reports[0].observed, 4);
        assert_eq!(reports[0].occupancy.used, 5);
    }

    #[test]
    fn test_process_abort_keeps_bytes_after_mismatch() {
        let mut ring = ring_with(&[0, 1, 9, 3, 4]);
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        let err = validator
            .process(&mut ring, Budget::Unlimited, &mut sink)
            .unwrap_err();

        match err {
            Error::ValidationMismatch(report) => {
                assert_eq!(report.offset, 2);
                assert_eq!(report.expected, 2);
                assert_eq!(report.observed, 9);
            }
            other => panic!("expected mismatch, got {other}"),
        }
        // the offending 9 is counted but still buffered with 3 and 4
        assert_eq!(validator.bytes_processed(), 3);
        assert_eq!(ring.used(), 3);
        assert_eq!(ring.contiguous(), &[9, 3, 4]);
    }

    #[test]
    fn test_process_respects_budget() {
        let data: Vec<u8> = (0..20).collect();
        let mut ring = ring_with(&data);
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        let outcome = validator
            .process(&mut ring, Budget::Bytes(7), &mut sink)
            .unwrap();
        assert_eq!(outcome.processed, 7);
        assert_eq!(ring.used(), 13);
        assert_eq!(validator.expected_next(), 7);

        let outcome = validator
            .process(&mut ring, Budget::Bytes(0), &mut sink)
            .unwrap();
        assert_eq!(outcome.processed, 0);
        assert_eq!(ring.used(), 13);
    }

    #[test]
    fn test_process_walks_both_spans_of_wrapped_data() {
        let mut ring = RingBuffer::<[u8; 8]>::zeroed();
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        ring.write(&[0, 1, 2, 3, 4, 5]);
        validator
            .process(&mut ring, Budget::Bytes(5), &mut sink)
            .unwrap();
        // head=5; these wrap past the end of the store
        ring.write(&[6, 7, 8, 9, 10]);
        assert_eq!(ring.contiguous().len(), 3);

        let outcome = validator
            .process(&mut ring, Budget::Unlimited, &mut sink)
            .unwrap();
        assert_eq!(outcome, ProcessOutcome { processed: 6, mismatches: 0 });
        assert!(ring.is_empty());
        assert_eq!(validator.expected_next(), 11);
    }

    #[test]
    fn test_empty_ring_is_a_completed_step() {
        let mut ring = RingBuffer::<[u8; 8]>::zeroed();
        let mut validator = SequenceValidator::new(MismatchPolicy::Abort);
        let mut sink = Recorder::new();

        let outcome = validator
            .process(&mut ring, Budget::Unlimited, &mut sink)
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::default());
    }
}
