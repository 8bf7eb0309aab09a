//! The tester control loop.
//!
//! Owns the internal [`RingBuffer`], the [`FlowController`] and the
//! [`SequenceValidator`], and alternates drain and process steps until a fatal
//! error or the configured byte limit ends the run.

use std::time::Duration;

use minstant::Instant;

use crate::error::{Error, Result};
use crate::flow::{FlowConfig, FlowController};
use crate::ring::{Occupancy, RingBuffer};
use crate::sink::DiagnosticSink;
use crate::source::{EventWait, FifoSource};
use crate::trace::{debug, info};
use crate::validator::{MismatchPolicy, SequenceValidator, WINDOW_LEN};

/// Default size of the internal buffer, in bytes.
pub const INTERNAL_FIFO_SIZE: usize = 2048;

/// Tuning for a [`Tester`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TesterConfig {
    pub flow: FlowConfig,
    pub policy: MismatchPolicy,
    /// End the run successfully once this many bytes were validated.
    pub byte_limit: Option<u64>,
}

/// Loop state reported alongside every fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    pub occupancy: Occupancy,
    pub bytes_processed: u64,
    pub expected_next: u8,
    pub window: [u8; WINDOW_LEN],
}

/// Totals of a run that reached its byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub bytes_processed: u64,
    /// Mismatches resynchronized past under [`MismatchPolicy::Resync`].
    pub mismatches: u64,
    pub elapsed: Duration,
    /// Accumulator of the per-byte synthetic workload.
    pub checksum: u8,
}

impl RunSummary {
    /// Validation throughput in MiB/s, zero for an instant run.
    #[must_use]
    pub fn mib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_processed as f64 / (1024.0 * 1024.0) / secs
    }
}

struct NonEmpty<const N: usize>;

impl<const N: usize> NonEmpty<N> {
    /// Compile-time assertion that the internal buffer can hold data.
    const OK: () = assert!(N > 0, "internal buffer capacity must be greater than 0");
}

/// The harness: drains `fifo` into an `N`-byte buffer and validates it.
pub struct Tester<F, W, D, const N: usize = INTERNAL_FIFO_SIZE> {
    fifo: F,
    waiter: W,
    sink: D,
    ring: RingBuffer<[u8; N]>,
    flow: FlowController,
    validator: SequenceValidator,
    config: TesterConfig,
    mismatches: u64,
}

impl<F, W, D, const N: usize> Tester<F, W, D, N>
where
    F: FifoSource,
    W: EventWait,
    D: DiagnosticSink,
{
    pub fn new(fifo: F, waiter: W, sink: D, config: TesterConfig) -> Self {
        let () = NonEmpty::<N>::OK;
        Self {
            fifo,
            waiter,
            sink,
            ring: RingBuffer::zeroed(),
            flow: FlowController::new(config.flow),
            validator: SequenceValidator::new(config.policy),
            config,
            mismatches: 0,
        }
    }

    /// Runs the loop.
    ///
    /// Without a byte limit this only returns on error. Every error is
    /// reported to the sink together with a [`RunSnapshot`] first.
    ///
    /// # Errors
    ///
    /// [`Error::BufferOverflow`], [`Error::ValidationMismatch`] (under
    /// [`MismatchPolicy::Abort`]) or [`Error::Processing`].
    pub fn run(&mut self) -> Result<RunSummary> {
        let start = Instant::now();
        debug!(
            capacity = N,
            fifo_capacity = self.fifo.capacity(),
            policy = ?self.config.policy,
            limit = ?self.config.byte_limit,
            "starting UART tester loop"
        );
        self.sink.loop_running();

        while !self.limit_reached() {
            if let Err(err) = self.step() {
                return Err(self.fail(err));
            }
        }

        let summary = RunSummary {
            bytes_processed: self.validator.bytes_processed(),
            mismatches: self.mismatches,
            elapsed: start.elapsed(),
            checksum: self.validator.checksum(),
        };
        info!(
            bytes = summary.bytes_processed,
            mismatches = summary.mismatches,
            "byte limit reached after {:?} ({:.1} MiB/s)",
            summary.elapsed,
            summary.mib_per_sec()
        );
        Ok(summary)
    }

    /// One drain step followed by one process step.
    fn step(&mut self) -> Result<()> {
        let drain = self.flow.drain(
            &mut self.ring,
            &mut self.fifo,
            &mut self.waiter,
            &mut self.sink,
        )?;

        let mut budget = self.flow.budget(drain, &self.ring, &mut self.sink);
        if let Some(limit) = self.config.byte_limit {
            let left = limit.saturating_sub(self.validator.bytes_processed());
            budget = budget.at_most(usize::try_from(left).unwrap_or(usize::MAX));
        }

        let outcome = self
            .validator
            .process(&mut self.ring, budget, &mut self.sink)?;
        self.mismatches += outcome.mismatches;
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.config
            .byte_limit
            .is_some_and(|limit| self.validator.bytes_processed() >= limit)
    }

    fn fail(&mut self, err: Error) -> Error {
        if matches!(err, Error::ValidationMismatch(_)) {
            self.mismatches += 1;
        }
        let snapshot = self.snapshot();
        self.sink.fatal(&err, &snapshot);
        err
    }

    /// Current loop state.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            occupancy: self.ring.snapshot(),
            bytes_processed: self.validator.bytes_processed(),
            expected_next: self.validator.expected_next(),
            window: self.validator.window(),
        }
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    pub fn validator(&self) -> &SequenceValidator {
        &self.validator
    }

    /// Mismatches seen so far, including one that aborted the run.
    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }

    pub fn into_sink(self) -> D {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Event, Recorder};
    use crate::sync::dataport;

    fn config(policy: MismatchPolicy, byte_limit: Option<u64>) -> TesterConfig {
        TesterConfig {
            policy,
            byte_limit,
            ..TesterConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TesterConfig::default();
        assert_eq!(config.policy, MismatchPolicy::Abort);
        assert_eq!(config.byte_limit, None);
        assert_eq!(config.flow, FlowConfig::default());
    }

    #[test]
    fn test_clean_stream_reaches_limit() {
        let (writer, reader) = dataport::channel::<64>();
        let waiter = reader.waiter();
        let stream: Vec<u8> = (0..40).collect();
        writer.push(&stream);

        let mut tester = Tester::<_, _, _, 32>::new(
            reader,
            waiter,
            Recorder::new(),
            config(MismatchPolicy::Abort, Some(40)),
        );
        let summary = tester.run().unwrap();

        assert_eq!(summary.bytes_processed, 40);
        assert_eq!(summary.mismatches, 0);
        assert_eq!(tester.validator().expected_next(), 40);

        let sink = tester.into_sink();
        assert_eq!(sink.events.first(), Some(&Event::LoopRunning));
        assert_eq!(sink.count(|e| *e == Event::LoopRunning), 1);
    }

    #[test]
    fn test_resync_counts_and_continues() {
        let (writer, reader) = dataport::channel::<16>();
        let waiter = reader.waiter();
        writer.push(&[0, 1, 2, 4, 5]);

        let mut tester = Tester::<_, _, _, 64>::new(
            reader,
            waiter,
            Recorder::new(),
            config(MismatchPolicy::Resync, Some(5)),
        );
        let summary = tester.run().unwrap();

        assert_eq!(summary.mismatches, 1);
        assert_eq!(tester.validator().expected_next(), 6);

        let report = tester.sink().mismatches().next().unwrap();
        assert_eq!(report.offset, 3);
        assert_eq!(report.expected, 3);
        assert_eq!(report.observed, 4);
        assert_eq!(report.window, [0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_abort_reports_snapshot() {
        let (writer, reader) = dataport::channel::<16>();
        let waiter = reader.waiter();
        writer.push(&[0, 1, 2, 9, 4, 5]);

        let mut tester = Tester::<_, _, _, 64>::new(
            reader,
            waiter,
            Recorder::new(),
            config(MismatchPolicy::Abort, None),
        );
        let err = tester.run().unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(tester.mismatches(), 1);

        let Some(Event::Fatal { snapshot, .. }) = tester.sink().events.last() else {
            panic!("expected fatal event last, got {:?}", tester.sink().events);
        };
        assert_eq!(snapshot.bytes_processed, 4);
        assert_eq!(snapshot.expected_next, 10);
        assert_eq!(snapshot.window, [0, 0, 0, 1, 2, 9]);
        // 9, 4 and 5 stay buffered
        assert_eq!(snapshot.occupancy.used, 3);
    }

    #[test]
    fn test_overflow_after_backlog_is_fatal() {
        let (writer, reader) = dataport::channel::<16>();
        let waiter = reader.waiter();
        let stream: Vec<u8> = (0..20).collect();
        assert_eq!(writer.push(&stream), 16);

        let mut tester = Tester::<_, _, _, 64>::new(
            reader,
            waiter,
            Recorder::new(),
            TesterConfig::default(),
        );
        let err = tester.run().unwrap_err();

        assert!(matches!(err, Error::BufferOverflow { fifo_used: 0, .. }));
        assert_eq!(err.exit_code(), 2);
        // everything accepted before the overflow was still validated
        assert_eq!(tester.validator().bytes_processed(), 16);
        assert_eq!(tester.mismatches(), 0);

        let sink = tester.sink();
        assert_eq!(
            sink.count(|e| matches!(e, Event::OverflowDetected { .. })),
            1
        );
        assert!(matches!(sink.events.last(), Some(Event::Fatal { .. })));
    }

    #[test]
    fn test_limit_caps_budget() {
        let (writer, reader) = dataport::channel::<64>();
        let waiter = reader.waiter();
        let stream: Vec<u8> = (0..30).collect();
        writer.push(&stream);

        let mut tester = Tester::<_, _, _, 64>::new(
            reader,
            waiter,
            Recorder::new(),
            TesterConfig {
                flow: FlowConfig::unbounded(),
                policy: MismatchPolicy::Abort,
                byte_limit: Some(10),
            },
        );
        let summary = tester.run().unwrap();

        assert_eq!(summary.bytes_processed, 10);
        assert_eq!(tester.snapshot().occupancy.used, 20);
    }
}
