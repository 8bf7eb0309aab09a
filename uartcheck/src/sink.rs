//! Diagnostic sink: where the harness reports what it sees.
//!
//! An external test runner scrapes these messages. Two of them are part of
//! the liveness contract: exactly one "UART tester loop running" marker when the
//! loop starts, and a throughput marker every [`THROUGHPUT_INTERVAL`] bytes.
//!
//! [`THROUGHPUT_INTERVAL`]: crate::validator::THROUGHPUT_INTERVAL

use crate::error::Error;
use crate::tester::RunSnapshot;
use crate::trace::{debug, error, info, warn};
use crate::validator::MismatchReport;

/// Marker the external runner waits for before feeding data.
pub const LOOP_RUNNING_MARKER: &str = "UART tester loop running";

/// Receiver of the harness's diagnostic events.
pub trait DiagnosticSink {
    /// The control loop has started. Emitted exactly once per run.
    fn loop_running(&mut self);

    /// Another throughput interval was processed.
    fn throughput(&mut self, bytes_processed: u64);

    /// A byte broke the incrementing sequence.
    fn mismatch(&mut self, report: &MismatchReport);

    /// The upstream overflow flag was seen set for the first time.
    fn overflow_detected(&mut self, fifo_used: usize, fifo_capacity: usize);

    /// The internal buffer is above its watermark and could not take all
    /// available upstream data.
    fn backpressure(&mut self, available: usize, copied: usize, budget: usize);

    /// The run is about to end with `error`.
    fn fatal(&mut self, error: &Error, snapshot: &RunSnapshot);
}

impl<D: DiagnosticSink + ?Sized> DiagnosticSink for &mut D {
    fn loop_running(&mut self) {
        (**self).loop_running();
    }

    fn throughput(&mut self, bytes_processed: u64) {
        (**self).throughput(bytes_processed);
    }

    fn mismatch(&mut self, report: &MismatchReport) {
        (**self).mismatch(report);
    }

    fn overflow_detected(&mut self, fifo_used: usize, fifo_capacity: usize) {
        (**self).overflow_detected(fifo_used, fifo_capacity);
    }

    fn backpressure(&mut self, available: usize, copied: usize, budget: usize) {
        (**self).backpressure(available, copied, budget);
    }

    fn fatal(&mut self, error: &Error, snapshot: &RunSnapshot) {
        (**self).fatal(error, snapshot);
    }
}

/// Sink that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn loop_running(&mut self) {
        debug!("{LOOP_RUNNING_MARKER}");
    }

    fn throughput(&mut self, bytes_processed: u64) {
        info!("bytes processed: {bytes_processed:#x}");
    }

    fn mismatch(&mut self, report: &MismatchReport) {
        error!(
            offset = report.offset,
            expected = report.expected,
            observed = report.observed,
            window = ?report.window,
            occupancy = %report.occupancy,
            "bytes processed: {:#x}, expected {:#04x}, read {:#04x}",
            report.offset,
            report.expected,
            report.observed
        );
    }

    fn overflow_detected(&mut self, fifo_used: usize, fifo_capacity: usize) {
        error!(fifo_used, fifo_capacity, "dataport FIFO overflow detected");
    }

    fn backpressure(&mut self, available: usize, copied: usize, budget: usize) {
        warn!("avail {available}, copied {copied}, boost {budget}");
    }

    fn fatal(&mut self, error: &Error, snapshot: &RunSnapshot) {
        error!(
            error = %error,
            occupancy = %snapshot.occupancy,
            bytes_processed = snapshot.bytes_processed,
            expected_next = snapshot.expected_next,
            window = ?snapshot.window,
            "UART tester loop failed"
        );
    }
}

/// One event captured by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LoopRunning,
    Throughput(u64),
    Mismatch(MismatchReport),
    OverflowDetected { fifo_used: usize, fifo_capacity: usize },
    Backpressure { available: usize, copied: usize, budget: usize },
    Fatal { message: String, snapshot: RunSnapshot },
}

/// Sink that keeps every event in memory, in order.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// Recorded mismatch reports, oldest first.
    pub fn mismatches(&self) -> impl Iterator<Item = &MismatchReport> {
        self.events.iter().filter_map(|e| match e {
            Event::Mismatch(report) => Some(report),
            _ => None,
        })
    }
}

impl DiagnosticSink for Recorder {
    fn loop_running(&mut self) {
        self.events.push(Event::LoopRunning);
    }

    fn throughput(&mut self, bytes_processed: u64) {
        self.events.push(Event::Throughput(bytes_processed));
    }

    fn mismatch(&mut self, report: &MismatchReport) {
        self.events.push(Event::Mismatch(report.clone()));
    }

    fn overflow_detected(&mut self, fifo_used: usize, fifo_capacity: usize) {
        self.events.push(Event::OverflowDetected {
            fifo_used,
            fifo_capacity,
        });
    }

    fn backpressure(&mut self, available: usize, copied: usize, budget: usize) {
        self.events.push(Event::Backpressure {
            available,
            copied,
            budget,
        });
    }

    fn fatal(&mut self, error: &Error, snapshot: &RunSnapshot) {
        self.events.push(Event::Fatal {
            message: error.to_string(),
            snapshot: *snapshot,
        });
    }
}
