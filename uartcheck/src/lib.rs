//! Streaming data-integrity harness for UART-like byte sources.
//!
//! A producer fills a small FIFO with the incrementing sequence 0, 1, 2, ...
//! (wrapping at 256). The [`Tester`] drains that FIFO into a larger internal
//! [`RingBuffer`], validates every byte in order, and stops on upstream
//! overflow or (by default) on the first sequence mismatch.
//!
//! ```
//! use uartcheck::sink::Recorder;
//! use uartcheck::sync::dataport;
//! use uartcheck::{Tester, TesterConfig};
//!
//! let (writer, reader) = dataport::channel::<256>();
//! let waiter = reader.waiter();
//! writer.push(&(0..=99).collect::<Vec<u8>>());
//!
//! let config = TesterConfig { byte_limit: Some(100), ..TesterConfig::default() };
//! let mut tester: Tester<_, _, _> = Tester::new(reader, waiter, Recorder::new(), config);
//! let summary = tester.run()?;
//! assert_eq!(summary.bytes_processed, 100);
//! # Ok::<(), uartcheck::Error>(())
//! ```

pub mod error;
pub mod feed;
pub mod fifo;
pub mod flow;
pub mod ipc;
pub mod ring;
pub mod sentinel;
pub mod sink;
pub mod source;
pub mod sync;
pub mod tester;
mod trace;
pub mod validator;

pub use error::{Error, Result};
pub use flow::{Budget, FlowConfig, FlowController};
pub use ring::{Occupancy, RingBuffer};
pub use sentinel::OverflowSentinel;
pub use sink::{DiagnosticSink, LOOP_RUNNING_MARKER, TracingSink};
pub use source::{EventWait, FifoSource};
pub use tester::{INTERNAL_FIFO_SIZE, RunSnapshot, RunSummary, Tester, TesterConfig};
pub use trace::init_tracing;
pub use validator::{MismatchPolicy, MismatchReport, SequenceValidator};
