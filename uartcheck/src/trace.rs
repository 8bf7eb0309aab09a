//! Where the harness's log lines come from.
//!
//! An external test runner watches the tester's output for a few markers:
//! `UART tester loop running` once the loop starts, `bytes processed: 0x..`
//! after every 64 KiB validated, and an `error` line for a sequence mismatch
//! or a dataport overflow. Backpressure above the internal watermark is a
//! `warn`, per-step drain and process details are `trace`.
//!
//! [`init_tracing`] shows everything from `uartcheck=debug` up unless
//! `RUST_LOG` says otherwise. Building without the `tracing` feature turns the
//! crate's logging macros into empty expansions.

/// Installs a `tracing` subscriber with uptime timestamps.
///
/// The filter comes from `RUST_LOG` and falls back to `uartcheck=debug`, which
/// keeps the loop-running and throughput markers visible to an external test
/// runner. Calling this more than once is harmless.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uartcheck=debug"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {
    discard as debug, discard as error, discard as info, discard as trace, discard as warn,
};
