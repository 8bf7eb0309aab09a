//! UART tester.
//!
//! Drains a dataport and validates that it carries the incrementing byte
//! sequence. Logs "UART tester loop running" once it is ready for data.
//!
//! # Usage
//!
//! ```sh
//! # against a dataport created by uart-feeder
//! uart-tester --path /uart-dataport
//!
//! # self-contained, producer on a second thread
//! uart-tester --loopback --bytes 16777216 --policy resync
//! ```
//!
//! Exit codes: 0 byte limit reached, 2 overflow, 3 mismatch, 1 anything else.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;

use clap::{Parser, ValueEnum};

use uartcheck::feed::{FeedConfig, SequenceFeeder};
use uartcheck::ipc::dataport::{DATAPORT_SIZE, DataportReader};
use uartcheck::ipc::shmem::{Creator, Opener, ShmPath};
use uartcheck::sync::dataport;
use uartcheck::{
    EventWait, FifoSource, FlowConfig, MismatchPolicy, RunSummary, Tester, TesterConfig,
    TracingSink,
};

#[derive(Parser, Debug)]
#[command(name = "uart-tester", version, about)]
struct Args {
    /// Shared-memory dataport to drain.
    #[arg(long, default_value = "/uart-dataport", conflicts_with = "loopback")]
    path: ShmPath,
    /// Create the dataport instead of opening an existing one.
    #[arg(long)]
    create: bool,
    /// Feed the loop from an in-process producer thread.
    #[arg(long)]
    loopback: bool,
    /// What to do on a sequence mismatch.
    #[arg(long, value_enum, default_value_t = Policy::Abort)]
    policy: Policy,
    /// Exit successfully after validating this many bytes.
    #[arg(long)]
    bytes: Option<u64>,
    /// Validate everything buffered on every iteration.
    #[arg(long)]
    unbounded: bool,
    /// Pin the loop to this CPU.
    #[arg(long)]
    cpu: Option<usize>,
    /// Loopback producer: corrupt every n-th byte.
    #[arg(long, requires = "loopback")]
    corrupt_every: Option<NonZeroU64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Abort,
    Resync,
}

impl From<Policy> for MismatchPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Abort => MismatchPolicy::Abort,
            Policy::Resync => MismatchPolicy::Resync,
        }
    }
}

fn main() {
    let args = Args::parse();
    uartcheck::init_tracing();

    match run(&args) {
        Ok(summary) => {
            eprintln!(
                "uart-tester: {} bytes validated, {} mismatches, {:.1} MiB/s",
                summary.bytes_processed,
                summary.mismatches,
                summary.mib_per_sec()
            );
        }
        Err(e) => {
            eprintln!("uart-tester: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(args: &Args) -> uartcheck::Result<RunSummary> {
    let config = TesterConfig {
        flow: if args.unbounded {
            FlowConfig::unbounded()
        } else {
            FlowConfig::default()
        },
        policy: args.policy.into(),
        byte_limit: args.bytes,
    };

    if args.loopback {
        return run_loopback(args, config);
    }

    if args.create {
        let reader = DataportReader::<DATAPORT_SIZE, Creator>::create(args.path.clone())?;
        let waiter = reader.waiter();
        run_loop(reader, waiter, config, args.cpu)
    } else {
        let reader = DataportReader::<DATAPORT_SIZE, Opener>::open(args.path.clone())?;
        let waiter = reader.waiter();
        run_loop(reader, waiter, config, args.cpu)
    }
}

fn run_loopback(args: &Args, config: TesterConfig) -> uartcheck::Result<RunSummary> {
    let (writer, reader) = dataport::channel::<DATAPORT_SIZE>();
    let waiter = reader.waiter();
    let stop = Arc::new(AtomicBool::new(false));

    let feed = FeedConfig {
        corrupt_every: args.corrupt_every,
        total: args.bytes,
        ..FeedConfig::default()
    };
    let producer_stop = Arc::clone(&stop);
    let producer = thread::Builder::new()
        .name("uart-producer".into())
        .spawn(move || SequenceFeeder::new(feed).feed(&writer, &producer_stop))
        .map_err(|_| uartcheck::Error::Processing {
            reason: "failed to spawn producer thread",
        })?;

    let result = run_loop(reader, waiter, config, args.cpu);

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = producer.join();
    result
}

fn run_loop<F, W>(
    fifo: F,
    waiter: W,
    config: TesterConfig,
    cpu: Option<usize>,
) -> uartcheck::Result<RunSummary>
where
    F: FifoSource,
    W: EventWait,
{
    if let Some(id) = cpu
        && !core_affinity::set_for_current(core_affinity::CoreId { id })
    {
        eprintln!("uart-tester: could not pin to CPU {id}");
    }

    let mut tester: Tester<F, W, TracingSink> = Tester::new(fifo, waiter, TracingSink, config);
    tester.run()
}
