//! UART feeder.
//!
//! Stands in for the UART driver: writes the incrementing byte sequence into a
//! shared-memory dataport for `uart-tester` to validate.
//!
//! # Usage
//!
//! ```sh
//! uart-feeder --path /uart-dataport --bytes 16777216
//! uart-feeder --corrupt-every 100000      # provoke mismatches
//! uart-feeder --unpaced --chunk 512       # provoke an overflow
//! ```

use std::num::NonZeroU64;
use std::sync::atomic::AtomicBool;

use clap::Parser;

use uartcheck::feed::{BytePort, FeedConfig, FeedOutcome, SequenceFeeder};
use uartcheck::ipc::dataport::{DATAPORT_SIZE, DataportWriter};
use uartcheck::ipc::shmem::{Creator, Opener, ShmError, ShmPath};

#[derive(Parser, Debug)]
#[command(name = "uart-feeder", version, about)]
struct Args {
    /// Shared-memory dataport to fill.
    #[arg(long, default_value = "/uart-dataport")]
    path: ShmPath,
    /// Open an existing dataport instead of creating it.
    #[arg(long)]
    open: bool,
    /// Stop after this many bytes.
    #[arg(long)]
    bytes: Option<u64>,
    /// Largest single write.
    #[arg(long, default_value_t = 64)]
    chunk: usize,
    /// Corrupt every n-th byte.
    #[arg(long)]
    corrupt_every: Option<NonZeroU64>,
    /// Write without waiting for free space, like a real UART would.
    #[arg(long)]
    unpaced: bool,
}

fn main() {
    let args = Args::parse();
    uartcheck::init_tracing();

    match run(&args) {
        Ok(FeedOutcome::Overflowed { bytes }) => {
            eprintln!("uart-feeder: dataport overflowed after {bytes} bytes");
            std::process::exit(2);
        }
        Ok(FeedOutcome::Completed { bytes } | FeedOutcome::Stopped { bytes }) => {
            eprintln!("uart-feeder: wrote {bytes} bytes");
        }
        Err(e) => {
            eprintln!("uart-feeder: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<FeedOutcome, ShmError> {
    let config = FeedConfig {
        chunk: args.chunk,
        corrupt_every: args.corrupt_every,
        paced: !args.unpaced,
        total: args.bytes,
    };

    if args.open {
        let port = DataportWriter::<DATAPORT_SIZE, Opener>::open(args.path.clone())?;
        Ok(feed(&port, config))
    } else {
        let port = DataportWriter::<DATAPORT_SIZE, Creator>::create(args.path.clone())?;
        eprintln!("uart-feeder: created {}", port.path());
        let outcome = feed(&port, config);
        // keep the dataport alive until the tester has drained it
        while port.free() < DATAPORT_SIZE && !port.is_overflowed() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        Ok(outcome)
    }
}

fn feed<P: BytePort>(port: &P, config: FeedConfig) -> FeedOutcome {
    SequenceFeeder::new(config).feed(port, &AtomicBool::new(false))
}
