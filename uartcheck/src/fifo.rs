//! Upstream byte FIFO primitives.
//!
//! This module contains the producer-side FIFO and its wakeup shared by:
//! - [`crate::ipc::dataport`] - FIFO in POSIX shared memory, fed by another process
//! - [`crate::sync::dataport`] - FIFO on the heap, fed by another thread

pub(crate) mod ring;

use std::ops::Deref;
use std::time::Duration;

use minstant::Instant;

use crate::source::EventWait;

pub use ring::ByteFifo;

/// Spins before a waiter starts yielding its thread.
const SPIN_LIMIT: u32 = 128;

/// Yields before a waiter starts sleeping.
const YIELD_LIMIT: u32 = 64;

/// Longest single sleep once a waiter has stopped yielding.
const SLEEP_SLICE: Duration = Duration::from_micros(50);

/// Longest a single [`EventWaiter::wait`] blocks before returning spuriously.
pub const DEFAULT_PARK_TIMEOUT: Duration = Duration::from_millis(10);

/// Anything exposing the producer's change counter.
pub trait EventSource {
    fn events(&self) -> u32;
}

impl<const N: usize> EventSource for ByteFifo<N> {
    fn events(&self) -> u32 {
        ByteFifo::events(self)
    }
}

/// How a waiter passes one round with no new event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backoff {
    Spin,
    Yield,
    Sleep(Duration),
}

impl Backoff {
    fn after(rounds: u32, left: Duration) -> Self {
        if rounds < SPIN_LIMIT {
            Self::Spin
        } else if rounds < SPIN_LIMIT + YIELD_LIMIT {
            Self::Yield
        } else {
            Self::Sleep(SLEEP_SLICE.min(left))
        }
    }
}

/// [`EventWait`] over a producer's change counter.
///
/// A wait returns once the counter moves past the last value this waiter
/// observed, or after the park timeout with nothing new. It spins first, then
/// yields, then sleeps in short slices so an idle consumer gives its core up.
pub struct EventWaiter<P> {
    source: P,
    last_seen: u32,
    park_timeout: Duration,
}

impl<P> EventWaiter<P>
where
    P: Deref,
    P::Target: EventSource,
{
    pub fn new(source: P) -> Self {
        let last_seen = source.events();
        Self {
            source,
            last_seen,
            park_timeout: DEFAULT_PARK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }
}

impl<P> EventWait for EventWaiter<P>
where
    P: Deref,
    P::Target: EventSource,
{
    fn wait(&mut self) {
        let deadline = Instant::now() + self.park_timeout;
        let mut rounds = 0u32;
        loop {
            let now = self.source.events();
            if now != self.last_seen {
                self.last_seen = now;
                return;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            match Backoff::after(rounds, left) {
                Backoff::Spin => std::hint::spin_loop(),
                Backoff::Yield => std::thread::yield_now(),
                Backoff::Sleep(slice) => std::thread::sleep(slice),
            }
            rounds = rounds.saturating_add(1);
        }
    }
}

impl<P> std::fmt::Debug for EventWaiter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWaiter")
            .field("last_seen", &self.last_seen)
            .field("park_timeout", &self.park_timeout)
            .finish_non_exhaustive()
    }
}
