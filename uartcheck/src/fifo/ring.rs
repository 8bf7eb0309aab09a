//! Lock-free SPSC byte FIFO with an overflow latch.
//!
//! This is the producer-side buffer the harness drains: the software stand-in
//! for a UART driver's dataport. It is shared by the in-process
//! ([`crate::sync::dataport`]) and shared-memory ([`crate::ipc::dataport`])
//! variants.
//!
//! Unlike the harness's own [`RingBuffer`](crate::ring::RingBuffer), producer
//! and consumer run concurrently here, so the FIFO keeps two free-running
//! cursors (`head` written only by the producer, `tail` only by the consumer)
//! instead of a shared `used` counter.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ ProducerState  head, cached_tail  (64) │
//! ├────────────────────────────────────────┤
//! │ ConsumerState  tail, cached_head  (64) │
//! ├────────────────────────────────────────┤
//! │ EventState     events             (64) │
//! ├────────────────────────────────────────┤
//! │ data: [u8; N]                          │
//! ├────────────────────────────────────────┤
//! │ overflow: u8                           │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Safety
//!
//! The raw methods are `unsafe` because the caller must uphold the SPSC
//! invariant: one producer and one consumer, neither role used concurrently
//! from two places.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

/// Role marker: fields owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: fields owned exclusively by the consumer.
pub struct ConsumerRole;

/// Role marker: the data array, whose byte ownership moves with the cursors.
pub struct DataRole;

/// Interior-mutable cell tagged with the role that may touch it.
#[repr(transparent)]
pub struct SpscCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> SpscCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub const fn get(&self) -> *mut T {
        self.0.get()
    }
}

// SAFETY: each cell is only accessed by the role named in its type, and
// cross-role hand-off goes through the Release/Acquire cursors.
unsafe impl<T: Send, Role> Sync for SpscCell<T, Role> {}
unsafe impl<T: Send, Role> Send for SpscCell<T, Role> {}

/// Producer-side state.
#[repr(C)]
#[repr(align(64))]
pub struct ProducerState {
    /// Total bytes ever written. Owned by producer, read by consumer.
    pub head: AtomicUsize,
    /// Producer's last view of `tail`.
    pub cached_tail: SpscCell<usize, ProducerRole>,
}

impl ProducerState {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            cached_tail: SpscCell::new(0),
        }
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side state.
#[repr(C)]
#[repr(align(64))]
pub struct ConsumerState {
    /// Total bytes ever removed. Owned by consumer, read by producer.
    pub tail: AtomicUsize,
    /// Consumer's last view of `head`.
    pub cached_head: SpscCell<usize, ConsumerRole>,
}

impl ConsumerState {
    pub const fn new() -> Self {
        Self {
            tail: AtomicUsize::new(0),
            cached_head: SpscCell::new(0),
        }
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Change counter bumped by the producer whenever the consumer should look.
#[repr(C)]
#[repr(align(64))]
pub struct EventState {
    pub events: AtomicU32,
}

pub(crate) struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion that the FIFO size is a nonzero power of two.
    pub(crate) const OK: () = assert!(
        N.is_power_of_two(),
        "FIFO capacity must be a nonzero power of two"
    );
}

/// Byte FIFO shared between one producer and one consumer.
#[repr(C)]
pub struct ByteFifo<const N: usize> {
    pub producer: ProducerState,
    pub consumer: ConsumerState,
    pub event: EventState,
    pub data: SpscCell<[u8; N], DataRole>,
    /// Nonzero once the producer could not store everything it was given.
    pub overflow: AtomicU8,
}

impl<const N: usize> ByteFifo<N> {
    const MASK: usize = N - 1;

    /// Creates an empty FIFO with the overflow flag clear.
    pub const fn new() -> Self {
        let () = CapacityCheck::<N>::OK;
        Self {
            producer: ProducerState::new(),
            consumer: ConsumerState::new(),
            event: EventState {
                events: AtomicU32::new(0),
            },
            data: SpscCell::new([0; N]),
            overflow: AtomicU8::new(0),
        }
    }

    #[inline]
    fn bump_events(&self) {
        self.event.events.fetch_add(1, Ordering::Release);
    }

    /// Current value of the change counter.
    #[inline]
    pub fn events(&self) -> u32 {
        self.event.events.load(Ordering::Acquire)
    }

    /// Raw overflow byte.
    #[inline]
    pub fn overflow_byte(&self) -> u8 {
        self.overflow.load(Ordering::Acquire)
    }

    /// Bytes written but not yet removed.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.consumer.tail.load(Ordering::Acquire);
        let head = self.producer.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends as much of `src` as fits.
    ///
    /// Anything that does not fit is lost and latches the overflow flag; from
    /// then on every push is refused until [`reset_overflow`] is called.
    /// Returns the number of bytes stored.
    ///
    /// # Safety
    ///
    /// Only one thread or process may act as producer.
    ///
    /// [`reset_overflow`]: Self::reset_overflow
    pub unsafe fn push(&self, src: &[u8]) -> usize {
        if src.is_empty() {
            return 0;
        }
        if self.overflow.load(Ordering::Acquire) != 0 {
            return 0;
        }

        let head = self.producer.head.load(Ordering::Relaxed);

        // SAFETY: the producer has exclusive access to its cached_tail
        let mut cached_tail = unsafe { *self.producer.cached_tail.get() };
        if N - head.wrapping_sub(cached_tail) < src.len() {
            cached_tail = self.consumer.tail.load(Ordering::Acquire);
            // SAFETY: as above
            unsafe { *self.producer.cached_tail.get() = cached_tail };
        }

        let free = N - head.wrapping_sub(cached_tail);
        let len = src.len().min(free);

        if len > 0 {
            let pos = head & Self::MASK;
            let first = len.min(N - pos);
            let base = self.data.get().cast::<u8>();

            // SAFETY: [head, head + len) is free space the consumer will not
            // read until `head` is published below, and both segments stay
            // inside the N-byte array.
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(pos), first);
                if len > first {
                    std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, len - first);
                }
            }

            self.producer
                .head
                .store(head.wrapping_add(len), Ordering::Release);
        }

        if len < src.len() {
            self.overflow.store(1, Ordering::Release);
        }
        self.bump_events();
        len
    }

    /// Clears a latched overflow so the producer accepts data again.
    pub fn reset_overflow(&self) {
        self.overflow.store(0, Ordering::Release);
        self.bump_events();
    }

    /// Returns the linear run of unread bytes starting at `tail`.
    ///
    /// # Safety
    ///
    /// Only one thread or process may act as consumer, and the returned slice
    /// must be dropped before [`remove`](Self::remove) is called.
    pub unsafe fn contiguous(&self) -> &[u8] {
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        let head = self.producer.head.load(Ordering::Acquire);
        // SAFETY: the consumer has exclusive access to its cached_head
        unsafe { *self.consumer.cached_head.get() = head };

        let avail = head.wrapping_sub(tail);
        if avail == 0 {
            return &[];
        }
        let pos = tail & Self::MASK;
        let len = avail.min(N - pos);

        // SAFETY: [tail, tail + len) was published by the producer's Release
        // store of `head`, and the producer will not overwrite it until the
        // consumer publishes a new tail. No reference to the whole array is
        // formed, so producer writes elsewhere do not alias this slice.
        unsafe { std::slice::from_raw_parts(self.data.get().cast::<u8>().add(pos), len) }
    }

    /// Releases up to `n` bytes to the producer. Returns the count released.
    ///
    /// # Safety
    ///
    /// Only one thread or process may act as consumer.
    pub unsafe fn remove(&self, n: usize) -> usize {
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        // SAFETY: the consumer has exclusive access to its cached_head
        let cached_head = unsafe { *self.consumer.cached_head.get() };
        let n = n.min(cached_head.wrapping_sub(tail));
        if n > 0 {
            self.consumer
                .tail
                .store(tail.wrapping_add(n), Ordering::Release);
        }
        n
    }
}

impl<const N: usize> Default for ByteFifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all cross-thread access goes through the atomics and the SPSC
// protocol described on the methods.
unsafe impl<const N: usize> Send for ByteFifo<N> {}
unsafe impl<const N: usize> Sync for ByteFifo<N> {}
