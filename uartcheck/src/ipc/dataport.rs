//! Dataport FIFO in POSIX shared memory.
//!
//! A [`DataportWriter`] in one process fills the FIFO and a [`DataportReader`]
//! in another drains it, the way a UART driver shares its receive buffer with
//! a client component. Either side may create the object; the other opens it
//! and waits for the creator's init marker.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ InitMarker      (64-byte aligned)      │
//! ├────────────────────────────────────────┤
//! │ ByteFifo<N>                            │
//! │   producer / consumer / event (3x64)   │
//! │   data: [u8; N]                        │
//! │   overflow: u8   <- OVERFLOW_OFFSET    │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use uartcheck::ipc::dataport::{DataportReader, DataportWriter};
//! use uartcheck::ipc::shmem::{Creator, Opener, ShmPath};
//!
//! let path = ShmPath::new("/uart-dataport").unwrap();
//! let reader = DataportReader::<4096, Creator>::create(path.clone())?;
//! let writer = DataportWriter::<4096, Opener>::open(path)?;
//! writer.push(&[0, 1, 2]);
//! # Ok::<(), uartcheck::ipc::shmem::ShmError>(())
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::{MaybeUninit, offset_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use minstant::Instant;

use super::shmem::{Creator, Opener, SharedMemorySafe, Shm, ShmError, ShmMode, ShmPath};
use crate::fifo::ring::{ByteFifo, CapacityCheck, ConsumerState, EventState, ProducerState, SpscCell};
use crate::fifo::{EventSource, EventWaiter};
use crate::source::FifoSource;

/// Dataport size used by the bundled binaries.
pub const DATAPORT_SIZE: usize = 4096;

const INIT_MAGIC: u64 = 0x5541_5254_504F_5254; // "UARTPORT" in ASCII
const INIT_TIMEOUT: Duration = Duration::from_secs(1);

// SAFETY: the FIFO types are repr(C), hold only atomics and plain bytes, and
// the all-zero pattern is their empty state.
unsafe impl<T: SharedMemorySafe, Role> SharedMemorySafe for SpscCell<T, Role> {}
unsafe impl SharedMemorySafe for ProducerState {}
unsafe impl SharedMemorySafe for ConsumerState {}
unsafe impl SharedMemorySafe for EventState {}
unsafe impl<const N: usize> SharedMemorySafe for ByteFifo<N> {}

#[repr(C)]
#[repr(align(64))]
struct InitMarker(AtomicU64);

unsafe impl SharedMemorySafe for InitMarker {}

/// Shared region: init marker followed by the FIFO.
#[repr(C)]
pub struct Dataport<const N: usize> {
    init: InitMarker,
    fifo: ByteFifo<N>,
}

// SAFETY: all fields are SharedMemorySafe.
unsafe impl<const N: usize> SharedMemorySafe for Dataport<N> {}

#[derive(Debug, Clone, Copy)]
struct InitProof(());

impl<const N: usize> Dataport<N> {
    /// Byte offset of the overflow flag from the start of the region.
    pub const OVERFLOW_OFFSET: usize = offset_of!(Self, fifo) + offset_of!(ByteFifo<N>, overflow);

    fn init_shared(uninit: &mut MaybeUninit<Self>) {
        let ptr = uninit.as_mut_ptr();
        // SAFETY: exclusive access during creation; zero is the empty FIFO
        // with the overflow flag clear.
        unsafe {
            ptr.write_bytes(0, 1);
            (*ptr).init.0.store(INIT_MAGIC, Ordering::Release);
        }
    }

    /// Spins until the creator published the init marker or `timeout` passed.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live mapping of at least `size_of::<Self>()`.
    unsafe fn wait_for_init(ptr: *const Self, timeout: Duration) -> Option<InitProof> {
        let deadline = Instant::now() + timeout;
        loop {
            if unsafe { (*ptr).init.0.load(Ordering::Acquire) } == INIT_MAGIC {
                return Some(InitProof(()));
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    pub fn fifo(&self) -> &ByteFifo<N> {
        &self.fifo
    }
}

impl<const N: usize, M: ShmMode> EventSource for Shm<Dataport<N>, M> {
    fn events(&self) -> u32 {
        self.fifo.events()
    }
}

fn create_region<const N: usize>(path: ShmPath) -> Result<Shm<Dataport<N>, Creator>, ShmError> {
    let () = CapacityCheck::<N>::OK;
    Shm::<Dataport<N>, Creator>::create(path, Dataport::<N>::init_shared)
}

fn open_region<const N: usize>(path: ShmPath) -> Result<Shm<Dataport<N>, Opener>, ShmError> {
    let () = CapacityCheck::<N>::OK;
    let shm = Shm::<Dataport<N>, Opener>::open(path.clone())?;
    // SAFETY: Shm::open guarantees the pointer is valid and mapped.
    let Some(_proof) = (unsafe { Dataport::<N>::wait_for_init(&raw const *shm, INIT_TIMEOUT) })
    else {
        return Err(ShmError::InitTimeout {
            path: path.to_string(),
        });
    };
    Ok(shm)
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Producer end of a shared dataport.
///
/// `Send` but not `Sync`. The type system cannot stop two processes opening
/// the same path as writers; callers must ensure exactly one exists.
pub struct DataportWriter<const N: usize, Mode: ShmMode> {
    shm: Shm<Dataport<N>, Mode>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> DataportWriter<N, Creator> {
    /// Creates the dataport. Unlinks it on drop.
    pub fn create(path: ShmPath) -> Result<Self, ShmError> {
        Ok(Self {
            shm: create_region(path)?,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize> DataportWriter<N, Opener> {
    /// Opens an existing dataport, waiting up to 1s for initialization.
    pub fn open(path: ShmPath) -> Result<Self, ShmError> {
        Ok(Self {
            shm: open_region(path)?,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize, Mode: ShmMode> DataportWriter<N, Mode> {
    /// Appends as much of `bytes` as fits; see [`ByteFifo::push`].
    pub fn push(&self, bytes: &[u8]) -> usize {
        // SAFETY: Writer is !Sync, so this is the only producer in-process
        unsafe { self.shm.fifo.push(bytes) }
    }

    pub fn reset_overflow(&self) {
        self.shm.fifo.reset_overflow();
    }

    pub fn is_overflowed(&self) -> bool {
        self.shm.fifo.overflow_byte() != 0
    }

    pub fn free(&self) -> usize {
        N - self.shm.fifo.len()
    }

    pub fn path(&self) -> &ShmPath {
        self.shm.path()
    }
}

/// Consumer end of a shared dataport.
pub struct DataportReader<const N: usize, Mode: ShmMode> {
    shm: Arc<Shm<Dataport<N>, Mode>>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> DataportReader<N, Creator> {
    /// Creates the dataport. Unlinks it on drop.
    pub fn create(path: ShmPath) -> Result<Self, ShmError> {
        Ok(Self {
            shm: Arc::new(create_region(path)?),
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize> DataportReader<N, Opener> {
    /// Opens an existing dataport, waiting up to 1s for initialization.
    pub fn open(path: ShmPath) -> Result<Self, ShmError> {
        Ok(Self {
            shm: Arc::new(open_region(path)?),
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize, Mode: ShmMode> DataportReader<N, Mode> {
    /// Wakeup tied to this dataport's change counter.
    pub fn waiter(&self) -> EventWaiter<Arc<Shm<Dataport<N>, Mode>>> {
        EventWaiter::new(Arc::clone(&self.shm))
    }

    pub fn path(&self) -> &ShmPath {
        self.shm.path()
    }
}

impl<const N: usize, Mode: ShmMode> FifoSource for DataportReader<N, Mode> {
    fn contiguous(&self) -> &[u8] {
        // SAFETY: Reader is !Sync and `remove` takes &mut self, so no slice
        // from here outlives the tail it was computed from.
        unsafe { self.shm.fifo.contiguous() }
    }

    fn remove(&mut self, n: usize) {
        // SAFETY: single consumer, see above
        unsafe { self.shm.fifo.remove(n) };
    }

    fn size(&self) -> usize {
        self.shm.fifo.len()
    }

    fn capacity(&self) -> usize {
        N
    }

    fn overflow_byte(&self) -> u8 {
        self.shm.fifo.overflow_byte()
    }
}
