//! POSIX shared memory wrapper with typed mappings and automatic cleanup.
//!
//! - [`Shm<T, Mode>`] - Smart pointer to a shared mapping with typestate-based cleanup
//! - [`SharedMemorySafe`] - Trait marking types safe for cross-process sharing
//! - [`Creator`] - Typestate marker: creates the object, unlinks on drop
//! - [`Opener`] - Typestate marker: opens an existing object, no unlink on drop
//!
//! ```text
//! Unsafe POSIX operations:    Safe Rust wrappers:
//! ┌──────────────────┐        ┌────────────────────┐
//! │ shm_open()       │───────>│ Shm::create()      │
//! │ ftruncate()      │───────>│ Shm::open()        │
//! │ mmap()           │        │                    │
//! │ munmap()         │───────>│ Drop::drop()       │
//! │ shm_unlink()     │───────>│ Drop::drop()       │
//! └──────────────────┘        └────────────────────┘
//! ```

use rustix::fs::{Mode, fstat, ftruncate};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use rustix::{io, shm};
use std::marker::PhantomData;
use std::mem::{MaybeUninit, size_of};
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr::{NonNull, null_mut};
use std::sync::atomic::*;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShmError>;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("invalid shared memory path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("{op} failed for `{path}`: {source}")]
    Posix {
        op: &'static str,
        path: String,
        #[source]
        source: io::Errno,
    },

    #[error("shared memory `{path}` size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: i64,
    },

    #[error("shared memory `{path}` was not initialized in time")]
    InitTimeout { path: String },
}

impl ShmError {
    fn posix(op: &'static str, path: &ShmPath, err: io::Errno) -> Self {
        Self::Posix {
            op,
            path: path.to_string(),
            source: err,
        }
    }

    /// The errno behind a failed POSIX call, if that is what this is.
    pub fn errno(&self) -> Option<io::Errno> {
        match self {
            Self::Posix { source, .. } => Some(*source),
            _ => None,
        }
    }
}

const POSIX_NAME_MAX: usize = 255;

/// Validated POSIX shared memory object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShmPath(String);

impl ShmPath {
    /// Checks that `path` is a single leading-slash component no longer than
    /// `NAME_MAX`.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let reason = if !path.starts_with('/') {
            Some("path must start with '/'")
        } else if path[1..].contains('/') {
            Some("path must not contain additional '/' characters")
        } else if path.len() > POSIX_NAME_MAX {
            Some("path length must be <= 255 bytes")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ShmError::InvalidPath { path, reason }),
            None => Ok(Self(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShmPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ShmPath {
    type Err = ShmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

pub trait ShmMode {
    const SHOULD_UNLINK: bool;
}

pub struct Creator;
impl ShmMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

pub struct Opener;
impl ShmMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// Marker for types that may live in memory mapped by several processes.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or a primitive), contain no pointers or
/// references, and only be mutated through atomics or a protocol that
/// serializes access across processes. The all-zero bit pattern must be a
/// valid value.
pub unsafe trait SharedMemorySafe: Send + Sync {}

macro_rules! impl_shared_memory_safe {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl SharedMemorySafe for $t {}
        )*
    };
}

impl_shared_memory_safe! {
    u8, u16, u32, u64, usize,
    AtomicBool,
    AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize,
}

unsafe impl<T: SharedMemorySafe, const N: usize> SharedMemorySafe for [T; N] {}

/// Typed mapping of a POSIX shared memory object.
pub struct Shm<T: SharedMemorySafe, Mode: ShmMode> {
    ptr: NonNull<T>,
    size: usize,
    path: ShmPath,
    _mode: PhantomData<Mode>,
}

// SAFETY: T: SharedMemorySafe requires Send + Sync, and the pointer targets
// shared memory rather than thread-local data.
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Send for Shm<T, Mode> {}
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Sync for Shm<T, Mode> {}

fn map<T>(fd: &rustix::fd::OwnedFd) -> std::result::Result<NonNull<T>, io::Errno> {
    // SAFETY: a fresh mapping of an object that is at least size_of::<T>()
    // bytes. mmap returns page-aligned memory, which satisfies T's alignment.
    let ptr = unsafe {
        mmap(
            null_mut(),
            size_of::<T>(),
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )?
    };
    // SAFETY: mmap never returns null on success
    Ok(unsafe { NonNull::new_unchecked(ptr.cast::<T>()) })
}

impl<T: SharedMemorySafe> Shm<T, Creator> {
    /// Creates a new object sized for `T`, maps it, and runs `init` on it.
    ///
    /// The object is zero-filled before `init` runs. Fails with `EEXIST` if
    /// the name is taken.
    pub fn create(path: ShmPath, init: impl FnOnce(&mut MaybeUninit<T>)) -> Result<Self> {
        let fd = shm::open(
            path.as_str(),
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|err| ShmError::posix("shm_open", &path, err))?;

        if let Err(e) = ftruncate(&fd, size_of::<T>() as u64) {
            drop(fd);
            let _ = shm::unlink(path.as_str());
            return Err(ShmError::posix("ftruncate", &path, e));
        }

        let ptr = match map::<T>(&fd) {
            Ok(p) => p,
            Err(err) => {
                drop(fd);
                let _ = shm::unlink(path.as_str());
                return Err(ShmError::posix("mmap", &path, err));
            }
        };

        let shm = Self {
            ptr,
            size: size_of::<T>(),
            path,
            _mode: PhantomData,
        };

        // SAFETY: the mapping is exclusively ours until the init marker is
        // published by `init`.
        let uninit = unsafe { &mut *shm.ptr.as_ptr().cast::<MaybeUninit<T>>() };
        match catch_unwind(AssertUnwindSafe(|| init(uninit))) {
            Ok(()) => Ok(shm),
            Err(payload) => {
                drop(shm);
                resume_unwind(payload);
            }
        }
    }
}

impl<T: SharedMemorySafe> Shm<T, Opener> {
    /// Maps an existing object, checking its size matches `T`.
    ///
    /// Readiness of the contents is the caller's concern.
    pub fn open(path: ShmPath) -> Result<Self> {
        let fd = shm::open(path.as_str(), shm::OFlags::RDWR, Mode::empty())
            .map_err(|err| ShmError::posix("shm_open", &path, err))?;

        let stat = fstat(&fd).map_err(|err| ShmError::posix("fstat", &path, err))?;
        if stat.st_size != size_of::<T>() as i64 {
            return Err(ShmError::SizeMismatch {
                path: path.to_string(),
                expected: size_of::<T>(),
                actual: stat.st_size,
            });
        }

        let ptr = map::<T>(&fd).map_err(|err| ShmError::posix("mmap", &path, err))?;

        Ok(Self {
            ptr,
            size: size_of::<T>(),
            path,
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Shm<T, Mode> {
    pub fn path(&self) -> &ShmPath {
        &self.path
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Drop for Shm<T, Mode> {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.size);
        }

        if Mode::SHOULD_UNLINK {
            let _ = shm::unlink(self.path.as_str());
        }
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Deref for Shm<T, Mode> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the mapping stays valid until Drop and was initialized by
        // the creator before its path was handed out.
        unsafe { &*self.ptr.as_ptr() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Counter {
        value: AtomicU64,
    }

    unsafe impl SharedMemorySafe for Counter {}

    #[repr(C)]
    struct Wide {
        a: AtomicU64,
        b: AtomicU64,
        c: AtomicU64,
    }

    unsafe impl SharedMemorySafe for Wide {}

    fn zeroed<T>(uninit: &mut MaybeUninit<T>) {
        // SAFETY: all-zero is valid for every SharedMemorySafe type
        unsafe { uninit.as_mut_ptr().write_bytes(0, 1) };
    }

    fn test_path(name: &str) -> ShmPath {
        let path = ShmPath::new(format!("/uartcheck-test-{name}-{}", std::process::id())).unwrap();
        let _ = shm::unlink(path.as_str());
        path
    }

    #[test]
    fn test_shm_creator_and_opener() -> Result<()> {
        let path = test_path("shared");

        let data = match Shm::<Counter, Creator>::create(path.clone(), zeroed) {
            Ok(data) => data,
            Err(err) if err.errno() == Some(io::Errno::ACCESS) => {
                eprintln!("Skipping test_shm_creator_and_opener: {err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        data.value.store(100, Ordering::SeqCst);

        {
            let opened = Shm::<Counter, Opener>::open(path.clone())?;
            assert_eq!(opened.value.load(Ordering::SeqCst), 100);
            opened.value.store(200, Ordering::SeqCst);
        }

        assert_eq!(data.value.load(Ordering::SeqCst), 200);
        drop(data);

        // creator unlinked on drop
        assert!(matches!(
            Shm::<Counter, Opener>::open(path),
            Err(ShmError::Posix { op: "shm_open", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_create_refuses_existing_name() -> Result<()> {
        let path = test_path("exclusive");

        let _first = match Shm::<Counter, Creator>::create(path.clone(), zeroed) {
            Ok(shm) => shm,
            Err(err) if err.errno() == Some(io::Errno::ACCESS) => {
                eprintln!("Skipping test_create_refuses_existing_name: {err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let second = Shm::<Counter, Creator>::create(path, zeroed);
        assert_eq!(second.err().and_then(|e| e.errno()), Some(io::Errno::EXIST));
        Ok(())
    }

    #[test]
    fn test_shm_open_size_mismatch() -> Result<()> {
        let path = test_path("size-mismatch");

        let _small = match Shm::<Counter, Creator>::create(path.clone(), zeroed) {
            Ok(shm) => shm,
            Err(err) if err.errno() == Some(io::Errno::ACCESS) => {
                eprintln!("Skipping test_shm_open_size_mismatch: {err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match Shm::<Wide, Opener>::open(path) {
            Err(ShmError::SizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, size_of::<Wide>());
                assert_eq!(actual, size_of::<Counter>() as i64);
            }
            Err(e) => panic!("Expected SizeMismatch error, got: {e}"),
            Ok(_) => panic!("Expected SizeMismatch error, but open() succeeded"),
        }
        Ok(())
    }

    #[test]
    fn test_shm_path_validation() {
        assert!(ShmPath::new("/valid-name_123").is_ok());

        assert!(matches!(
            ShmPath::new("no-slash"),
            Err(ShmError::InvalidPath { reason, .. }) if reason == "path must start with '/'"
        ));
        assert!(matches!(
            ShmPath::new("/foo/bar"),
            Err(ShmError::InvalidPath { reason, .. })
                if reason == "path must not contain additional '/' characters"
        ));
        assert!(matches!(
            ShmPath::new(format!("/{}", "a".repeat(255))),
            Err(ShmError::InvalidPath { reason, .. })
                if reason == "path length must be <= 255 bytes"
        ));
        // 255 bytes including the leading slash
        assert!(ShmPath::new(format!("/{}", "a".repeat(254))).is_ok());
    }
}
