//! Cross-process plumbing over POSIX shared memory.

pub mod dataport;
pub mod shmem;
