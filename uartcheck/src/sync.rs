//! In-process producer/consumer plumbing.
//!
//! Same FIFO as [`crate::ipc::dataport`], but on the heap and shared between
//! threads of one process.

pub mod dataport;
