//! Error type shared by the control loop and its components.

use thiserror::Error;

use crate::ipc::shmem::ShmError;
use crate::ring::Occupancy;
use crate::validator::MismatchReport;

/// Result alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Ways a run of the harness can end unsuccessfully.
#[derive(Debug, Error)]
pub enum Error {
    /// The producer latched its overflow flag and nothing is left to process.
    #[error("dataport FIFO overflow detected ({occupancy}, {fifo_used} bytes left upstream)")]
    BufferOverflow {
        /// Internal buffer state when the overflow became fatal.
        occupancy: Occupancy,
        /// Bytes the upstream FIFO still reported as queued.
        fifo_used: usize,
    },

    /// A byte broke the incrementing sequence under [`MismatchPolicy::Abort`].
    ///
    /// [`MismatchPolicy::Abort`]: crate::validator::MismatchPolicy::Abort
    #[error("sequence mismatch: {0}")]
    ValidationMismatch(Box<MismatchReport>),

    /// An internal precondition of the drain or process step was violated.
    #[error("processing failed: {reason}")]
    Processing { reason: &'static str },

    /// The shared-memory dataport could not be created or attached.
    #[error("dataport error: {0}")]
    Dataport(#[from] ShmError),
}

impl Error {
    /// Process exit code for this outcome: 2 overflow, 3 mismatch, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::BufferOverflow { .. } => 2,
            Self::ValidationMismatch(_) => 3,
            Self::Processing { .. } | Self::Dataport(_) => 1,
        }
    }
}
