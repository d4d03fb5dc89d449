//! Error reporting for flashing operations.

use thiserror::Error;

/// Everything that can go wrong while preparing or writing boot control
/// blocks.
///
/// Scan-time read failures never surface here; the scanner records them as
/// bad-block evidence and keeps going.
#[derive(Error, Debug)]
pub enum FlashError {
    /// The storage service endpoint could not be reached, or answered with
    /// something that is not a response to the request it was sent.
    #[error("flash service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("raw read of {size} bytes at {address:#x} failed")]
    ReadFailed { address: u64, size: usize },

    #[error("write of {size} bytes at {address:#x} failed")]
    WriteFailed { address: u64, size: usize },

    #[error("erase of blocks {start}..{end} failed")]
    EraseFailed { start: u32, end: u32 },

    /// More bad blocks than the table can hold; the flash is not usable.
    #[error("{found} bad blocks do not fit the {limit}-entry table")]
    CapacityExceeded { found: usize, limit: usize },

    /// The target cannot hold every redundant boot control block copy.
    #[error("target holds {actual} bytes but {required} are needed for redundant boot blocks")]
    SizeTooSmall { actual: u64, required: u64 },

    #[error("could not allocate a {size}-byte transfer buffer")]
    AllocationFailed { size: usize },
}
