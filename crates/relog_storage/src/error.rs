//! Error types for device operations.

use std::io;
use thiserror::Error;

/// Result type for device operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during device operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device contents are not a valid sequence of frames.
    #[error("device corrupted: {0}")]
    Corrupted(String),

    /// The device was closed or poisoned by an earlier failure.
    #[error("device is closed")]
    Closed,

    /// Another process holds the device's exclusive lock.
    #[error("device locked: another process has exclusive access")]
    Locked,

    /// A write did not advance the LSN order of the device.
    #[error("out of order write: lsn {lsn} after {previous}")]
    OutOfOrder {
        /// The LSN of the rejected write.
        lsn: u64,
        /// The LSN of the last region on the device.
        previous: u64,
    },
}
