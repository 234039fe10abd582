//! Error types for relog core.

use crate::types::Lsn;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in relog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Append device error.
    #[error("storage error: {0}")]
    Storage(#[from] relog_storage::StorageError),

    /// Action payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A region is malformed or was written in a rejected format.
    #[error("integrity failure in region at {lsn}: {message}")]
    Integrity {
        /// LSN the region was written at.
        lsn: Lsn,
        /// Description of the failure.
        message: String,
    },

    /// A region's stored checksum does not match its payloads.
    #[error("checksum mismatch in region at {lsn}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// LSN the region was written at.
        lsn: Lsn,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Recovery could not reconstruct state from the log.
    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    /// The durability daemon hit an I/O failure; the engine is unusable.
    #[error(transparent)]
    Durability(#[from] DurabilityFailure),

    /// A structural invariant of the window chain was violated.
    #[error("invariant violated: {message}")]
    Invariant {
        /// Description of the violation.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The engine has been shut down.
    #[error("log engine is shut down")]
    ShutDown,
}

impl CoreError {
    /// Creates an integrity error for the region written at `lsn`.
    pub fn integrity(lsn: Lsn, message: impl Into<String>) -> Self {
        Self::Integrity {
            lsn,
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns whether this error leaves the engine permanently unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidOperation { .. } | Self::Codec(_))
    }
}

/// Errors raised by the payload codec collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before a field was complete.
    #[error("payload truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// An envelope or action tag is not recognised.
    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),

    /// The payload is structurally invalid.
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Why a recovery attempt was aborted.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The backward scan found a hole in the LSN sequence.
    ///
    /// `found` is [`Lsn::NONE`] when the scan ran off the start of the log.
    #[error("lsn gap: expected {expected}, found {found}")]
    LsnGap {
        /// The LSN the scan needed next.
        expected: Lsn,
        /// The LSN it encountered instead.
        found: Lsn,
    },

    /// A record's payload could not be decoded.
    #[error("cannot decode record {lsn}: {source}")]
    Decode {
        /// LSN of the undecodable record.
        lsn: Lsn,
        /// Underlying codec failure.
        source: CodecError,
    },

    /// An action's `replay` failed.
    #[error("replay of {lsn} failed: {source}")]
    Replay {
        /// LSN of the failing action.
        lsn: Lsn,
        /// The action's error.
        source: ReplayError,
    },

    /// A replay worker went away before the scan finished.
    #[error("replay worker {worker} terminated unexpectedly")]
    WorkerLost {
        /// Index of the lost worker.
        worker: usize,
    },
}

/// Error returned by [`crate::Action::replay`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ReplayError {
    message: String,
}

impl ReplayError {
    /// Creates a replay error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The terminal failure of the durability daemon.
///
/// Cloned into every pending write future so that no waiter blocks forever.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("durability failure writing region at {lsn}: {message}")]
pub struct DurabilityFailure {
    /// End LSN of the region whose write failed.
    pub lsn: Lsn,
    /// Description of the underlying I/O error.
    pub message: String,
}
