//! The durable envelope around an encoded action.

use crate::types::Lsn;
use bytes::Bytes;

/// One record of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    lsn: Lsn,
    lowest_lsn: Lsn,
    payload: Bytes,
}

impl LogRecord {
    /// Creates a record.
    ///
    /// `lowest_lsn` is the oldest LSN still live in the store when the record
    /// was created; recovery uses the newest record's value as its default
    /// scan boundary.
    #[must_use]
    pub fn new(lsn: Lsn, lowest_lsn: Lsn, payload: Bytes) -> Self {
        Self {
            lsn,
            lowest_lsn,
            payload,
        }
    }

    /// Returns the record's LSN.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Returns the LSN immediately before this one in the contiguous log.
    #[must_use]
    pub fn previous_lsn(&self) -> Lsn {
        self.lsn.prev()
    }

    /// Returns the lowest live LSN stamped on the record.
    #[must_use]
    pub fn lowest_lsn(&self) -> Lsn {
        self.lowest_lsn
    }

    /// Returns the encoded action.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the encoded size of the record inside a region.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        crate::region::RECORD_HEADER_SIZE + self.payload.len()
    }
}
