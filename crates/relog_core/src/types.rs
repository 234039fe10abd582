//! Core type definitions for relog.

use std::fmt;

/// Log sequence number.
///
/// Every record in the log carries a unique LSN. LSNs are handed out by the
/// [`crate::Sequencer`] in strictly increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Marker for "no LSN".
    pub const NONE: Self = Self(0);

    /// The first LSN a fresh log hands out. Lower values are reserved.
    pub const FIRST: Self = Self(100);

    /// Creates an LSN from its raw value.
    #[must_use]
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the raw LSN value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following LSN.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the preceding LSN, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Returns whether this is [`Lsn::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_ordering_and_steps() {
        let lsn = Lsn::FIRST;
        assert!(lsn < lsn.next());
        assert_eq!(lsn.next().prev(), lsn);
        assert_eq!(Lsn::NONE.prev(), Lsn::NONE);
    }

    #[test]
    fn first_lsn_is_reserved_above_none() {
        assert!(Lsn::NONE.is_none());
        assert!(!Lsn::FIRST.is_none());
        assert!(Lsn::NONE < Lsn::FIRST);
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", Lsn::new(105)), "lsn:105");
        assert_eq!(format!("{}", TransactionId::new(7)), "txn:7");
    }
}
