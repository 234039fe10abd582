//! A single LSN slot.

use crate::record::LogRecord;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

const EMPTY: u8 = 0;
const FILLED: u8 = 1;
const MOVED: u8 = 2;

/// One position of a window's slot array.
///
/// The record cell is set at most once. `state` moves `EMPTY -> FILLED` when
/// the record is published and `FILLED -> MOVED` when the record is handed to
/// the successor window; the second transition is a compare-and-set, so
/// exactly one of the appender and the closer performs a relocation.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    record: OnceLock<LogRecord>,
    state: AtomicU8,
    sync: AtomicBool,
}

impl Slot {
    /// Publishes `record`. Returns `false` if the slot was already taken.
    pub(crate) fn fill(&self, record: LogRecord, sync: bool) -> bool {
        if self.record.set(record).is_err() {
            return false;
        }
        self.sync.store(sync, Ordering::Relaxed);
        self.state.store(FILLED, Ordering::SeqCst);
        true
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FILLED
    }

    /// The published record, unless it is absent or was relocated.
    pub(crate) fn record(&self) -> Option<&LogRecord> {
        if self.is_filled() {
            self.record.get()
        } else {
            None
        }
    }

    /// Takes the record out for relocation. Only one caller ever wins.
    pub(crate) fn claim(&self) -> Option<(LogRecord, bool)> {
        self.state
            .compare_exchange(FILLED, MOVED, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let record = self.record.get()?.clone();
        Some((record, self.sync.load(Ordering::Relaxed)))
    }

    /// Returns the slot to its pristine state for reuse.
    pub(crate) fn reset(&mut self) {
        self.record.take();
        *self.state.get_mut() = EMPTY;
        *self.sync.get_mut() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Lsn;
    use bytes::Bytes;

    fn record(lsn: u64) -> LogRecord {
        LogRecord::new(Lsn::new(lsn), Lsn::FIRST, Bytes::from_static(b"x"))
    }

    #[test]
    fn fill_once() {
        let slot = Slot::default();
        assert!(slot.record().is_none());
        assert!(slot.fill(record(100), true));
        assert!(!slot.fill(record(100), false));
        assert_eq!(slot.record().map(LogRecord::lsn), Some(Lsn::new(100)));
    }

    #[test]
    fn claim_once() {
        let slot = Slot::default();
        assert!(slot.claim().is_none());
        slot.fill(record(100), true);
        let (claimed, sync) = slot.claim().unwrap();
        assert_eq!(claimed.lsn(), Lsn::new(100));
        assert!(sync);
        assert!(slot.claim().is_none());
        assert!(slot.record().is_none());
    }

    #[test]
    fn reset_makes_slot_reusable() {
        let mut slot = Slot::default();
        slot.fill(record(100), true);
        slot.claim();
        slot.reset();
        assert!(slot.fill(record(200), false));
        assert_eq!(slot.record().map(LogRecord::lsn), Some(Lsn::new(200)));
    }
}
