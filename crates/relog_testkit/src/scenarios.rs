//! End-to-end recovery scenarios.
//!
//! Helpers here check properties every recovered [`TestLog`] must satisfy;
//! the tests below drive whole engines through appends, crashes and
//! restarts.

use crate::fixtures::TestLog;
use relog_core::Lsn;
use std::collections::HashSet;

/// Asserts that recovery replayed no LSN twice and that the store saw
/// exactly what the report counted.
pub fn assert_replayed_at_most_once(log: &TestLog) {
    let replayed = log.store.replayed();
    let unique: HashSet<Lsn> = replayed.iter().copied().collect();
    assert_eq!(unique.len(), replayed.len(), "an LSN was replayed twice");
    assert_eq!(replayed.len() as u64, log.report.replayed);
}

/// Asserts that none of `lsns` was replayed.
pub fn assert_not_replayed(log: &TestLog, lsns: &[Lsn]) {
    let replayed: HashSet<Lsn> = log.store.replayed().into_iter().collect();
    for lsn in lsns {
        assert!(!replayed.contains(lsn), "{lsn} was replayed");
    }
}

/// Asserts that the replayed subset of `lsns` ran newest first.
pub fn assert_replayed_newest_first(log: &TestLog, lsns: &[Lsn]) {
    let wanted: HashSet<Lsn> = lsns.iter().copied().collect();
    let order: Vec<Lsn> = log
        .store
        .replayed()
        .into_iter()
        .filter(|lsn| wanted.contains(lsn))
        .collect();
    assert!(
        order.windows(2).all(|pair| pair[0] > pair[1]),
        "replay order {order:?} is not newest first"
    );
}
