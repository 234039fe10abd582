//! LSN allocation.

use crate::types::Lsn;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out LSNs.
///
/// The counter and the high-water mark live here rather than in process-wide
/// state, so several engines can coexist and tests can start at any LSN.
#[derive(Debug)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// Creates a sequencer whose first allocation returns `first`.
    #[must_use]
    pub fn new(first: Lsn) -> Self {
        Self {
            next: AtomicU64::new(first.as_u64()),
        }
    }

    /// Allocates the next LSN. Never blocks, never repeats.
    pub fn allocate(&self) -> Lsn {
        Lsn::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the LSN the next allocation will return.
    #[must_use]
    pub fn peek(&self) -> Lsn {
        Lsn::new(self.next.load(Ordering::SeqCst))
    }

    /// Returns the highest LSN allocated so far (the high-water mark).
    ///
    /// Before the first allocation this is the LSN just below the first one.
    #[must_use]
    pub fn current(&self) -> Lsn {
        self.peek().prev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn allocation_starts_at_first() {
        let sequencer = Sequencer::new(Lsn::FIRST);
        assert_eq!(sequencer.current(), Lsn::new(99));
        assert_eq!(sequencer.allocate(), Lsn::FIRST);
        assert_eq!(sequencer.current(), Lsn::FIRST);
        assert_eq!(sequencer.peek(), Lsn::new(101));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let sequencer = Arc::new(Sequencer::new(Lsn::FIRST));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sequencer = Arc::clone(&sequencer);
                thread::spawn(move || {
                    let mut seen: Vec<Lsn> = (0..1_000).map(|_| sequencer.allocate()).collect();
                    // Each thread observes its own allocations in increasing order.
                    assert!(seen.windows(2).all(|w| w[0] < w[1]));
                    seen.sort();
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for lsn in handle.join().unwrap() {
                assert!(all.insert(lsn), "duplicate {lsn}");
            }
        }
        assert_eq!(all.len(), 8_000);
        assert_eq!(sequencer.current(), Lsn::new(100 + 8_000 - 1));
    }

    proptest! {
        #[test]
        fn allocations_strictly_increase(first in 100u64..u64::MAX / 2, count in 1usize..200) {
            let sequencer = Sequencer::new(Lsn::new(first));
            let lsns: Vec<Lsn> = (0..count).map(|_| sequencer.allocate()).collect();
            prop_assert!(lsns.windows(2).all(|w| w[1] == w[0].next()));
            prop_assert_eq!(sequencer.current(), *lsns.last().unwrap());
        }
    }
}
