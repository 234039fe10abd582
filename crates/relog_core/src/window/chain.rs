//! The linked list of windows shared by producers and the daemon.

use super::slot::Slot;
use super::Window;
use crate::error::{CoreError, CoreResult, DurabilityFailure};
use crate::record::LogRecord;
use crate::types::Lsn;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Wake-up channel between producers and consumers of windows.
///
/// Producers only touch the mutex when someone is actually waiting.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
}

impl Signal {
    /// Wakes every waiter.
    pub(crate) fn notify(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }

    /// Sleeps until notified or `timeout` elapses, unless `ready` already holds.
    pub(crate) fn wait(&self, timeout: Duration, ready: impl Fn() -> bool) {
        let mut guard = self.lock.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        if !ready() {
            self.cond.wait_for(&mut guard, timeout);
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Recycled slot arrays.
#[derive(Debug)]
pub(crate) struct SlotPool {
    free: Mutex<Vec<Box<[Slot]>>>,
    capacity: usize,
    limit: usize,
}

impl SlotPool {
    fn new(capacity: usize, limit: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(limit)),
            capacity,
            limit,
        }
    }

    pub(crate) fn take(&self) -> Box<[Slot]> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| (0..self.capacity).map(|_| Slot::default()).collect())
    }

    fn put(&self, mut slots: Box<[Slot]>) {
        if slots.len() != self.capacity {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.limit {
            slots.iter_mut().for_each(Slot::reset);
            free.push(slots);
        }
    }

    fn available(&self) -> usize {
        self.free.lock().len()
    }
}

/// State every window of a chain points back to.
#[derive(Debug)]
pub(crate) struct ChainShared {
    pub(crate) pool: SlotPool,
    pub(crate) failure: Arc<OnceLock<DurabilityFailure>>,
    pub(crate) signal: Signal,
}

impl ChainShared {
    pub(crate) fn new(capacity: usize, pool_size: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity, pool_size),
            failure: Arc::default(),
            signal: Signal::default(),
        }
    }
}

/// The window chain.
///
/// `tail` is the oldest window not yet written; every LSN that has been
/// allocated but not appended is at or above its base. `head` is a hint
/// pointing at the newest window a record landed in, so producers usually
/// start their walk close to their target.
#[derive(Debug)]
pub struct WindowChain {
    shared: Arc<ChainShared>,
    head: RwLock<Arc<Window>>,
    tail: RwLock<Arc<Window>>,
}

impl WindowChain {
    /// Creates a chain whose first window starts at `first`.
    #[must_use]
    pub fn new(first: Lsn, capacity: usize, pool_size: usize) -> Self {
        let shared = Arc::new(ChainShared::new(capacity.max(1), pool_size));
        let window = Arc::new(Window::new(first, &shared));
        Self {
            shared,
            head: RwLock::new(Arc::clone(&window)),
            tail: RwLock::new(window),
        }
    }

    /// The newest window a record was appended to.
    #[must_use]
    pub fn head(&self) -> Arc<Window> {
        Arc::clone(&self.head.read())
    }

    /// The oldest window not yet written.
    #[must_use]
    pub fn tail(&self) -> Arc<Window> {
        Arc::clone(&self.tail.read())
    }

    /// Appends `record` to the window whose range contains its LSN.
    ///
    /// # Errors
    ///
    /// Returns the chain's durability failure if the daemon has failed, or an
    /// invariant error if the record cannot be placed.
    pub fn append(&self, record: LogRecord, sync: bool) -> CoreResult<Arc<Window>> {
        if let Some(failure) = self.failure() {
            return Err(CoreError::Durability(failure));
        }

        let lsn = record.lsn();
        let head = self.head();
        let mut window = if head.base() <= lsn { head } else { self.tail() };
        while !window.append(record.clone(), sync)? {
            window = window.next();
        }

        if window.base() > self.head.read().base() {
            let mut head = self.head.write();
            if window.base() > head.base() {
                *head = Arc::clone(&window);
            }
        }
        Ok(window)
    }

    /// Retires a written window: moves the tail to its successor and hands
    /// its slots back to the pool if nobody else still holds it.
    ///
    /// Returns the new tail.
    pub(crate) fn retire(&self, written: Arc<Window>) -> Arc<Window> {
        let next = written.next();
        *self.tail.write() = Arc::clone(&next);
        {
            let mut head = self.head.write();
            if head.base() < next.base() {
                *head = Arc::clone(&next);
            }
        }
        if let Ok(window) = Arc::try_unwrap(written) {
            self.shared.pool.put(window.into_slots());
        }
        next
    }

    /// Closes the window holding `lsn` at `lsn` unless an earlier boundary
    /// already covers it. Windows before it are closed at their natural end.
    ///
    /// # Errors
    ///
    /// Propagates invariant errors from [`Window::close`].
    pub fn close_through(&self, lsn: Lsn) -> CoreResult<()> {
        let mut window = self.tail();
        loop {
            if lsn < window.base() {
                return Ok(());
            }
            if lsn <= window.natural_end() {
                match window.end() {
                    Some(end) if end >= lsn => return Ok(()),
                    Some(_) => {}
                    None => {
                        window.close(lsn)?;
                        return Ok(());
                    }
                }
            }
            window = window.next();
        }
    }

    /// Records the daemon's terminal failure and fails every window.
    ///
    /// Windows created afterwards observe the failure through the shared
    /// cell, so no waiter can block on them forever.
    pub fn fail(&self, failure: DurabilityFailure) {
        let _ = self.shared.failure.set(failure);
        let Some(failure) = self.shared.failure.get() else {
            return;
        };
        let mut window = self.tail();
        loop {
            window.write_future().fail(failure.clone());
            let Some(next) = window.next.get().cloned() else {
                break;
            };
            window = next;
        }
        self.shared.signal.notify();
    }

    /// The daemon's terminal failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<DurabilityFailure> {
        self.shared.failure.get().cloned()
    }

    pub(crate) fn signal(&self) -> &Signal {
        &self.shared.signal
    }

    /// Slot arrays currently available for reuse.
    #[must_use]
    pub fn pooled_slot_arrays(&self) -> usize {
        self.shared.pool.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::thread;

    const TICK: Duration = Duration::from_millis(1);

    fn record(lsn: u64) -> LogRecord {
        LogRecord::new(Lsn::new(lsn), Lsn::FIRST, Bytes::from_static(b"r"))
    }

    fn failure() -> DurabilityFailure {
        DurabilityFailure {
            lsn: Lsn::new(103),
            message: "unplugged".into(),
        }
    }

    #[test]
    fn append_walks_forward_and_moves_head() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 2);
        let window = chain.append(record(109), false).unwrap();
        assert_eq!(window.base(), Lsn::new(108));
        assert_eq!(chain.head().base(), Lsn::new(108));
        assert_eq!(chain.tail().base(), Lsn::FIRST);

        // Older LSNs still find their window through the tail.
        let window = chain.append(record(101), false).unwrap();
        assert_eq!(window.base(), Lsn::FIRST);
        assert_eq!(chain.head().base(), Lsn::new(108));
    }

    #[test]
    fn retire_recycles_unshared_windows() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 2);
        for lsn in 100..104 {
            chain.append(record(lsn), false).unwrap();
        }
        let tail = chain.tail();
        tail.close(Lsn::new(103)).unwrap();
        assert_eq!(tail.wait_for_contiguous(TICK).unwrap().len(), 4);
        // The head hint still points at the same window; retire replaces it.
        let next = chain.retire(tail);
        assert_eq!(next.base(), Lsn::new(104));
        assert_eq!(chain.tail().base(), Lsn::new(104));
        assert_eq!(chain.pooled_slot_arrays(), 1);

        // The recycled slots come back clean.
        chain.append(record(104), false).unwrap();
        let next = chain.tail().next();
        assert!(next.append(record(108), false).unwrap());
        assert_eq!(chain.pooled_slot_arrays(), 0);
    }

    #[test]
    fn retire_keeps_windows_still_held() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 2);
        let held = chain.tail();
        held.close(Lsn::new(99)).unwrap();
        chain.retire(Arc::clone(&held));
        assert_eq!(chain.pooled_slot_arrays(), 0);
        assert!(held.is_empty());
    }

    #[test]
    fn close_through_targets_the_right_window() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 0);
        chain.close_through(Lsn::new(105)).unwrap();
        let first = chain.tail();
        assert_eq!(first.end(), Some(Lsn::new(103)));
        assert_eq!(first.next().end(), Some(Lsn::new(105)));

        // Already covered: no-op.
        chain.close_through(Lsn::new(104)).unwrap();
        assert_eq!(first.next().end(), Some(Lsn::new(105)));
        chain.close_through(Lsn::new(99)).unwrap();
    }

    #[test]
    fn failure_reaches_existing_and_future_windows() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 0);
        let first = chain.tail();
        let second = first.next();
        chain.fail(failure());

        assert_eq!(first.write_future().wait(), Err(failure()));
        assert_eq!(second.write_future().wait(), Err(failure()));
        assert_eq!(second.next().write_future().wait(), Err(failure()));
        assert!(matches!(
            chain.append(record(100), false),
            Err(CoreError::Durability(_))
        ));
    }

    #[test]
    fn failure_wakes_contiguous_waiter() {
        let chain = WindowChain::new(Lsn::FIRST, 4, 0);
        let window = chain.tail();
        window.close(Lsn::new(101)).unwrap();
        thread::scope(|s| {
            let waiter = s.spawn(|| window.wait_for_contiguous(TICK));
            thread::sleep(Duration::from_millis(5));
            chain.fail(failure());
            assert!(matches!(
                waiter.join().unwrap(),
                Err(CoreError::Durability(_))
            ));
        });
    }

    #[test]
    fn concurrent_producers_fill_every_window() {
        let chain = WindowChain::new(Lsn::FIRST, 16, 2);
        thread::scope(|s| {
            for t in 0..4u64 {
                let chain = &chain;
                s.spawn(move || {
                    for lsn in (100 + t..292).step_by(4) {
                        chain.append(record(lsn), false).unwrap();
                    }
                });
            }
        });

        let mut window = chain.tail();
        let mut seen = Vec::new();
        while window.base() < Lsn::new(292) {
            window.next();
            seen.extend(window.wait_for_contiguous(TICK).unwrap());
            window = chain.retire(window);
        }
        let lsns: Vec<u64> = seen.iter().map(|r| r.lsn().as_u64()).collect();
        assert_eq!(lsns, (100..292).collect::<Vec<_>>());
    }
}
