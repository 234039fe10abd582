//! Fixed-capacity LSN windows and the chain that links them.
//!
//! A window covers the LSN range `[base, base + capacity)`. Producers publish
//! records into its slots without locking; the durability daemon closes it at
//! some end LSN, waits until every slot up to that end is filled, and writes
//! the records out as one region. Records that land beyond the end are moved
//! into the successor window, whose base is always `end + 1`.

mod chain;
mod slot;

pub use chain::WindowChain;
pub(crate) use chain::ChainShared;

use crate::error::{CoreError, CoreResult};
use crate::future::WriteFuture;
use crate::record::LogRecord;
use crate::types::Lsn;
use slot::Slot;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Marker for an end boundary that has not been fixed yet.
const OPEN: u64 = u64::MAX;

/// A contiguous LSN range of the log.
#[derive(Debug)]
pub struct Window {
    base: Lsn,
    slots: Box<[Slot]>,
    end: AtomicU64,
    /// Highest LSN appended with a sync request, 0 if none.
    sync_requested: AtomicU64,
    appended: AtomicUsize,
    next: OnceLock<Arc<Window>>,
    future: WriteFuture,
    shared: Arc<ChainShared>,
}

impl Window {
    pub(crate) fn new(base: Lsn, shared: &Arc<ChainShared>) -> Self {
        Self {
            base,
            slots: shared.pool.take(),
            end: AtomicU64::new(OPEN),
            sync_requested: AtomicU64::new(0),
            appended: AtomicUsize::new(0),
            next: OnceLock::new(),
            future: WriteFuture::new(Arc::clone(&shared.failure)),
            shared: Arc::clone(shared),
        }
    }

    /// First LSN of the window.
    #[must_use]
    pub fn base(&self) -> Lsn {
        self.base
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Last LSN the window can hold.
    #[must_use]
    pub fn natural_end(&self) -> Lsn {
        Lsn::new(self.base.as_u64() + self.slots.len() as u64 - 1)
    }

    /// The fixed end boundary, or `None` while the window is open.
    #[must_use]
    pub fn end(&self) -> Option<Lsn> {
        match self.end.load(Ordering::SeqCst) {
            OPEN => None,
            end => Some(Lsn::new(end)),
        }
    }

    /// Returns whether the end boundary has been fixed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end().is_some()
    }

    /// Returns whether the window holds no records.
    ///
    /// A closed window is empty when it was closed at `base - 1`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self.end() {
            Some(end) => end < self.base,
            None => self.appended.load(Ordering::SeqCst) == 0,
        }
    }

    /// Returns whether a record appended here asked for a device sync.
    ///
    /// Relocated records keep their request, so a request may be seen both
    /// here and in the successor.
    #[must_use]
    pub fn is_sync_requested(&self) -> bool {
        self.sync_requested.load(Ordering::SeqCst) >= self.base.as_u64()
    }

    /// Returns whether the daemon has a reason to process this window.
    pub(crate) fn has_work(&self) -> bool {
        self.is_closed() || self.appended.load(Ordering::SeqCst) > 0
    }

    /// Completion handle of this window's write.
    #[must_use]
    pub fn write_future(&self) -> &WriteFuture {
        &self.future
    }

    /// Publishes `record` into its slot.
    ///
    /// Returns `Ok(false)` if the record's LSN lies past this window so the
    /// caller can move on to [`next`](Window::next). A record beyond an
    /// already fixed end is accepted and moved into the successor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invariant`] for an LSN below the window's base or
    /// for a slot that is already filled.
    pub fn append(&self, record: LogRecord, sync: bool) -> CoreResult<bool> {
        let lsn = record.lsn();
        let offset = lsn
            .as_u64()
            .checked_sub(self.base.as_u64())
            .ok_or_else(|| {
                CoreError::invariant(format!("{lsn} is below window base {}", self.base))
            })?;
        let Some(slot) = usize::try_from(offset)
            .ok()
            .and_then(|offset| self.slots.get(offset))
        else {
            return Ok(false);
        };

        // Raised before the fill: whoever sees the slot filled sees the request.
        if sync {
            self.sync_requested
                .fetch_max(lsn.as_u64(), Ordering::SeqCst);
        }
        if !slot.fill(record, sync) {
            return Err(CoreError::invariant(format!("slot for {lsn} filled twice")));
        }
        self.appended.fetch_add(1, Ordering::SeqCst);

        if self.end().is_some_and(|end| lsn > end) {
            self.relocate(slot)?;
        }
        self.shared.signal.notify();
        Ok(true)
    }

    /// Returns the successor window, creating it on first use.
    ///
    /// An open window is closed at its natural end first, so the successor's
    /// base is always this window's end plus one. Concurrent callers observe
    /// a single successor.
    pub fn next(&self) -> Arc<Window> {
        Arc::clone(self.next.get_or_init(|| {
            let natural = self.natural_end().as_u64();
            let _ = self
                .end
                .compare_exchange(OPEN, natural, Ordering::SeqCst, Ordering::SeqCst);
            let end = self.end.load(Ordering::SeqCst);
            Arc::new(Window::new(Lsn::new(end + 1), &self.shared))
        }))
    }

    /// Fixes the end boundary.
    ///
    /// Only the first call fixes a boundary; the result reports whether `end`
    /// equals the boundary now in force. Records already published past
    /// `end` are moved into the successor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invariant`] if `end` lies outside
    /// `[base - 1, base + capacity - 1]`.
    pub fn close(&self, end: Lsn) -> CoreResult<bool> {
        let lowest = self.base.prev();
        let highest = self.natural_end();
        if end < lowest || end > highest {
            return Err(CoreError::invariant(format!(
                "cannot close window {}..={highest} at {end}",
                self.base
            )));
        }

        match self
            .end
            .compare_exchange(OPEN, end.as_u64(), Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                let first_beyond = (end.as_u64() + 1 - self.base.as_u64()) as usize;
                for slot in &self.slots[first_beyond..] {
                    self.relocate(slot)?;
                }
                self.shared.signal.notify();
                Ok(true)
            }
            Err(fixed) => Ok(fixed == end.as_u64()),
        }
    }

    fn relocate(&self, slot: &Slot) -> CoreResult<()> {
        let Some((record, sync)) = slot.claim() else {
            return Ok(());
        };
        tracing::trace!(lsn = %record.lsn(), base = %self.base, "relocating record");
        let mut target = self.next();
        while !target.append(record.clone(), sync)? {
            target = target.next();
        }
        Ok(())
    }

    /// Blocks until every slot in `[base, end]` is filled and returns the
    /// records in LSN order.
    ///
    /// Re-checks at least every `interval`, so a fill racing with the wait
    /// is never missed for long.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invariant`] if the window is still open and
    /// [`CoreError::Durability`] if the chain failed while waiting.
    pub fn wait_for_contiguous(&self, interval: Duration) -> CoreResult<Vec<LogRecord>> {
        let end = self
            .end()
            .ok_or_else(|| CoreError::invariant(format!("window {} is still open", self.base)))?;
        let count = (end.as_u64() + 1 - self.base.as_u64()) as usize;

        let mut ready = 0;
        loop {
            while ready < count && self.slots[ready].is_filled() {
                ready += 1;
            }
            if ready == count {
                break;
            }
            if let Some(failure) = self.shared.failure.get() {
                return Err(CoreError::Durability(failure.clone()));
            }
            let pending = &self.slots[ready];
            self.shared.signal.wait(interval, || pending.is_filled());
        }

        Ok(self.slots[..count]
            .iter()
            .filter_map(Slot::record)
            .cloned()
            .collect())
    }

    pub(crate) fn into_slots(self) -> Box<[Slot]> {
        self.slots
    }
}
