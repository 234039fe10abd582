//! Completion handles for durability.

use crate::error::{CoreError, CoreResult, DurabilityFailure};
use crate::types::Lsn;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// How often a future waiter re-checks the chain-wide failure cell.
const FAILURE_RECHECK: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct FutureState {
    outcome: Mutex<Option<Result<(), DurabilityFailure>>>,
    cond: Condvar,
}

/// Completion handle of one window's write.
///
/// Completes once, either successfully after the window's region is on the
/// device, or with the daemon's terminal failure. A window created after the
/// daemon failed sees that failure through the chain-wide cell it shares.
#[derive(Debug, Clone)]
pub struct WriteFuture {
    state: Arc<FutureState>,
    chain_failure: Arc<OnceLock<DurabilityFailure>>,
}

impl WriteFuture {
    pub(crate) fn new(chain_failure: Arc<OnceLock<DurabilityFailure>>) -> Self {
        Self {
            state: Arc::new(FutureState::default()),
            chain_failure,
        }
    }

    pub(crate) fn complete(&self) {
        self.resolve(Ok(()));
    }

    pub(crate) fn fail(&self, failure: DurabilityFailure) {
        self.resolve(Err(failure));
    }

    fn resolve(&self, outcome: Result<(), DurabilityFailure>) {
        let mut slot = self.state.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.state.cond.notify_all();
        }
    }

    /// Returns the outcome if the future has resolved.
    #[must_use]
    pub fn poll(&self) -> Option<Result<(), DurabilityFailure>> {
        if let Some(outcome) = self.state.outcome.lock().clone() {
            return Some(outcome);
        }
        self.chain_failure.get().cloned().map(Err)
    }

    /// Returns whether the future has resolved.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.poll().is_some()
    }

    /// Blocks until the window is written or the daemon fails.
    ///
    /// # Errors
    ///
    /// Returns the daemon's terminal failure.
    pub fn wait(&self) -> Result<(), DurabilityFailure> {
        let mut slot = self.state.outcome.lock();
        loop {
            if let Some(outcome) = slot.clone() {
                return outcome;
            }
            if let Some(failure) = self.chain_failure.get() {
                return Err(failure.clone());
            }
            self.state.cond.wait_for(&mut slot, FAILURE_RECHECK);
        }
    }

    /// Like [`wait`](WriteFuture::wait) but gives up after `timeout`.
    ///
    /// Returns `None` if the future is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), DurabilityFailure>> {
        let mut slot = self.state.outcome.lock();
        if slot.is_none() && self.chain_failure.get().is_none() {
            self.state.cond.wait_for(&mut slot, timeout);
        }
        drop(slot);
        self.poll()
    }
}

#[derive(Debug)]
struct WatermarkState {
    durable: Lsn,
    failure: Option<DurabilityFailure>,
    closed: bool,
}

/// Highest LSN known to be on the device.
///
/// Regions are written in LSN order, so one watermark answers "is LSN x
/// durable" for every record, including records relocated between windows
/// after their producer returned.
#[derive(Debug)]
pub struct DurableWatermark {
    state: Mutex<WatermarkState>,
    cond: Condvar,
}

impl DurableWatermark {
    /// Creates a watermark at `durable`.
    #[must_use]
    pub fn new(durable: Lsn) -> Self {
        Self {
            state: Mutex::new(WatermarkState {
                durable,
                failure: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Returns the highest durable LSN.
    #[must_use]
    pub fn durable(&self) -> Lsn {
        self.state.lock().durable
    }

    pub(crate) fn advance(&self, lsn: Lsn) {
        let mut state = self.state.lock();
        if lsn > state.durable {
            state.durable = lsn;
            self.cond.notify_all();
        }
    }

    pub(crate) fn fail(&self, failure: DurabilityFailure) {
        let mut state = self.state.lock();
        state.failure.get_or_insert(failure);
        self.cond.notify_all();
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    /// Blocks until `lsn` is durable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Durability`] if the daemon failed first, or
    /// [`CoreError::ShutDown`] if the engine shut down without writing `lsn`.
    pub fn wait_for(&self, lsn: Lsn) -> CoreResult<()> {
        let mut state = self.state.lock();
        loop {
            if state.durable >= lsn {
                return Ok(());
            }
            if let Some(failure) = &state.failure {
                return Err(CoreError::Durability(failure.clone()));
            }
            if state.closed {
                return Err(CoreError::ShutDown);
            }
            self.cond.wait(&mut state);
        }
    }
}
