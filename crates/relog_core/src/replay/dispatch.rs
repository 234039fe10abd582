//! Fan-out of surviving actions to replay workers.

use crate::action::Action;
use crate::error::{CoreResult, RecoveryError};
use crate::types::Lsn;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Actions a worker may have queued before the scan thread blocks.
const WORKER_QUEUE_DEPTH: usize = 1024;

struct Job<A> {
    action: A,
    lsn: Lsn,
}

#[derive(Default)]
struct PoolState {
    aborted: AtomicBool,
    replayed: AtomicU64,
    first_error: Mutex<Option<RecoveryError>>,
}

impl PoolState {
    fn record_failure(&self, error: RecoveryError) {
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(error);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Runs actions either on the scan thread or on a fixed worker pool.
///
/// Actions with the same concurrency bucket always go to the same worker, so
/// they are replayed in the order the scan produced them.
pub(crate) struct Dispatcher<A> {
    senders: Vec<Sender<Job<A>>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
}

impl<A: Action> Dispatcher<A> {
    /// Spawns `workers` replay threads; zero replays inline.
    pub(crate) fn new(workers: usize) -> CoreResult<Self> {
        let state = Arc::new(PoolState::default());
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = channel::bounded(WORKER_QUEUE_DEPTH);
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("relog-replay-{index}"))
                .spawn(move || work(&rx, &state))?;
            senders.push(tx);
            handles.push(handle);
        }
        Ok(Self {
            senders,
            workers: handles,
            state,
        })
    }

    /// Hands `action` to its bucket's worker.
    ///
    /// Returns `false` once replay has failed; the action is then disposed
    /// instead of replayed and the scan should stop.
    pub(crate) fn dispatch(&mut self, action: A, lsn: Lsn) -> bool {
        if self.state.is_aborted() {
            action.dispose();
            return false;
        }

        if self.senders.is_empty() {
            return match action.replay(lsn) {
                Ok(()) => {
                    self.state.replayed.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(source) => {
                    self.state.record_failure(RecoveryError::Replay { lsn, source });
                    false
                }
            };
        }

        let worker = (action.replay_concurrency() % self.senders.len() as u64) as usize;
        match self.senders[worker].send(Job { action, lsn }) {
            Ok(()) => true,
            Err(channel::SendError(job)) => {
                job.action.dispose();
                self.state.record_failure(RecoveryError::WorkerLost { worker });
                false
            }
        }
    }

    /// Waits for every queued action and returns how many were replayed.
    pub(crate) fn finish(self) -> Result<u64, RecoveryError> {
        let state = Arc::clone(&self.state);
        self.join();
        let first = state.first_error.lock().take();
        match first {
            Some(error) => Err(error),
            None => Ok(state.replayed.load(Ordering::SeqCst)),
        }
    }

    /// Stops replaying. Workers dispose whatever is still queued.
    ///
    /// Returns the first replay failure, if one happened before the abort.
    pub(crate) fn abort(self) -> Option<RecoveryError> {
        self.state.aborted.store(true, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        self.join();
        let first = state.first_error.lock().take();
        first
    }

    fn join(self) {
        let Self {
            senders,
            workers,
            state,
        } = self;
        drop(senders);
        for (worker, handle) in workers.into_iter().enumerate() {
            if handle.join().is_err() {
                state.record_failure(RecoveryError::WorkerLost { worker });
            }
        }
    }
}

fn work<A: Action>(rx: &Receiver<Job<A>>, state: &PoolState) {
    for Job { action, lsn } in rx {
        if state.is_aborted() {
            action.dispose();
            continue;
        }
        match action.replay(lsn) {
            Ok(()) => {
                state.replayed.fetch_add(1, Ordering::Relaxed);
            }
            Err(source) => state.record_failure(RecoveryError::Replay { lsn, source }),
        }
    }
}
