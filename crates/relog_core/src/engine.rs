//! The log engine facade.

use crate::action::{Action, ActionCodec, LoggedAction};
use crate::config::{Config, RecoveryOptions};
use crate::daemon::{DaemonContext, DurabilityDaemon};
use crate::error::{CoreError, CoreResult};
use crate::future::DurableWatermark;
use crate::record::LogRecord;
use crate::replay::{self, RecoveryReport};
use crate::sequencer::Sequencer;
use crate::types::{Lsn, TransactionId};
use crate::window::WindowChain;
use parking_lot::{Mutex, RwLock};
use relog_storage::AppendDevice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle state of a [`LogEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting appends.
    Running,
    /// The durability daemon hit an I/O error; every operation fails.
    Failed,
    /// [`LogEngine::shutdown`] has run.
    ShutDown,
}

/// Proof that an action was sequenced, and a handle to await its durability.
#[derive(Debug, Clone)]
#[must_use = "an append is only durable once its receipt has been awaited"]
pub struct AppendReceipt {
    lsn: Lsn,
    watermark: Arc<DurableWatermark>,
}

impl AppendReceipt {
    /// The LSN assigned to the action.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Returns whether the record has been written.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.watermark.durable() >= self.lsn
    }

    /// Blocks until the record has been written (and synced, if requested).
    ///
    /// # Errors
    ///
    /// Returns the daemon's failure, or [`CoreError::ShutDown`] if the
    /// engine stopped first.
    pub fn wait(&self) -> CoreResult<Lsn> {
        self.watermark.wait_for(self.lsn)?;
        Ok(self.lsn)
    }
}

/// A durable, crash-consistent append-only log.
///
/// Producers on any thread call [`append`](LogEngine::append); a background
/// daemon batches their records into regions and writes them to the append
/// device in LSN order. Opening an engine first replays the device's log
/// through the codec's actions.
pub struct LogEngine<C: ActionCodec> {
    codec: C,
    context: Arc<DaemonContext>,
    daemon: Mutex<Option<DurabilityDaemon>>,
    lowest_live: AtomicU64,
    next_txn: AtomicU64,
    is_open: RwLock<bool>,
}

impl<C: ActionCodec> LogEngine<C> {
    /// Recovers the log stored in `device` and starts the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, recovery fails, or
    /// the daemon thread cannot be spawned.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use relog_core::{Config, LogEngine};
    /// use relog_storage::MemoryDevice;
    ///
    /// let (engine, report) = LogEngine::open(MemoryDevice::new(), MyCodec, Config::default())?;
    /// let receipt = engine.append(my_action, true)?;
    /// receipt.wait()?;
    /// ```
    pub fn open<D>(device: D, codec: C, config: Config) -> CoreResult<(Self, RecoveryReport)>
    where
        D: AppendDevice + 'static,
    {
        Self::open_with(device, codec, config, RecoveryOptions::new())
    }

    /// Like [`open`](LogEngine::open) with explicit recovery options.
    ///
    /// # Errors
    ///
    /// See [`open`](LogEngine::open).
    pub fn open_with<D>(
        mut device: D,
        codec: C,
        config: Config,
        options: RecoveryOptions,
    ) -> CoreResult<(Self, RecoveryReport)>
    where
        D: AppendDevice + 'static,
    {
        config.validate()?;
        let report = replay::recover(&mut device, &codec, &config, options)?;

        let first = report.next_lsn();
        let context = Arc::new(DaemonContext::new(
            Arc::new(WindowChain::new(
                first,
                config.window_capacity,
                config.slot_pool_size,
            )),
            Arc::new(Sequencer::new(first)),
            Arc::new(DurableWatermark::new(first.prev())),
            config,
        ));
        let daemon = DurabilityDaemon::start(Arc::clone(&context), device)?;
        let next_txn = report.max_transaction.map_or(1, |txn| txn.as_u64() + 1);

        tracing::info!(next_lsn = %first, next_txn, "log engine started");
        let engine = Self {
            codec,
            context,
            daemon: Mutex::new(Some(daemon)),
            lowest_live: AtomicU64::new(report.boundary.as_u64()),
            next_txn: AtomicU64::new(next_txn),
            is_open: RwLock::new(true),
        };
        Ok((engine, report))
    }

    /// Sequences `action` and queues it for the durability daemon.
    ///
    /// The action's [`record`](crate::Action::record) runs with the assigned
    /// LSN before this returns. With `sync`, the region holding the record is
    /// synced to the device before the receipt resolves.
    ///
    /// # Errors
    ///
    /// Fails if the engine is shut down or failed, or if encoding fails. The
    /// action is disposed in every error case.
    pub fn append(&self, action: C::Action, sync: bool) -> CoreResult<AppendReceipt> {
        self.log(LoggedAction::Plain(action), sync)
    }

    /// Appends with a sync request and waits for durability.
    ///
    /// # Errors
    ///
    /// See [`append`](LogEngine::append) and [`AppendReceipt::wait`].
    pub fn append_sync(&self, action: C::Action) -> CoreResult<Lsn> {
        self.append(action, true)?.wait()
    }

    /// Starts a transaction whose members only survive recovery once its
    /// commit record is durable.
    pub fn begin_transaction(&self) -> Transaction<'_, C> {
        let id = TransactionId::new(self.next_txn.fetch_add(1, Ordering::SeqCst));
        Transaction {
            engine: self,
            id,
            members: Vec::new(),
        }
    }

    fn log(&self, logged: LoggedAction<C::Action>, sync: bool) -> CoreResult<AppendReceipt> {
        let is_open = self.is_open.read();
        if !*is_open {
            logged.dispose();
            return Err(CoreError::ShutDown);
        }
        if let Some(failure) = self.context.chain.failure() {
            logged.dispose();
            return Err(failure.into());
        }
        let payload = match logged.encode(&self.codec) {
            Ok(payload) => payload,
            Err(err) => {
                logged.dispose();
                return Err(err.into());
            }
        };

        let lsn = self.context.sequencer.allocate();
        let record = LogRecord::new(lsn, self.lowest_live_lsn(), payload);
        // The LSN lands in a window before the action sees it.
        if let Err(err) = self.context.chain.append(record, sync) {
            logged.dispose();
            return Err(err);
        }
        drop(is_open);
        if let Some(action) = logged.into_action() {
            action.record(lsn);
        }

        Ok(AppendReceipt {
            lsn,
            watermark: Arc::clone(&self.context.watermark),
        })
    }

    /// Blocks until every LSN up to `lsn` is durable.
    ///
    /// # Errors
    ///
    /// See [`AppendReceipt::wait`].
    pub fn wait_durable(&self, lsn: Lsn) -> CoreResult<()> {
        self.context.watermark.wait_for(lsn)
    }

    /// Highest LSN written to the device.
    #[must_use]
    pub fn durable_lsn(&self) -> Lsn {
        self.context.watermark.durable()
    }

    /// Highest LSN handed out so far.
    #[must_use]
    pub fn current_lsn(&self) -> Lsn {
        self.context.sequencer.current()
    }

    /// Records the oldest LSN still live in the store.
    ///
    /// Every later record carries the value, and recovery stops there when
    /// no explicit boundary is supplied. The value never moves backward.
    pub fn set_lowest_live_lsn(&self, lsn: Lsn) {
        self.lowest_live.fetch_max(lsn.as_u64(), Ordering::SeqCst);
    }

    /// The lowest live LSN stamped into new records.
    #[must_use]
    pub fn lowest_live_lsn(&self) -> Lsn {
        Lsn::new(self.lowest_live.load(Ordering::SeqCst))
    }

    /// Closes the current window at the high-water LSN and waits until
    /// everything up to it is durable.
    ///
    /// Appends racing with the barrier are carried into the next window.
    /// Returns the LSN the barrier covered.
    ///
    /// # Errors
    ///
    /// Fails if the engine is shut down or failed.
    pub fn freeze(&self) -> CoreResult<Lsn> {
        let high_water = {
            let _open = self.ensure_open()?;
            let high_water = self.context.sequencer.current();
            self.context.chain.close_through(high_water)?;
            high_water
        };
        self.context.chain.signal().notify();
        self.context.watermark.wait_for(high_water)?;
        tracing::debug!(lsn = %high_water, "freeze barrier reached");
        Ok(high_water)
    }

    /// Stops accepting appends, writes everything already sequenced and
    /// stops the daemon. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the daemon's failure if it failed at any point.
    pub fn shutdown(&self) -> CoreResult<()> {
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return Ok(());
            }
            *is_open = false;
        }

        self.context.shutdown.store(true, Ordering::SeqCst);
        self.context.chain.signal().notify();
        let result = self.daemon.lock().take().map_or(Ok(()), DurabilityDaemon::join);
        self.context.watermark.close();
        tracing::info!(durable = %self.durable_lsn(), "log engine shut down");
        result
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.context.chain.failure().is_some() {
            EngineState::Failed
        } else if *self.is_open.read() {
            EngineState::Running
        } else {
            EngineState::ShutDown
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// The payload codec.
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn ensure_open(&self) -> CoreResult<parking_lot::RwLockReadGuard<'_, bool>> {
        let is_open = self.is_open.read();
        if !*is_open {
            return Err(CoreError::ShutDown);
        }
        if let Some(failure) = self.context.chain.failure() {
            return Err(failure.into());
        }
        Ok(is_open)
    }
}

impl<C: ActionCodec> std::fmt::Debug for LogEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEngine")
            .field("state", &self.state())
            .field("current_lsn", &self.current_lsn())
            .field("durable_lsn", &self.durable_lsn())
            .finish_non_exhaustive()
    }
}

impl<C: ActionCodec> Drop for LogEngine<C> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// A group of actions that recovery replays all together or not at all.
///
/// Dropping a transaction without committing it leaves its members in the
/// log, where recovery voids them.
#[derive(Debug)]
#[must_use = "a transaction has no effect unless committed"]
pub struct Transaction<'e, C: ActionCodec> {
    engine: &'e LogEngine<C>,
    id: TransactionId,
    members: Vec<Lsn>,
}

impl<C: ActionCodec> Transaction<'_, C> {
    /// The transaction's id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// LSNs of the members appended so far.
    #[must_use]
    pub fn members(&self) -> &[Lsn] {
        &self.members
    }

    /// Appends a member action.
    ///
    /// # Errors
    ///
    /// See [`LogEngine::append`].
    pub fn append(&mut self, action: C::Action) -> CoreResult<Lsn> {
        let receipt = self.engine.log(
            LoggedAction::Member {
                txn: self.id,
                action,
            },
            false,
        )?;
        self.members.push(receipt.lsn());
        Ok(receipt.lsn())
    }

    /// Appends the commit record.
    ///
    /// # Errors
    ///
    /// See [`LogEngine::append`].
    pub fn commit(self, sync: bool) -> CoreResult<AppendReceipt> {
        self.engine.log(LoggedAction::Commit { txn: self.id }, sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::{Journal, Tracked, TrackedCodec};
    use crate::config::SyncPolicy;
    use relog_storage::MemoryDevice;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;
    use std::time::Duration;

    fn config() -> Config {
        Config::default()
            .window_capacity(16)
            .replay_workers(2)
            .daemon_poll_interval(Duration::from_millis(1))
    }

    fn open(device: &MemoryDevice) -> (LogEngine<TrackedCodec>, RecoveryReport, Journal) {
        let codec = TrackedCodec::default();
        let journal = codec.journal.clone();
        let (engine, report) = LogEngine::open(device.clone(), codec, config()).unwrap();
        (engine, report, journal)
    }

    #[test]
    fn empty_device_starts_at_first() {
        let (engine, report, _) = open(&MemoryDevice::new());
        assert_eq!(report.highest_lsn, None);
        assert_eq!(engine.current_lsn(), Lsn::new(99));
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn append_records_then_replays_after_reopen() {
        let device = MemoryDevice::new();
        let (engine, _, journal) = open(&device);
        let first = engine.append(Tracked::new(1, &journal), false).unwrap();
        let second = engine.append_sync(Tracked::new(2, &journal)).unwrap();
        assert_eq!(first.lsn(), Lsn::FIRST);
        assert_eq!(second, Lsn::new(101));
        assert!(first.is_durable());
        assert_eq!(
            journal.entries("record"),
            [(1, Lsn::new(100)), (2, Lsn::new(101))]
        );
        engine.shutdown().unwrap();

        let (engine, report, journal) = open(&device);
        assert_eq!(report.highest_lsn, Some(Lsn::new(101)));
        assert_eq!(report.replayed, 2);
        let mut replayed = journal.entries("replay");
        replayed.sort();
        assert_eq!(replayed, [(1, Lsn::new(100)), (2, Lsn::new(101))]);
        assert_eq!(engine.append_sync(Tracked::new(3, &journal)).unwrap(), Lsn::new(102));
    }

    #[test]
    fn panicking_action_does_not_stall_the_log() {
        let device = MemoryDevice::new();
        let (engine, _, journal) = open(&device);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = engine.append(Tracked::new(1, &journal).panicking(), false);
        }));
        assert!(outcome.is_err());

        assert_eq!(engine.append_sync(Tracked::new(2, &journal)).unwrap(), Lsn::new(101));
        assert_eq!(engine.durable_lsn(), Lsn::new(101));
        engine.shutdown().unwrap();

        let (_, report, _) = open(&device);
        assert_eq!(report.highest_lsn, Some(Lsn::new(101)));
    }

    #[test]
    fn transactions_commit_or_tear() {
        let device = MemoryDevice::new();
        let (engine, _, journal) = open(&device);

        let mut committed = engine.begin_transaction();
        committed.append(Tracked::new(1, &journal)).unwrap();
        committed.append(Tracked::new(2, &journal)).unwrap();
        assert_eq!(committed.members().len(), 2);
        let committed_id = committed.id();
        committed.commit(true).unwrap().wait().unwrap();

        let mut torn = engine.begin_transaction();
        torn.append(Tracked::new(3, &journal)).unwrap();
        let torn_id = torn.id();
        drop(torn);
        engine.freeze().unwrap();
        engine.shutdown().unwrap();

        let (engine, report, journal) = open(&device);
        assert_eq!(report.voided, 1);
        assert_eq!(report.max_transaction, Some(torn_id));
        let mut replayed: Vec<u64> = journal.entries("replay").iter().map(|(id, _)| *id).collect();
        replayed.sort_unstable();
        assert_eq!(replayed, [1, 2]);
        assert!(engine.begin_transaction().id() > torn_id);
        assert!(torn_id > committed_id);
    }

    #[test]
    fn freeze_makes_everything_durable() {
        let device = MemoryDevice::new();
        let (engine, _, journal) = open(&device);
        for id in 0..5 {
            let _ = engine.append(Tracked::new(id, &journal), false).unwrap();
        }
        let covered = engine.freeze().unwrap();
        assert_eq!(covered, Lsn::new(104));
        assert!(engine.durable_lsn() >= covered);
        assert!(device.region_count() >= 1);
    }

    #[test]
    fn freeze_on_idle_engine() {
        let (engine, _, _) = open(&MemoryDevice::new());
        assert_eq!(engine.freeze().unwrap(), Lsn::new(99));
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let (engine, _, journal) = open(&MemoryDevice::new());
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();
        assert_eq!(engine.state(), EngineState::ShutDown);
        assert!(matches!(
            engine.append(Tracked::new(1, &journal), false),
            Err(CoreError::ShutDown)
        ));
        assert_eq!(journal.entries("dispose"), [(1, Lsn::NONE)]);
        assert!(matches!(engine.freeze(), Err(CoreError::ShutDown)));
    }

    #[test]
    fn lowest_live_lsn_is_stamped_and_bounds_recovery() {
        let device = MemoryDevice::new();
        let (engine, _, journal) = open(&device);
        for id in 0..4 {
            let _ = engine.append(Tracked::new(id, &journal), false).unwrap();
        }
        engine.set_lowest_live_lsn(Lsn::new(102));
        engine.set_lowest_live_lsn(Lsn::new(101));
        assert_eq!(engine.lowest_live_lsn(), Lsn::new(102));
        engine.append_sync(Tracked::new(4, &journal)).unwrap();
        engine.shutdown().unwrap();

        let (engine, report, _) = open(&device);
        assert_eq!(report.boundary, Lsn::new(102));
        assert_eq!(report.records_scanned, 3);
        assert_eq!(engine.lowest_live_lsn(), Lsn::new(102));
    }

    #[test]
    fn concurrent_producers_get_unique_durable_lsns() {
        let device = MemoryDevice::new();
        let codec = TrackedCodec::default();
        let journal = codec.journal.clone();
        let (engine, _) = LogEngine::open(
            device.clone(),
            codec,
            config().sync_policy(SyncPolicy::Always).packing_stage_depth(2),
        )
        .unwrap();

        let lsns: Vec<Lsn> = thread::scope(|s| {
            let handles: Vec<_> = (0..4u64)
                .map(|t| {
                    let engine = &engine;
                    let journal = &journal;
                    s.spawn(move || {
                        (0..50u64)
                            .map(|i| engine.append(Tracked::new(t * 100 + i, journal), i % 10 == 0))
                            .map(|receipt| receipt.unwrap().wait().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut sorted = lsns.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 200);
        assert_eq!(engine.durable_lsn(), Lsn::new(299));
    }
}
