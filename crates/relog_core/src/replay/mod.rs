//! Crash recovery.
//!
//! Recovery reads the log backward from its newest record down to the lowest
//! live LSN. Walking backward means the newest version of everything is seen
//! first, so superseded actions can be dropped with three small tables built
//! during the same pass:
//!
//! - the **skip set** of LSNs invalidated by newer actions,
//! - the set of **committed transactions** (a commit is always newer than
//!   its members, so it is seen first),
//! - the set of **deleted scopes**.
//!
//! Surviving actions are handed to a worker pool by concurrency bucket.

mod dispatch;
mod scan;

use crate::action::{Action, ActionCodec, LoggedAction};
use crate::config::{Config, RecoveryOptions};
use crate::error::{CoreError, CoreResult, RecoveryError};
use crate::record::LogRecord;
use crate::types::{Lsn, TransactionId};
use dispatch::Dispatcher;
use relog_storage::AppendDevice;
use scan::BackwardScan;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Stage of a recovery pass, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// Locating the newest record and the scan boundary.
    Bootstrap,
    /// Walking the log backward and filtering actions.
    Scan,
    /// Waiting for replay workers to drain.
    Apply,
    /// Recovery finished; the engine can accept appends.
    Normal,
    /// Recovery was aborted.
    Error,
}

/// Outcome of a successful recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Newest durable LSN, `None` for an empty log.
    pub highest_lsn: Option<Lsn>,
    /// Oldest LSN the scan reached.
    pub lowest_lsn: Option<Lsn>,
    /// Lowest live LSN the scan stopped at.
    pub boundary: Lsn,
    /// Regions read from the device.
    pub regions: u64,
    /// Records examined.
    pub records_scanned: u64,
    /// Actions replayed.
    pub replayed: u64,
    /// Actions dropped because a newer action superseded them.
    pub skipped: u64,
    /// Transaction members dropped because their transaction never committed.
    pub voided: u64,
    /// Actions dropped because a newer action deleted their scope.
    pub deleted: u64,
    /// Highest transaction id found in the scanned records.
    pub max_transaction: Option<TransactionId>,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl RecoveryReport {
    /// First LSN the engine should hand out after this recovery.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        self.highest_lsn.map_or(Lsn::FIRST, Lsn::next)
    }
}

#[derive(Default)]
struct Tables {
    skip: HashSet<Lsn>,
    committed: HashSet<TransactionId>,
    deleted_scopes: HashSet<u64>,
}

/// Rebuilds state from the durable log in `device`.
///
/// Every surviving action is consumed by [`Action::replay`]; every other
/// decoded action by [`Action::dispose`].
///
/// # Errors
///
/// Fails on a read, integrity or decode error, an LSN gap, or the first
/// replay failure. Queued actions are disposed before returning.
pub fn recover<D, C>(
    device: &mut D,
    codec: &C,
    config: &Config,
    options: RecoveryOptions,
) -> CoreResult<RecoveryReport>
where
    D: AppendDevice,
    C: ActionCodec,
{
    let started = Instant::now();
    tracing::info!(phase = ?RecoveryPhase::Bootstrap, "recovery started");

    let mut report = RecoveryReport::default();
    let mut scan = BackwardScan::new(device, config.format_policy)?;
    let Some(newest) = scan.next_record()? else {
        report.boundary = options.lowest_live_lsn.unwrap_or(Lsn::FIRST);
        report.regions = scan.regions();
        report.elapsed = started.elapsed();
        tracing::info!(phase = ?RecoveryPhase::Normal, "log is empty");
        return Ok(report);
    };

    let highest = newest.lsn();
    let boundary = options
        .lowest_live_lsn
        .unwrap_or_else(|| newest.lowest_lsn())
        .max(Lsn::FIRST);
    report.highest_lsn = Some(highest);
    report.boundary = boundary;
    tracing::info!(
        phase = ?RecoveryPhase::Scan,
        highest = %highest,
        boundary = %boundary,
        workers = config.replay_workers,
        "scanning log"
    );

    let mut dispatcher = Dispatcher::new(config.replay_workers)?;
    let mut tables = Tables::default();
    let mut current = Some(newest);

    let scanned: CoreResult<()> = loop {
        let Some(record) = current.take() else {
            break Ok(());
        };
        let lsn = record.lsn();
        if lsn < boundary {
            break Ok(());
        }
        report.records_scanned += 1;
        report.lowest_lsn = Some(lsn);

        match filter(codec, &record, &mut tables, &mut report) {
            Ok(Some(action)) => {
                if !dispatcher.dispatch(action, lsn) {
                    break Ok(());
                }
            }
            Ok(None) => {}
            Err(err) => break Err(err),
        }

        if lsn == boundary {
            break Ok(());
        }
        current = match scan.next_record() {
            Ok(Some(older)) => Some(older),
            Ok(None) => {
                break Err(RecoveryError::LsnGap {
                    expected: lsn.prev(),
                    found: Lsn::NONE,
                }
                .into())
            }
            Err(err) => break Err(err),
        };
    };
    report.regions = scan.regions();

    let replayed = match scanned {
        Ok(()) => {
            tracing::info!(phase = ?RecoveryPhase::Apply, "waiting for replay workers");
            dispatcher.finish()
        }
        Err(err) => {
            let err = dispatcher.abort().map_or(err, CoreError::from);
            tracing::error!(phase = ?RecoveryPhase::Error, error = %err, "recovery aborted");
            return Err(err);
        }
    };
    report.replayed = match replayed {
        Ok(replayed) => replayed,
        Err(err) => {
            tracing::error!(phase = ?RecoveryPhase::Error, error = %err, "recovery aborted");
            return Err(err.into());
        }
    };

    report.elapsed = started.elapsed();
    tracing::info!(
        phase = ?RecoveryPhase::Normal,
        highest = %highest,
        scanned = report.records_scanned,
        replayed = report.replayed,
        skipped = report.skipped,
        voided = report.voided,
        deleted = report.deleted,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "recovery complete"
    );
    Ok(report)
}

/// Decides the fate of one record. Returns the action to replay, if any.
fn filter<C: ActionCodec>(
    codec: &C,
    record: &LogRecord,
    tables: &mut Tables,
    report: &mut RecoveryReport,
) -> CoreResult<Option<C::Action>> {
    let lsn = record.lsn();
    let logged = LoggedAction::decode(codec, record.payload())
        .map_err(|source| RecoveryError::Decode { lsn, source })?;

    if let Some(txn) = logged.txn() {
        report.max_transaction = report.max_transaction.max(Some(txn));
    }

    if tables.skip.remove(&lsn) {
        tables.skip.extend(logged.invalidated_lsns().iter().copied());
        logged.dispose();
        report.skipped += 1;
        return Ok(None);
    }

    let action = match logged {
        LoggedAction::Commit { txn } => {
            tables.committed.insert(txn);
            return Ok(None);
        }
        LoggedAction::Member { txn, action } => {
            if !tables.committed.contains(&txn) {
                action.dispose();
                report.voided += 1;
                return Ok(None);
            }
            action
        }
        LoggedAction::Plain(action) => action,
    };

    if action
        .scope()
        .is_some_and(|scope| tables.deleted_scopes.contains(&scope))
    {
        action.dispose();
        report.deleted += 1;
        return Ok(None);
    }
    if let Some(scope) = action.deleted_scope() {
        tables.deleted_scopes.insert(scope);
    }
    tables.skip.extend(action.invalidated_lsns().iter().copied());
    Ok(Some(action))
}
