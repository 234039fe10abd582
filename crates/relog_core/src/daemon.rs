//! The durability daemon.
//!
//! A single writer thread drains the window chain oldest to newest: it closes
//! the window at the current high-water LSN, waits for the window to become
//! contiguous, packs it into a region and hands the region to the append
//! device. With a non-zero packing stage depth, closing and packing run on a
//! separate thread so the writer only ever does device I/O.
//!
//! The first device error is terminal. The daemon records it in the chain,
//! fails every pending and future write, and stops; nothing is retried.

use crate::config::{Config, SyncPolicy};
use crate::error::{CoreError, CoreResult, DurabilityFailure};
use crate::future::DurableWatermark;
use crate::region;
use crate::sequencer::Sequencer;
use crate::types::Lsn;
use crate::window::{Window, WindowChain};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use relog_storage::AppendDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Everything the daemon shares with the engine.
#[derive(Debug)]
pub(crate) struct DaemonContext {
    pub(crate) chain: Arc<WindowChain>,
    pub(crate) sequencer: Arc<Sequencer>,
    pub(crate) watermark: Arc<DurableWatermark>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) config: Config,
}

impl DaemonContext {
    pub(crate) fn new(
        chain: Arc<WindowChain>,
        sequencer: Arc<Sequencer>,
        watermark: Arc<DurableWatermark>,
        config: Config,
    ) -> Self {
        Self {
            chain,
            sequencer,
            watermark,
            shutdown: AtomicBool::new(false),
            config,
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Puts the chain and the watermark into the terminal failed state.
    fn fail(&self, lsn: Lsn, message: String) -> DurabilityFailure {
        let failure = DurabilityFailure { lsn, message };
        tracing::error!(lsn = %failure.lsn, error = %failure.message, "durability daemon failed");
        self.chain.fail(failure.clone());
        self.watermark.fail(failure.clone());
        failure
    }
}

/// A closed, contiguous window ready for the device.
struct Batch {
    window: Arc<Window>,
    end: Lsn,
    region: Option<Bytes>,
    records: usize,
    sync: bool,
}

/// Handle to the running daemon threads.
#[derive(Debug)]
pub(crate) struct DurabilityDaemon {
    writer: JoinHandle<Result<(), DurabilityFailure>>,
    packer: Option<JoinHandle<()>>,
}

impl DurabilityDaemon {
    /// Spawns the daemon. The writer thread takes ownership of `device`.
    pub(crate) fn start<D>(context: Arc<DaemonContext>, device: D) -> CoreResult<Self>
    where
        D: AppendDevice + 'static,
    {
        let depth = context.config.packing_stage_depth;
        if depth == 0 {
            let writer = thread::Builder::new()
                .name("relog-durability".into())
                .spawn(move || run_inline(&context, device))?;
            return Ok(Self {
                writer,
                packer: None,
            });
        }

        let (tx, rx) = channel::bounded(depth);
        let packer = {
            let context = Arc::clone(&context);
            thread::Builder::new()
                .name("relog-packer".into())
                .spawn(move || run_packer(&context, &tx))?
        };
        let writer = thread::Builder::new()
            .name("relog-durability".into())
            .spawn(move || run_writer(&context, device, &rx))?;
        Ok(Self {
            writer,
            packer: Some(packer),
        })
    }

    /// Waits for the daemon threads to exit.
    ///
    /// The caller must have requested shutdown first.
    pub(crate) fn join(self) -> CoreResult<()> {
        if let Some(packer) = self.packer {
            packer
                .join()
                .map_err(|_| CoreError::invariant("packing stage panicked"))?;
        }
        self.writer
            .join()
            .map_err(|_| CoreError::invariant("durability daemon panicked"))??;
        Ok(())
    }
}

fn run_inline<D: AppendDevice>(context: &DaemonContext, mut device: D) -> Result<(), DurabilityFailure> {
    tracing::debug!("durability daemon started");
    let mut window = context.chain.tail();
    loop {
        let batch = match collect(context, &window) {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(err) => return Err(context.fail(window.base(), err.to_string())),
        };
        window = write(context, &mut device, batch)?;
    }
    finish(context, &mut device)
}

fn run_packer(context: &DaemonContext, tx: &Sender<Batch>) {
    tracing::debug!("packing stage started");
    let mut window = context.chain.tail();
    loop {
        match collect(context, &window) {
            Ok(Some(batch)) => {
                window = batch.window.next();
                if tx.send(batch).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                context.fail(window.base(), err.to_string());
                break;
            }
        }
    }
    tracing::debug!("packing stage stopped");
}

fn run_writer<D: AppendDevice>(
    context: &DaemonContext,
    mut device: D,
    rx: &Receiver<Batch>,
) -> Result<(), DurabilityFailure> {
    tracing::debug!("durability daemon started");
    for batch in rx {
        write(context, &mut device, batch)?;
    }
    finish(context, &mut device)
}

/// Waits for `window` to have work, closes it and packs it.
///
/// Returns `None` once the engine is shutting down and nothing allocated is
/// left, or when the chain has failed.
fn collect(context: &DaemonContext, window: &Arc<Window>) -> CoreResult<Option<Batch>> {
    let config = &context.config;
    loop {
        if context.chain.failure().is_some() {
            return Ok(None);
        }
        if window.has_work() {
            break;
        }
        if context.is_shutting_down() && context.sequencer.current() < window.base() {
            return Ok(None);
        }
        context.chain.signal().wait(config.daemon_poll_interval, || {
            window.has_work() || context.is_shutting_down()
        });
    }

    let high_water = context
        .sequencer
        .current()
        .min(window.natural_end())
        .max(window.base().prev());
    window.close(high_water)?;
    let end = window
        .end()
        .ok_or_else(|| CoreError::invariant("closed window has no end"))?;

    let records = window.wait_for_contiguous(config.contiguous_recheck_interval)?;
    let sync = window.is_sync_requested() || config.sync_policy == SyncPolicy::Always;
    let region = (!records.is_empty()).then(|| region::pack(&records, config.checksum));
    Ok(Some(Batch {
        window: Arc::clone(window),
        end,
        region,
        records: records.len(),
        sync,
    }))
}

/// Persists one batch and marks its window written. Returns the next window.
fn write<D: AppendDevice>(
    context: &DaemonContext,
    device: &mut D,
    batch: Batch,
) -> Result<Arc<Window>, DurabilityFailure> {
    let base = batch.window.base();
    match &batch.region {
        Some(region) => {
            let persisted = device
                .write(region, batch.end.as_u64())
                .and_then(|_| if batch.sync { device.sync() } else { Ok(()) });
            if let Err(err) = persisted {
                return Err(context.fail(batch.end, err.to_string()));
            }
            tracing::trace!(
                base = %base,
                end = %batch.end,
                records = batch.records,
                bytes = region.len(),
                sync = batch.sync,
                "region written"
            );
        }
        None => tracing::debug!(base = %base, "skipping empty window"),
    }

    batch.window.write_future().complete();
    context.watermark.advance(batch.end);
    Ok(context.chain.retire(batch.window))
}

fn finish<D: AppendDevice>(context: &DaemonContext, device: &mut D) -> Result<(), DurabilityFailure> {
    if let Some(failure) = context.chain.failure() {
        return Err(failure);
    }
    if let Err(err) = device.sync() {
        return Err(context.fail(context.watermark.durable(), err.to_string()));
    }
    tracing::debug!(durable = %context.watermark.durable(), "durability daemon stopped");
    Ok(())
}
