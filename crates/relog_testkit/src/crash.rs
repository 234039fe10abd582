//! Crash simulation for relog.
//!
//! Two tools:
//!
//! 1. [`CrashableDevice`] wraps an append device and starts failing writes or
//!    syncs on command, so tests can watch the durability daemon go terminal.
//! 2. [`crash_image`] cuts a copy of a [`MemoryDevice`] at a [`CrashPoint`],
//!    producing what a restarted process would find on disk.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relog_testkit::crash::{crash_image, CrashPoint};
//!
//! let image = crash_image(&disk, CrashPoint::LoseUnsynced);
//! let log = TestLog::reopen(image);
//! ```

use relog_storage::{AppendDevice, Chunk, Direction, MemoryDevice, SeekPosition};
use relog_storage::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// What survives a simulated crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Every written region survives.
    AfterWrite,
    /// Only regions covered by a completed sync survive.
    LoseUnsynced,
    /// The newest region is torn and dropped.
    TearTail,
}

/// Returns an independent copy of `disk` as it would look after `point`.
#[must_use]
pub fn crash_image(disk: &MemoryDevice, point: CrashPoint) -> MemoryDevice {
    let image = disk.fork();
    match point {
        CrashPoint::AfterWrite => {}
        CrashPoint::LoseUnsynced => {
            image.discard_unsynced();
        }
        CrashPoint::TearTail => {
            image.tear_tail();
        }
    }
    image
}

#[derive(Debug)]
struct SwitchState {
    writes_left: AtomicUsize,
    fail_sync: AtomicBool,
    crashed: AtomicBool,
    writes: AtomicUsize,
}

/// Remote control for a [`CrashableDevice`] owned by another thread.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            state: Arc::new(SwitchState {
                writes_left: AtomicUsize::new(usize::MAX),
                fail_sync: AtomicBool::new(false),
                crashed: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Lets `count` more writes succeed, then fails every write.
    pub fn fail_writes_after(&self, count: usize) {
        self.state.writes_left.store(count, Ordering::SeqCst);
    }

    /// Fails every sync from now on.
    pub fn fail_syncs(&self) {
        self.state.fail_sync.store(true, Ordering::SeqCst);
    }

    /// Returns whether a failure has been injected.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
    }
}

/// An append device that fails on command.
#[derive(Debug)]
pub struct CrashableDevice<D> {
    inner: D,
    switch: CrashSwitch,
}

impl<D: AppendDevice> CrashableDevice<D> {
    /// Wraps `inner`. Returns the device and its switch.
    pub fn new(inner: D) -> (Self, CrashSwitch) {
        let switch = CrashSwitch::new();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }
}

impl<D: AppendDevice> AppendDevice for CrashableDevice<D> {
    fn write(&mut self, region: &[u8], lsn: u64) -> StorageResult<u64> {
        let allowed = self
            .switch
            .state
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if allowed.is_err() {
            return Err(self.switch.crash("write"));
        }
        let written = self.inner.write(region, lsn)?;
        self.switch.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.switch.crash("sync"));
        }
        self.inner.sync()
    }

    fn seek(&mut self, position: SeekPosition) -> StorageResult<()> {
        self.inner.seek(position)
    }

    fn read(&mut self, direction: Direction) -> StorageResult<Option<Chunk>> {
        self.inner.read(direction)
    }
}
