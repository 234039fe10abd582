//! Test fixtures and log helpers.
//!
//! Provides a [`TestLog`] bundling an engine with the key/value model it
//! drives, and helpers for reopening and crashing it.

use crate::crash::{crash_image, CrashPoint};
use crate::model::{Key, KvCodec, KvOp, KvStore};
use relog_core::{AppendReceipt, Config, CoreResult, LogEngine, RecoveryOptions, RecoveryReport};
use relog_storage::{AppendDevice, FileDevice, MemoryDevice};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Configuration used by the fixtures: small windows and fast polling so
/// tests exercise window rollover without large workloads.
#[must_use]
pub fn test_config() -> Config {
    Config::default()
        .window_capacity(16)
        .replay_workers(3)
        .daemon_poll_interval(Duration::from_millis(1))
}

enum Storage {
    Memory(MemoryDevice),
    File { path: PathBuf, _dir: Option<TempDir> },
}

/// A running engine plus the store it feeds.
pub struct TestLog {
    /// The engine.
    pub engine: LogEngine<KvCodec>,
    /// The store, rebuilt by recovery and updated by appends.
    pub store: KvStore,
    /// What recovery reported when the engine opened.
    pub report: RecoveryReport,
    storage: Storage,
    config: Config,
}

impl TestLog {
    /// Opens a log on a fresh in-memory device.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Opens a log on a fresh in-memory device with `config`.
    pub fn memory_with(config: Config) -> Self {
        Self::open_memory(MemoryDevice::new(), config)
    }

    /// Opens (and recovers) a log stored in `disk`.
    pub fn open_memory(disk: MemoryDevice, config: Config) -> Self {
        Self::try_open(Storage::Memory(disk), config, RecoveryOptions::new())
            .expect("Failed to open memory log")
    }

    /// Opens a log in a fresh temporary directory.
    pub fn file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("relog.log");
        Self::try_open(
            Storage::File {
                path,
                _dir: Some(dir),
            },
            test_config(),
            RecoveryOptions::new(),
        )
        .expect("Failed to open file log")
    }

    /// Opens (and recovers) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the device or recovery error.
    pub fn open_file(path: &Path, config: Config) -> CoreResult<Self> {
        Self::try_open(
            Storage::File {
                path: path.to_path_buf(),
                _dir: None,
            },
            config,
            RecoveryOptions::new(),
        )
    }

    fn try_open(storage: Storage, config: Config, options: RecoveryOptions) -> CoreResult<Self> {
        let store = KvStore::new();
        let codec = KvCodec::new(store.clone());
        let (engine, report) = match &storage {
            Storage::Memory(disk) => open_engine(disk.clone(), codec, config.clone(), options)?,
            Storage::File { path, .. } => {
                let device = FileDevice::open_with_create_dirs(path)?;
                open_engine(device, codec, config.clone(), options)?
            }
        };
        Ok(Self {
            engine,
            store,
            report,
            storage,
            config,
        })
    }

    /// Shuts the engine down cleanly and recovers from the same storage.
    pub fn reopen(self) -> Self {
        self.reopen_with(RecoveryOptions::new())
    }

    /// Like [`reopen`](TestLog::reopen) with explicit recovery options.
    pub fn reopen_with(self, options: RecoveryOptions) -> Self {
        let Self {
            engine,
            storage,
            config,
            ..
        } = self;
        engine.shutdown().expect("Failed to shut down engine");
        drop(engine);
        Self::try_open(storage, config, options).expect("Failed to reopen log")
    }

    /// Recovers a second engine from a crash image of this log's device.
    ///
    /// This engine keeps running; only the returned log sees the image.
    pub fn crash(&self, point: CrashPoint) -> Self {
        let Storage::Memory(disk) = &self.storage else {
            panic!("crash images need a memory log");
        };
        Self::open_memory(crash_image(disk, point), self.config.clone())
    }

    /// Like [`crash`](TestLog::crash), returning the recovery error instead
    /// of panicking.
    ///
    /// # Errors
    ///
    /// Returns whatever recovery of the image fails with.
    pub fn try_crash(&self, point: CrashPoint) -> CoreResult<Self> {
        let Storage::Memory(disk) = &self.storage else {
            panic!("crash images need a memory log");
        };
        Self::try_open(
            Storage::Memory(crash_image(disk, point)),
            self.config.clone(),
            RecoveryOptions::new(),
        )
    }

    /// The in-memory device, if this is a memory log.
    #[must_use]
    pub fn disk(&self) -> Option<&MemoryDevice> {
        match &self.storage {
            Storage::Memory(disk) => Some(disk),
            Storage::File { .. } => None,
        }
    }

    /// Path of the log file, if this is a file log.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::File { path, .. } => Some(path),
        }
    }

    /// Puts `value` under `(scope, name)`.
    pub fn put(&self, scope: u64, name: &str, value: &[u8], sync: bool) -> AppendReceipt {
        let action = self.store.put(Key::new(scope, name), value.to_vec());
        self.engine.append(action, sync).expect("Failed to append put")
    }

    /// Deletes `(scope, name)`.
    pub fn delete(&self, scope: u64, name: &str, sync: bool) -> AppendReceipt {
        let action = self.store.delete(Key::new(scope, name));
        self.engine.append(action, sync).expect("Failed to append delete")
    }

    /// Deletes every key of `scope`.
    pub fn delete_scope(&self, scope: u64, sync: bool) -> AppendReceipt {
        let action = self.store.delete_scope(scope);
        self.engine
            .append(action, sync)
            .expect("Failed to append scope delete")
    }

    /// Runs `op` through the store's builders so invalidations are correct.
    pub fn apply(&self, op: &KvOp, sync: bool) -> AppendReceipt {
        match op {
            KvOp::Put { key, value } => self.put(key.scope, &key.name, value, sync),
            KvOp::Delete { key } => self.delete(key.scope, &key.name, sync),
            KvOp::DeleteScope { scope } => self.delete_scope(*scope, sync),
        }
    }
}

fn open_engine<D: AppendDevice + 'static>(
    device: D,
    codec: KvCodec,
    config: Config,
    options: RecoveryOptions,
) -> CoreResult<(LogEngine<KvCodec>, RecoveryReport)> {
    LogEngine::open_with(device, codec, config, options)
}

impl std::ops::Deref for TestLog {
    type Target = LogEngine<KvCodec>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with a temporary in-memory log.
///
/// # Example
///
/// ```rust,ignore
/// use relog_testkit::with_memory_log;
///
/// #[test]
/// fn my_test() {
///     with_memory_log(|log| {
///         log.put(1, "a", b"1", true).wait().unwrap();
///     });
/// }
/// ```
pub fn with_memory_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestLog) -> R,
{
    let log = TestLog::memory();
    f(&log)
}

/// Runs a test with a temporary file-backed log.
pub fn with_file_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestLog) -> R,
{
    let log = TestLog::file();
    f(&log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_roundtrip() {
        let log = TestLog::memory();
        let _ = log.put(1, "a", b"1", false);
        log.put(1, "b", b"2", true).wait().unwrap();
        let log = log.reopen();
        assert_eq!(log.store.get(&Key::new(1, "a")), Some(b"1".to_vec()));
        assert_eq!(log.store.len(), 2);
        assert_eq!(log.report.replayed, 2);
    }

    #[test]
    fn file_log_roundtrip() {
        let log = TestLog::file();
        assert!(log.path().is_some());
        log.put(3, "k", b"v", true).wait().unwrap();
        let log = log.reopen();
        assert_eq!(log.store.get(&Key::new(3, "k")), Some(b"v".to_vec()));
    }
}
