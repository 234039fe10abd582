//! Benchmark utilities.

use bytes::Bytes;
use rand::Rng;
use relog_core::{LogRecord, Lsn};
use relog_storage::MemoryDevice;
use relog_testkit::{Key, TestLog};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` records with consecutive LSNs starting at `first`.
pub fn generate_records(first: Lsn, count: usize, payload_size: usize) -> Vec<LogRecord> {
    (0..count as u64)
        .map(|i| {
            LogRecord::new(
                Lsn::new(first.as_u64() + i),
                first,
                Bytes::from(random_data(payload_size)),
            )
        })
        .collect()
}

/// Fills a fresh in-memory log with `count` puts over `keys` keys, freezes
/// it and returns a copy of the device.
pub fn populated_disk(count: usize, keys: usize, value_size: usize) -> MemoryDevice {
    let log = TestLog::memory();
    for i in 0..count {
        let key = Key::new(0, format!("k{}", i % keys.max(1)));
        let action = log.store.put(key, random_data(value_size));
        let _ = log.engine.append(action, false).expect("append failed");
    }
    log.freeze().expect("freeze failed");
    let disk = log.disk().expect("memory log").fork();
    drop(log);
    disk
}
