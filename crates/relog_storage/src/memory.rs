//! In-memory append device for testing.

use crate::device::{AppendDevice, Chunk, Direction, SeekPosition};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    regions: Vec<Chunk>,
    synced: usize,
}

/// An in-memory append device.
///
/// Clones share the same stored regions but keep their own read cursor, so a
/// test can keep one handle, drop the engine that owns another, and reopen
/// against the surviving "disk". The crash hooks ([`tear_tail`],
/// [`discard_unsynced`], [`corrupt`]) mutate that shared state.
///
/// [`tear_tail`]: MemoryDevice::tear_tail
/// [`discard_unsynced`]: MemoryDevice::discard_unsynced
/// [`corrupt`]: MemoryDevice::corrupt
///
/// # Example
///
/// ```rust
/// use relog_storage::{AppendDevice, MemoryDevice};
///
/// let mut device = MemoryDevice::new();
/// let disk = device.clone();
/// device.write(b"abc", 100).unwrap();
/// assert_eq!(disk.region_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    shared: Arc<Mutex<Shared>>,
    cursor: usize,
}

impl MemoryDevice {
    /// Creates a new empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.shared.lock().regions.len()
    }

    /// Returns the number of regions covered by the last `sync`.
    #[must_use]
    pub fn synced_count(&self) -> usize {
        self.shared.lock().synced
    }

    /// Returns a copy of every stored region, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.shared.lock().regions.clone()
    }

    /// Returns an independent device holding a copy of every stored region.
    ///
    /// Unlike [`Clone`], writes to the fork are not seen by this device. This
    /// is how tests take a crash image while an engine keeps running.
    #[must_use]
    pub fn fork(&self) -> Self {
        let shared = self.shared.lock();
        Self {
            shared: Arc::new(Mutex::new(Shared {
                regions: shared.regions.clone(),
                synced: shared.synced,
            })),
            cursor: 0,
        }
    }

    /// Drops the newest region, as if its write was torn by a crash.
    ///
    /// Returns the removed region.
    pub fn tear_tail(&self) -> Option<Chunk> {
        let mut shared = self.shared.lock();
        let torn = shared.regions.pop();
        shared.synced = shared.synced.min(shared.regions.len());
        torn
    }

    /// Drops every region written after the last `sync`.
    ///
    /// Returns how many regions were lost.
    pub fn discard_unsynced(&self) -> usize {
        let mut shared = self.shared.lock();
        let keep = shared.synced;
        let lost = shared.regions.len() - keep;
        shared.regions.truncate(keep);
        lost
    }

    /// Flips every bit of one byte inside a stored region.
    ///
    /// Returns `false` if the region or offset does not exist.
    pub fn corrupt(&self, region: usize, offset: usize) -> bool {
        let mut shared = self.shared.lock();
        match shared
            .regions
            .get_mut(region)
            .and_then(|chunk| chunk.bytes.get_mut(offset))
        {
            Some(byte) => {
                *byte = !*byte;
                true
            }
            None => false,
        }
    }
}

impl AppendDevice for MemoryDevice {
    fn write(&mut self, region: &[u8], lsn: u64) -> StorageResult<u64> {
        let mut shared = self.shared.lock();
        if let Some(last) = shared.regions.last() {
            if lsn <= last.lsn {
                return Err(StorageError::OutOfOrder {
                    lsn,
                    previous: last.lsn,
                });
            }
        }
        shared.regions.push(Chunk {
            lsn,
            bytes: region.to_vec(),
        });
        Ok(region.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut shared = self.shared.lock();
        shared.synced = shared.regions.len();
        Ok(())
    }

    fn seek(&mut self, position: SeekPosition) -> StorageResult<()> {
        self.cursor = match position {
            SeekPosition::Start => 0,
            SeekPosition::End => self.shared.lock().regions.len(),
        };
        Ok(())
    }

    fn read(&mut self, direction: Direction) -> StorageResult<Option<Chunk>> {
        let shared = self.shared.lock();
        // The shared list may have shrunk under a crash hook.
        self.cursor = self.cursor.min(shared.regions.len());
        match direction {
            Direction::Backward => {
                if self.cursor == 0 {
                    return Ok(None);
                }
                self.cursor -= 1;
                Ok(Some(shared.regions[self.cursor].clone()))
            }
            Direction::Forward => match shared.regions.get(self.cursor) {
                Some(chunk) => {
                    self.cursor += 1;
                    Ok(Some(chunk.clone()))
                }
                None => Ok(None),
            },
        }
    }
}
