//! Append device trait definition.

use crate::error::StorageResult;

/// Where a device's read cursor is placed by [`AppendDevice::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPosition {
    /// Before the oldest region.
    Start,
    /// After the newest complete region.
    End,
}

/// Direction of a [`AppendDevice::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards newer regions.
    Forward,
    /// Towards older regions.
    Backward,
}

/// One region as stored on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The LSN the region was written at (its last record).
    pub lsn: u64,
    /// The region bytes exactly as passed to [`AppendDevice::write`].
    pub bytes: Vec<u8>,
}

/// An ordered, durable byte-region sink and source.
///
/// # Invariants
///
/// - `write` calls arrive in strictly increasing `lsn` order
/// - `read` returns exactly the bytes previously passed to `write`
/// - after `sync` returns, every region written so far survives a crash
/// - a region whose write was interrupted is never returned by `read`
///
/// # Implementors
///
/// - [`super::MemoryDevice`] - For testing
/// - [`super::FileDevice`] - For persistent storage
pub trait AppendDevice: Send {
    /// Appends one region tagged with the LSN that closes it.
    ///
    /// Returns the number of bytes the device consumed, framing included.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or `lsn` does not advance.
    fn write(&mut self, region: &[u8], lsn: u64) -> StorageResult<u64>;

    /// Makes every region written so far durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Moves the read cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be positioned.
    fn seek(&mut self, position: SeekPosition) -> StorageResult<()>;

    /// Reads the next region in `direction` from the cursor.
    ///
    /// Returns `Ok(None)` when the cursor reaches the start or the end.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails or a stored frame is malformed.
    fn read(&mut self, direction: Direction) -> StorageResult<Option<Chunk>>;
}

impl<D: AppendDevice + ?Sized> AppendDevice for Box<D> {
    fn write(&mut self, region: &[u8], lsn: u64) -> StorageResult<u64> {
        (**self).write(region, lsn)
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn seek(&mut self, position: SeekPosition) -> StorageResult<()> {
        (**self).seek(position)
    }

    fn read(&mut self, direction: Direction) -> StorageResult<Option<Chunk>> {
        (**self).read(direction)
    }
}
