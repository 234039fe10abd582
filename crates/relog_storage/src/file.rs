//! File-based append device for persistent storage.

use crate::device::{AppendDevice, Chunk, Direction, SeekPosition};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes opening every frame.
const FRAME_MAGIC: [u8; 4] = *b"RLOG";

/// Magic bytes closing every frame.
const TRAILER_MAGIC: [u8; 4] = *b"GOLR";

/// magic (4) + length (4) + lsn (8)
const FRAME_HEADER_SIZE: u64 = 16;

/// length (4) + magic (4)
const FRAME_TRAILER_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy)]
struct Frame {
    offset: u64,
    len: u32,
    lsn: u64,
}

impl Frame {
    fn payload_offset(&self) -> u64 {
        self.offset + FRAME_HEADER_SIZE
    }

    fn end(&self) -> u64 {
        self.offset + FRAME_HEADER_SIZE + u64::from(self.len) + FRAME_TRAILER_SIZE
    }
}

/// A single-file append device.
///
/// Every region is stored as one frame:
///
/// ```text
/// | "RLOG" | len (4) | lsn (8) | region (len) | len (4) | "GOLR" |
/// ```
///
/// On open the file is scanned forward once to index its frames. A frame cut
/// short by a crash (the file ends inside it) is a torn tail and is truncated
/// away; a complete frame with bad magic is corruption and fails the open.
///
/// # Durability
///
/// - `write()` hands the frame to the OS
/// - `sync()` calls `File::sync_data()`
///
/// The file is held under an exclusive advisory lock for the device's
/// lifetime.
///
/// # Example
///
/// ```no_run
/// use relog_storage::{AppendDevice, FileDevice};
/// use std::path::Path;
///
/// let mut device = FileDevice::open(Path::new("relog.log")).unwrap();
/// device.write(b"region", 100).unwrap();
/// device.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    frames: Vec<Frame>,
    cursor: usize,
    size: u64,
    poisoned: bool,
}

impl FileDevice {
    /// Opens or creates a device at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or locked, or if it
    /// contains a corrupted frame.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let len = file.metadata()?.len();
        let (frames, valid) = scan_frames(&mut file, len)?;
        if valid < len {
            file.set_len(valid)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            frames,
            cursor: 0,
            size: valid,
            poisoned: false,
        })
    }

    /// Opens or creates a device, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of complete frames in the file.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the size of the valid prefix of the file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.poisoned {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn read_frame(&mut self, frame: Frame) -> StorageResult<Chunk> {
        self.file.seek(SeekFrom::Start(frame.payload_offset()))?;
        let mut bytes = vec![0u8; frame.len as usize];
        self.file.read_exact(&mut bytes)?;
        Ok(Chunk {
            lsn: frame.lsn,
            bytes,
        })
    }
}

/// Indexes every complete frame; returns them with the end of the valid prefix.
fn scan_frames(file: &mut File, len: u64) -> StorageResult<(Vec<Frame>, u64)> {
    let mut frames = Vec::new();
    let mut offset = 0u64;
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    let mut trailer = [0u8; FRAME_TRAILER_SIZE as usize];

    while offset + FRAME_HEADER_SIZE <= len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut header)?;

        let frame_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let frame = Frame {
            offset,
            len: frame_len,
            lsn: u64::from_be_bytes(header[8..16].try_into().map_err(|_| {
                StorageError::Corrupted(format!("short frame header at offset {offset}"))
            })?),
        };
        if header[0..4] != FRAME_MAGIC {
            return Err(StorageError::Corrupted(format!(
                "invalid frame magic at offset {offset}"
            )));
        }
        if frame.end() > len {
            // Torn tail: the crash cut this frame short.
            break;
        }

        file.seek(SeekFrom::Start(frame.end() - FRAME_TRAILER_SIZE))?;
        file.read_exact(&mut trailer)?;
        let trailer_len = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if trailer[4..8] != TRAILER_MAGIC || trailer_len != frame_len {
            return Err(StorageError::Corrupted(format!(
                "invalid frame trailer at offset {offset}"
            )));
        }
        if let Some(previous) = frames.last().map(|f: &Frame| f.lsn) {
            if frame.lsn <= previous {
                return Err(StorageError::Corrupted(format!(
                    "frame lsn {} does not follow {previous} at offset {offset}",
                    frame.lsn
                )));
            }
        }

        offset = frame.end();
        frames.push(frame);
    }

    Ok((frames, offset))
}

impl AppendDevice for FileDevice {
    fn write(&mut self, region: &[u8], lsn: u64) -> StorageResult<u64> {
        self.check_open()?;
        if let Some(last) = self.frames.last() {
            if lsn <= last.lsn {
                return Err(StorageError::OutOfOrder {
                    lsn,
                    previous: last.lsn,
                });
            }
        }
        let len = u32::try_from(region.len()).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("region of {} bytes exceeds frame limit", region.len()),
            ))
        })?;

        let total = FRAME_HEADER_SIZE as usize + region.len() + FRAME_TRAILER_SIZE as usize;
        let mut data = Vec::with_capacity(total);
        data.extend_from_slice(&FRAME_MAGIC);
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(&lsn.to_be_bytes());
        data.extend_from_slice(region);
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(&TRAILER_MAGIC);

        let offset = self.size;
        let written = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&data));
        if let Err(e) = written {
            // A partial frame may be on disk; only reopening can repair that.
            self.poisoned = true;
            return Err(e.into());
        }

        self.size += data.len() as u64;
        self.frames.push(Frame { offset, len, lsn });
        Ok(data.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_open()?;
        if let Err(e) = self.file.sync_data() {
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    fn seek(&mut self, position: SeekPosition) -> StorageResult<()> {
        self.check_open()?;
        self.cursor = match position {
            SeekPosition::Start => 0,
            SeekPosition::End => self.frames.len(),
        };
        Ok(())
    }

    fn read(&mut self, direction: Direction) -> StorageResult<Option<Chunk>> {
        self.check_open()?;
        let frame = match direction {
            Direction::Backward => {
                if self.cursor == 0 {
                    return Ok(None);
                }
                self.cursor -= 1;
                self.frames[self.cursor]
            }
            Direction::Forward => match self.frames.get(self.cursor) {
                Some(frame) => {
                    self.cursor += 1;
                    *frame
                }
                None => return Ok(None),
            },
        };
        self.read_frame(frame).map(Some)
    }
}
