//! # relog storage
//!
//! Append devices for the relog durability layer.
//!
//! An append device is an **ordered, durable sink and source of byte regions**.
//! The log engine hands it fully packed, checksummed regions together with the
//! LSN that closes each region, and reads them back during recovery. How the
//! regions are laid out physically (files, frames, rollover) is the device's
//! concern alone; the engine never interprets device framing.
//!
//! ## Design Principles
//!
//! - Regions are written whole and read back whole
//! - Regions are read in either direction from a seek position
//! - A torn trailing write is invisible to readers
//! - Devices are `Send` so a single writer thread can own one
//!
//! ## Available Devices
//!
//! - [`MemoryDevice`] - For testing and crash simulation
//! - [`FileDevice`] - For persistent storage in a single framed log file
//!
//! ## Example
//!
//! ```rust
//! use relog_storage::{AppendDevice, Direction, MemoryDevice, SeekPosition};
//!
//! let mut device = MemoryDevice::new();
//! device.write(b"region", 100).unwrap();
//! device.seek(SeekPosition::End).unwrap();
//! let chunk = device.read(Direction::Backward).unwrap().unwrap();
//! assert_eq!(chunk.lsn, 100);
//! assert_eq!(&chunk.bytes[..], b"region");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod memory;

pub use device::{AppendDevice, Chunk, Direction, SeekPosition};
pub use error::{StorageError, StorageResult};
pub use file::FileDevice;
pub use memory::MemoryDevice;
