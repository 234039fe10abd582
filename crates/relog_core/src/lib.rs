//! # relog core
//!
//! A durable, crash-consistent append-only log for an embedded key/value store.
//!
//! This crate provides:
//! - LSN allocation through an explicit [`Sequencer`]
//! - A chain of fixed-capacity [`Window`]s that producers fill without locks
//! - A durability daemon that writes each window as one checksummed region
//! - A backward [replay](recover) engine that skips superseded actions,
//!   torn transactions and deleted scopes
//! - The [`LogEngine`] facade tying them together
//!
//! ## Durability Model
//!
//! Every append gets an LSN immediately. The record becomes durable when the
//! region containing it has been written; regions are written strictly in LSN
//! order by a single thread, so "LSN x is durable" implies every LSN below x
//! is too. A producer that needs its record on stable storage appends with a
//! sync request and waits on the returned [`AppendReceipt`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use relog_core::{Config, LogEngine};
//! use relog_storage::FileDevice;
//! use std::path::Path;
//!
//! let device = FileDevice::open(Path::new("data/relog.log"))?;
//! let (engine, report) = LogEngine::open(device, StoreCodec::new(store), Config::default())?;
//! println!("recovered up to {:?}", report.highest_lsn);
//! engine.append(StoreAction::put(key, value), true)?.wait()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod checksum;
mod config;
mod daemon;
mod engine;
mod error;
mod future;
mod record;
pub mod region;
mod replay;
mod sequencer;
mod types;
mod window;

pub use action::{Action, ActionCodec, LoggedAction};
pub use checksum::{adler32, Adler32};
pub use config::{ChecksumKind, Config, FormatPolicy, RecoveryOptions, SyncPolicy};
pub use engine::{AppendReceipt, EngineState, LogEngine, Transaction};
pub use error::{
    CodecError, CoreError, CoreResult, DurabilityFailure, RecoveryError, ReplayError,
};
pub use future::{DurableWatermark, WriteFuture};
pub use record::LogRecord;
pub use replay::{recover, RecoveryPhase, RecoveryReport};
pub use sequencer::Sequencer;
pub use types::{Lsn, TransactionId};
pub use window::{Window, WindowChain};
