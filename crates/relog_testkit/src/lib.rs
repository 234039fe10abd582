//! # relog testkit
//!
//! Test utilities for relog.
//!
//! This crate provides:
//! - A key/value store model driven through the log ([`model`])
//! - Fixtures that open, reopen and crash logs ([`fixtures`])
//! - Crash-injecting devices and crash images ([`crash`])
//! - Property-based workload generators using proptest
//! - Concurrent stress harnesses
//! - End-to-end recovery scenarios ([`scenarios`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relog_testkit::prelude::*;
//!
//! #[test]
//! fn survives_restart() {
//!     let log = TestLog::memory();
//!     log.put(1, "a", b"1", true).wait().unwrap();
//!     let log = log.reopen();
//!     assert_eq!(log.store.get(&Key::new(1, "a")), Some(b"1".to_vec()));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod model;
pub mod scenarios;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::model::*;
    pub use crate::scenarios::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use model::*;
pub use scenarios::*;
pub use stress::*;
