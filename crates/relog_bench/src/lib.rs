//! Shared helpers for the relog benchmarks.

pub mod utils;
