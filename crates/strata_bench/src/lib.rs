//! Benchmarks for Strata.
//!
//! The criterion benches live in `benches/`; this library holds the data
//! generators they share.

#![warn(missing_docs)]

pub mod utils;
