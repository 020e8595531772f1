//! # Strata Testkit
//!
//! Test utilities for Strata.
//!
//! This crate provides:
//! - Test fixtures and environment helpers
//! - Property-based test generators using proptest
//! - A crash-injecting pager and crash recovery scenarios
//! - A model-checking integration harness
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_environment() {
//!     with_temp_env(|env| {
//!         env.write(|txn| txn.create_tree("test")?.add(b"k", b"v")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::init_test_logging;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use logging::init_test_logging;
pub use stress::*;
