//! # cdfsync testkit
//!
//! Test utilities for cdfsync.
//!
//! This crate provides:
//! - An in-process hub speaking the HTTP contract ([`MemoryHub`])
//! - Graph fixtures and pipeline builders
//! - Property-based generators for layered dependency graphs
//!
//! ## Usage
//!
//! ```rust
//! use cdfsync_testkit::prelude::*;
//!
//! let fixture = GraphFixture::diamond();
//! let pipeline = mock_pipeline(fixture.mock_source());
//! let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();
//! assert_eq!(report.imported.len(), 4);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod hub;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::hub::*;
}

pub use fixtures::*;
pub use generators::*;
pub use hub::*;
