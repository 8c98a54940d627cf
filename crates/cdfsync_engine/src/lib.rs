//! # cdfsync engine
//!
//! Dependency closure import engine for CDF content synchronization.
//!
//! Given seed uuids delivered by a queue, the engine:
//! - fetches CDFs from the hub and expands their dependencies to a closed set
//! - skips dependencies the ledger already holds at the current hash
//! - asks origins to republish when the hub has lost part of a closure
//! - materializes the document, breaking dependency cycles with stubs
//! - records every import in the ledger
//!
//! ## Key Invariants
//!
//! - Seeds are format-checked before any network call
//! - Fetch rounds are strictly sequential
//! - No uuid is fetched or materialized twice in one import
//! - The ledger is written only after materialization succeeds
//! - Stub passes must shrink the unprocessed set or the import fails fast
//!
//! ## Example
//!
//! ```
//! use cdfsync_engine::{ImportConfig, ImportPipeline, MemoryMaterializer, MockRemoteSource};
//! use cdfsync_protocol::{Cdf, CdfType, ContentHash, EntityUuid};
//! use cdfsync_tracker::LedgerTracker;
//!
//! let origin = EntityUuid::new_v4();
//! let article = EntityUuid::new_v4();
//! let image = EntityUuid::new_v4();
//!
//! let hub = MockRemoteSource::with_entities([
//!     Cdf::new(article, CdfType::ContentEntity, origin)
//!         .with_dependency(image, ContentHash::new("img-1"))
//!         .unwrap(),
//!     Cdf::new(image, CdfType::ContentEntity, origin).with_hash(ContentHash::new("img-1")),
//! ]);
//! let pipeline = ImportPipeline::new(
//!     ImportConfig::new(EntityUuid::new_v4()),
//!     hub,
//!     LedgerTracker::in_memory(),
//!     MemoryMaterializer::new(),
//! );
//!
//! let report = pipeline.import_entities(&[article.to_string()]).unwrap();
//! assert_eq!(report.imported.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cycle;
mod error;
mod http;
mod materializer;
mod pipeline;
mod queue;
mod republish;
mod resolver;
mod source;
mod stack;
mod validator;

pub use config::{HubConfig, ImportConfig, RetryConfig};
pub use cycle::{CycleBreaker, CycleOutcome, ImportPhase};
pub use error::{ErrorKind, ImportError, ImportResult};
pub use http::{
    HttpClient, HttpRemoteSource, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer, Method,
};
pub use materializer::{EntityMaterializer, MaterializeError, MemoryMaterializer, StoredObject};
pub use pipeline::{ImportPipeline, ImportReport, ImportStats};
pub use queue::{QueueItem, QueueOutcome, QueueWorker};
pub use republish::{RepublishCoordinator, RepublishSummary};
pub use resolver::{parse_seeds, DependencyClosureResolver, Resolution};
pub use source::{MockRemoteSource, RemoteCdfSource, RemoteResponse, SentRepublish};
pub use stack::{DependencyStack, EntityWrapper};
pub use validator::{DocumentValidator, ValidationReport};
