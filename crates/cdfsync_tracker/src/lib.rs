//! # cdfsync Tracker
//!
//! The import ledger: a durable record of which remote entities have been
//! imported, at which content hash, and as which local object.
//!
//! The ledger is the single source of truth for "do we already have the
//! current version of this entity". Lookups by hash drive the dedup
//! short-circuit during dependency resolution.
//!
//! ## Layers
//!
//! - [`ImportTracker`] - the contract the import engine consumes
//! - [`LedgerTracker`] - an append-only framed log with an in-memory index
//! - [`LedgerBackend`] - opaque byte stores: [`FileBackend`] and
//!   [`InMemoryBackend`]
//!
//! ## Example
//!
//! ```rust
//! use cdfsync_protocol::{ContentHash, EntityUuid, LocalId};
//! use cdfsync_tracker::{ImportTracker, LedgerTracker};
//!
//! let tracker = LedgerTracker::in_memory();
//! let uuid = EntityUuid::new_v4();
//! let hash = ContentHash::new("abc");
//! tracker.track_imported(&uuid, &hash, &LocalId::new("node", "1")).unwrap();
//! assert!(tracker.lookup_by_hash(&uuid, &hash).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod ledger;
mod memory;
mod record;
mod tracker;

pub use backend::LedgerBackend;
pub use error::{TrackerError, TrackerResult};
pub use file::FileBackend;
pub use ledger::{scan_ledger, CompactionReport, LedgerStats, LedgerTracker, ScanReport};
pub use memory::InMemoryBackend;
pub use record::{EntryType, LedgerEntry, TrackStatus, TrackerRecord, LEDGER_MAGIC, LEDGER_VERSION};
pub use tracker::ImportTracker;
