//! The import tracker contract.

use crate::error::TrackerResult;
use crate::record::{TrackStatus, TrackerRecord};
use cdfsync_protocol::{ContentHash, EntityUuid, LocalId, LocalReference};

/// The idempotency ledger consulted and updated by imports.
///
/// All writes are last-write-wins upserts by uuid, so workers touching
/// disjoint uuid sets may share one tracker without further coordination.
///
/// # Consistency
///
/// Callers write to the tracker only after a network round trip has
/// confirmed the data was retrieved and used. A crash between fetch and
/// write causes a redundant re-fetch, never a missed update.
pub trait ImportTracker: Send + Sync {
    /// Returns the record for `uuid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    fn get(&self, uuid: &EntityUuid) -> TrackerResult<Option<TrackerRecord>>;

    /// Records a completed import of `uuid` at `hash` as local object `local`.
    ///
    /// Clears any queue correlation id. An `auto_update_disabled` record
    /// keeps its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn track_imported(
        &self,
        uuid: &EntityUuid,
        hash: &ContentHash,
        local: &LocalId,
    ) -> TrackerResult<()>;

    /// Moves a queued record to `imported`. Returns false if the uuid is not
    /// tracked. Other statuses are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_imported(&self, uuid: &EntityUuid) -> TrackerResult<bool>;

    /// Marks `uuid` as queued under `correlation_id`, creating the record if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_queued(&self, uuid: &EntityUuid, correlation_id: &str) -> TrackerResult<()>;

    /// Enables or disables automatic updates. Returns false if the uuid is
    /// not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_auto_update(&self, uuid: &EntityUuid, enabled: bool) -> TrackerResult<bool>;

    /// Removes the record for `uuid`. Returns false if it was not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&self, uuid: &EntityUuid) -> TrackerResult<bool>;

    /// Removes every record, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn purge(&self) -> TrackerResult<usize>;

    /// Returns every record in uuid order.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    fn records(&self) -> TrackerResult<Vec<TrackerRecord>>;

    /// Returns the local object for `uuid` only if the ledger holds exactly
    /// `hash` for it.
    ///
    /// Untracked uuids, hash mismatches and records without a local object
    /// all return `None`, forcing a real fetch.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    fn lookup_by_hash(
        &self,
        uuid: &EntityUuid,
        hash: &ContentHash,
    ) -> TrackerResult<Option<LocalReference>> {
        Ok(self.get(uuid)?.and_then(|record| {
            match (record.hash, record.local) {
                (Some(stored), Some(local)) if &stored == hash => {
                    Some(LocalReference::Real(local))
                }
                _ => None,
            }
        }))
    }

    /// Returns the current status of `uuid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    fn status(&self, uuid: &EntityUuid) -> TrackerResult<Option<TrackStatus>> {
        Ok(self.get(uuid)?.map(|record| record.status))
    }

    /// Returns true if a queue item for `uuid` is outstanding.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    fn is_queued(&self, uuid: &EntityUuid) -> TrackerResult<bool> {
        Ok(self.status(uuid)? == Some(TrackStatus::Queued))
    }
}
