//! Queue worker glue.
//!
//! The queue backend itself is external; this module maps a pipeline
//! result onto what the queue should do with the item.

use crate::error::{ErrorKind, ImportError};
use crate::materializer::EntityMaterializer;
use crate::pipeline::{ImportPipeline, ImportReport};
use crate::source::RemoteCdfSource;
use cdfsync_protocol::EntityUuid;
use cdfsync_tracker::ImportTracker;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::{error, info, warn};

/// One item delivered by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Correlation id, stable across redeliveries.
    pub id: String,
    /// Raw seed uuids.
    pub uuids: Vec<String>,
}

impl QueueItem {
    /// Creates an item.
    pub fn new(id: impl Into<String>, uuids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            uuids: uuids.into_iter().map(Into::into).collect(),
        }
    }
}

/// What the queue should do with an item.
#[derive(Debug)]
pub enum QueueOutcome {
    /// Import finished; delete the item.
    Completed(ImportReport),
    /// Leave the item for redelivery.
    Retry {
        /// Why the attempt failed.
        reason: ImportError,
    },
    /// Move the item aside for an operator.
    DeadLetter {
        /// Why the item cannot succeed as-is.
        reason: ImportError,
    },
}

impl QueueOutcome {
    /// Returns true for [`QueueOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, QueueOutcome::Completed(_))
    }

    /// Returns true for [`QueueOutcome::Retry`].
    pub fn is_retry(&self) -> bool {
        matches!(self, QueueOutcome::Retry { .. })
    }

    /// Returns true for [`QueueOutcome::DeadLetter`].
    pub fn is_dead_letter(&self) -> bool {
        matches!(self, QueueOutcome::DeadLetter { .. })
    }
}

/// Processes queue items one at a time through an [`ImportPipeline`].
///
/// An incomplete closure is retried while the missing set changes between
/// attempts of the same item. Seeing the same missing set twice in a row
/// dead-letters the item, since the republish did not help.
pub struct QueueWorker<S, T, M> {
    pipeline: ImportPipeline<S, T, M>,
    last_missing: Mutex<HashMap<String, BTreeSet<EntityUuid>>>,
}

impl<S, T, M> QueueWorker<S, T, M>
where
    S: RemoteCdfSource,
    T: ImportTracker,
    M: EntityMaterializer,
{
    /// Creates a worker over `pipeline`.
    pub fn new(pipeline: ImportPipeline<S, T, M>) -> Self {
        Self {
            pipeline,
            last_missing: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pipeline.
    pub fn pipeline(&self) -> &ImportPipeline<S, T, M> {
        &self.pipeline
    }

    /// Processes one delivery of `item`.
    pub fn process(&self, item: &QueueItem) -> QueueOutcome {
        let outcome = match self.pipeline.import_entities(&item.uuids) {
            Ok(report) => {
                self.last_missing.lock().remove(&item.id);
                info!(item = %item.id, imported = report.imported.len(), "Queue item completed");
                return QueueOutcome::Completed(report);
            }
            Err(e) => self.classify(item, e),
        };

        if let QueueOutcome::DeadLetter { reason } = &outcome {
            self.last_missing.lock().remove(&item.id);
            error!(
                item = %item.id,
                error = %reason,
                uuids = ?reason.uuids(),
                "Queue item dead-lettered"
            );
            self.release(item);
        }
        outcome
    }

    fn classify(&self, item: &QueueItem, e: ImportError) -> QueueOutcome {
        match e.kind() {
            ErrorKind::IncompleteClosure => {
                let missing: BTreeSet<EntityUuid> = e.uuids().into_iter().collect();
                let mut last = self.last_missing.lock();
                if last.get(&item.id) == Some(&missing) {
                    return QueueOutcome::DeadLetter { reason: e };
                }
                warn!(item = %item.id, missing = ?missing, "Closure incomplete, will retry");
                last.insert(item.id.clone(), missing);
                QueueOutcome::Retry { reason: e }
            }
            _ if e.is_retryable() => {
                warn!(item = %item.id, error = %e, "Retryable failure");
                QueueOutcome::Retry { reason: e }
            }
            _ => QueueOutcome::DeadLetter { reason: e },
        }
    }

    fn release(&self, item: &QueueItem) {
        let uuids: Vec<EntityUuid> = item
            .uuids
            .iter()
            .filter_map(|raw| EntityUuid::parse(raw).ok())
            .collect();
        if let Err(e) = self.pipeline.release_queue_item(&uuids, &item.id) {
            warn!(item = %item.id, error = %e, "Failed to release queued records");
        }
    }
}
