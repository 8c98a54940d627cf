//! The import pipeline.
//!
//! Orchestrates one import attempt:
//!
//! 1. Parse and filter the seed uuids
//! 2. Resolve the dependency closure against the hub
//! 3. Pre-materialize high-priority entity types
//! 4. Materialize the rest, breaking cycles with stubs
//! 5. Record every real import in the ledger
//!
//! The ledger is written only after materialization succeeds, so a crash
//! anywhere earlier leads to a redundant fetch on the next attempt, never a
//! missed update.

use crate::config::ImportConfig;
use crate::cycle::{CycleBreaker, ImportPhase};
use crate::error::{ImportError, ImportResult};
use crate::materializer::{EntityMaterializer, MaterializeError};
use crate::resolver::{parse_seeds, DependencyClosureResolver, Resolution};
use crate::source::RemoteCdfSource;
use crate::stack::DependencyStack;
use crate::validator::DocumentValidator;
use cdfsync_protocol::{CdfDocument, EntityUuid, LocalReference};
use cdfsync_tracker::{ImportTracker, TrackStatus};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Statistics accumulated across imports.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    /// Imports that completed.
    pub imports_completed: u64,
    /// Imports that failed.
    pub imports_failed: u64,
    /// Entities materialized and tracked.
    pub entities_imported: u64,
    /// Dependencies satisfied from the ledger.
    pub entities_short_circuited: u64,
    /// Stubs created.
    pub stubs_created: u64,
    /// Fetch requests issued.
    pub fetch_rounds: u64,
    /// Last completed import.
    pub last_import_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one successful import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Entities materialized and recorded in the ledger.
    pub imported: Vec<EntityUuid>,
    /// Dependencies satisfied from the ledger without a fetch.
    pub short_circuited: Vec<EntityUuid>,
    /// Seeds skipped because automatic updates are disabled.
    pub skipped: Vec<EntityUuid>,
    /// Entities that needed a new stub.
    pub stubs_created: Vec<EntityUuid>,
    /// Entities that reused an existing local object as placeholder.
    pub placeholders_reused: Vec<EntityUuid>,
    /// Fetch requests issued.
    pub fetch_rounds: u32,
    /// Materialize passes, including the high-priority pass.
    pub materialize_passes: u32,
    /// Phases entered, in order.
    pub phases: Vec<ImportPhase>,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Imports entity closures from a hub into the local system.
pub struct ImportPipeline<S, T, M> {
    config: ImportConfig,
    source: Arc<S>,
    tracker: Arc<T>,
    materializer: Arc<M>,
    stats: RwLock<ImportStats>,
}

impl<S, T, M> ImportPipeline<S, T, M>
where
    S: RemoteCdfSource,
    T: ImportTracker,
    M: EntityMaterializer,
{
    /// Creates a pipeline owning its collaborators.
    pub fn new(config: ImportConfig, source: S, tracker: T, materializer: M) -> Self {
        Self::with_shared(
            config,
            Arc::new(source),
            Arc::new(tracker),
            Arc::new(materializer),
        )
    }

    /// Creates a pipeline over shared collaborators.
    pub fn with_shared(
        config: ImportConfig,
        source: Arc<S>,
        tracker: Arc<T>,
        materializer: Arc<M>,
    ) -> Self {
        Self {
            config,
            source,
            tracker,
            materializer,
            stats: RwLock::new(ImportStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Returns the remote source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the ledger.
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Returns the materializer.
    pub fn materializer(&self) -> &M {
        &self.materializer
    }

    /// Returns a snapshot of the accumulated statistics.
    pub fn stats(&self) -> ImportStats {
        self.stats.read().clone()
    }

    /// Imports the closure of `seeds`.
    ///
    /// Seeds are validated before any network call. Seeds whose ledger
    /// record has automatic updates disabled are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns an [`ImportError`]; [`ImportError::kind`] tells the caller
    /// whether to retry or dead-letter.
    pub fn import_entities<I: AsRef<str>>(&self, seeds: &[I]) -> ImportResult<ImportReport> {
        let start = Instant::now();
        let mut phases = Vec::new();
        let result = self.run_import(seeds, &mut phases);

        match result {
            Ok(mut report) => {
                report.phases = phases;
                report.duration = start.elapsed();
                self.record_success(&report);
                info!(
                    imported = report.imported.len(),
                    short_circuited = report.short_circuited.len(),
                    stubs = report.stubs_created.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "Import complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kind = ?e.kind(),
                    uuids = ?e.uuids(),
                    phases = ?phases,
                    "Import failed"
                );
                let mut stats = self.stats.write();
                stats.imports_failed += 1;
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn run_import<I: AsRef<str>>(
        &self,
        seeds: &[I],
        phases: &mut Vec<ImportPhase>,
    ) -> ImportResult<ImportReport> {
        let seeds = parse_seeds(seeds)?;
        let mut report = ImportReport::default();

        let mut wanted = BTreeSet::new();
        for uuid in seeds {
            if self.tracker.status(&uuid)? == Some(TrackStatus::AutoUpdateDisabled) {
                info!(%uuid, "Automatic updates disabled, skipping");
                report.skipped.push(uuid);
            } else {
                wanted.insert(uuid);
            }
        }
        if wanted.is_empty() {
            phases.push(ImportPhase::Done);
            return Ok(report);
        }

        phases.push(ImportPhase::Fetching);
        let Resolution {
            document,
            stack,
            short_circuited,
            fetch_rounds,
        } = DependencyClosureResolver::new(&*self.source, &*self.tracker, &self.config)
            .resolve(&wanted)
            .inspect_err(|_| phases.push(ImportPhase::Fatal))?;
        report.fetch_rounds = fetch_rounds;
        report.short_circuited = short_circuited.into_iter().collect();

        phases.push(ImportPhase::Validating);
        DocumentValidator::new(&*self.source, self.config.site_uuid)
            .validate(&document, &wanted)
            .inspect_err(|_| phases.push(ImportPhase::Fatal))?;

        let stack = self
            .materialize_high_priority(&document, stack, &mut report)
            .inspect_err(|_| phases.push(ImportPhase::Fatal))?;

        let outcome = CycleBreaker::new(&*self.materializer, self.config.stub_pass_budget)
            .run(&document, stack, phases)?;
        report.materialize_passes += outcome.passes;
        report.stubs_created = outcome.stubs_created;
        report.placeholders_reused = outcome.placeholders_reused;

        for cdf in document.entities() {
            match outcome.stack.get(&cdf.uuid).map(|wrapper| &wrapper.local) {
                Some(LocalReference::Real(local)) => {
                    self.tracker
                        .track_imported(&cdf.uuid, &cdf.content_hash(), local)?;
                    report.imported.push(cdf.uuid);
                }
                // A materializer returning Ok leaves nothing as a stub.
                _ => warn!(uuid = %cdf.uuid, "Entity not materialized, leaving untracked"),
            }
        }

        Ok(report)
    }

    fn materialize_high_priority(
        &self,
        document: &CdfDocument,
        stack: DependencyStack,
        report: &mut ImportReport,
    ) -> ImportResult<DependencyStack> {
        let priority = document.filtered(|cdf| self.config.is_high_priority(cdf.entity_type()));
        if priority.is_empty() {
            return Ok(stack);
        }

        debug!(count = priority.len(), "Materializing high-priority entities");
        report.materialize_passes += 1;
        match self.materializer.materialize(&priority, stack) {
            Ok(stack) => Ok(stack),
            Err(MaterializeError::UnresolvedReferences { stack, unresolved }) => {
                debug!(
                    unresolved = unresolved.len(),
                    "High-priority pass left entities for the general pass"
                );
                Ok(stack)
            }
            Err(MaterializeError::Failed(message)) => Err(ImportError::Materializer(message)),
        }
    }

    fn record_success(&self, report: &ImportReport) {
        let mut stats = self.stats.write();
        stats.imports_completed += 1;
        stats.entities_imported += report.imported.len() as u64;
        stats.entities_short_circuited += report.short_circuited.len() as u64;
        stats.stubs_created += report.stubs_created.len() as u64;
        stats.fetch_rounds += u64::from(report.fetch_rounds);
        stats.last_import_time = Some(Instant::now());
        stats.last_error = None;
    }

    /// Filters uuids about to be enqueued under `correlation_id`.
    ///
    /// Uuids with an outstanding queue item or with automatic updates
    /// disabled are dropped; the rest are marked queued and returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger fails.
    pub fn enqueue_filter(
        &self,
        uuids: &[EntityUuid],
        correlation_id: &str,
    ) -> ImportResult<Vec<EntityUuid>> {
        let mut accepted = Vec::new();
        let mut seen = BTreeSet::new();
        for uuid in uuids {
            if !seen.insert(*uuid) {
                continue;
            }
            match self.tracker.status(uuid)? {
                Some(TrackStatus::Queued) => {
                    debug!(%uuid, "Already queued, not enqueuing again");
                }
                Some(TrackStatus::AutoUpdateDisabled) => {
                    debug!(%uuid, "Automatic updates disabled, not enqueuing");
                }
                _ => {
                    self.tracker.mark_queued(uuid, correlation_id)?;
                    accepted.push(*uuid);
                }
            }
        }
        Ok(accepted)
    }

    /// Releases ledger records still queued under `correlation_id`.
    ///
    /// Records that hold an earlier import go back to `imported`; records
    /// created only by queueing are dropped. Returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger fails.
    pub fn release_queue_item(
        &self,
        uuids: &[EntityUuid],
        correlation_id: &str,
    ) -> ImportResult<usize> {
        let mut released = 0;
        for uuid in uuids {
            let Some(record) = self.tracker.get(uuid)? else {
                continue;
            };
            if record.status != TrackStatus::Queued
                || record.queue_id.as_deref() != Some(correlation_id)
            {
                continue;
            }
            if record.hash.is_some() {
                self.tracker.mark_imported(uuid)?;
            } else {
                self.tracker.delete(uuid)?;
            }
            released += 1;
        }
        Ok(released)
    }

    /// Drops ledger records for entities the hub reports deleted. Returns
    /// how many records existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger fails.
    pub fn handle_remote_deletion(&self, uuids: &[EntityUuid]) -> ImportResult<usize> {
        let mut removed = 0;
        for uuid in uuids {
            if self.tracker.delete(uuid)? {
                info!(%uuid, "Remote entity deleted, dropped ledger record");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
