//! Stub materialization for circular dependencies.
//!
//! When the materializer reports forward references it cannot link, every
//! unprocessed entity gets a local identity: an existing object if one is
//! found, otherwise a placeholder stub. The document is then submitted
//! again. The unprocessed count must shrink on every pass.

use crate::error::{ImportError, ImportResult};
use crate::materializer::{EntityMaterializer, MaterializeError};
use crate::stack::{DependencyStack, EntityWrapper};
use cdfsync_protocol::{CdfDocument, EntityUuid, LocalReference};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Phases of one import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportPhase {
    /// Fetch rounds against the hub.
    Fetching,
    /// Completeness check of the fetched document.
    Validating,
    /// First materialize call.
    MaterializingDirect,
    /// Placeholder creation for unresolved entities.
    CreatingStubs,
    /// Materialize call after stubs exist.
    Retrying,
    /// Import finished.
    Done,
    /// Import failed.
    Fatal,
}

impl ImportPhase {
    /// Returns the snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Fetching => "fetching",
            ImportPhase::Validating => "validating",
            ImportPhase::MaterializingDirect => "materializing_direct",
            ImportPhase::CreatingStubs => "creating_stubs",
            ImportPhase::Retrying => "retrying",
            ImportPhase::Done => "done",
            ImportPhase::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful [`CycleBreaker::run`].
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// The final stack; every document entity is real.
    pub stack: DependencyStack,
    /// Materialize calls made.
    pub passes: u32,
    /// Uuids that received a new stub.
    pub stubs_created: Vec<EntityUuid>,
    /// Uuids that reused an existing local object as placeholder.
    pub placeholders_reused: Vec<EntityUuid>,
}

/// Drives the materializer to completion, breaking cycles with stubs.
pub struct CycleBreaker<'a, M: ?Sized> {
    materializer: &'a M,
    budget: u32,
}

impl<'a, M: EntityMaterializer + ?Sized> CycleBreaker<'a, M> {
    /// Creates a breaker allowing at most `budget` materialize passes.
    pub fn new(materializer: &'a M, budget: u32) -> Self {
        Self {
            materializer,
            budget: budget.max(1),
        }
    }

    /// Materializes `document` on top of `stack`, appending each phase
    /// entered to `phases`.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::CircularResolutionStalled`] when a pass leaves
    /// as many entities unprocessed as the previous one or the budget runs
    /// out, and [`ImportError::Materializer`] on an outright failure.
    pub fn run(
        &self,
        document: &CdfDocument,
        stack: DependencyStack,
        phases: &mut Vec<ImportPhase>,
    ) -> ImportResult<CycleOutcome> {
        let mut outcome = CycleOutcome {
            stack,
            ..CycleOutcome::default()
        };
        let mut last_unprocessed: Option<usize> = None;
        phases.push(ImportPhase::MaterializingDirect);

        loop {
            outcome.passes += 1;
            let stack = std::mem::take(&mut outcome.stack);
            let (partial, unresolved) = match self.materializer.materialize(document, stack) {
                Ok(stack) => {
                    outcome.stack = stack;
                    phases.push(ImportPhase::Done);
                    debug!(passes = outcome.passes, "Materialization complete");
                    return Ok(outcome);
                }
                Err(MaterializeError::Failed(message)) => {
                    phases.push(ImportPhase::Fatal);
                    return Err(ImportError::Materializer(message));
                }
                Err(MaterializeError::UnresolvedReferences { stack, unresolved }) => {
                    (stack, unresolved)
                }
            };
            outcome.stack = partial;

            let unprocessed: BTreeSet<EntityUuid> = document
                .uuids()
                .into_iter()
                .filter(|uuid| !outcome.stack.is_real(uuid))
                .collect();
            debug!(
                pass = outcome.passes,
                unresolved = unresolved.len(),
                unprocessed = unprocessed.len(),
                "Materializer reported forward references"
            );

            if last_unprocessed == Some(unprocessed.len()) || outcome.passes >= self.budget {
                phases.push(ImportPhase::Fatal);
                warn!(
                    passes = outcome.passes,
                    unprocessed = ?unprocessed,
                    "Circular resolution stalled"
                );
                return Err(ImportError::CircularResolutionStalled {
                    unprocessed,
                    passes: outcome.passes,
                });
            }
            last_unprocessed = Some(unprocessed.len());

            phases.push(ImportPhase::CreatingStubs);
            for uuid in &unprocessed {
                if outcome.stack.contains(uuid) {
                    continue;
                }
                let Some(cdf) = document.get(uuid) else {
                    continue;
                };
                let local = match self.materializer.load_local(cdf)? {
                    Some(local) => {
                        outcome.placeholders_reused.push(*uuid);
                        local
                    }
                    None => {
                        let local = self.materializer.create_stub(cdf)?;
                        info!(%uuid, local = %local, "Created stub");
                        outcome.stubs_created.push(*uuid);
                        local
                    }
                };
                outcome
                    .stack
                    .register(EntityWrapper::new(*uuid, LocalReference::Stub(local)))?;
            }
            phases.push(ImportPhase::Retrying);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::MemoryMaterializer;
    use cdfsync_protocol::{Cdf, CdfType, ContentHash, LocalId};

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    fn cdf(n: u8, deps: &[u8]) -> Cdf {
        let mut cdf = Cdf::new(uuid(n), CdfType::ContentEntity, uuid(200));
        for d in deps {
            cdf = cdf.with_dependency(uuid(*d), ContentHash::new("h")).unwrap();
        }
        cdf
    }

    #[test]
    fn acyclic_needs_one_pass() {
        let doc = CdfDocument::from_entities([cdf(1, &[2]), cdf(2, &[])]);
        let materializer = MemoryMaterializer::new();
        let mut phases = Vec::new();

        let outcome = CycleBreaker::new(&materializer, 5)
            .run(&doc, DependencyStack::new(), &mut phases)
            .unwrap();
        assert_eq!(outcome.passes, 1);
        assert!(outcome.stubs_created.is_empty());
        assert_eq!(phases, vec![ImportPhase::MaterializingDirect, ImportPhase::Done]);
    }

    #[test]
    fn two_cycle_gets_two_stubs_in_two_passes() {
        let doc = CdfDocument::from_entities([cdf(1, &[2]), cdf(2, &[1])]);
        let materializer = MemoryMaterializer::new();
        let mut phases = Vec::new();

        let outcome = CycleBreaker::new(&materializer, 5)
            .run(&doc, DependencyStack::new(), &mut phases)
            .unwrap();

        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.stubs_created, vec![uuid(1), uuid(2)]);
        assert!(outcome.stack.is_real(&uuid(1)));
        assert!(outcome.stack.is_real(&uuid(2)));
        assert!(!materializer.object(&uuid(1)).unwrap().is_stub);
        assert_eq!(
            phases,
            vec![
                ImportPhase::MaterializingDirect,
                ImportPhase::CreatingStubs,
                ImportPhase::Retrying,
                ImportPhase::Done,
            ]
        );
    }

    #[test]
    fn existing_local_object_is_reused() {
        let doc = CdfDocument::from_entities([cdf(1, &[2]), cdf(2, &[1])]);
        let materializer = MemoryMaterializer::new();
        materializer.preload(uuid(2), LocalId::new("content_entity", "77"));

        let outcome = CycleBreaker::new(&materializer, 5)
            .run(&doc, DependencyStack::new(), &mut Vec::new())
            .unwrap();
        assert_eq!(outcome.placeholders_reused, vec![uuid(2)]);
        assert_eq!(outcome.stubs_created, vec![uuid(1)]);
        assert_eq!(
            outcome.stack.get(&uuid(2)).unwrap().local.local_id().id,
            "77"
        );
    }

    #[test]
    fn unbreakable_cycle_stalls() {
        let doc = CdfDocument::from_entities([cdf(1, &[2]), cdf(2, &[1]), cdf(3, &[])]);
        let materializer = MemoryMaterializer::new().with_unresolvable([uuid(1)]);
        let mut phases = Vec::new();

        let err = CycleBreaker::new(&materializer, 5)
            .run(&doc, DependencyStack::new(), &mut phases)
            .unwrap_err();

        match err {
            ImportError::CircularResolutionStalled { unprocessed, passes } => {
                assert_eq!(unprocessed, BTreeSet::from([uuid(1)]));
                // The stub lets entity 2 save on pass two; entity 1 never does.
                assert_eq!(passes, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(phases.last(), Some(&ImportPhase::Fatal));
    }

    #[test]
    fn budget_caps_passes() {
        let doc = CdfDocument::from_entities([cdf(1, &[2]), cdf(2, &[1])]);
        let materializer = MemoryMaterializer::new();

        let err = CycleBreaker::new(&materializer, 1)
            .run(&doc, DependencyStack::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, ImportError::CircularResolutionStalled { passes: 1, .. }));
        assert!(materializer.stubs().is_empty());
    }

    #[test]
    fn outright_failure_is_fatal() {
        let materializer = MemoryMaterializer::new();
        materializer.fail_with("database offline");
        let err = CycleBreaker::new(&materializer, 5)
            .run(&CdfDocument::new(), DependencyStack::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, ImportError::Materializer(m) if m == "database offline"));
    }
}
