//! Completeness checks for fetched documents.

use crate::error::{ImportError, ImportResult};
use crate::republish::{RepublishCoordinator, RepublishSummary};
use crate::source::RemoteCdfSource;
use cdfsync_protocol::{CdfDocument, EntityDescriptor, EntityUuid};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Classification of a fetched batch against what was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Requested uuids with no CDF at all.
    pub missing_from_hub: BTreeSet<EntityUuid>,
    /// Present entities that depend on a missing uuid, grouped by origin.
    pub missing_dependency: BTreeMap<EntityUuid, Vec<EntityDescriptor>>,
}

impl ValidationReport {
    /// Returns true if every requested uuid is present.
    pub fn is_complete(&self) -> bool {
        self.missing_from_hub.is_empty()
    }

    /// Returns the number of entities flagged for republish.
    pub fn flagged_count(&self) -> usize {
        self.missing_dependency.values().map(Vec::len).sum()
    }

    /// Classifies `document` against `requested`.
    pub fn classify(document: &CdfDocument, requested: &BTreeSet<EntityUuid>) -> Self {
        let missing_from_hub: BTreeSet<EntityUuid> = requested
            .iter()
            .filter(|uuid| !document.contains(uuid))
            .copied()
            .collect();

        let mut missing_dependency: BTreeMap<EntityUuid, Vec<EntityDescriptor>> = BTreeMap::new();
        if !missing_from_hub.is_empty() {
            for uuid in requested {
                let Some(cdf) = document.get(uuid) else {
                    continue;
                };
                if cdf
                    .dependency_uuids()
                    .any(|dep| missing_from_hub.contains(dep))
                {
                    missing_dependency
                        .entry(cdf.origin)
                        .or_default()
                        .push(EntityDescriptor::from_cdf(cdf));
                }
            }
        }

        Self {
            missing_from_hub,
            missing_dependency,
        }
    }
}

/// Verifies fetched batches and triggers republish on failure.
pub struct DocumentValidator<'a, S: RemoteCdfSource + ?Sized> {
    republish: RepublishCoordinator<'a, S>,
}

impl<'a, S: RemoteCdfSource + ?Sized> DocumentValidator<'a, S> {
    /// Creates a validator that republishes as site `initiator`.
    pub fn new(source: &'a S, initiator: EntityUuid) -> Self {
        Self {
            republish: RepublishCoordinator::new(source, initiator),
        }
    }

    /// Validates `document` against `requested`.
    ///
    /// When uuids are missing, entities depending on them are republished
    /// per origin before the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::IncompleteClosure`] naming the missing uuids.
    pub fn validate(
        &self,
        document: &CdfDocument,
        requested: &BTreeSet<EntityUuid>,
    ) -> ImportResult<ValidationReport> {
        let report = ValidationReport::classify(document, requested);
        if report.is_complete() {
            return Ok(report);
        }

        let summary = if report.missing_dependency.is_empty() {
            RepublishSummary::default()
        } else {
            self.republish.request_republish(&report.missing_dependency)
        };

        let message = format!(
            "{} entities missing from hub, {} dependent entities flagged, republish sent to {} of {} origins",
            report.missing_from_hub.len(),
            report.flagged_count(),
            summary.sent.len(),
            report.missing_dependency.len(),
        );
        warn!(
            missing = ?report.missing_from_hub,
            flagged = report.flagged_count(),
            "Document incomplete"
        );

        Err(ImportError::IncompleteClosure {
            missing_uuids: report.missing_from_hub,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockRemoteSource;
    use cdfsync_protocol::{Cdf, CdfType, ContentHash};

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    fn cdf(n: u8, origin: u8, deps: &[u8]) -> Cdf {
        let mut cdf = Cdf::new(uuid(n), CdfType::ContentEntity, uuid(origin));
        for d in deps {
            cdf = cdf.with_dependency(uuid(*d), ContentHash::new("h")).unwrap();
        }
        cdf
    }

    #[test]
    fn complete_document_passes() {
        let source = MockRemoteSource::new();
        let doc = CdfDocument::from_entities([cdf(1, 200, &[]), cdf(2, 200, &[1])]);
        let report = DocumentValidator::new(&source, uuid(5))
            .validate(&doc, &BTreeSet::from([uuid(1), uuid(2)]))
            .unwrap();
        assert!(report.is_complete());
        assert!(source.republished().is_empty());
    }

    #[test]
    fn classify_groups_owners_by_origin() {
        let doc = CdfDocument::from_entities([
            cdf(1, 201, &[9]),
            cdf(2, 202, &[9]),
            cdf(3, 201, &[8]),
            cdf(4, 201, &[]),
        ]);
        let requested = BTreeSet::from([uuid(1), uuid(2), uuid(3), uuid(4), uuid(8), uuid(9)]);

        let report = ValidationReport::classify(&doc, &requested);
        assert_eq!(report.missing_from_hub, BTreeSet::from([uuid(8), uuid(9)]));
        assert_eq!(report.missing_dependency[&uuid(201)].len(), 2);
        assert_eq!(report.missing_dependency[&uuid(202)].len(), 1);
        assert_eq!(report.flagged_count(), 3);
    }

    #[test]
    fn failure_republishes_then_errors() {
        let source = MockRemoteSource::new();
        source.register_webhook(uuid(201), "https://a.example/webhook");
        let doc = CdfDocument::from_entities([cdf(1, 201, &[9])]);

        let err = DocumentValidator::new(&source, uuid(5))
            .validate(&doc, &BTreeSet::from([uuid(1), uuid(9)]))
            .unwrap_err();

        match err {
            ImportError::IncompleteClosure { missing_uuids, .. } => {
                assert_eq!(missing_uuids, BTreeSet::from([uuid(9)]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(source.republished().len(), 1);
    }

    #[test]
    fn missing_seed_without_dependents_skips_republish() {
        let source = MockRemoteSource::new();
        let err = DocumentValidator::new(&source, uuid(5))
            .validate(&CdfDocument::new(), &BTreeSet::from([uuid(1)]))
            .unwrap_err();
        assert!(matches!(err, ImportError::IncompleteClosure { .. }));
        assert!(source.republished().is_empty());
    }
}
