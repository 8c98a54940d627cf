//! Dependency closure resolution.
//!
//! Turns a seed uuid set into a transitively closed [`CdfDocument`] through
//! sequential fetch rounds. Dependencies the ledger already holds at the
//! current hash are short-circuited into the [`DependencyStack`] instead of
//! being fetched, or dropped from the document when the hub bundled them.

use crate::config::ImportConfig;
use crate::error::{ImportError, ImportResult};
use crate::source::RemoteCdfSource;
use crate::stack::{DependencyStack, EntityWrapper};
use crate::validator::DocumentValidator;
use cdfsync_protocol::{CdfDocument, ContentHash, EntityUuid};
use cdfsync_tracker::ImportTracker;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Parses raw seed strings, rejecting the whole batch on the first bad one.
///
/// # Errors
///
/// Returns [`ImportError::InvalidIdentifier`] carrying the offending input.
pub fn parse_seeds<S: AsRef<str>>(seeds: &[S]) -> ImportResult<BTreeSet<EntityUuid>> {
    seeds
        .iter()
        .map(|raw| {
            let raw = raw.as_ref();
            EntityUuid::parse(raw).map_err(|_| ImportError::InvalidIdentifier {
                uuid: raw.to_string(),
            })
        })
        .collect()
}

/// Output of a successful resolution.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Every fetched CDF of the closure.
    pub document: CdfDocument,
    /// Entities satisfied from the ledger, registered as real.
    pub stack: DependencyStack,
    /// Uuids short-circuited by the ledger.
    pub short_circuited: BTreeSet<EntityUuid>,
    /// Fetch requests issued.
    pub fetch_rounds: u32,
}

impl Resolution {
    /// Returns every uuid the closure covers, fetched or short-circuited.
    pub fn covered(&self) -> BTreeSet<EntityUuid> {
        let mut covered = self.document.uuids();
        covered.extend(self.short_circuited.iter().copied());
        covered
    }
}

/// Iterative fetch-and-expand loop over a [`RemoteCdfSource`].
pub struct DependencyClosureResolver<'a, S: ?Sized, T: ?Sized> {
    source: &'a S,
    tracker: &'a T,
    config: &'a ImportConfig,
}

impl<'a, S, T> DependencyClosureResolver<'a, S, T>
where
    S: RemoteCdfSource + ?Sized,
    T: ImportTracker + ?Sized,
{
    /// Creates a resolver.
    pub fn new(source: &'a S, tracker: &'a T, config: &'a ImportConfig) -> Self {
        Self {
            source,
            tracker,
            config,
        }
    }

    /// Resolves the closure of `seeds`.
    ///
    /// Every dependency edge is checked against the ledger once, whether
    /// its target is still outstanding or arrived bundled in a response.
    /// A match moves the target onto the stack and out of the document.
    ///
    /// A round fetches the uuids never requested before. When there are
    /// none, it retries everything still outstanding. A round that adds
    /// nothing to the document counts towards the stall limit; reaching it
    /// hands the document to the [`DocumentValidator`], which requests a
    /// republish and fails.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::IncompleteClosure`] when the hub cannot supply
    /// part of the closure, or any transport or ledger error.
    pub fn resolve(&self, seeds: &BTreeSet<EntityUuid>) -> ImportResult<Resolution> {
        let mut resolution = Resolution::default();
        let mut requested: BTreeSet<EntityUuid> = BTreeSet::new();
        let mut checked: BTreeSet<EntityUuid> = BTreeSet::new();
        let mut wanted = seeds.clone();
        let mut stalled = 0u32;

        while !wanted.is_empty() {
            resolution.fetch_rounds += 1;
            requested.extend(wanted.iter().copied());

            let fetched = self.source.fetch_by_uuids(&wanted)?;
            let mut added = 0usize;
            for cdf in fetched.into_entities() {
                // Hubs may bundle dependencies. Uuids already held are skipped.
                if resolution.document.contains(&cdf.uuid) || resolution.stack.contains(&cdf.uuid)
                {
                    continue;
                }
                resolution.document.insert(cdf);
                added += 1;
            }
            debug!(
                round = resolution.fetch_rounds,
                requested = wanted.len(),
                added,
                "Fetch round complete"
            );

            if self.short_circuit_bundled(seeds, &mut checked, &mut resolution)? {
                let dropped = prune_unreachable(&mut resolution.document, seeds);
                for uuid in &dropped {
                    requested.remove(uuid);
                }
            }

            let mut missing = BTreeSet::new();
            for (dep, hash) in resolution.document.external_dependencies() {
                if resolution.stack.contains(&dep) {
                    continue;
                }
                if checked.insert(dep) && self.short_circuit(&dep, &hash, &mut resolution)? {
                    continue;
                }
                missing.insert(dep);
            }

            let outstanding: BTreeSet<EntityUuid> = requested
                .iter()
                .filter(|uuid| !resolution.document.contains(uuid))
                .copied()
                .chain(missing.iter().copied())
                .collect();
            if outstanding.is_empty() {
                break;
            }

            stalled = if added == 0 { stalled + 1 } else { 0 };
            if stalled >= self.config.fetch_stall_limit {
                let mut expected = requested.clone();
                expected.extend(missing);
                DocumentValidator::new(self.source, self.config.site_uuid)
                    .validate(&resolution.document, &expected)?;
                // Validation cannot pass while uuids are outstanding.
                return Err(ImportError::IncompleteClosure {
                    missing_uuids: outstanding,
                    message: "hub stopped returning requested entities".to_string(),
                });
            }

            let fresh: BTreeSet<EntityUuid> =
                outstanding.difference(&requested).copied().collect();
            wanted = if fresh.is_empty() { outstanding } else { fresh };
        }

        info!(
            fetched = resolution.document.len(),
            short_circuited = resolution.short_circuited.len(),
            rounds = resolution.fetch_rounds,
            "Dependency closure resolved"
        );
        Ok(resolution)
    }

    /// Looks `dep` up at `hash` and registers it as real on a match.
    fn short_circuit(
        &self,
        dep: &EntityUuid,
        hash: &ContentHash,
        resolution: &mut Resolution,
    ) -> ImportResult<bool> {
        let Some(local) = self.tracker.lookup_by_hash(dep, hash)? else {
            return Ok(false);
        };
        resolution.stack.register(EntityWrapper::new(*dep, local))?;
        self.tracker.mark_imported(dep)?;
        resolution.short_circuited.insert(*dep);
        debug!(uuid = %dep, %hash, "Dependency unchanged, skipping import");
        Ok(true)
    }

    /// Checks dependencies the hub sent alongside what was asked for.
    ///
    /// Seeds are always imported, so they are never short-circuited. Returns
    /// whether anything left the document.
    fn short_circuit_bundled(
        &self,
        seeds: &BTreeSet<EntityUuid>,
        checked: &mut BTreeSet<EntityUuid>,
        resolution: &mut Resolution,
    ) -> ImportResult<bool> {
        let mut bundled: BTreeMap<EntityUuid, ContentHash> = BTreeMap::new();
        for (_, dep, hash) in resolution.document.dependency_edges() {
            if resolution.document.contains(dep) && !seeds.contains(dep) && !checked.contains(dep)
            {
                bundled.entry(*dep).or_insert_with(|| hash.clone());
            }
        }

        let mut removed = false;
        for (dep, hash) in bundled {
            checked.insert(dep);
            if self.short_circuit(&dep, &hash, resolution)? {
                resolution.document.remove(&dep);
                removed = true;
            }
        }
        Ok(removed)
    }
}

/// Drops CDFs no seed reaches through the document, returning their uuids.
///
/// A short-circuited entity takes its bundled dependencies with it unless
/// another path still needs them.
fn prune_unreachable(document: &mut CdfDocument, seeds: &BTreeSet<EntityUuid>) -> Vec<EntityUuid> {
    let mut reachable = BTreeSet::new();
    let mut frontier: Vec<EntityUuid> = seeds.iter().copied().collect();
    while let Some(uuid) = frontier.pop() {
        if !reachable.insert(uuid) {
            continue;
        }
        if let Some(cdf) = document.get(&uuid) {
            frontier.extend(
                cdf.dependency_uuids()
                    .filter(|dep| document.contains(dep))
                    .copied(),
            );
        }
    }

    let dropped: Vec<EntityUuid> = document
        .uuids()
        .into_iter()
        .filter(|uuid| !reachable.contains(uuid))
        .collect();
    for uuid in &dropped {
        document.remove(uuid);
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockRemoteSource;
    use cdfsync_protocol::{Cdf, CdfType, ContentHash, LocalId};
    use cdfsync_tracker::{LedgerTracker, TrackStatus};

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    fn cdf(n: u8, deps: &[u8]) -> Cdf {
        let mut cdf = Cdf::new(uuid(n), CdfType::ContentEntity, uuid(200))
            .with_hash(ContentHash::new(format!("hash-{n}")));
        for d in deps {
            cdf = cdf
                .with_dependency(uuid(*d), ContentHash::new(format!("hash-{d}")))
                .unwrap();
        }
        cdf
    }

    fn config() -> ImportConfig {
        ImportConfig::new(uuid(250))
    }

    #[test]
    fn parse_seeds_rejects_bad_input() {
        let err = parse_seeds(&[uuid(1).to_string(), "not-a-uuid".to_string()]).unwrap_err();
        assert!(matches!(err, ImportError::InvalidIdentifier { uuid } if uuid == "not-a-uuid"));

        let seeds = parse_seeds(&[uuid(1).to_string(), uuid(1).to_string()]).unwrap();
        assert_eq!(seeds.len(), 1);
    }

    #[test]
    fn single_round_when_hub_returns_everything() {
        let source = Bundling(MockRemoteSource::with_entities([
            cdf(1, &[2]),
            cdf(2, &[3]),
            cdf(3, &[]),
        ]));
        let tracker = LedgerTracker::in_memory();
        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();

        assert_eq!(resolution.fetch_rounds, 1);
        assert_eq!(
            resolution.document.uuids(),
            BTreeSet::from([uuid(1), uuid(2), uuid(3)])
        );
        assert!(resolution.short_circuited.is_empty());
    }

    #[test]
    fn chain_resolves_level_by_level() {
        let source = MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[3]), cdf(3, &[])]);
        let tracker = LedgerTracker::in_memory();
        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();

        assert_eq!(resolution.fetch_rounds, 3);
        assert_eq!(
            source.fetch_calls(),
            vec![
                BTreeSet::from([uuid(1)]),
                BTreeSet::from([uuid(2)]),
                BTreeSet::from([uuid(3)]),
            ]
        );
        assert!(resolution.stack.is_empty());
    }

    #[test]
    fn unchanged_dependency_is_short_circuited() {
        let source = MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[3]), cdf(3, &[])]);
        let tracker = LedgerTracker::in_memory();
        tracker
            .track_imported(&uuid(2), &ContentHash::new("hash-2"), &LocalId::new("node", "7"))
            .unwrap();
        tracker.mark_queued(&uuid(2), "q-1").unwrap();

        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();

        assert_eq!(source.fetch_calls(), vec![BTreeSet::from([uuid(1)])]);
        assert_eq!(resolution.short_circuited, BTreeSet::from([uuid(2)]));
        assert!(resolution.stack.is_real(&uuid(2)));
        assert_eq!(tracker.status(&uuid(2)).unwrap(), Some(TrackStatus::Imported));
        assert_eq!(
            resolution.covered(),
            BTreeSet::from([uuid(1), uuid(2)])
        );
    }

    /// Answers every fetch with the requested entities and everything they
    /// depend on.
    struct Bundling(MockRemoteSource);

    impl RemoteCdfSource for Bundling {
        fn fetch_by_uuids(&self, uuids: &BTreeSet<EntityUuid>) -> ImportResult<CdfDocument> {
            let mut document = self.0.fetch_by_uuids(uuids)?;
            loop {
                let external: BTreeSet<EntityUuid> =
                    document.external_dependencies().into_keys().collect();
                let next = self.0.fetch_by_uuids(&external)?;
                if next.is_empty() {
                    return Ok(document);
                }
                document.merge(next);
            }
        }
        fn webhook_for(
            &self,
            origin: &EntityUuid,
        ) -> ImportResult<Option<cdfsync_protocol::WebhookEndpoint>> {
            self.0.webhook_for(origin)
        }
        fn request_republish(
            &self,
            endpoint: &cdfsync_protocol::WebhookEndpoint,
            payload: &cdfsync_protocol::WebhookPayload,
        ) -> ImportResult<crate::source::RemoteResponse> {
            self.0.request_republish(endpoint, payload)
        }
    }

    #[test]
    fn bundled_unchanged_dependency_is_short_circuited() {
        let source = Bundling(MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[])]));
        let tracker = LedgerTracker::in_memory();
        tracker
            .track_imported(&uuid(2), &ContentHash::new("hash-2"), &LocalId::new("node", "7"))
            .unwrap();

        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();

        assert_eq!(resolution.fetch_rounds, 1);
        assert_eq!(resolution.short_circuited, BTreeSet::from([uuid(2)]));
        assert!(resolution.stack.is_real(&uuid(2)));
        assert_eq!(resolution.document.uuids(), BTreeSet::from([uuid(1)]));
    }

    #[test]
    fn bundled_subtree_of_unchanged_dependency_is_dropped() {
        // 1 -> 2 -> 3, plus 1 -> 4. Only 2 is tracked at its current hash.
        let source = Bundling(MockRemoteSource::with_entities([
            cdf(1, &[2, 4]),
            cdf(2, &[3]),
            cdf(3, &[]),
            cdf(4, &[]),
        ]));
        let tracker = LedgerTracker::in_memory();
        tracker
            .track_imported(&uuid(2), &ContentHash::new("hash-2"), &LocalId::new("node", "7"))
            .unwrap();

        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();

        assert_eq!(resolution.fetch_rounds, 1);
        assert_eq!(resolution.document.uuids(), BTreeSet::from([uuid(1), uuid(4)]));
        assert_eq!(resolution.short_circuited, BTreeSet::from([uuid(2)]));
    }

    #[test]
    fn bundled_seed_is_never_short_circuited() {
        let source = Bundling(MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[])]));
        let tracker = LedgerTracker::in_memory();
        tracker
            .track_imported(&uuid(2), &ContentHash::new("hash-2"), &LocalId::new("node", "7"))
            .unwrap();

        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1), uuid(2)]))
            .unwrap();

        assert!(resolution.short_circuited.is_empty());
        assert_eq!(resolution.document.uuids(), BTreeSet::from([uuid(1), uuid(2)]));
    }

    #[test]
    fn vanished_seed_is_retried_only_in_idle_rounds() {
        // Seed 9 never comes back while the chain below 1 keeps growing.
        let source = MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[3]), cdf(3, &[])]);
        let tracker = LedgerTracker::in_memory();
        let config = config();

        let err = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1), uuid(9)]))
            .unwrap_err();
        assert!(matches!(err, ImportError::IncompleteClosure { .. }));

        assert_eq!(
            source.fetch_calls(),
            vec![
                BTreeSet::from([uuid(1), uuid(9)]),
                BTreeSet::from([uuid(2)]),
                BTreeSet::from([uuid(3)]),
                BTreeSet::from([uuid(9)]),
                BTreeSet::from([uuid(9)]),
            ]
        );
    }

    #[test]
    fn changed_dependency_is_fetched() {
        let source = MockRemoteSource::with_entities([cdf(1, &[2]), cdf(2, &[])]);
        let tracker = LedgerTracker::in_memory();
        tracker
            .track_imported(&uuid(2), &ContentHash::new("older"), &LocalId::new("node", "7"))
            .unwrap();

        let config = config();
        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap();
        assert!(resolution.short_circuited.is_empty());
        assert!(resolution.document.contains(&uuid(2)));
    }

    #[test]
    fn shared_dependency_fetched_once() {
        let source = MockRemoteSource::with_entities([
            cdf(1, &[3]),
            cdf(2, &[3]),
            cdf(3, &[]),
        ]);
        let tracker = LedgerTracker::in_memory();
        let config = config();
        DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1), uuid(2)]))
            .unwrap();

        let fetched: Vec<EntityUuid> = source.fetch_calls().into_iter().flatten().collect();
        assert_eq!(fetched, vec![uuid(1), uuid(2), uuid(3)]);
    }

    #[test]
    fn missing_dependency_stalls_into_incomplete_closure() {
        let source = MockRemoteSource::with_entities([cdf(1, &[9])]);
        source.register_webhook(uuid(200), "https://origin.example/webhook");
        let tracker = LedgerTracker::in_memory();
        let config = config();

        let err = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap_err();

        match err {
            ImportError::IncompleteClosure { missing_uuids, .. } => {
                assert_eq!(missing_uuids, BTreeSet::from([uuid(9)]));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Seed round plus two empty rounds.
        assert_eq!(source.fetch_calls().len(), 3);
        let sent = source.republished();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.initiator, uuid(250));
        assert_eq!(sent[0].payload.entities[&uuid(200)][0].uuid, uuid(1));
    }

    #[test]
    fn stall_limit_is_configurable() {
        let source = MockRemoteSource::new();
        let tracker = LedgerTracker::in_memory();
        let config = config().with_fetch_stall_limit(1);

        let err = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap_err();
        assert!(matches!(err, ImportError::IncompleteClosure { .. }));
        assert_eq!(source.fetch_calls().len(), 1);
    }

    #[test]
    fn transport_failure_propagates() {
        let source = MockRemoteSource::with_entities([cdf(1, &[])]);
        source.fail_next_fetches(1);
        let tracker = LedgerTracker::in_memory();
        let config = config();

        let err = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&BTreeSet::from([uuid(1)]))
            .unwrap_err();
        assert!(matches!(err, ImportError::Transport { retryable: true, .. }));
    }
}
