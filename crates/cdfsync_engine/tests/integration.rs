//! Integration tests for the import engine against in-process hubs.

use cdfsync_engine::{
    DependencyClosureResolver, ErrorKind, HttpRemoteSource, HubConfig, ImportError, ImportPhase,
    ImportPipeline, LoopbackClient, MemoryMaterializer, MockRemoteSource, QueueItem, QueueWorker,
    RemoteCdfSource, RemoteResponse, RetryConfig,
};
use cdfsync_protocol::{CdfDocument, EntityUuid, WebhookEndpoint, WebhookPayload};
use cdfsync_testkit::prelude::*;
use cdfsync_tracker::{ImportTracker, LedgerTracker};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// A hub that answers every fetch with the requested entities plus their
/// direct dependencies.
struct BundlingHub(MockRemoteSource);

impl RemoteCdfSource for BundlingHub {
    fn fetch_by_uuids(
        &self,
        uuids: &BTreeSet<EntityUuid>,
    ) -> cdfsync_engine::ImportResult<CdfDocument> {
        let direct = self.0.fetch_by_uuids(uuids)?;
        let deps: BTreeSet<EntityUuid> = direct
            .entities()
            .flat_map(|cdf| cdf.dependency_uuids().copied())
            .collect();
        let mut document = direct;
        if !deps.is_empty() {
            document.merge(self.0.fetch_by_uuids(&deps)?);
        }
        Ok(document)
    }

    fn webhook_for(
        &self,
        origin: &EntityUuid,
    ) -> cdfsync_engine::ImportResult<Option<WebhookEndpoint>> {
        self.0.webhook_for(origin)
    }

    fn request_republish(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
    ) -> cdfsync_engine::ImportResult<RemoteResponse> {
        self.0.request_republish(endpoint, payload)
    }
}

#[test]
fn example_scenario_single_fetch() {
    let a = uuid(1);
    let b = uuid(2);
    let hub = BundlingHub(MockRemoteSource::with_entities([
        content(a, uuid(200), &[b]),
        content(b, uuid(200), &[]),
    ]));
    let pipeline = ImportPipeline::new(
        import_config(),
        hub,
        LedgerTracker::in_memory(),
        MemoryMaterializer::new(),
    );

    let report = pipeline.import_entities(&[a.to_string()]).unwrap();

    assert_eq!(report.fetch_rounds, 1);
    assert_eq!(report.imported, vec![a, b]);
    assert!(report.stubs_created.is_empty());
    assert!(pipeline.source().0.republished().is_empty());
    assert!(pipeline.materializer().stubs().is_empty());
}

#[test]
fn bundled_unchanged_dependency_is_not_reimported() {
    let a = uuid(1);
    let b = uuid(2);
    let hub = BundlingHub(MockRemoteSource::with_entities([
        content(a, uuid(200), &[b]),
        content(b, uuid(200), &[]),
    ]));
    let pipeline = ImportPipeline::new(
        import_config(),
        hub,
        LedgerTracker::in_memory(),
        MemoryMaterializer::new(),
    );
    pipeline.import_entities(&[a.to_string()]).unwrap();
    let saves_before = pipeline.materializer().saves().len();

    let report = pipeline.import_entities(&[a.to_string()]).unwrap();

    assert_eq!(report.fetch_rounds, 1);
    assert_eq!(report.short_circuited, vec![b]);
    assert_eq!(report.imported, vec![a]);
    assert_eq!(&pipeline.materializer().saves()[saves_before..], &[a]);
    let record = pipeline.tracker().get(&b).unwrap().unwrap();
    assert_eq!(record.hash, Some(fixture_hash(&b)));
}

#[test]
fn chain_over_http() {
    let fixture = GraphFixture::chain(4);
    let hub = fixture.memory_hub();
    let pipeline = http_pipeline(&hub);

    let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();

    assert_eq!(report.imported.len(), 4);
    assert_eq!(report.fetch_rounds, 4);
    assert_eq!(hub.fetch_calls().len(), 4);
    for cdf in &fixture.entities {
        let record = pipeline.tracker().get(&cdf.uuid).unwrap().unwrap();
        assert_eq!(record.hash, Some(fixture_hash(&cdf.uuid)));
    }
}

#[test]
fn unchanged_dependency_is_not_refetched() {
    let fixture = GraphFixture::chain(3);
    let hub = fixture.memory_hub();
    let pipeline = http_pipeline(&hub);
    pipeline.import_entities(&fixture.seed_strings()).unwrap();
    let before = hub.fetch_calls().len();

    let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();

    let second: Vec<BTreeSet<EntityUuid>> = hub.fetch_calls()[before..].to_vec();
    assert_eq!(second, vec![BTreeSet::from([uuid(1)])]);
    assert_eq!(report.short_circuited, vec![uuid(2)]);
    assert_eq!(report.imported, vec![uuid(1)]);
}

#[test]
fn changed_dependency_is_refetched() {
    let fixture = GraphFixture::chain(2);
    let hub = fixture.memory_hub();
    let pipeline = http_pipeline(&hub);
    pipeline.import_entities(&fixture.seed_strings()).unwrap();

    // Entity 1 now quotes a new hash for 2.
    let updated = fixture.entities[0]
        .clone()
        .with_dependency(uuid(2), cdfsync_protocol::ContentHash::new("v2"))
        .unwrap();
    hub.publish(updated);

    let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();
    assert!(report.short_circuited.is_empty());
    assert_eq!(report.imported, vec![uuid(1), uuid(2)]);
}

#[test]
fn shared_dependency_fetched_and_materialized_once() {
    let fixture = GraphFixture::diamond();
    let source = fixture.mock_source();
    let pipeline = mock_pipeline(source);

    pipeline.import_entities(&fixture.seed_strings()).unwrap();

    let fetched: Vec<EntityUuid> = pipeline
        .source()
        .fetch_calls()
        .into_iter()
        .flatten()
        .collect();
    let unique: BTreeSet<EntityUuid> = fetched.iter().copied().collect();
    assert_eq!(fetched.len(), unique.len());

    let saves = pipeline.materializer().saves();
    let unique_saves: BTreeSet<EntityUuid> = saves.iter().copied().collect();
    assert_eq!(saves.len(), 4);
    assert_eq!(unique_saves.len(), 4);
}

#[test]
fn two_cycle_terminates_with_two_stubs() {
    let fixture = GraphFixture::two_cycle();
    let pipeline = mock_pipeline(fixture.mock_source());

    let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();

    assert_eq!(report.stubs_created.len(), 2);
    assert_eq!(report.materialize_passes, 2);
    assert_eq!(report.phases.last(), Some(&ImportPhase::Done));
    for uuid in [uuid(1), uuid(2)] {
        assert!(!pipeline.materializer().object(&uuid).unwrap().is_stub);
    }
}

#[test]
fn stale_ring_stalls_instead_of_hanging() {
    let fixture = GraphFixture::ring(10);
    let pipeline = ImportPipeline::new(
        import_config(),
        fixture.mock_source(),
        LedgerTracker::in_memory(),
        MemoryMaterializer::new().with_unresolvable([uuid(1)]),
    );

    let err = pipeline.import_entities(&fixture.seed_strings()).unwrap_err();

    match err {
        ImportError::CircularResolutionStalled { unprocessed, passes } => {
            assert_eq!(unprocessed, BTreeSet::from([uuid(1)]));
            assert!(passes <= import_config().stub_pass_budget);
        }
        other => panic!("unexpected {other:?}"),
    }
    // Nothing is recorded for a failed import.
    assert!(pipeline.tracker().records().unwrap().is_empty());
}

#[test]
fn republish_batches_by_origin_over_http() {
    let fixture = GraphFixture::cross_origin_missing();
    let hub = fixture.memory_hub();
    hub.register_webhook(uuid(201));
    hub.register_webhook(uuid(202));
    let pipeline = http_pipeline(&hub);

    let err = pipeline.import_entities(&fixture.seed_strings()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IncompleteClosure);
    assert_eq!(err.uuids(), vec![uuid(9)]);

    let mut payloads = hub.republished();
    assert_eq!(payloads.len(), 2);
    payloads.sort_by_key(|p| p.entity_count());
    assert_eq!(payloads[0].entities.keys().collect::<Vec<_>>(), vec![&uuid(202)]);
    assert_eq!(payloads[1].entities.keys().collect::<Vec<_>>(), vec![&uuid(201)]);
    assert_eq!(payloads[1].entity_count(), 2);
    for payload in &payloads {
        assert_eq!(payload.initiator, SITE_UUID);
        assert_eq!(payload.crud, cdfsync_protocol::CrudOperation::Republish);
    }
}

#[test]
fn unreachable_origin_does_not_block_others() {
    let fixture = GraphFixture::cross_origin_missing();
    let hub = fixture.memory_hub();
    hub.register_webhook(uuid(201));
    hub.register_webhook(uuid(202));
    hub.take_down(&uuid(201));
    let pipeline = http_pipeline(&hub);

    let err = pipeline.import_entities(&fixture.seed_strings()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IncompleteClosure);
    let payloads = hub.republished();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].entities.contains_key(&uuid(202)));
}

#[test]
fn invalid_seed_makes_zero_requests() {
    let hub = GraphFixture::chain(2).memory_hub();
    let pipeline = http_pipeline(&hub);

    let err = pipeline
        .import_entities(&[uuid(1).to_string(), "not-a-uuid".to_string()])
        .unwrap_err();

    assert!(matches!(err, ImportError::InvalidIdentifier { ref uuid } if uuid == "not-a-uuid"));
    assert!(hub.requests().is_empty());
}

#[test]
fn hub_outage_is_retried_in_process() {
    let fixture = GraphFixture::chain(2);
    let hub = fixture.memory_hub();
    hub.fail_next(2);
    let config = HubConfig::new(HUB_BASE_URL, uuid(7), HUB_API_KEY, HUB_SECRET).with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter(),
    );
    let source = HttpRemoteSource::new(config, LoopbackClient::new(Arc::clone(&hub)));
    let pipeline = ImportPipeline::new(
        import_config(),
        source,
        LedgerTracker::in_memory(),
        MemoryMaterializer::new(),
    );

    let report = pipeline.import_entities(&fixture.seed_strings()).unwrap();
    assert_eq!(report.imported.len(), 2);
}

#[test]
fn ledger_survives_restart() {
    let fixture = GraphFixture::chain(3);
    let hub = fixture.memory_hub();
    let ledger = TestLedger::new();
    let pipeline_over = |ledger: &TestLedger| {
        ImportPipeline::with_shared(
            import_config(),
            Arc::new(MemoryHub::source(&hub)),
            Arc::clone(&ledger.tracker),
            Arc::new(MemoryMaterializer::new()),
        )
    };

    pipeline_over(&ledger)
        .import_entities(&fixture.seed_strings())
        .unwrap();

    let ledger = ledger.reopen();
    assert_eq!(ledger.tracker.records().unwrap().len(), 3);
    let report = pipeline_over(&ledger)
        .import_entities(&fixture.seed_strings())
        .unwrap();
    assert_eq!(report.short_circuited, vec![uuid(2)]);
}

#[test]
fn queue_worker_recovers_after_republish() {
    let fixture = GraphFixture::chain(2);
    let hub = fixture.memory_hub();
    hub.register_webhook(uuid(200));
    let withheld = hub.unpublish(&uuid(2)).unwrap();
    let worker = QueueWorker::new(http_pipeline(&hub));
    let item = QueueItem::new("item-1", fixture.seed_strings());

    assert!(worker.process(&item).is_retry());
    assert_eq!(hub.republished().len(), 1);

    // The origin re-exports the entity.
    hub.publish(withheld);
    assert!(worker.process(&item).is_completed());
}

#[test]
fn queue_worker_dead_letters_repeated_failure() {
    let fixture = GraphFixture::cross_origin_missing();
    let worker = QueueWorker::new(mock_pipeline(fixture.mock_source()));
    let item = QueueItem::new("item-1", fixture.seed_strings());

    assert!(worker.process(&item).is_retry());
    assert!(worker.process(&item).is_dead_letter());
    assert_eq!(worker.pipeline().stats().imports_failed, 2);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn resolution_covers_transitive_closure(graph in layered_graph_strategy(3, 5, 4)) {
        let source = MockRemoteSource::with_entities(graph.to_cdfs(uuid(200)));
        let tracker = LedgerTracker::in_memory();
        let config = import_config();
        let seeds: BTreeSet<EntityUuid> = graph.roots().iter().copied().collect();

        let resolution = DependencyClosureResolver::new(&source, &tracker, &config)
            .resolve(&seeds)
            .unwrap();

        prop_assert_eq!(resolution.covered(), graph.closure(graph.roots()));
        let fetched: Vec<EntityUuid> = source.fetch_calls().into_iter().flatten().collect();
        let unique: BTreeSet<EntityUuid> = fetched.iter().copied().collect();
        prop_assert_eq!(fetched.len(), unique.len());
    }

    #[test]
    fn imported_dependencies_are_short_circuited(graph in layered_graph_strategy(3, 5, 4)) {
        let source = MockRemoteSource::with_entities(graph.to_cdfs(uuid(200)));
        let pipeline = mock_pipeline(source);
        let roots: Vec<String> = graph.roots().iter().map(EntityUuid::to_string).collect();
        pipeline.import_entities(&roots).unwrap();
        let before = pipeline.source().fetch_calls().len();

        let report = pipeline.import_entities(&roots).unwrap();

        // Only the seeds are fetched again.
        let again: BTreeSet<EntityUuid> = pipeline.source().fetch_calls()[before..]
            .iter()
            .flatten()
            .copied()
            .collect();
        let roots_set: BTreeSet<EntityUuid> = graph.roots().iter().copied().collect();
        prop_assert_eq!(again, roots_set.clone());
        for uuid in &report.short_circuited {
            prop_assert!(!roots_set.contains(uuid));
        }
    }

    #[test]
    fn withheld_node_is_named_exactly(case in graph_with_hole_strategy()) {
        let source = MockRemoteSource::with_entities(
            case.graph
                .to_cdfs(uuid(200))
                .into_iter()
                .filter(|cdf| cdf.uuid != case.withheld),
        );
        let tracker = LedgerTracker::in_memory();
        let config = import_config();
        let seeds: BTreeSet<EntityUuid> = case.graph.roots().iter().copied().collect();
        let reachable = case.graph.closure(case.graph.roots()).contains(&case.withheld);

        let result = DependencyClosureResolver::new(&source, &tracker, &config).resolve(&seeds);

        match result {
            Err(ImportError::IncompleteClosure { missing_uuids, .. }) => {
                prop_assert!(reachable);
                prop_assert_eq!(missing_uuids, BTreeSet::from([case.withheld]));
            }
            Ok(resolution) => {
                prop_assert!(!reachable);
                prop_assert_eq!(resolution.covered(), case.graph.closure(case.graph.roots()));
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }
}
