//! Graph fixtures and pipeline helpers.
//!
//! Every fixture CDF carries an explicit content hash derived from its uuid,
//! and dependency edges quote the same hash, so a re-import sees unchanged
//! dependencies as unchanged.

use crate::hub::{HubSource, MemoryHub};
use cdfsync_engine::{ImportConfig, ImportPipeline, MemoryMaterializer, MockRemoteSource};
use cdfsync_protocol::{Cdf, CdfType, ContentHash, EntityUuid};
use cdfsync_tracker::{FileBackend, InMemoryBackend, LedgerTracker};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Site uuid used as the republish initiator in fixtures.
pub const SITE_UUID: EntityUuid = EntityUuid::from_bytes([0xEE; 16]);

/// Returns a deterministic uuid for small test numbers.
pub fn uuid(n: u8) -> EntityUuid {
    EntityUuid::from_bytes([n; 16])
}

/// Returns the fixture hash of `uuid`.
pub fn fixture_hash(uuid: &EntityUuid) -> ContentHash {
    ContentHash::compute(uuid.to_string().as_bytes())
}

/// Builds a content CDF owned by `origin` depending on `deps`.
///
/// # Panics
///
/// Panics if `deps` contains `uuid`.
pub fn content(uuid: EntityUuid, origin: EntityUuid, deps: &[EntityUuid]) -> Cdf {
    deps.iter().fold(
        Cdf::new(uuid, CdfType::ContentEntity, origin)
            .with_entity_type("node")
            .with_hash(fixture_hash(&uuid)),
        |cdf, dep| {
            cdf.with_dependency(*dep, fixture_hash(dep))
                .expect("fixture edges never point at their owner")
        },
    )
}

/// A set of CDFs plus the seeds to import.
#[derive(Debug, Clone)]
pub struct GraphFixture {
    /// Entities held by the hub.
    pub entities: Vec<Cdf>,
    /// Seeds to import.
    pub seeds: Vec<EntityUuid>,
}

impl GraphFixture {
    /// `1 -> 2 -> ... -> n`, seeded at 1.
    pub fn chain(n: u8) -> Self {
        let origin = uuid(200);
        let entities = (1..=n)
            .map(|i| {
                let deps: Vec<EntityUuid> = if i < n { vec![uuid(i + 1)] } else { Vec::new() };
                content(uuid(i), origin, &deps)
            })
            .collect();
        Self {
            entities,
            seeds: vec![uuid(1)],
        }
    }

    /// `1 -> {2, 3} -> 4`, seeded at 1.
    pub fn diamond() -> Self {
        let origin = uuid(200);
        Self {
            entities: vec![
                content(uuid(1), origin, &[uuid(2), uuid(3)]),
                content(uuid(2), origin, &[uuid(4)]),
                content(uuid(3), origin, &[uuid(4)]),
                content(uuid(4), origin, &[]),
            ],
            seeds: vec![uuid(1)],
        }
    }

    /// `1 <-> 2`, seeded at 1.
    pub fn two_cycle() -> Self {
        let origin = uuid(200);
        Self {
            entities: vec![
                content(uuid(1), origin, &[uuid(2)]),
                content(uuid(2), origin, &[uuid(1)]),
            ],
            seeds: vec![uuid(1)],
        }
    }

    /// A ring `1 -> 2 -> ... -> n -> 1`, seeded at 1.
    pub fn ring(n: u8) -> Self {
        let origin = uuid(200);
        let entities = (1..=n)
            .map(|i| {
                let next = if i == n { 1 } else { i + 1 };
                content(uuid(i), origin, &[uuid(next)])
            })
            .collect();
        Self {
            entities,
            seeds: vec![uuid(1)],
        }
    }

    /// Three entities from origins 201 and 202, all depending on 9.
    ///
    /// Seeds 1, 2 and 3. Entity 9 is not part of the fixture, so the hub
    /// cannot produce it.
    pub fn cross_origin_missing() -> Self {
        let missing = uuid(9);
        Self {
            entities: vec![
                content(uuid(1), uuid(201), &[missing]),
                content(uuid(2), uuid(201), &[missing]),
                content(uuid(3), uuid(202), &[missing]),
            ],
            seeds: vec![uuid(1), uuid(2), uuid(3)],
        }
    }

    /// Returns the seeds as strings, as a queue delivers them.
    pub fn seed_strings(&self) -> Vec<String> {
        self.seeds.iter().map(EntityUuid::to_string).collect()
    }

    /// Returns a hub holding the fixture.
    pub fn mock_source(&self) -> MockRemoteSource {
        MockRemoteSource::with_entities(self.entities.iter().cloned())
    }

    /// Returns an HTTP-level hub holding the fixture.
    pub fn memory_hub(&self) -> Arc<MemoryHub> {
        MemoryHub::shared(self.entities.iter().cloned())
    }
}

/// Pipeline over the mock hub and an in-memory ledger.
pub type MockPipeline =
    ImportPipeline<MockRemoteSource, LedgerTracker<InMemoryBackend>, MemoryMaterializer>;

/// Pipeline over the HTTP hub client and an in-memory ledger.
pub type HttpPipeline =
    ImportPipeline<HubSource, LedgerTracker<InMemoryBackend>, MemoryMaterializer>;

/// Returns the default fixture configuration.
pub fn import_config() -> ImportConfig {
    ImportConfig::new(SITE_UUID)
}

/// Builds a pipeline over `source` with a fresh ledger and materializer.
pub fn mock_pipeline(source: MockRemoteSource) -> MockPipeline {
    ImportPipeline::new(
        import_config(),
        source,
        LedgerTracker::in_memory(),
        MemoryMaterializer::new(),
    )
}

/// Builds a pipeline talking HTTP to `hub`.
pub fn http_pipeline(hub: &Arc<MemoryHub>) -> HttpPipeline {
    ImportPipeline::new(
        import_config(),
        MemoryHub::source(hub),
        LedgerTracker::in_memory(),
        MemoryMaterializer::new(),
    )
}

/// A file-backed ledger in a temporary directory.
pub struct TestLedger {
    /// The open ledger, shareable with pipelines.
    pub tracker: Arc<LedgerTracker<FileBackend>>,
    path: PathBuf,
    _dir: TempDir,
}

impl TestLedger {
    /// Opens an empty ledger.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or ledger file cannot be created.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("imports.ledger");
        let tracker = Arc::new(LedgerTracker::open_file(&path).expect("Failed to open ledger"));
        Self {
            tracker,
            path,
            _dir: dir,
        }
    }

    /// Returns the ledger file path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Closes and reopens the ledger, replaying the file.
    ///
    /// Pipelines still holding the old handle keep writing to the same file
    /// but never see the reopened index.
    ///
    /// # Panics
    ///
    /// Panics if the ledger cannot be reopened.
    pub fn reopen(self) -> Self {
        let Self { tracker, path, _dir } = self;
        drop(tracker);
        let tracker = Arc::new(LedgerTracker::open_file(&path).expect("Failed to reopen ledger"));
        Self {
            tracker,
            path,
            _dir,
        }
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}
