//! The entity materializer contract.

use crate::error::ImportResult;
use crate::stack::{DependencyStack, EntityWrapper};
use cdfsync_protocol::{Cdf, CdfDocument, ContentHash, EntityUuid, LocalId, LocalReference};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Failure reported by a materializer.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Some entities reference peers that have no local identity yet.
    ///
    /// `stack` holds everything that did materialize.
    #[error("{} entities reference unresolved peers", .unresolved.len())]
    UnresolvedReferences {
        /// The stack including every entity saved before giving up.
        stack: DependencyStack,
        /// Entities that could not be linked.
        unresolved: BTreeSet<EntityUuid>,
    },

    /// Materialization failed for a reason stubs cannot fix.
    #[error("{0}")]
    Failed(String),
}

/// Turns CDFs into local objects. Implemented by the embedding system.
pub trait EntityMaterializer: Send + Sync {
    /// Materializes every entity in `document` not already real in `stack`,
    /// returning the stack with each saved entity registered as real.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::UnresolvedReferences`] when some entities
    /// reference peers without a local identity.
    fn materialize(
        &self,
        document: &CdfDocument,
        stack: DependencyStack,
    ) -> Result<DependencyStack, MaterializeError>;

    /// Returns an existing local object for the entity, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be queried.
    fn load_local(&self, cdf: &Cdf) -> ImportResult<Option<LocalId>>;

    /// Saves a placeholder holding only identity fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the stub cannot be saved.
    fn create_stub(&self, cdf: &Cdf) -> ImportResult<LocalId>;
}

/// A local object held by [`MemoryMaterializer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Local identity.
    pub local: LocalId,
    /// True while the object is a placeholder.
    pub is_stub: bool,
    /// Content hash of the saved CDF; `None` for stubs.
    pub hash: Option<ContentHash>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<EntityUuid, StoredObject>,
    next_id: u64,
    saves: Vec<EntityUuid>,
    stubs: Vec<EntityUuid>,
    materialize_calls: u32,
    unresolvable: BTreeSet<EntityUuid>,
    failure: Option<String>,
}

impl MemoryState {
    fn allocate(&mut self, cdf: &Cdf) -> LocalId {
        self.next_id += 1;
        let entity_type = cdf.entity_type().unwrap_or(cdf.cdf_type.as_str());
        LocalId::new(entity_type, self.next_id.to_string())
    }
}

/// In-memory materializer behaving like a CMS with auto-incremented keys.
///
/// An entity can be saved only once every dependency has a local identity
/// in the stack. Each call keeps saving until no further entity becomes
/// ready, so acyclic documents materialize in one call and cycles need
/// stubs.
#[derive(Debug, Default)]
pub struct MemoryMaterializer {
    state: Mutex<MemoryState>,
}

impl MemoryMaterializer {
    /// Creates an empty materializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-existing local object for `uuid`.
    pub fn preload(&self, uuid: EntityUuid, local: LocalId) {
        self.state.lock().objects.insert(
            uuid,
            StoredObject {
                local,
                is_stub: false,
                hash: None,
            },
        );
    }

    /// Makes `uuids` permanently unresolvable, as if they referenced
    /// something no stub can stand in for.
    pub fn with_unresolvable(self, uuids: impl IntoIterator<Item = EntityUuid>) -> Self {
        self.state.lock().unresolvable.extend(uuids);
        self
    }

    /// Makes every materialize call fail outright.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
    }

    /// Returns the stored object for `uuid`.
    pub fn object(&self, uuid: &EntityUuid) -> Option<StoredObject> {
        self.state.lock().objects.get(uuid).cloned()
    }

    /// Returns the uuids of every real save, in order.
    pub fn saves(&self) -> Vec<EntityUuid> {
        self.state.lock().saves.clone()
    }

    /// Returns the uuids of every stub created, in order.
    pub fn stubs(&self) -> Vec<EntityUuid> {
        self.state.lock().stubs.clone()
    }

    /// Returns the number of materialize calls.
    pub fn materialize_calls(&self) -> u32 {
        self.state.lock().materialize_calls
    }
}

impl EntityMaterializer for MemoryMaterializer {
    fn materialize(
        &self,
        document: &CdfDocument,
        stack: DependencyStack,
    ) -> Result<DependencyStack, MaterializeError> {
        let mut state = self.state.lock();
        state.materialize_calls += 1;
        if let Some(message) = &state.failure {
            return Err(MaterializeError::Failed(message.clone()));
        }

        let mut stack = stack;
        let mut pending: Vec<&Cdf> = document
            .entities()
            .filter(|cdf| !stack.is_real(&cdf.uuid))
            .collect();

        loop {
            let mut waiting = Vec::new();
            let before = pending.len();
            for cdf in pending {
                let ready = !state.unresolvable.contains(&cdf.uuid)
                    && cdf.dependency_uuids().all(|dep| stack.contains(dep));
                if !ready {
                    waiting.push(cdf);
                    continue;
                }
                let existing = state.objects.get(&cdf.uuid).map(|o| o.local.clone());
                let local = match existing {
                    Some(local) => local,
                    None => state.allocate(cdf),
                };
                state.objects.insert(
                    cdf.uuid,
                    StoredObject {
                        local: local.clone(),
                        is_stub: false,
                        hash: Some(cdf.content_hash()),
                    },
                );
                state.saves.push(cdf.uuid);
                stack
                    .register(EntityWrapper::new(cdf.uuid, LocalReference::Real(local)))
                    .map_err(|e| MaterializeError::Failed(e.to_string()))?;
            }

            if waiting.is_empty() {
                return Ok(stack);
            }
            if waiting.len() == before {
                let unresolved = waiting.iter().map(|cdf| cdf.uuid).collect();
                return Err(MaterializeError::UnresolvedReferences { stack, unresolved });
            }
            pending = waiting;
        }
    }

    fn load_local(&self, cdf: &Cdf) -> ImportResult<Option<LocalId>> {
        Ok(self
            .state
            .lock()
            .objects
            .get(&cdf.uuid)
            .map(|object| object.local.clone()))
    }

    fn create_stub(&self, cdf: &Cdf) -> ImportResult<LocalId> {
        let mut state = self.state.lock();
        let local = state.allocate(cdf);
        state.objects.insert(
            cdf.uuid,
            StoredObject {
                local: local.clone(),
                is_stub: true,
                hash: None,
            },
        );
        state.stubs.push(cdf.uuid);
        Ok(local)
    }
}
