//! The dependency stack accumulator.

use crate::error::{ImportError, ImportResult};
use cdfsync_protocol::{EntityUuid, LocalReference};
use std::collections::BTreeMap;

/// A remote uuid paired with the local object it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrapper {
    /// Remote entity uuid.
    pub remote_uuid: EntityUuid,
    /// Local object, real or stub.
    pub local: LocalReference,
}

impl EntityWrapper {
    /// Creates a wrapper.
    pub fn new(remote_uuid: EntityUuid, local: LocalReference) -> Self {
        Self { remote_uuid, local }
    }
}

/// Everything resolved so far in one import, keyed by remote uuid.
///
/// The stack is passed by value and returned, never shared. Registration
/// rules keep resolution at-most-once per import:
///
/// - an unseen uuid may be registered as real or stub
/// - a stub may be upgraded to a real object
/// - registering the identical entry again is a no-op
/// - anything else is a [`ImportError::StackConflict`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyStack {
    entries: BTreeMap<EntityUuid, EntityWrapper>,
}

impl DependencyStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `wrapper`, returning the updated stack.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::StackConflict`] if the uuid is already
    /// resolved to something else and this is not a stub upgrade.
    pub fn with_entity(mut self, wrapper: EntityWrapper) -> ImportResult<Self> {
        self.register(wrapper)?;
        Ok(self)
    }

    /// Registers `wrapper` in place. Same rules as [`Self::with_entity`].
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::StackConflict`] on a conflicting registration.
    pub fn register(&mut self, wrapper: EntityWrapper) -> ImportResult<()> {
        let uuid = wrapper.remote_uuid;
        match self.entries.get(&uuid) {
            None => {}
            Some(existing) if existing == &wrapper => return Ok(()),
            Some(existing) if existing.local.is_stub() && !wrapper.local.is_stub() => {}
            Some(_) => return Err(ImportError::StackConflict { uuid }),
        }
        self.entries.insert(uuid, wrapper);
        Ok(())
    }

    /// Returns the entry for `uuid`.
    pub fn get(&self, uuid: &EntityUuid) -> Option<&EntityWrapper> {
        self.entries.get(uuid)
    }

    /// Returns true if `uuid` is registered, real or stub.
    pub fn contains(&self, uuid: &EntityUuid) -> bool {
        self.entries.contains_key(uuid)
    }

    /// Returns true if `uuid` is registered as a real object.
    pub fn is_real(&self, uuid: &EntityUuid) -> bool {
        self.entries
            .get(uuid)
            .is_some_and(|wrapper| !wrapper.local.is_stub())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in uuid order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityWrapper> {
        self.entries.values()
    }

    /// Returns the uuids currently registered as stubs.
    pub fn stub_uuids(&self) -> Vec<EntityUuid> {
        self.entries
            .values()
            .filter(|wrapper| wrapper.local.is_stub())
            .map(|wrapper| wrapper.remote_uuid)
            .collect()
    }
}
