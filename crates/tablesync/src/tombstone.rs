use crate::operation::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entities permanently removed from the live graph.
///
/// Marking is irreversible for the lifetime of the session; an id that has
/// been marked is never reused and every operation targeting it is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneRegistry {
    removed: BTreeSet<EntityId>,
}

impl TombstoneRegistry {
    pub fn new() -> Self {
        TombstoneRegistry::default()
    }

    /// Returns false if the entity was already tombstoned
    pub fn mark(&mut self, entity: EntityId) -> bool {
        self.removed.insert(entity)
    }

    pub fn is_tombstoned(&self, entity: &EntityId) -> bool {
        self.removed.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityId> {
        self.removed.iter()
    }
}
