//! Identifier-to-instance registry of one persistence context.

use crate::entity::EntityRef;
use docbind_types::ObjectId;
use std::collections::HashMap;

/// At most one managed instance per identifier.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entities: HashMap<ObjectId, EntityRef>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&EntityRef> {
        self.entities.get(id)
    }

    /// Registers `entity` under `id`, returning the instance previously
    /// registered there.
    pub fn insert(&mut self, id: ObjectId, entity: EntityRef) -> Option<EntityRef> {
        self.entities.insert(id, entity)
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<EntityRef> {
        self.entities.remove(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.entities.contains_key(id)
    }

    /// Whether exactly this instance is registered under its identifier.
    pub fn contains_entity(&self, entity: &EntityRef) -> bool {
        entity
            .id()
            .and_then(|id| self.entities.get(&id))
            .is_some_and(|registered| registered.same(entity))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Empties the map and hands back what was registered.
    pub fn clear(&mut self) -> Vec<EntityRef> {
        self.entities.drain().map(|(_, entity)| entity).collect()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.entities.values()
    }
}
