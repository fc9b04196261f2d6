//! Per-entity persistence metadata.

use docbind_types::{ContextId, Lifecycle, ObjectId, Version};

/// Identifier, version, lifecycle and owning context of one entity.
///
/// Every lifecycle change goes through [`Lifecycle::transition`], so a
/// removed entity can never come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    id: Option<ObjectId>,
    version: Option<Version>,
    lifecycle: Lifecycle,
    owner: Option<ContextId>,
}

impl EntityState {
    /// State of a locally created object: dirty, never persisted.
    pub fn new() -> Self {
        Self {
            id: None,
            version: None,
            lifecycle: Lifecycle::Dirty,
            owner: None,
        }
    }

    /// State of a reference whose fields have not been loaded.
    pub fn unavailable(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            version: None,
            lifecycle: Lifecycle::Unavailable,
            owner: None,
        }
    }

    pub fn id(&self) -> Option<&ObjectId> {
        self.id.as_ref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The managing entity manager, if attached.
    pub fn owner(&self) -> Option<ContextId> {
        self.owner
    }

    pub fn is_dirty(&self) -> bool {
        self.lifecycle == Lifecycle::Dirty
    }

    pub fn is_removed(&self) -> bool {
        self.lifecycle == Lifecycle::Removed
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    pub(crate) fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub(crate) fn set_owner(&mut self, owner: Option<ContextId>) {
        self.owner = owner;
    }

    pub fn set_persistent(&mut self) -> docbind_types::Result<()> {
        self.lifecycle = self.lifecycle.transition(Lifecycle::Persistent)?;
        Ok(())
    }

    pub fn set_dirty(&mut self) -> docbind_types::Result<()> {
        self.lifecycle = self.lifecycle.transition(Lifecycle::Dirty)?;
        Ok(())
    }

    pub fn set_removed(&mut self) {
        self.lifecycle = Lifecycle::Removed;
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self::new()
    }
}
