//! Managed objects.
//!
//! An [`Entity`] pairs a dynamic field container with its [`EntityState`];
//! both live in the same allocation, so the pairing cannot be broken or
//! established twice. Instances are shared as [`EntityRef`] handles whose
//! equality is identity.

use crate::error::{PersistError, PersistResult};
use crate::state::EntityState;
use crate::sync;
use crate::value::Value;
use docbind_model::ManagedType;
use docbind_types::{ContextId, Lifecycle, ObjectId, Version};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tokio::sync::MutexGuard;

pub(crate) struct EntityInner {
    pub(crate) state: EntityState,
    pub(crate) fields: BTreeMap<String, Value>,
}

/// A managed object of an entity type.
pub struct Entity {
    managed_type: Arc<ManagedType>,
    inner: Mutex<EntityInner>,
    operation: tokio::sync::Mutex<()>,
}

impl Entity {
    fn build(managed_type: Arc<ManagedType>, state: EntityState) -> EntityRef {
        EntityRef(Arc::new(Self {
            managed_type,
            inner: Mutex::new(EntityInner {
                state,
                fields: BTreeMap::new(),
            }),
            operation: tokio::sync::Mutex::new(()),
        }))
    }

    /// A new, dirty, never persisted object. Its identifier is assigned when
    /// it is attached to an entity manager.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(managed_type: Arc<ManagedType>) -> EntityRef {
        Self::build(managed_type, EntityState::new())
    }

    /// A new, dirty object with a caller-chosen identifier.
    pub fn with_id(managed_type: Arc<ManagedType>, id: ObjectId) -> EntityRef {
        let mut state = EntityState::new();
        state.set_id(id);
        Self::build(managed_type, state)
    }

    /// An unloaded reference to the object stored under `id`.
    pub fn unavailable(managed_type: Arc<ManagedType>, id: ObjectId) -> EntityRef {
        Self::build(managed_type, EntityState::unavailable(id))
    }

    pub fn managed_type(&self) -> &Arc<ManagedType> {
        &self.managed_type
    }

    pub fn type_name(&self) -> &str {
        self.managed_type.name()
    }

    /// Snapshot of the persistence metadata.
    pub fn state(&self) -> EntityState {
        sync::lock(&self.inner).state.clone()
    }

    pub fn id(&self) -> Option<ObjectId> {
        sync::lock(&self.inner).state.id().cloned()
    }

    pub fn version(&self) -> Option<Version> {
        sync::lock(&self.inner).state.version().cloned()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        sync::lock(&self.inner).state.lifecycle()
    }

    pub fn owner(&self) -> Option<ContextId> {
        sync::lock(&self.inner).state.owner()
    }

    pub fn is_dirty(&self) -> bool {
        self.lifecycle() == Lifecycle::Dirty
    }

    pub fn is_persistent(&self) -> bool {
        self.lifecycle() == Lifecycle::Persistent
    }

    pub fn is_removed(&self) -> bool {
        self.lifecycle() == Lifecycle::Removed
    }

    /// Reads an attribute. Unset attributes read as [`Value::Null`].
    pub fn get(&self, name: &str) -> PersistResult<Value> {
        self.check_attribute(name)?;
        let inner = sync::lock(&self.inner);
        if inner.state.lifecycle() == Lifecycle::Unavailable {
            return Err(PersistError::Unavailable(self.describe(&inner.state)));
        }
        Ok(inner.fields.get(name).cloned().unwrap_or_default())
    }

    /// Writes an attribute and marks the entity dirty.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> PersistResult<()> {
        let value = value.into();
        self.modify(name, move |slot| *slot = value)
    }

    /// Mutates an attribute in place (e.g. pushes into a collection) and
    /// marks the entity dirty. `f` must not access this entity.
    pub fn modify<R>(&self, name: &str, f: impl FnOnce(&mut Value) -> R) -> PersistResult<R> {
        self.check_attribute(name)?;
        let mut inner = sync::lock(&self.inner);
        match inner.state.lifecycle() {
            Lifecycle::Unavailable => {
                return Err(PersistError::Unavailable(self.describe(&inner.state)));
            }
            Lifecycle::Removed => {
                return Err(PersistError::Persistent(format!(
                    "{} was removed",
                    self.describe(&inner.state)
                )));
            }
            Lifecycle::Persistent | Lifecycle::Dirty => {}
        }
        let result = f(inner.fields.entry(name.to_string()).or_default());
        inner.state.set_dirty()?;
        Ok(result)
    }

    /// Serializes operations on this entity. Held for the whole exchange of
    /// every state-changing manager operation.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.operation.lock().await
    }

    /// Field value without availability checks.
    pub(crate) fn field(&self, name: &str) -> Value {
        let inner = sync::lock(&self.inner);
        inner.fields.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn fields(&self) -> BTreeMap<String, Value> {
        sync::lock(&self.inner).fields.clone()
    }

    pub(crate) fn replace_fields(&self, fields: BTreeMap<String, Value>) {
        sync::lock(&self.inner).fields = fields;
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut EntityState) -> R) -> R {
        f(&mut sync::lock(&self.inner).state)
    }

    fn check_attribute(&self, name: &str) -> PersistResult<()> {
        if self.managed_type.attribute(name).is_none() {
            return Err(PersistError::IllegalEntity(format!(
                "{} has no attribute {name}",
                self.managed_type.name()
            )));
        }
        Ok(())
    }

    fn describe(&self, state: &EntityState) -> String {
        match state.id() {
            Some(id) => id.to_string(),
            None => format!("new {}", self.managed_type.name()),
        }
    }
}

/// Shared handle to a managed object. Equality and hashing are by identity.
#[derive(Clone)]
pub struct EntityRef(Arc<Entity>);

impl EntityRef {
    /// Whether both handles point at the same instance.
    pub fn same(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Deref for EntityRef {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.0
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

// Fields are left out: graphs may be cyclic.
impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EntityRef")
            .field("type", &self.type_name())
            .field("id", &state.id().map(ObjectId::as_str))
            .field("lifecycle", &state.lifecycle())
            .finish()
    }
}
