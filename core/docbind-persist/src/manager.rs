//! The entity manager: one persistence context.
//!
//! Owns the identity map and session token, and drives every exchange with
//! the document store through the [`Connector`]. Each state-changing
//! operation holds the entity's operation lock for the whole exchange;
//! cascades fan out over the reachable graph and run concurrently.

use crate::codec::{self, ReferenceResolver};
use crate::config::PersistConfig;
use crate::entity::{Entity, EntityRef};
use crate::error::{PersistError, PersistResult};
use crate::graph::{self, Depth, VisitKey};
use crate::identity_map::IdentityMap;
use crate::options::{DeleteOptions, LoadOptions, PreSave, SaveOptions};
use crate::state::EntityState;
use crate::sync;
use docbind_client::{CommunicationError, Connector, Envelope, Message, Reply, Response};
use docbind_model::{ManagedType, Metamodel};
use docbind_types::{ContextId, ObjectId, Version, DB_PREFIX};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
pub(crate) struct Session {
    pub(crate) token: Option<String>,
    pub(crate) me: Option<EntityRef>,
    pub(crate) device_registered: Option<bool>,
}

pub(crate) struct ManagerInner {
    pub(crate) context: ContextId,
    pub(crate) metamodel: Arc<Metamodel>,
    pub(crate) config: PersistConfig,
    connector: Mutex<Option<Arc<dyn Connector>>>,
    entities: Mutex<IdentityMap>,
    pub(crate) session: Mutex<Session>,
    /// Serializes the user flows (register, login, logout, ...).
    pub(crate) user_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
    Save,
}

impl WriteKind {
    fn name(self) -> &'static str {
        match self {
            WriteKind::Insert => "insert",
            WriteKind::Update => "update",
            WriteKind::Save => "save",
        }
    }
}

/// A persistence context bound to one connector and metamodel.
///
/// Cheap to clone; clones share the same identity map and session.
#[derive(Clone)]
pub struct EntityManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl EntityManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        metamodel: Arc<Metamodel>,
        config: PersistConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                context: ContextId::next(),
                metamodel,
                config,
                connector: Mutex::new(Some(connector)),
                entities: Mutex::new(IdentityMap::new()),
                session: Mutex::new(Session::default()),
                user_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Identifier stamped as owner on every attached entity.
    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.inner.metamodel
    }

    pub fn is_open(&self) -> bool {
        sync::lock(&self.inner.connector).is_some()
    }

    pub fn is_global(&self) -> bool {
        self.inner.config.global
    }

    /// The current session token.
    pub fn token(&self) -> Option<String> {
        sync::lock(&self.inner.session).token.clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        sync::lock(&self.inner.session).token = token;
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        sync::lock(&self.inner.entities).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn connector(&self) -> PersistResult<Arc<dyn Connector>> {
        sync::lock(&self.inner.connector)
            .clone()
            .ok_or(PersistError::Closed)
    }

    /// Performs one exchange. Stamps the session token (unless global) and
    /// takes over a token issued with the response.
    pub(crate) async fn send(&self, envelope: Envelope) -> PersistResult<Reply> {
        let connector = self.connector()?;
        let envelope = if self.is_global() {
            envelope
        } else {
            envelope.with_token(self.token())
        };
        let request = envelope.build_request();
        debug!(
            "[{}] {} {} {}",
            self.inner.context,
            envelope.message.name(),
            request.method.as_str(),
            request.path
        );

        let response = connector.send(request).await?;
        if !self.is_global() {
            if let Some(token) = response.authorization_token() {
                self.set_token(Some(token.to_string()));
            }
        }
        Ok(envelope.apply_response(response)?)
    }

    // ── References ───────────────────────────────────────────────

    fn entity_type(&self, type_name: &str) -> PersistResult<Arc<ManagedType>> {
        self.inner
            .metamodel
            .entity(type_name)
            .cloned()
            .ok_or_else(|| PersistError::IllegalEntity(format!("{type_name} is not an entity type")))
    }

    /// A new, unattached instance of `type_name`.
    pub fn create(&self, type_name: &str) -> PersistResult<EntityRef> {
        Ok(Entity::new(self.entity_type(type_name)?))
    }

    /// The tracked instance for `key`, or a new unloaded one.
    ///
    /// A key starting with `/db/` is taken as a full identifier.
    pub fn get_reference(&self, type_name: &str, key: &str) -> PersistResult<EntityRef> {
        let id = if key.starts_with(DB_PREFIX) {
            ObjectId::parse(key)?
        } else {
            ObjectId::new(type_name, key)
        };
        self.get_reference_by_id(&id)
    }

    pub fn get_reference_by_id(&self, id: &ObjectId) -> PersistResult<EntityRef> {
        self.connector()?;
        let mut entities = sync::lock(&self.inner.entities);
        if let Some(entity) = entities.get(id) {
            return Ok(entity.clone());
        }
        let entity = Entity::unavailable(self.entity_type(id.bucket())?, id.clone());
        entity.with_state(|state| state.set_owner(Some(self.inner.context)));
        entities.insert(id.clone(), entity.clone());
        Ok(entity)
    }

    /// Starts tracking `entity`, assigning a generated identifier if it has
    /// none (except for types whose ids are assigned by the server).
    pub fn attach(&self, entity: &EntityRef) -> PersistResult<()> {
        self.connector()?;
        if self.contains(entity) {
            return Ok(());
        }
        let managed_type = self.entity_type(entity.type_name())?;
        if entity.is_removed() {
            return Err(removed(entity));
        }
        if let Some(owner) = entity.owner() {
            if owner != self.inner.context {
                return Err(PersistError::EntityExists(format!(
                    "{entity:?} is managed by another entity manager"
                )));
            }
        }

        let mut entities = sync::lock(&self.inner.entities);
        let id = match entity.id() {
            Some(id) => Some(id),
            None if managed_type.server_assigned_ids() => None,
            None => Some(ObjectId::generate(managed_type.name())),
        };
        if let Some(id) = &id {
            if entities.contains(id) {
                return Err(PersistError::EntityExists(format!(
                    "another instance of {id} is already attached"
                )));
            }
        }

        entity.with_state(|state| {
            if let Some(id) = &id {
                state.set_id(id.clone());
            }
            state.set_owner(Some(self.inner.context));
        });
        if let Some(id) = id {
            debug!("[{}] Attached {}", self.inner.context, id);
            entities.insert(id, entity.clone());
        }
        Ok(())
    }

    /// Whether exactly this instance is tracked.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        sync::lock(&self.inner.entities).contains_entity(entity)
    }

    /// Whether any instance with this entity's identifier is tracked.
    pub fn contains_by_id(&self, entity: &EntityRef) -> bool {
        entity
            .id()
            .is_some_and(|id| sync::lock(&self.inner.entities).contains(&id))
    }

    /// Stops tracking `entity` once its pending operation settles.
    pub async fn detach(&self, entity: &EntityRef) {
        let _guard = entity.lock().await;
        self.remove_reference(entity);
        entity.with_state(|state| state.set_owner(None));
    }

    /// Drops `entity` from the identity map. Objects referencing it are not
    /// touched.
    pub fn remove_reference(&self, entity: &EntityRef) {
        let Some(id) = entity.id() else {
            return;
        };
        let mut entities = sync::lock(&self.inner.entities);
        if entities.get(&id).is_some_and(|tracked| tracked.same(entity)) {
            entities.remove(&id);
        }
    }

    /// Registers an entity whose identifier arrived with a server response.
    fn track_created(&self, entity: &EntityRef) -> PersistResult<()> {
        let id = require_id(entity)?;
        let mut entities = sync::lock(&self.inner.entities);
        match entities.get(&id) {
            Some(tracked) if !tracked.same(entity) => Err(PersistError::EntityExists(format!(
                "another instance of {id} is already attached"
            ))),
            Some(_) => Ok(()),
            None => {
                entities.insert(id, entity.clone());
                Ok(())
            }
        }
    }

    /// Forgets every tracked entity.
    pub fn clear(&self) {
        let dropped = sync::lock(&self.inner.entities).clear();
        debug!("[{}] Cleared {} entities", self.inner.context, dropped.len());
    }

    /// Clears the context and releases the connector. Every later operation
    /// fails with [`PersistError::Closed`].
    pub fn close(&self) {
        sync::lock(&self.inner.connector).take();
        self.clear();
        let mut session = sync::lock(&self.inner.session);
        session.me = None;
        session.token = None;
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Loads the object `key` of `type_name`. `Ok(None)` if it does not exist.
    pub async fn load(
        &self,
        type_name: &str,
        key: &str,
        options: LoadOptions,
    ) -> PersistResult<Option<EntityRef>> {
        let entity = self.get_reference(type_name, key)?;
        self.load_root(entity, options).await
    }

    pub async fn load_by_id(
        &self,
        id: &ObjectId,
        options: LoadOptions,
    ) -> PersistResult<Option<EntityRef>> {
        let entity = self.get_reference_by_id(id)?;
        self.load_root(entity, options).await
    }

    /// Reloads `entity` from the server, discarding local changes.
    pub async fn refresh(
        &self,
        entity: &EntityRef,
        options: LoadOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.attach(entity)?;
        self.load_root(entity.clone(), options.refresh(true)).await
    }

    async fn load_root(
        &self,
        entity: EntityRef,
        options: LoadOptions,
    ) -> PersistResult<Option<EntityRef>> {
        let resolved = Mutex::new(HashSet::from([VisitKey::of(&entity)]));
        self.load_graph(entity, options, &resolved).await
    }

    fn load_graph<'a>(
        &'a self,
        entity: EntityRef,
        options: LoadOptions,
        resolved: &'a Mutex<HashSet<VisitKey>>,
    ) -> BoxFuture<'a, PersistResult<Option<EntityRef>>> {
        async move {
            let loaded = self.fetch(&entity, options.refresh).await?;
            if loaded.is_none() || options.depth.is_zero() {
                return Ok(loaded);
            }

            let sub_options = LoadOptions {
                depth: options.depth.decrement(),
                ..options
            };
            let pending: Vec<_> = graph::sub_entities(&entity, Depth::Levels(1))
                .into_iter()
                .filter(|sub| sync::lock(resolved).insert(VisitKey::of(sub)))
                .map(|sub| self.load_graph(sub, sub_options, resolved))
                .collect();
            for result in join_all(pending).await {
                result?;
            }
            Ok(loaded)
        }
        .boxed()
    }

    async fn fetch(&self, entity: &EntityRef, refresh: bool) -> PersistResult<Option<EntityRef>> {
        let _guard = entity.lock().await;
        if entity.is_removed() {
            return Err(removed(entity));
        }
        let id = require_id(entity)?;
        let version = entity.version();

        let mut envelope = Envelope::new(Message::GetObject { id });
        if version.is_some() || refresh {
            envelope = envelope.with_no_cache();
        }
        if let (Some(version), false) = (version, refresh) {
            envelope = envelope.with_if_none_match(version);
        }

        match self.send(envelope).await? {
            Reply::Body(json) => {
                codec::set_json(entity, &json, self)?;
                entity.with_state(EntityState::set_persistent)?;
                Ok(Some(entity.clone()))
            }
            Reply::NotModified => Ok(Some(entity.clone())),
            Reply::NotFound => {
                debug!("[{}] {:?} no longer exists", self.inner.context, entity);
                self.mark_removed(entity);
                Ok(None)
            }
        }
    }

    fn mark_removed(&self, entity: &EntityRef) {
        self.remove_reference(entity);
        entity.with_state(EntityState::set_removed);
    }

    // ── Writing ──────────────────────────────────────────────────

    /// Creates the object on the server. Fails if it already has a version.
    pub async fn insert(
        &self,
        entity: &EntityRef,
        options: SaveOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.write(entity, WriteKind::Insert, options).await
    }

    /// Replaces the stored object. Fails if it was never persisted.
    pub async fn update(
        &self,
        entity: &EntityRef,
        options: SaveOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.write(entity, WriteKind::Update, options).await
    }

    /// Inserts or updates depending on whether the object has a version.
    pub async fn save(
        &self,
        entity: &EntityRef,
        options: SaveOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.write(entity, WriteKind::Save, options).await
    }

    /// Applies `pre_save` and saves, refreshing and starting over whenever
    /// the save loses against a concurrent writer.
    pub async fn optimistic_save<F>(
        &self,
        entity: &EntityRef,
        mut pre_save: F,
    ) -> PersistResult<Option<EntityRef>>
    where
        F: FnMut(&EntityRef) -> PersistResult<PreSave> + Send,
    {
        loop {
            if pre_save(entity)? == PreSave::Abort {
                return Ok(Some(entity.clone()));
            }
            match self.save(entity, SaveOptions::default()).await {
                Err(err) if err.is_precondition_failed() => {
                    debug!("[{}] {:?} changed concurrently, retrying", self.inner.context, entity);
                    if self.refresh(entity, LoadOptions::default()).await?.is_none() {
                        return Ok(None);
                    }
                }
                result => return result,
            }
        }
    }

    async fn write(
        &self,
        root: &EntityRef,
        kind: WriteKind,
        options: SaveOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.attach(root)?;
        let single = SaveOptions {
            depth: Depth::default(),
            ..options
        };

        let mut pending: Vec<BoxFuture<'_, PersistResult<Option<EntityRef>>>> =
            vec![self.write_one(root.clone(), kind, single, false).boxed()];
        for sub in graph::sub_entities(root, options.depth) {
            pending.push(
                async move {
                    if sub.is_removed() {
                        return Ok(None);
                    }
                    self.attach(&sub)?;
                    self.write_one(sub, kind, single, true).await
                }
                .boxed(),
            );
        }
        settle(join_all(pending).await)
    }

    async fn write_one(
        &self,
        entity: EntityRef,
        kind: WriteKind,
        options: SaveOptions,
        cascaded: bool,
    ) -> PersistResult<Option<EntityRef>> {
        let _guard = entity.lock().await;
        if entity.is_removed() {
            // Removed while the cascade was queued.
            return if cascaded { Ok(None) } else { Err(removed(&entity)) };
        }
        if !entity.is_dirty() {
            return Ok(Some(entity.clone()));
        }

        let state = entity.state();
        match kind {
            WriteKind::Insert if state.version().is_some() => {
                return Err(PersistError::Persistent(format!(
                    "{entity:?} already exists and can't be inserted"
                )));
            }
            WriteKind::Update if state.version().is_none() => {
                return Err(PersistError::Persistent(format!(
                    "{entity:?} was never saved and can't be updated"
                )));
            }
            WriteKind::Save if options.force && state.id().is_none() => {
                return Err(PersistError::Persistent(format!(
                    "{entity:?} has no identifier and can't be force saved"
                )));
            }
            _ => {}
        }

        self.attach_references(&entity)?;
        let exclude_version = options.force && kind != WriteKind::Insert;
        let body = codec::get_json(&entity, exclude_version)?;
        let is_new = state.id().is_none();

        let create = || {
            Envelope::new(Message::CreateObject {
                bucket: entity.type_name().to_string(),
                body: body.clone(),
            })
        };
        let replace = || -> PersistResult<Envelope> {
            Ok(Envelope::new(Message::ReplaceObject {
                id: require_id(&entity)?,
                body: body.clone(),
            }))
        };
        let envelope = match (kind, options.force, state.version()) {
            (WriteKind::Insert, _, _) => create(),
            (WriteKind::Update, true, _) => replace()?.with_if_match(Version::any()),
            (WriteKind::Update, false, Some(version)) => replace()?.with_if_match(version.clone()),
            (WriteKind::Save, true, _) => replace()?,
            (WriteKind::Save, false, Some(version)) => replace()?.with_if_match(version.clone()),
            (_, _, None) => create(),
        };

        // Mutations made while the exchange is in flight re-dirty the entity.
        if !options.refresh {
            entity.with_state(EntityState::set_persistent)?;
        }

        match self.send(envelope).await {
            Ok(Reply::Body(json)) => {
                if options.refresh {
                    codec::set_json(&entity, &json, self)?;
                    entity.with_state(EntityState::set_persistent)?;
                } else {
                    codec::set_json_metadata(&entity, &json);
                }
                if is_new {
                    self.track_created(&entity)?;
                }
                debug!(
                    "[{}] {} of {:?} succeeded",
                    self.inner.context,
                    kind.name(),
                    entity
                );
                Ok(Some(entity.clone()))
            }
            Ok(Reply::NotModified) => Ok(Some(entity.clone())),
            Ok(Reply::NotFound) => {
                self.mark_removed(&entity);
                Ok(None)
            }
            Err(err) => {
                // Removed cannot become dirty again; the failure is what matters.
                let _ = entity.with_state(EntityState::set_dirty);
                warn!("{} of {:?} failed: {}", kind.name(), entity, err);
                Err(err)
            }
        }
    }

    /// Attaches directly referenced entities that have no identifier yet so
    /// that the body can name them.
    fn attach_references(&self, entity: &EntityRef) -> PersistResult<()> {
        for sub in graph::sub_entities(entity, Depth::Levels(1)) {
            if sub.id().is_none() {
                self.attach(&sub)?;
            }
        }
        Ok(())
    }

    // ── Deleting ─────────────────────────────────────────────────

    /// Deletes the object on the server and stops tracking it.
    pub async fn delete(
        &self,
        entity: &EntityRef,
        options: DeleteOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.attach(entity)?;
        let force = options.force;

        let mut pending: Vec<BoxFuture<'_, PersistResult<Option<EntityRef>>>> =
            vec![self.delete_one(entity.clone(), force, false).boxed()];
        for sub in graph::sub_entities(entity, options.depth) {
            pending.push(
                async move {
                    if sub.is_removed() {
                        return Ok(None);
                    }
                    self.attach(&sub)?;
                    self.delete_one(sub, force, true).await
                }
                .boxed(),
            );
        }
        settle(join_all(pending).await)
    }

    async fn delete_one(
        &self,
        entity: EntityRef,
        force: bool,
        cascaded: bool,
    ) -> PersistResult<Option<EntityRef>> {
        let _guard = entity.lock().await;
        if entity.is_removed() {
            return if cascaded { Ok(None) } else { Err(removed(&entity)) };
        }
        let version = entity.version();
        if version.is_none() && !force {
            return Err(PersistError::IllegalEntity(format!(
                "{entity:?} has no version and can't be deleted without force"
            )));
        }

        let message = Message::DeleteObject {
            id: require_id(&entity)?,
        };
        let (method, path) = (message.method(), message.path());
        let mut envelope = Envelope::new(message);
        if let (Some(version), false) = (version, force) {
            envelope = envelope.with_if_match(version);
        }

        match self.send(envelope).await? {
            // A missing object is a failed delete; the entity stays tracked.
            Reply::NotFound => Err(PersistError::Communication(
                CommunicationError::from_response(method, &path, &Response::new(404)),
            )),
            Reply::Body(_) | Reply::NotModified => {
                self.mark_removed(&entity);
                debug!("[{}] Deleted {:?}", self.inner.context, entity);
                Ok(Some(entity.clone()))
            }
        }
    }
}

impl ReferenceResolver for EntityManager {
    fn reference(&self, id: &ObjectId) -> PersistResult<EntityRef> {
        self.get_reference_by_id(id)
    }

    fn embeddable(&self, name: &str) -> Option<Arc<ManagedType>> {
        self.inner.metamodel.embeddable(name).cloned()
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("context", &self.inner.context)
            .field("open", &self.is_open())
            .field("entities", &self.len())
            .finish()
    }
}

/// Root result unless any cascaded operation failed.
fn settle(
    results: Vec<PersistResult<Option<EntityRef>>>,
) -> PersistResult<Option<EntityRef>> {
    let mut results = results.into_iter();
    let root = results.next().unwrap_or(Ok(None));
    let root = root?;
    for result in results {
        result?;
    }
    Ok(root)
}

fn require_id(entity: &EntityRef) -> PersistResult<ObjectId> {
    entity
        .id()
        .ok_or_else(|| PersistError::IllegalEntity(format!("{entity:?} has no identifier")))
}

fn removed(entity: &EntityRef) -> PersistError {
    PersistError::Persistent(format!("{entity:?} was removed"))
}
