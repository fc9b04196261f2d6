//! Entry point: connector plus metamodel, producing entity managers.

use crate::config::PersistConfig;
use crate::error::{PersistError, PersistResult};
use crate::manager::EntityManager;
use crate::sync;
use docbind_client::{Connector, Envelope, Message, Reply};
use docbind_model::Metamodel;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Creates entity managers that share one connector and metamodel.
pub struct EntityManagerFactory {
    connector: Arc<dyn Connector>,
    metamodel: RwLock<Arc<Metamodel>>,
    config: PersistConfig,
}

impl EntityManagerFactory {
    /// A factory using `metamodel` as is.
    pub fn new(connector: Arc<dyn Connector>, metamodel: Metamodel, config: PersistConfig) -> Self {
        Self {
            connector,
            metamodel: RwLock::new(Arc::new(metamodel)),
            config,
        }
    }

    /// A factory whose metamodel is loaded from the server.
    pub async fn connect(connector: Arc<dyn Connector>, config: PersistConfig) -> PersistResult<Self> {
        let factory = Self::new(connector, Metamodel::new(Vec::new())?, config);
        factory.load_metamodel().await?;
        Ok(factory)
    }

    pub fn metamodel(&self) -> Arc<Metamodel> {
        sync::read(&self.metamodel).clone()
    }

    /// Replaces the metamodel used by managers created from now on.
    pub fn set_metamodel(&self, metamodel: Metamodel) {
        *sync::write(&self.metamodel) = Arc::new(metamodel);
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Fetches the schema (`GET /db/schema`) and makes it the metamodel.
    pub async fn load_metamodel(&self) -> PersistResult<Arc<Metamodel>> {
        let json = match self.exchange(Envelope::new(Message::GetDbSchema)).await? {
            Reply::Body(json) => json,
            Reply::NotModified | Reply::NotFound => {
                return Err(PersistError::Persistent("the server returned no schema".into()));
            }
        };
        let metamodel = Arc::new(Metamodel::from_json(&json)?);
        info!("Loaded schema with {} entity types", metamodel.entities().count());
        *sync::write(&self.metamodel) = metamodel.clone();
        Ok(metamodel)
    }

    /// Uploads the whole schema, or only the type `bucket`.
    pub async fn save_metamodel(&self, bucket: Option<&str>) -> PersistResult<()> {
        let metamodel = self.metamodel();
        let message = match bucket {
            None => Message::PutDbSchema {
                schema: metamodel.to_json(),
            },
            Some(bucket) => Message::PutDbSchemaBucket {
                bucket: bucket.to_string(),
                schema: metamodel.type_to_json(bucket).ok_or_else(|| {
                    PersistError::IllegalEntity(format!("{bucket} is not a managed type"))
                })?,
            },
        };
        self.exchange(Envelope::new(message)).await?;
        info!("Saved schema{}", bucket.map(|b| format!(" of {b}")).unwrap_or_default());
        Ok(())
    }

    /// A new entity manager. A global manager holds its session in the
    /// connector and renews it right away.
    pub async fn create_entity_manager(&self, global: bool) -> EntityManager {
        let config = PersistConfig {
            global,
            ..self.config.clone()
        };
        let manager = EntityManager::new(self.connector.clone(), self.metamodel(), config);
        debug!("Created entity manager {} (global: {})", manager.context_id(), global);
        if global {
            manager.connect().await;
        }
        manager
    }

    async fn exchange(&self, envelope: Envelope) -> PersistResult<Reply> {
        let response = self.connector.send(envelope.build_request()).await?;
        Ok(envelope.apply_response(response)?)
    }
}
