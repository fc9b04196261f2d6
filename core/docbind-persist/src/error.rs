//! Error types for the persistence context.

use docbind_client::{ClientError, CommunicationError};
use docbind_model::ModelError;
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors raised by the entity manager and its collaborators.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The object has no entity type mapping in this metamodel, lacks
    /// required metadata, or names an unknown attribute.
    #[error("illegal entity: {0}")]
    IllegalEntity(String),

    /// The identifier is already bound to another instance, or the instance
    /// is managed by another entity manager.
    #[error("entity already exists: {0}")]
    EntityExists(String),

    /// A precondition of the requested operation does not hold.
    #[error("{0}")]
    Persistent(String),

    #[error(transparent)]
    Communication(#[from] CommunicationError),

    /// Fields of an unloaded reference were accessed.
    #[error("entity {0} is not available, load it first")]
    Unavailable(String),

    #[error("the entity manager is closed")]
    Closed,

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("type error: {0}")]
    Types(#[from] docbind_types::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistError {
    /// HTTP status of a communication failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            PersistError::Communication(e) => Some(e.status),
            _ => None,
        }
    }

    /// Whether a conditional write lost against a newer server version.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, PersistError::Communication(e) if e.is_precondition_failed())
    }
}
