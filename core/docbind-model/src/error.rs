//! Metamodel error types.

use thiserror::Error;

/// Result type for metamodel operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or parsing a metamodel.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("the type {0} is already declared")]
    DuplicateType(String),

    #[error("invalid type reference: {0}")]
    InvalidTypeRef(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
