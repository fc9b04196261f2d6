//! Core type definitions for docbind.
//!
//! This crate defines the small, backend-agnostic types shared by the
//! metamodel, the wire protocol and the persistence context:
//! - Object identifiers (`/db/<bucket>/<key>`) and persistence-context ids
//! - Opaque version tokens used for optimistic concurrency
//! - The per-entity lifecycle state machine
//!
//! Anything that knows about fields, messages or HTTP belongs in the crates
//! built on top of this one.

mod ids;
mod lifecycle;
mod version;

pub use ids::{ContextId, ObjectId, DB_PREFIX};
pub use lifecycle::Lifecycle;
pub use version::Version;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },
}
