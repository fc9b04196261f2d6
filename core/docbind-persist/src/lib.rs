//! Persistence context for docbind.
//!
//! An [`EntityManager`] tracks managed objects ([`Entity`]) in an identity
//! map, one instance per identifier, and keeps each one's lifecycle in step
//! with the document store:
//!
//! - `load` / `refresh` fetch conditionally and leave the entity untouched
//!   when the server answers "not modified"
//! - `insert` / `update` / `save` write with `if-match` version
//!   preconditions and cascade over referenced entities
//! - `delete` removes the object and stops tracking it
//! - `optimistic_save` retries a modification after losing a version race
//!
//! Every state-changing operation holds the entity's operation lock for the
//! whole exchange, so operations on one entity never overlap.
//!
//! [`EntityManagerFactory`] loads or uploads the schema and hands out
//! managers; the session flows (login, OAuth, devices) live on the manager.

mod auth;
pub mod codec;
mod config;
mod entity;
mod error;
mod factory;
pub mod graph;
mod identity_map;
mod manager;
mod options;
mod state;
mod sync;
mod value;

pub use auth::{OAuthOptions, PushMessage};
pub use config::PersistConfig;
pub use entity::{Entity, EntityRef};
pub use error::{PersistError, PersistResult};
pub use factory::EntityManagerFactory;
pub use graph::Depth;
pub use identity_map::IdentityMap;
pub use manager::EntityManager;
pub use options::{DeleteOptions, LoadOptions, PreSave, SaveOptions};
pub use state::EntityState;
pub use value::{Embedded, Value};
