//! Metamodel for docbind.
//!
//! Describes the managed types an application persists:
//! - [`ManagedType`]: an entity or embeddable type with its attributes
//! - [`Attribute`] / [`AttributeKind`]: singular, list, set or map attributes
//! - [`TypeDescriptor`]: what an attribute (or collection element) holds
//! - [`Metamodel`]: the resolved set of types, with inherited attributes and
//!   reference paths computed once when the model is built
//!
//! The schema JSON format (`class` / `superClass` / `fields`) is handled by
//! [`Metamodel::from_json`] and [`Metamodel::to_json`].

mod error;
mod metamodel;
mod schema;

pub use error::{ModelError, ModelResult};
pub use metamodel::{type_name, Metamodel, OBJECT_TYPE, ROLE_TYPE, USER_TYPE};
pub use schema::{
    Attribute, AttributeKind, BasicType, ManagedType, PersistenceType, TypeDescriptor,
};
