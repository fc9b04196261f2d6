use serde::{Deserialize, Serialize};

/// Native value types understood by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Time,
    DateTime,
    GeoPoint,
    JsonObject,
    JsonArray,
}

impl BasicType {
    const ALL: [BasicType; 10] = [
        BasicType::String,
        BasicType::Integer,
        BasicType::Double,
        BasicType::Boolean,
        BasicType::Date,
        BasicType::Time,
        BasicType::DateTime,
        BasicType::GeoPoint,
        BasicType::JsonObject,
        BasicType::JsonArray,
    ];

    /// Name used in `/db/_native.<Name>` type references.
    pub fn name(self) -> &'static str {
        match self {
            BasicType::String => "String",
            BasicType::Integer => "Integer",
            BasicType::Double => "Double",
            BasicType::Boolean => "Boolean",
            BasicType::Date => "Date",
            BasicType::Time => "Time",
            BasicType::DateTime => "DateTime",
            BasicType::GeoPoint => "GeoPoint",
            BasicType::JsonObject => "JsonObject",
            BasicType::JsonArray => "JsonArray",
        }
    }

    /// Looks up a basic type by its native name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// What a singular attribute, collection element or map key holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Basic(BasicType),
    /// Reference to another entity, by type name.
    Entity(String),
    /// Embedded object without identity, by type name.
    Embeddable(String),
}

impl TypeDescriptor {
    /// Whether values of this type are entities (graph edges).
    pub fn is_entity(&self) -> bool {
        matches!(self, TypeDescriptor::Entity(_))
    }

    /// Type name of an embeddable descriptor.
    pub fn embeddable_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Embeddable(name) => Some(name),
            _ => None,
        }
    }

    /// The schema type reference, e.g. `/db/_native.String` or `/db/Person`.
    pub fn type_ref(&self) -> String {
        match self {
            TypeDescriptor::Basic(basic) => format!("/db/_native.{}", basic.name()),
            TypeDescriptor::Entity(name) | TypeDescriptor::Embeddable(name) => {
                format!("/db/{name}")
            }
        }
    }
}

/// Shape of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Singular(TypeDescriptor),
    List(TypeDescriptor),
    Set(TypeDescriptor),
    Map {
        key: TypeDescriptor,
        value: TypeDescriptor,
    },
}

impl AttributeKind {
    /// Whether this is a list, set or map attribute.
    pub fn is_collection(&self) -> bool {
        !matches!(self, AttributeKind::Singular(_))
    }

    /// Element type of a singular, list or set attribute; value type of a map.
    pub fn element_type(&self) -> &TypeDescriptor {
        match self {
            AttributeKind::Singular(t) | AttributeKind::List(t) | AttributeKind::Set(t) => t,
            AttributeKind::Map { value, .. } => value,
        }
    }

    /// Key type of a map attribute.
    pub fn key_type(&self) -> Option<&TypeDescriptor> {
        match self {
            AttributeKind::Map { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether any value reachable directly through this attribute is an entity.
    pub fn references_entity(&self) -> bool {
        self.element_type().is_entity() || self.key_type().is_some_and(TypeDescriptor::is_entity)
    }

    /// The schema type reference, e.g. `/db/collection.List[/db/Person]`.
    pub fn type_ref(&self) -> String {
        match self {
            AttributeKind::Singular(t) => t.type_ref(),
            AttributeKind::List(t) => format!("/db/collection.List[{}]", t.type_ref()),
            AttributeKind::Set(t) => format!("/db/collection.Set[{}]", t.type_ref()),
            AttributeKind::Map { key, value } => format!(
                "/db/collection.Map[{},{}]",
                key.type_ref(),
                value.type_ref()
            ),
        }
    }
}

/// A named attribute of a managed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
    /// Set by the server only; never sent in request bodies.
    pub server_generated: bool,
}

impl Attribute {
    /// An attribute of arbitrary kind.
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            server_generated: false,
        }
    }

    /// Shorthand for a native-typed attribute.
    pub fn basic(name: &str, basic: BasicType) -> Self {
        Self::new(name, AttributeKind::Singular(TypeDescriptor::Basic(basic)))
    }

    /// Shorthand for a reference to another entity.
    pub fn reference(name: &str, entity_type: &str) -> Self {
        Self::new(
            name,
            AttributeKind::Singular(TypeDescriptor::Entity(entity_type.into())),
        )
    }

    /// Shorthand for an embedded object.
    pub fn embedded(name: &str, embeddable_type: &str) -> Self {
        Self::new(
            name,
            AttributeKind::Singular(TypeDescriptor::Embeddable(embeddable_type.into())),
        )
    }

    /// Shorthand for a list attribute.
    pub fn list(name: &str, element: TypeDescriptor) -> Self {
        Self::new(name, AttributeKind::List(element))
    }

    /// Shorthand for a set attribute.
    pub fn set(name: &str, element: TypeDescriptor) -> Self {
        Self::new(name, AttributeKind::Set(element))
    }

    /// Shorthand for a map attribute.
    pub fn map(name: &str, key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::new(name, AttributeKind::Map { key, value })
    }

    /// Marks the attribute as server generated.
    pub fn server_generated(mut self) -> Self {
        self.server_generated = true;
        self
    }
}

/// Whether a managed type has identity of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceType {
    Entity,
    Embeddable,
}

/// An entity or embeddable type.
///
/// Built with the shorthand constructors and handed to
/// [`Metamodel::new`](crate::Metamodel::new), which resolves inherited
/// attributes and reference paths. Types obtained from a metamodel are
/// always resolved.
#[derive(Debug, Clone)]
pub struct ManagedType {
    pub(crate) name: String,
    pub(crate) persistence: PersistenceType,
    pub(crate) super_type: Option<String>,
    pub(crate) declared: Vec<Attribute>,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) reference_paths: Vec<Vec<String>>,
    pub(crate) server_assigned_ids: bool,
}

impl ManagedType {
    fn with_persistence(name: &str, persistence: PersistenceType) -> Self {
        Self {
            name: name.into(),
            persistence,
            super_type: None,
            declared: Vec::new(),
            attributes: Vec::new(),
            reference_paths: Vec::new(),
            server_assigned_ids: false,
        }
    }

    /// A new entity type.
    pub fn entity(name: &str) -> Self {
        Self::with_persistence(name, PersistenceType::Entity)
    }

    /// A new embeddable type.
    pub fn embeddable(name: &str) -> Self {
        Self::with_persistence(name, PersistenceType::Embeddable)
    }

    /// Sets the super type (entities only).
    pub fn extends(mut self, super_type: &str) -> Self {
        self.super_type = Some(super_type.into());
        self
    }

    /// Declares an attribute.
    pub fn with(mut self, attribute: Attribute) -> Self {
        self.declared.push(attribute);
        self
    }

    /// Instances get their identifier from the server on first insert
    /// instead of a client-generated key.
    pub fn with_server_assigned_ids(mut self) -> Self {
        self.server_assigned_ids = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `/db/<name>`, the type's reference and collection path.
    pub fn type_ref(&self) -> String {
        format!("/db/{}", self.name)
    }

    pub fn persistence(&self) -> PersistenceType {
        self.persistence
    }

    pub fn is_entity(&self) -> bool {
        self.persistence == PersistenceType::Entity
    }

    pub fn super_type(&self) -> Option<&str> {
        self.super_type.as_deref()
    }

    /// Attributes declared on this type only.
    pub fn declared_attributes(&self) -> &[Attribute] {
        &self.declared
    }

    /// All attributes including inherited ones (inherited first).
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Looks up an attribute (including inherited ones) by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attribute-name paths leading to entity references, possibly through
    /// embedded objects.
    pub fn reference_paths(&self) -> &[Vec<String>] {
        &self.reference_paths
    }

    pub fn server_assigned_ids(&self) -> bool {
        self.server_assigned_ids
    }
}
