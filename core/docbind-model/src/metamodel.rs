use crate::error::{ModelError, ModelResult};
use crate::schema::{
    Attribute, AttributeKind, BasicType, ManagedType, PersistenceType, TypeDescriptor,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Root entity type every entity type inherits from.
pub const OBJECT_TYPE: &str = "Object";
/// Built-in user entity type; ids are assigned by the server.
pub const USER_TYPE: &str = "User";
/// Built-in role entity type; ids are assigned by the server.
pub const ROLE_TYPE: &str = "Role";

const NATIVE_PREFIX: &str = "/db/_native.";
const COLLECTION_PREFIX: &str = "/db/collection.";

/// Strips the `/db/` prefix from a type reference, if present.
pub fn type_name(type_ref: &str) -> &str {
    type_ref.strip_prefix("/db/").unwrap_or(type_ref)
}

/// The resolved set of managed types.
#[derive(Debug, Clone)]
pub struct Metamodel {
    entities: BTreeMap<String, Arc<ManagedType>>,
    embeddables: BTreeMap<String, Arc<ManagedType>>,
}

impl Default for Metamodel {
    fn default() -> Self {
        Self::new(Vec::new()).unwrap_or_else(|_| Self {
            entities: BTreeMap::new(),
            embeddables: BTreeMap::new(),
        })
    }
}

impl Metamodel {
    /// Builds a metamodel from the given types plus the built-in `Object`,
    /// `User` and `Role` entity types. Declaring a built-in replaces it.
    pub fn new(types: impl IntoIterator<Item = ManagedType>) -> ModelResult<Self> {
        let mut declared: HashMap<String, ManagedType> = builtin_types()
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let builtins: HashSet<String> = declared.keys().cloned().collect();
        let mut seen = HashSet::new();

        for mut ty in types {
            if !seen.insert(ty.name.clone()) {
                return Err(ModelError::DuplicateType(ty.name));
            }
            if builtins.contains(&ty.name) {
                if ty.name != OBJECT_TYPE {
                    ty.server_assigned_ids = true;
                }
            } else if declared.contains_key(&ty.name) {
                return Err(ModelError::DuplicateType(ty.name));
            }
            declared.insert(ty.name.clone(), ty);
        }

        for ty in declared.values_mut() {
            if ty.persistence == PersistenceType::Entity
                && ty.super_type.is_none()
                && ty.name != OBJECT_TYPE
            {
                ty.super_type = Some(OBJECT_TYPE.to_string());
            }
        }

        validate(&declared)?;

        let mut resolved = HashMap::new();
        for name in declared.keys() {
            let attributes = resolve_attributes(name, &declared, &mut Vec::new())?;
            resolved.insert(name.clone(), attributes);
        }

        let embeddable_attributes: HashMap<String, Vec<Attribute>> = resolved
            .iter()
            .filter(|(name, _)| {
                declared
                    .get(*name)
                    .is_some_and(|t| t.persistence == PersistenceType::Embeddable)
            })
            .map(|(name, attributes)| (name.clone(), attributes.clone()))
            .collect();

        let mut entities = BTreeMap::new();
        let mut embeddables = BTreeMap::new();
        for (name, mut ty) in declared {
            ty.attributes = resolved.remove(&name).unwrap_or_default();
            ty.reference_paths = reference_paths(&ty.attributes, &embeddable_attributes);
            match ty.persistence {
                PersistenceType::Entity => entities.insert(name, Arc::new(ty)),
                PersistenceType::Embeddable => embeddables.insert(name, Arc::new(ty)),
            };
        }

        debug!(
            entities = entities.len(),
            embeddables = embeddables.len(),
            "metamodel built"
        );

        Ok(Self {
            entities,
            embeddables,
        })
    }

    /// Parses the schema JSON format: an array of
    /// `{"class": "/db/Name", "superClass": ..., "embedded": bool, "fields": {...}}`.
    pub fn from_json(json: &serde_json::Value) -> ModelResult<Self> {
        let raw: Vec<TypeJson> = serde_json::from_value(json.clone())?;

        let mut entity_names = HashSet::new();
        let mut embeddable_names = HashSet::new();
        for t in &raw {
            let name = type_name(&t.class).to_string();
            if t.embedded {
                embeddable_names.insert(name);
            } else {
                entity_names.insert(name);
            }
        }
        for builtin in [OBJECT_TYPE, USER_TYPE, ROLE_TYPE] {
            entity_names.insert(builtin.to_string());
        }

        let mut types = Vec::with_capacity(raw.len());
        for t in raw {
            let name = type_name(&t.class);
            let mut ty = if t.embedded {
                ManagedType::embeddable(name)
            } else {
                ManagedType::entity(name)
            };
            if let Some(super_class) = &t.super_class {
                ty = ty.extends(type_name(super_class));
            }
            for (field, spec) in t.fields {
                let (type_ref, server_generated) = match spec {
                    FieldJson::Type(type_ref) => (type_ref, false),
                    FieldJson::Detailed {
                        type_ref,
                        server_generated,
                    } => (type_ref, server_generated),
                };
                let kind = parse_kind(&type_ref, &entity_names, &embeddable_names)?;
                let mut attribute = Attribute::new(&field, kind);
                attribute.server_generated = server_generated;
                ty = ty.with(attribute);
            }
            types.push(ty);
        }

        Self::new(types)
    }

    /// Serializes the declared types back to the schema JSON format.
    pub fn to_json(&self) -> serde_json::Value {
        let types: Vec<TypeJson> = self
            .entities
            .values()
            .filter(|t| t.name != OBJECT_TYPE)
            .chain(self.embeddables.values())
            .map(|t| TypeJson {
                class: t.type_ref(),
                super_class: t
                    .super_type
                    .as_deref()
                    .filter(|s| *s != OBJECT_TYPE)
                    .map(|s| format!("/db/{s}")),
                embedded: t.persistence == PersistenceType::Embeddable,
                fields: t
                    .declared
                    .iter()
                    .map(|a| {
                        let spec = if a.server_generated {
                            FieldJson::Detailed {
                                type_ref: a.kind.type_ref(),
                                server_generated: true,
                            }
                        } else {
                            FieldJson::Type(a.kind.type_ref())
                        };
                        (a.name.clone(), spec)
                    })
                    .collect(),
            })
            .collect();
        serde_json::to_value(types).unwrap_or_default()
    }

    /// Schema JSON of a single type.
    pub fn type_to_json(&self, name: &str) -> Option<serde_json::Value> {
        let name = type_name(name);
        self.to_json()
            .as_array()?
            .iter()
            .find(|t| t["class"] == format!("/db/{name}"))
            .cloned()
    }

    /// Entity type by name or `/db/<name>` reference.
    pub fn entity(&self, name: &str) -> Option<&Arc<ManagedType>> {
        self.entities.get(type_name(name))
    }

    /// Embeddable type by name or reference.
    pub fn embeddable(&self, name: &str) -> Option<&Arc<ManagedType>> {
        self.embeddables.get(type_name(name))
    }

    /// Entity or embeddable type by name or reference.
    pub fn managed_type(&self, name: &str) -> Option<&Arc<ManagedType>> {
        self.entity(name).or_else(|| self.embeddable(name))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<ManagedType>> {
        self.entities.values()
    }

    pub fn embeddables(&self) -> impl Iterator<Item = &Arc<ManagedType>> {
        self.embeddables.values()
    }
}

fn builtin_types() -> Vec<ManagedType> {
    vec![
        ManagedType::entity(OBJECT_TYPE),
        ManagedType::entity(USER_TYPE)
            .with(Attribute::basic("username", BasicType::String))
            .with_server_assigned_ids(),
        ManagedType::entity(ROLE_TYPE)
            .with(Attribute::basic("name", BasicType::String))
            .with(Attribute::set(
                "users",
                TypeDescriptor::Entity(USER_TYPE.to_string()),
            ))
            .with_server_assigned_ids(),
    ]
}

fn validate(declared: &HashMap<String, ManagedType>) -> ModelResult<()> {
    let check = |owner: &str, descriptor: &TypeDescriptor| -> ModelResult<()> {
        let (name, expected) = match descriptor {
            TypeDescriptor::Basic(_) => return Ok(()),
            TypeDescriptor::Entity(name) => (name, PersistenceType::Entity),
            TypeDescriptor::Embeddable(name) => (name, PersistenceType::Embeddable),
        };
        match declared.get(name) {
            Some(t) if t.persistence == expected => Ok(()),
            Some(_) => Err(ModelError::InvalidSchema(format!(
                "{owner}: {name} is not a {expected:?} type"
            ))),
            None => Err(ModelError::UnknownType(name.clone())),
        }
    };

    for ty in declared.values() {
        if let Some(super_type) = &ty.super_type {
            match declared.get(super_type) {
                Some(s) if s.persistence == ty.persistence => {}
                Some(_) => {
                    return Err(ModelError::InvalidSchema(format!(
                        "{} cannot extend {super_type}",
                        ty.name
                    )));
                }
                None => return Err(ModelError::UnknownType(super_type.clone())),
            }
        }
        for attribute in &ty.declared {
            check(&ty.name, attribute.kind.element_type())?;
            if let Some(key) = attribute.kind.key_type() {
                check(&ty.name, key)?;
            }
        }
    }
    Ok(())
}

fn resolve_attributes(
    name: &str,
    declared: &HashMap<String, ManagedType>,
    chain: &mut Vec<String>,
) -> ModelResult<Vec<Attribute>> {
    if chain.iter().any(|n| n == name) {
        return Err(ModelError::InvalidSchema(format!(
            "inheritance cycle through {name}"
        )));
    }
    let ty = declared
        .get(name)
        .ok_or_else(|| ModelError::UnknownType(name.to_string()))?;

    chain.push(name.to_string());
    let mut attributes = match &ty.super_type {
        Some(super_type) => resolve_attributes(super_type, declared, chain)?,
        None => Vec::new(),
    };
    chain.pop();

    for attribute in &ty.declared {
        match attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute.clone(),
            None => attributes.push(attribute.clone()),
        }
    }
    Ok(attributes)
}

fn reference_paths(
    attributes: &[Attribute],
    embeddables: &HashMap<String, Vec<Attribute>>,
) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    collect_paths(attributes, embeddables, &mut Vec::new(), &mut Vec::new(), &mut paths);
    paths
}

fn collect_paths(
    attributes: &[Attribute],
    embeddables: &HashMap<String, Vec<Attribute>>,
    prefix: &mut Vec<String>,
    visiting: &mut Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    for attribute in attributes {
        prefix.push(attribute.name.clone());
        if attribute.kind.references_entity() {
            out.push(prefix.clone());
        }
        if let Some(embeddable) = attribute.kind.element_type().embeddable_name() {
            if !visiting.iter().any(|v| v == embeddable) {
                if let Some(nested) = embeddables.get(embeddable) {
                    visiting.push(embeddable.to_string());
                    collect_paths(nested, embeddables, prefix, visiting, out);
                    visiting.pop();
                }
            }
        }
        prefix.pop();
    }
}

fn parse_kind(
    type_ref: &str,
    entities: &HashSet<String>,
    embeddables: &HashSet<String>,
) -> ModelResult<AttributeKind> {
    let Some(collection) = type_ref.strip_prefix(COLLECTION_PREFIX) else {
        return parse_descriptor(type_ref, entities, embeddables).map(AttributeKind::Singular);
    };

    let invalid = || ModelError::InvalidTypeRef(type_ref.to_string());
    let open = collection.find('[').ok_or_else(invalid)?;
    let inner = collection[open + 1..]
        .strip_suffix(']')
        .ok_or_else(invalid)?;

    match &collection[..open] {
        "List" => Ok(AttributeKind::List(parse_descriptor(inner, entities, embeddables)?)),
        "Set" => Ok(AttributeKind::Set(parse_descriptor(inner, entities, embeddables)?)),
        "Map" => {
            let (key, value) = inner.split_once(',').ok_or_else(invalid)?;
            Ok(AttributeKind::Map {
                key: parse_descriptor(key.trim(), entities, embeddables)?,
                value: parse_descriptor(value.trim(), entities, embeddables)?,
            })
        }
        _ => Err(invalid()),
    }
}

fn parse_descriptor(
    type_ref: &str,
    entities: &HashSet<String>,
    embeddables: &HashSet<String>,
) -> ModelResult<TypeDescriptor> {
    if let Some(native) = type_ref.strip_prefix(NATIVE_PREFIX) {
        return BasicType::from_name(native)
            .map(TypeDescriptor::Basic)
            .ok_or_else(|| ModelError::InvalidTypeRef(type_ref.to_string()));
    }
    let name = type_name(type_ref);
    if entities.contains(name) {
        Ok(TypeDescriptor::Entity(name.to_string()))
    } else if embeddables.contains(name) {
        Ok(TypeDescriptor::Embeddable(name.to_string()))
    } else {
        Err(ModelError::UnknownType(name.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TypeJson {
    class: String,
    #[serde(rename = "superClass", default, skip_serializing_if = "Option::is_none")]
    super_class: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    embedded: bool,
    #[serde(default)]
    fields: BTreeMap<String, FieldJson>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum FieldJson {
    Type(String),
    Detailed {
        #[serde(rename = "type")]
        type_ref: String,
        #[serde(rename = "serverGenerated", default)]
        server_generated: bool,
    },
}
