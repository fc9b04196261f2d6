//! JSON form of managed objects.
//!
//! Request and response bodies carry the attribute values plus an
//! `_objectInfo` member with the identifier and version:
//!
//! ```json
//! {"name": "Ada", "friend": "/db/Person/b", "_objectInfo": {"id": "/db/Person/a", "version": 3}}
//! ```

use crate::entity::{Entity, EntityRef};
use crate::error::{PersistError, PersistResult};
use crate::value::{Embedded, Value};
use docbind_model::{AttributeKind, BasicType, ManagedType, TypeDescriptor};
use docbind_types::{ObjectId, Version};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Member holding the persistence metadata.
pub const OBJECT_INFO: &str = "_objectInfo";

/// Turns identifiers and type names found in JSON into instances.
pub trait ReferenceResolver {
    /// The managed instance for `id`, created as an unloaded reference if it
    /// is not known yet.
    fn reference(&self, id: &ObjectId) -> PersistResult<EntityRef>;

    /// The embeddable type called `name`.
    fn embeddable(&self, name: &str) -> Option<Arc<ManagedType>>;
}

/// Encodes the entity's fields and metadata. Server-generated attributes are
/// left out, as is the version when `exclude_version` is set.
pub fn get_json(entity: &Entity, exclude_version: bool) -> PersistResult<Json> {
    let fields = entity.fields();
    let mut body = encode_fields(entity.managed_type(), &fields)?;

    let state = entity.state();
    let mut info = Map::new();
    if let Some(id) = state.id() {
        info.insert("id".into(), Json::String(id.to_string()));
    }
    if !exclude_version {
        if let Some(version) = state.version() {
            info.insert("version".into(), Json::String(version.to_string()));
        }
    }
    body.insert(OBJECT_INFO.into(), Json::Object(info));
    Ok(Json::Object(body))
}

/// Replaces all fields from `json` and applies its metadata.
///
/// The whole body is decoded before the entity is touched, so a malformed
/// body leaves the entity unchanged.
pub fn set_json(
    entity: &Entity,
    json: &Json,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<()> {
    let object = json.as_object().ok_or_else(|| {
        PersistError::Persistent(format!("expected an object body for {}", entity.type_name()))
    })?;
    let fields = decode_fields(entity.managed_type(), object, resolver)?;
    entity.replace_fields(fields);
    set_json_metadata(entity, json);
    Ok(())
}

/// Applies `_objectInfo` only: sets the identifier if the entity has none
/// and takes over the version if one is present.
pub fn set_json_metadata(entity: &Entity, json: &Json) {
    let Some(info) = json.get(OBJECT_INFO) else {
        return;
    };
    let id = info
        .get("id")
        .and_then(Json::as_str)
        .and_then(|s| ObjectId::parse(s).ok());
    let version = info.get("version").and_then(Version::from_json);

    entity.with_state(|state| {
        if state.id().is_none() {
            if let Some(id) = id {
                state.set_id(id);
            }
        }
        if version.is_some() {
            state.set_version(version);
        }
    });
}

/// Identifier carried in a body's `_objectInfo`, if any.
pub fn object_id(json: &Json) -> Option<ObjectId> {
    json.get(OBJECT_INFO)?
        .get("id")?
        .as_str()
        .and_then(|s| ObjectId::parse(s).ok())
}

fn encode_fields(
    managed_type: &ManagedType,
    fields: &BTreeMap<String, Value>,
) -> PersistResult<Map<String, Json>> {
    let mut out = Map::new();
    for attribute in managed_type.attributes() {
        if attribute.server_generated {
            continue;
        }
        let json = match fields.get(&attribute.name) {
            Some(value) => encode_value(value)?,
            None => Json::Null,
        };
        out.insert(attribute.name.clone(), json);
    }
    Ok(out)
}

fn encode_value(value: &Value) -> PersistResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Basic(json) => json.clone(),
        Value::Ref(entity) => Json::String(reference_id(entity)?),
        Value::Embedded(embedded) => {
            let mut out = Map::new();
            for (name, field) in &embedded.fields {
                out.insert(name.clone(), encode_value(field)?);
            }
            Json::Object(out)
        }
        Value::List(items) | Value::Set(items) => Json::Array(
            items
                .iter()
                .map(encode_value)
                .collect::<PersistResult<Vec<_>>>()?,
        ),
        Value::Map(entries) => {
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(encode_key(key)?, encode_value(value)?);
            }
            Json::Object(out)
        }
    })
}

fn encode_key(key: &Value) -> PersistResult<String> {
    match key {
        Value::Basic(Json::String(s)) => Ok(s.clone()),
        Value::Basic(json) => Ok(json.to_string()),
        Value::Ref(entity) => reference_id(entity),
        other => Err(PersistError::IllegalEntity(format!(
            "unsupported map key {other:?}"
        ))),
    }
}

fn reference_id(entity: &EntityRef) -> PersistResult<String> {
    entity.id().map(|id| id.to_string()).ok_or_else(|| {
        PersistError::IllegalEntity(format!(
            "referenced {} has no identifier, attach it first",
            entity.type_name()
        ))
    })
}

fn decode_fields(
    managed_type: &ManagedType,
    object: &Map<String, Json>,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<BTreeMap<String, Value>> {
    let mut fields = BTreeMap::new();
    for attribute in managed_type.attributes() {
        let Some(json) = object.get(&attribute.name) else {
            continue;
        };
        let value = decode_attribute(&attribute.kind, json, resolver)?;
        if !value.is_null() {
            fields.insert(attribute.name.clone(), value);
        }
    }
    Ok(fields)
}

fn decode_attribute(
    kind: &AttributeKind,
    json: &Json,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match kind {
        AttributeKind::Singular(descriptor) => decode_value(descriptor, json, resolver),
        AttributeKind::List(element) => Ok(Value::List(decode_items(element, json, resolver)?)),
        AttributeKind::Set(element) => Ok(Value::set(decode_items(element, json, resolver)?)),
        AttributeKind::Map { key, value } => {
            let object = json
                .as_object()
                .ok_or_else(|| malformed("map", json))?;
            let mut entries = Vec::with_capacity(object.len());
            for (k, v) in object {
                entries.push((
                    decode_key(key, k, resolver)?,
                    decode_value(value, v, resolver)?,
                ));
            }
            Ok(Value::Map(entries))
        }
    }
}

fn decode_items(
    element: &TypeDescriptor,
    json: &Json,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<Vec<Value>> {
    json.as_array()
        .ok_or_else(|| malformed("array", json))?
        .iter()
        .map(|item| decode_value(element, item, resolver))
        .collect()
}

fn decode_value(
    descriptor: &TypeDescriptor,
    json: &Json,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match descriptor {
        TypeDescriptor::Basic(_) => Ok(Value::Basic(json.clone())),
        TypeDescriptor::Entity(_) => {
            let raw = json.as_str().ok_or_else(|| malformed("reference", json))?;
            Ok(Value::Ref(resolver.reference(&ObjectId::parse(raw)?)?))
        }
        TypeDescriptor::Embeddable(name) => {
            let ty = resolver
                .embeddable(name)
                .ok_or_else(|| PersistError::IllegalEntity(format!("unknown embeddable {name}")))?;
            let object = json
                .as_object()
                .ok_or_else(|| malformed("embedded object", json))?;
            Ok(Value::Embedded(Embedded {
                type_name: name.clone(),
                fields: decode_fields(&ty, object, resolver)?,
            }))
        }
    }
}

fn decode_key(
    descriptor: &TypeDescriptor,
    raw: &str,
    resolver: &dyn ReferenceResolver,
) -> PersistResult<Value> {
    let parsed = match descriptor {
        TypeDescriptor::Entity(_) => {
            return Ok(Value::Ref(resolver.reference(&ObjectId::parse(raw)?)?));
        }
        TypeDescriptor::Basic(BasicType::Integer) => raw.parse::<i64>().ok().map(Json::from),
        TypeDescriptor::Basic(BasicType::Double) => raw.parse::<f64>().ok().map(Json::from),
        TypeDescriptor::Basic(BasicType::Boolean) => raw.parse::<bool>().ok().map(Json::from),
        _ => Some(Json::String(raw.to_string())),
    };
    parsed
        .map(Value::Basic)
        .ok_or_else(|| malformed("map key", &Json::String(raw.to_string())))
}

fn malformed(expected: &str, found: &Json) -> PersistError {
    PersistError::Persistent(format!("malformed body: expected {expected}, found {found}"))
}
