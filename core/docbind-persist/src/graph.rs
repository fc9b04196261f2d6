//! Reachability over entity references.
//!
//! The walker follows each reference path of an entity's type, flattening
//! list, set and map values (map keys included) and descending through
//! embedded objects. Traversal is depth-first in path order; every entity is
//! reported once and the starting entity never.

use crate::entity::EntityRef;
use crate::value::Value;
use docbind_types::ObjectId;
use std::collections::HashSet;

/// How far cascading operations follow references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Follow this many reference hops; `Levels(0)` touches the root only.
    Levels(u32),
    /// Follow references until the reachable graph is exhausted.
    Unbounded,
}

impl Depth {
    pub fn is_zero(self) -> bool {
        self == Depth::Levels(0)
    }

    /// The depth one hop further down.
    pub fn decrement(self) -> Self {
        match self {
            Depth::Levels(n) => Depth::Levels(n.saturating_sub(1)),
            Depth::Unbounded => Depth::Unbounded,
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Levels(0)
    }
}

impl From<u32> for Depth {
    fn from(levels: u32) -> Self {
        Depth::Levels(levels)
    }
}

/// `true` means unbounded, `false` root only.
impl From<bool> for Depth {
    fn from(unbounded: bool) -> Self {
        if unbounded {
            Depth::Unbounded
        } else {
            Depth::Levels(0)
        }
    }
}

/// Key of the visited set: the identifier, or the instance address for
/// entities that have none yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum VisitKey {
    Id(ObjectId),
    Address(usize),
}

impl VisitKey {
    pub(crate) fn of(entity: &EntityRef) -> Self {
        match entity.id() {
            Some(id) => VisitKey::Id(id),
            None => VisitKey::Address(entity.address()),
        }
    }
}

/// Entities reachable from `root` within `depth` hops, excluding `root`.
pub fn sub_entities(root: &EntityRef, depth: Depth) -> Vec<EntityRef> {
    let mut visited = HashSet::from([VisitKey::of(root)]);
    let mut found = Vec::new();
    collect(root, depth, &mut visited, &mut found);
    found
}

fn collect(
    entity: &EntityRef,
    depth: Depth,
    visited: &mut HashSet<VisitKey>,
    found: &mut Vec<EntityRef>,
) {
    if depth.is_zero() {
        return;
    }
    for path in entity.managed_type().reference_paths() {
        for sub in entities_at(entity, path) {
            if visited.insert(VisitKey::of(&sub)) {
                found.push(sub.clone());
                collect(&sub, depth.decrement(), visited, found);
            }
        }
    }
}

/// Entities stored under an attribute path of `entity`.
pub fn entities_at(entity: &EntityRef, path: &[String]) -> Vec<EntityRef> {
    let Some((first, rest)) = path.split_first() else {
        return Vec::new();
    };
    let mut values = Vec::new();
    flatten(entity.field(first), &mut values);

    for segment in rest {
        let mut next = Vec::new();
        for value in values {
            if let Value::Embedded(embedded) = value {
                flatten(embedded.get(segment).clone(), &mut next);
            }
        }
        values = next;
    }

    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Ref(entity) => Some(entity),
            _ => None,
        })
        .collect()
}

fn flatten(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::List(items) | Value::Set(items) => out.extend(items),
        Value::Map(entries) => {
            for (key, value) in entries {
                out.push(key);
                out.push(value);
            }
        }
        Value::Null => {}
        other => out.push(other),
    }
}
