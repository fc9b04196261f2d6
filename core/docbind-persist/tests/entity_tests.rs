use docbind_model::{Attribute, BasicType, ManagedType, Metamodel, TypeDescriptor};
use docbind_persist::{Embedded, Entity, EntityRef, EntityState, PersistError, Value};
use docbind_types::{Lifecycle, ObjectId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

fn make_person_type() -> Arc<ManagedType> {
    let metamodel = Metamodel::new([ManagedType::entity("Person")
        .with(Attribute::basic("name", BasicType::String))
        .with(Attribute::reference("friend", "Person"))
        .with(Attribute::list(
            "nicknames",
            TypeDescriptor::Basic(BasicType::String),
        ))])
    .unwrap();
    metamodel.entity("Person").unwrap().clone()
}

// ── Values ───────────────────────────────────────────────────────

#[test]
fn value_conversions() {
    assert_eq!(Value::from("Ada"), Value::Basic(json!("Ada")));
    assert_eq!(Value::from(36), Value::Basic(json!(36)));
    assert_eq!(Value::from(true), Value::Basic(json!(true)));
    assert_eq!(Value::from(json!(null)), Value::Null);
    assert_eq!(Value::from(None::<i64>), Value::Null);
    assert_eq!(Value::from(Some("x")).as_str(), Some("x"));
    assert_eq!(Value::from(7i64).as_i64(), Some(7));
}

#[test]
fn set_drops_duplicates() {
    let set = Value::set(["a", "b", "a"].map(Value::from));
    assert_eq!(set.elements().unwrap().len(), 2);

    let mut set = set;
    assert!(set.push("b".into()));
    assert!(set.push("c".into()));
    assert_eq!(set.elements().unwrap().len(), 3);
}

#[test]
fn push_and_insert_start_from_null() {
    let mut list = Value::Null;
    assert!(list.push(1.into()));
    assert!(list.push(1.into()));
    assert_eq!(list, Value::List(vec![1.into(), 1.into()]));

    let mut map = Value::Null;
    assert!(map.insert("a".into(), 1.into()));
    assert!(map.insert("a".into(), 2.into()));
    assert_eq!(map.get(&"a".into()), Some(&Value::from(2)));

    let mut scalar = Value::from("x");
    assert!(!scalar.push(1.into()));
    assert!(!scalar.insert("k".into(), 1.into()));
}

#[test]
fn embedded_fields() {
    let home = Embedded::new("Address").with("street", "Main St");
    assert_eq!(home.get("street").as_str(), Some("Main St"));
    assert!(home.get("zip").is_null());
}

// ── Entity state ─────────────────────────────────────────────────

#[test]
fn state_starts_dirty_without_id() {
    let state = EntityState::new();
    assert_eq!(state.lifecycle(), Lifecycle::Dirty);
    assert!(state.id().is_none());
    assert!(state.version().is_none());
    assert!(state.owner().is_none());
}

#[test]
fn removed_state_is_terminal() {
    let mut state = EntityState::new();
    state.set_removed();
    assert!(state.is_removed());
    assert!(state.set_persistent().is_err());
    assert!(state.set_dirty().is_err());
    assert!(state.is_removed());
}

#[test]
fn unavailable_state_cannot_become_dirty() {
    let mut state = EntityState::unavailable(ObjectId::new("Person", "a"));
    assert!(state.set_dirty().is_err());
    state.set_persistent().unwrap();
    state.set_dirty().unwrap();
    assert!(state.is_dirty());
}

// ── Entities ─────────────────────────────────────────────────────

#[test]
fn set_marks_dirty_and_get_reads_back() {
    let person = Entity::new(make_person_type());
    person.set("name", "Ada").unwrap();

    assert!(person.is_dirty());
    assert_eq!(person.get("name").unwrap().as_str(), Some("Ada"));
    assert!(person.get("friend").unwrap().is_null());
}

#[test]
fn modify_collections_in_place() {
    let person = Entity::new(make_person_type());
    person
        .modify("nicknames", |nicknames| nicknames.push("Countess".into()))
        .unwrap();
    person
        .modify("nicknames", |nicknames| nicknames.push("Ada".into()))
        .unwrap();

    assert_eq!(
        person.get("nicknames").unwrap(),
        Value::List(vec!["Countess".into(), "Ada".into()])
    );
}

#[test]
fn unknown_attribute_is_illegal() {
    let person = Entity::new(make_person_type());
    assert!(matches!(
        person.set("height", 180),
        Err(PersistError::IllegalEntity(_))
    ));
    assert!(matches!(
        person.get("height"),
        Err(PersistError::IllegalEntity(_))
    ));
}

#[test]
fn entity_survives_a_panicking_modification() {
    let person = Entity::new(make_person_type());
    person.set("name", "Ada").unwrap();

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        person.modify::<()>("name", |_| panic!("boom"))
    }));
    assert!(outcome.is_err());

    assert_eq!(person.get("name").unwrap().as_str(), Some("Ada"));
    person.set("name", "Grace").unwrap();
    assert_eq!(person.get("name").unwrap().as_str(), Some("Grace"));
    assert_eq!(person.lifecycle(), Lifecycle::Dirty);
}

#[test]
fn unavailable_entity_fields_are_not_accessible() {
    let person = Entity::unavailable(make_person_type(), ObjectId::new("Person", "a"));
    assert_eq!(person.lifecycle(), Lifecycle::Unavailable);
    assert!(matches!(person.get("name"), Err(PersistError::Unavailable(_))));
    assert!(matches!(
        person.set("name", "Ada"),
        Err(PersistError::Unavailable(_))
    ));
    assert_eq!(person.lifecycle(), Lifecycle::Unavailable);
}

#[test]
fn with_id_keeps_identifier() {
    let id = ObjectId::new("Person", "abc");
    let person = Entity::with_id(make_person_type(), id.clone());
    assert_eq!(person.id(), Some(id));
    assert!(person.is_dirty());
    assert_eq!(person.type_name(), "Person");
}

#[test]
fn references_compare_by_identity() {
    let ty = make_person_type();
    let a = Entity::with_id(ty.clone(), ObjectId::new("Person", "x"));
    let b = Entity::with_id(ty, ObjectId::new("Person", "x"));
    let a2 = a.clone();

    assert_eq!(a, a2);
    assert_ne!(a, b);
    assert!(a.same(&a2));

    let set: HashSet<EntityRef> = [a.clone(), a2, b].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn cyclic_references_format_without_recursion() {
    let ty = make_person_type();
    let a = Entity::with_id(ty.clone(), ObjectId::new("Person", "a"));
    let b = Entity::with_id(ty, ObjectId::new("Person", "b"));
    a.set("friend", &b).unwrap();
    b.set("friend", &a).unwrap();

    let debug = format!("{:?}", a.get("friend").unwrap());
    assert!(debug.contains("/db/Person/b"));
}

#[tokio::test]
async fn operation_lock_is_exclusive() {
    let person = Entity::new(make_person_type());
    let guard = person.lock().await;
    let contended = tokio::time::timeout(Duration::from_millis(10), person.lock()).await;
    assert!(contended.is_err());

    drop(guard);
    let free = tokio::time::timeout(Duration::from_millis(10), person.lock()).await;
    assert!(free.is_ok());
}
