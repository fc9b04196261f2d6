use docbind_client::mock::MemoryBackend;
use docbind_model::{Attribute, BasicType, ManagedType, Metamodel, TypeDescriptor};
use docbind_persist::codec::{self, OBJECT_INFO};
use docbind_persist::{Embedded, Entity, EntityManager, PersistConfig, PersistError, Value};
use docbind_types::{ObjectId, Version};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn make_metamodel() -> Arc<Metamodel> {
    Arc::new(
        Metamodel::new([
            ManagedType::embeddable("Address")
                .with(Attribute::basic("street", BasicType::String))
                .with(Attribute::reference("owner", "Person")),
            ManagedType::entity("Person")
                .with(Attribute::basic("name", BasicType::String))
                .with(Attribute::basic("age", BasicType::Integer))
                .with(Attribute::reference("friend", "Person"))
                .with(Attribute::embedded("home", "Address"))
                .with(Attribute::set(
                    "tags",
                    TypeDescriptor::Basic(BasicType::String),
                ))
                .with(Attribute::map(
                    "scores",
                    TypeDescriptor::Basic(BasicType::String),
                    TypeDescriptor::Basic(BasicType::Integer),
                ))
                .with(Attribute::map(
                    "rivals",
                    TypeDescriptor::Entity("Person".into()),
                    TypeDescriptor::Basic(BasicType::Integer),
                ))
                .with(Attribute::map(
                    "lucky",
                    TypeDescriptor::Basic(BasicType::Integer),
                    TypeDescriptor::Basic(BasicType::Boolean),
                ))
                .with(Attribute::basic("createdAt", BasicType::DateTime).server_generated()),
        ])
        .unwrap(),
    )
}

fn make_manager() -> EntityManager {
    EntityManager::new(
        Arc::new(MemoryBackend::new()),
        make_metamodel(),
        PersistConfig::default(),
    )
}

fn person_type(em: &EntityManager) -> Arc<ManagedType> {
    em.metamodel().entity("Person").unwrap().clone()
}

fn ada_id() -> ObjectId {
    ObjectId::new("Person", "ada")
}

// ── Encoding ─────────────────────────────────────────────────────

#[test]
fn encodes_every_attribute_and_metadata() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    let bob = em.get_reference("Person", "bob").unwrap();

    ada.set("name", "Ada").unwrap();
    ada.set("age", 36).unwrap();
    ada.set("friend", &bob).unwrap();
    ada.set(
        "home",
        Embedded::new("Address")
            .with("street", "Main St")
            .with("owner", &bob),
    )
    .unwrap();
    ada.set("tags", Value::set(["math", "poetry"].map(Value::from)))
        .unwrap();
    ada.set("scores", Value::Map(vec![("math".into(), 3.into())]))
        .unwrap();
    ada.set("rivals", Value::Map(vec![((&bob).into(), 1.into())]))
        .unwrap();
    ada.set("lucky", Value::Map(vec![(7.into(), true.into())]))
        .unwrap();

    let json = codec::get_json(&ada, false).unwrap();
    assert_eq!(
        json,
        json!({
            "name": "Ada",
            "age": 36,
            "friend": "/db/Person/bob",
            "home": {"street": "Main St", "owner": "/db/Person/bob"},
            "tags": ["math", "poetry"],
            "scores": {"math": 3},
            "rivals": {"/db/Person/bob": 1},
            "lucky": {"7": true},
            OBJECT_INFO: {"id": "/db/Person/ada"},
        })
    );
}

#[test]
fn unset_attributes_encode_as_null() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    let json = codec::get_json(&ada, false).unwrap();

    assert_eq!(json["name"], json!(null));
    assert_eq!(json["friend"], json!(null));
    assert!(json.get("createdAt").is_none());
}

#[test]
fn reference_without_identifier_is_illegal() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    ada.set("friend", Entity::new(person_type(&em))).unwrap();

    assert!(matches!(
        codec::get_json(&ada, false),
        Err(PersistError::IllegalEntity(_))
    ));
}

#[test]
fn version_can_be_left_out() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    codec::set_json_metadata(&ada, &json!({OBJECT_INFO: {"version": 4}}));

    let with = codec::get_json(&ada, false).unwrap();
    let without = codec::get_json(&ada, true).unwrap();
    assert_eq!(with[OBJECT_INFO]["version"], "4");
    assert!(without[OBJECT_INFO].get("version").is_none());
}

// ── Decoding ─────────────────────────────────────────────────────

#[test]
fn round_trip_resolves_references_in_the_target_context() {
    let source = make_manager();
    let ada = Entity::with_id(person_type(&source), ada_id());
    let bob = source.get_reference("Person", "bob").unwrap();
    ada.set("name", "Ada").unwrap();
    ada.set("friend", &bob).unwrap();
    ada.set(
        "home",
        Embedded::new("Address")
            .with("street", "Main St")
            .with("owner", &bob),
    )
    .unwrap();
    ada.set("tags", Value::set(["math"].map(Value::from))).unwrap();
    ada.set("rivals", Value::Map(vec![((&bob).into(), 2.into())]))
        .unwrap();
    ada.set("lucky", Value::Map(vec![(7.into(), true.into())]))
        .unwrap();
    let mut json = codec::get_json(&ada, false).unwrap();
    json["createdAt"] = json!("2024-05-01T10:00:00Z");

    let target = make_manager();
    let copy = Entity::with_id(person_type(&target), ada_id());
    codec::set_json(&copy, &json, &target).unwrap();

    let target_bob = target.get_reference("Person", "bob").unwrap();
    assert!(copy.get("friend").unwrap().as_entity().unwrap().same(&target_bob));
    assert!(!target_bob.same(&bob));
    let home = copy.get("home").unwrap();
    assert!(home.as_embedded().unwrap().get("owner").as_entity().unwrap().same(&target_bob));
    assert_eq!(
        copy.get("rivals").unwrap().get(&(&target_bob).into()),
        Some(&Value::from(2))
    );
    assert_eq!(copy.get("lucky").unwrap().get(&7.into()), Some(&Value::from(true)));
    assert_eq!(
        copy.get("createdAt").unwrap().as_str(),
        Some("2024-05-01T10:00:00Z")
    );

    json.as_object_mut().unwrap().remove("createdAt");
    assert_eq!(codec::get_json(&copy, false).unwrap(), json);
}

#[test]
fn set_json_replaces_all_fields() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    ada.set("name", "Ada").unwrap();
    ada.set("age", 36).unwrap();

    codec::set_json(&ada, &json!({"name": "Augusta"}), &em).unwrap();
    assert_eq!(ada.get("name").unwrap().as_str(), Some("Augusta"));
    assert!(ada.get("age").unwrap().is_null());
}

#[test]
fn malformed_body_leaves_entity_untouched() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    ada.set("name", "Ada").unwrap();

    let result = codec::set_json(&ada, &json!({"name": "Eve", "friend": 42}), &em);
    assert!(result.is_err());
    assert_eq!(ada.get("name").unwrap().as_str(), Some("Ada"));

    let result = codec::set_json(&ada, &json!({"tags": "not-a-list"}), &em);
    assert!(result.is_err());
    assert!(codec::set_json(&ada, &json!([1, 2]), &em).is_err());
}

#[test]
fn unknown_members_are_ignored() {
    let em = make_manager();
    let ada = Entity::with_id(person_type(&em), ada_id());
    codec::set_json(&ada, &json!({"name": "Ada", "shoeSize": 38}), &em).unwrap();
    assert_eq!(ada.get("name").unwrap().as_str(), Some("Ada"));
}

#[test]
fn metadata_fills_missing_identifier_only() {
    let em = make_manager();
    let fresh = Entity::new(person_type(&em));
    codec::set_json_metadata(
        &fresh,
        &json!({OBJECT_INFO: {"id": "/db/Person/new", "version": "1"}}),
    );
    assert_eq!(fresh.id(), Some(ObjectId::new("Person", "new")));
    assert_eq!(fresh.version(), Some(Version::new("1")));

    let ada = Entity::with_id(person_type(&em), ada_id());
    codec::set_json_metadata(
        &ada,
        &json!({OBJECT_INFO: {"id": "/db/Person/other", "version": 2}}),
    );
    assert_eq!(ada.id(), Some(ada_id()));
    assert_eq!(ada.version(), Some(Version::new("2")));

    // A body without version keeps the current one.
    codec::set_json_metadata(&ada, &json!({OBJECT_INFO: {}}));
    assert_eq!(ada.version(), Some(Version::new("2")));
}

#[test]
fn object_id_reads_object_info() {
    assert_eq!(
        codec::object_id(&json!({OBJECT_INFO: {"id": "/db/User/u1"}})),
        Some(ObjectId::new("User", "u1"))
    );
    assert_eq!(codec::object_id(&json!({"name": "x"})), None);
}
