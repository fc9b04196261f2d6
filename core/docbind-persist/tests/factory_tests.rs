use docbind_client::mock::MemoryBackend;
use docbind_client::Method;
use docbind_model::{Attribute, BasicType, ManagedType, Metamodel};
use docbind_persist::{EntityManagerFactory, PersistConfig, PersistError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn make_metamodel() -> Metamodel {
    Metamodel::new([
        ManagedType::entity("Person").with(Attribute::basic("name", BasicType::String))
    ])
    .unwrap()
}

fn make_factory(backend: &Arc<MemoryBackend>) -> EntityManagerFactory {
    EntityManagerFactory::new(backend.clone(), make_metamodel(), PersistConfig::default())
}

// ── Schema ───────────────────────────────────────────────────────

#[tokio::test]
async fn connect_loads_the_schema() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_schema(vec![json!({
        "class": "/db/Person",
        "fields": {"name": "/db/_native.String"}
    })]);

    let factory = EntityManagerFactory::connect(backend.clone(), PersistConfig::default())
        .await
        .unwrap();
    let person = factory.metamodel().entity("Person").cloned().unwrap();
    assert!(person.attribute("name").is_some());
    assert!(factory.metamodel().entity("User").is_some());

    let request = backend.requests().pop().unwrap();
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.path, "/db/schema");
}

#[tokio::test]
async fn invalid_schema_is_a_model_error() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_schema(vec![json!({
        "class": "/db/Person",
        "fields": {"friend": "/db/Alien"}
    })]);

    let result = EntityManagerFactory::connect(backend, PersistConfig::default()).await;
    assert!(matches!(result, Err(PersistError::Model(_))));
}

#[tokio::test]
async fn save_metamodel_uploads_everything_or_one_type() {
    let backend = Arc::new(MemoryBackend::new());
    let factory = make_factory(&backend);

    factory.save_metamodel(None).await.unwrap();
    let request = backend.requests().pop().unwrap();
    assert_eq!(request.method, Method::Put);
    assert_eq!(request.path, "/db/schema");
    let uploaded = backend.schema();
    assert!(uploaded
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["class"] == "/db/Person"));

    factory.save_metamodel(Some("Person")).await.unwrap();
    let request = backend.requests().pop().unwrap();
    assert_eq!(request.path, "/db/schema/Person");
    assert_eq!(
        request.body.unwrap()["fields"],
        json!({"name": "/db/_native.String"})
    );
}

#[tokio::test]
async fn save_metamodel_of_unknown_type_is_illegal() {
    let backend = Arc::new(MemoryBackend::new());
    let factory = make_factory(&backend);

    let result = factory.save_metamodel(Some("Alien")).await;
    assert!(matches!(result, Err(PersistError::IllegalEntity(_))));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn reloading_replaces_the_metamodel_for_new_managers() {
    let backend = Arc::new(MemoryBackend::new());
    let factory = make_factory(&backend);
    let before = factory.create_entity_manager(false).await;

    backend.set_schema(vec![json!({
        "class": "/db/Invoice",
        "fields": {"total": "/db/_native.Double"}
    })]);
    factory.load_metamodel().await.unwrap();
    let after = factory.create_entity_manager(false).await;

    assert!(before.metamodel().entity("Invoice").is_none());
    assert!(after.metamodel().entity("Invoice").is_some());
    assert!(after.metamodel().entity("Person").is_none());

    factory.set_metamodel(make_metamodel());
    assert!(factory.metamodel().entity("Person").is_some());
}

// ── Managers ─────────────────────────────────────────────────────

#[tokio::test]
async fn managers_are_independent_contexts() {
    let backend = Arc::new(MemoryBackend::new());
    let factory = make_factory(&backend);

    let first = factory.create_entity_manager(false).await;
    let second = factory.create_entity_manager(false).await;
    assert_ne!(first.context_id(), second.context_id());
    assert!(Arc::ptr_eq(first.metamodel(), second.metamodel()));

    let a = first.get_reference("Person", "ada").unwrap();
    let b = second.get_reference("Person", "ada").unwrap();
    assert!(!a.same(&b));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn global_manager_checks_its_session_on_creation() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_device_registered(true);
    let factory = make_factory(&backend);

    let em = factory.create_entity_manager(true).await;
    assert!(em.is_global());
    assert_eq!(em.is_device_registered(), Some(true));
    assert!(em.me().is_none());

    let requests = backend.requests();
    let paths: Vec<&str> = requests.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["/db/Device/registered", "/db/User/me"]);
    assert!(requests.iter().all(|r| r.header("authorization").is_none()));
}

#[tokio::test]
async fn global_manager_survives_a_failing_server() {
    let backend = Arc::new(MemoryBackend::new());
    backend.inject(docbind_client::Response::new(500));
    backend.inject(docbind_client::Response::new(500));
    let factory = make_factory(&backend);

    let em = factory.create_entity_manager(true).await;
    assert!(em.is_open());
    assert_eq!(em.is_device_registered(), None);
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn config_defaults_fill_missing_fields() {
    let config: PersistConfig = serde_json::from_value(json!({"global": true})).unwrap();
    assert!(config.global);
    assert_eq!(config.oauth_timeout(), Duration::from_secs(300));
    assert_eq!(PersistConfig::default().oauth_timeout_ms, 300_000);
}
