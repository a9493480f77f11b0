//! End-to-end tests over the persistent backends, each driven through
//! the same `get_store` URI surface as the in-memory one.

use entiq::{get_store, Entity, Query, Store};

fn sample(id: &str, name: &str, country: &str, dataset: &str) -> Entity {
    let mut entity = Entity::new(id, "Person");
    entity.add("name", name);
    entity.add("country", country);
    entity.datasets.insert(dataset.to_string());
    entity
}

fn ingest(store: &Store) {
    let mut writer = store.writer();
    writer.add_entity(&sample("a", "Alice", "de", "d1"), "crawl").unwrap();
    writer.add_entity(&sample("b", "Bob", "fr", "d2"), "crawl").unwrap();
    writer.add_entity(&sample("c", "Carol", "de", "d1"), "manual").unwrap();
    writer.close().unwrap();
}

fn exercise(store: &Store) {
    let view = store.default_view();
    assert!(view.has_entity("a").unwrap());
    let entity = view.get_entity("b").unwrap().unwrap();
    assert_eq!(entity.get("name"), ["Bob"]);

    // canonical-id ascending iteration
    let ids: Vec<String> = store
        .iterate(None)
        .map(|e| e.unwrap().id)
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(store.iterate(Some("d1")).count(), 2);

    let q = Query::default().filter("country", "de").unwrap();
    assert_eq!(view.count(&q).unwrap(), 2);

    let scope = store.get_scope().unwrap();
    assert!(scope.contains("d1"));
    assert!(scope.contains("d2"));
    let origins = store.get_origins().unwrap();
    assert!(origins.contains("crawl"));
    assert!(origins.contains("manual"));

    // re-ingestion stays idempotent
    ingest(store);
    assert_eq!(store.iterate(None).count(), 3);

    let mut writer = store.writer();
    writer.delete_entity("b").unwrap();
    writer.delete_dataset("d1").unwrap();
    writer.close().unwrap();
    assert_eq!(store.iterate(None).count(), 0);
}

#[test]
fn test_lake_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("lake+file://{}", dir.path().display());
    let store = get_store(&uri, None, None).unwrap();
    ingest(&store);
    exercise(&store);
}

#[test]
fn test_lake_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("lake+file://{}", dir.path().display());
    let store = get_store(&uri, None, None).unwrap();
    ingest(&store);
    drop(store);

    let store = get_store(&uri, None, None).unwrap();
    assert_eq!(store.iterate(None).count(), 3);
    assert!(store.default_view().has_entity("a").unwrap());
}

#[cfg(feature = "sql")]
#[test]
fn test_sqlite_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("sqlite://{}", dir.path().join("statements.db").display());
    let store = get_store(&uri, None, None).unwrap();
    ingest(&store);
    exercise(&store);
}

#[cfg(feature = "sql")]
#[test]
fn test_sqlite_in_memory_store() {
    let store = get_store("sqlite://:memory:", None, None).unwrap();
    ingest(&store);
    exercise(&store);
}

#[cfg(feature = "redb")]
#[test]
fn test_redb_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("redb://{}", dir.path().join("statements.redb").display());
    let store = get_store(&uri, None, None).unwrap();
    ingest(&store);
    exercise(&store);
}

#[cfg(feature = "redb")]
#[test]
fn test_redb_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("redb://{}", dir.path().join("statements.redb").display());
    {
        let store = get_store(&uri, None, None).unwrap();
        ingest(&store);
    }
    let store = get_store(&uri, None, None).unwrap();
    assert_eq!(store.iterate(None).count(), 3);
}
