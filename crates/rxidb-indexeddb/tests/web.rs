//! Browser tests for the IndexedDB provider
//!
//! Run with `wasm-pack test --headless --chrome crates/rxidb-indexeddb`.

#![cfg(target_arch = "wasm32")]

use futures::StreamExt;
use rxidb_core::{
    delete_database, open, Database, DbError, Direction, Key, KeyRange, OpenConfig, Query,
    SchemaVersion, StoreDefinition, TransactionMode,
};
use rxidb_indexeddb::IndexedDbProvider;
use serde_json::json;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn provider() -> IndexedDbProvider {
    IndexedDbProvider::global().unwrap()
}

async fn fresh(name: &str, schema: Vec<SchemaVersion>) -> Database {
    delete_database(provider().provider(), name).await.unwrap();
    open(OpenConfig::new(name, provider().provider()).schema(schema))
        .await
        .unwrap()
}

fn people() -> Vec<SchemaVersion> {
    vec![SchemaVersion::new(1).store(
        StoreDefinition::new("people")
            .key_path("id")
            .index("city"),
    )]
}

#[wasm_bindgen_test]
fn test_global_factory_is_available() {
    assert!(IndexedDbProvider::global().is_ok());
}

#[wasm_bindgen_test]
async fn test_open_applies_schema() {
    let db = fresh(
        "rxidb-open",
        vec![
            SchemaVersion::new(1).store(StoreDefinition::new("a")),
            SchemaVersion::new(2).store(StoreDefinition::new("b").auto_increment(true)),
        ],
    )
    .await;

    assert_eq!(db.version(), 2);
    assert_eq!(db.object_store_names(), vec!["a", "b"]);
    db.close();
}

#[wasm_bindgen_test]
async fn test_put_get_round_trip() {
    let db = fresh("rxidb-crud", people()).await;

    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("people").unwrap();
    let key = store
        .put(json!({"id": 1, "name": "ada", "city": "Oslo"}), None)
        .await
        .unwrap();
    let read = store.get(1).await.unwrap();
    tx.completion().await.unwrap();

    assert_eq!(key, Key::from(1));
    assert_eq!(read, Some(json!({"id": 1, "name": "ada", "city": "Oslo"})));
    db.close();
}

#[wasm_bindgen_test]
async fn test_add_twice_is_a_constraint_error() {
    let db = fresh("rxidb-constraint", people()).await;

    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("people").unwrap();
    store.add(json!({"id": 7}), None).await.unwrap();
    let second = store.add(json!({"id": 7}), None).await;
    let outcome = tx.completion().await;

    assert!(matches!(second, Err(DbError::Constraint(_))));
    assert!(outcome.is_err());
    db.close();
}

#[wasm_bindgen_test]
async fn test_abort_discards_writes() {
    let db = fresh("rxidb-abort", people()).await;

    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    tx.object_store("people")
        .unwrap()
        .put(json!({"id": 1}), None)
        .await
        .unwrap();
    tx.abort().unwrap();
    assert!(tx.completion().await.unwrap_err().is_abort());

    let check = db
        .transaction(&["people"], TransactionMode::ReadOnly)
        .unwrap();
    let read = check.object_store("people").unwrap().get(1).await.unwrap();
    assert_eq!(read, None);
    db.close();
}

#[wasm_bindgen_test]
async fn test_index_cursor_walks_in_key_order() {
    let db = fresh("rxidb-cursor", people()).await;

    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("people").unwrap();
    for (id, city) in [(1, "Oslo"), (2, "Bergen"), (3, "Oslo"), (4, "Tromso")] {
        store.put(json!({"id": id, "city": city}), None).await.unwrap();
    }

    let mut cursors = store
        .index("city")
        .unwrap()
        .open_cursor(Query::All, Direction::Next);
    let mut seen = Vec::new();
    while let Some(cursor) = cursors.next().await {
        seen.push(cursor.unwrap().primary_key().clone());
    }
    let counted = store
        .count(KeyRange::bound(2, 3, false, false).unwrap())
        .await
        .unwrap();
    tx.completion().await.unwrap();

    assert_eq!(
        seen,
        vec![Key::from(2), Key::from(1), Key::from(3), Key::from(4)]
    );
    assert_eq!(counted, 2);
    db.close();
}

#[wasm_bindgen_test]
async fn test_abandoned_cursor_lets_the_transaction_finish() {
    let db = fresh("rxidb-abandoned", people()).await;

    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("people").unwrap();
    for id in 1..=4 {
        store.put(json!({"id": id, "city": "Oslo"}), None).await.unwrap();
    }
    let first: Vec<_> = store
        .open_cursor(Query::All, Direction::Next)
        .take(2)
        .collect()
        .await;
    tx.completion().await.unwrap();
    assert_eq!(first.len(), 2);

    let next = db
        .transaction(&["people"], TransactionMode::ReadOnly)
        .unwrap();
    let counted = next
        .object_store("people")
        .unwrap()
        .count(Query::All)
        .await
        .unwrap();
    next.completion().await.unwrap();
    assert_eq!(counted, 4);
    db.close();
}

#[wasm_bindgen_test]
async fn test_clear_deletes_the_database() {
    let db = fresh("rxidb-clear", people()).await;
    db.clear().await.unwrap();
    assert!(db.is_closed());

    let reopened = open(OpenConfig::new("rxidb-clear", provider().provider()))
        .await
        .unwrap();
    assert!(reopened.object_store_names().is_empty());
    reopened.close();
}
