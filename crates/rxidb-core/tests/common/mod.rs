//! Shared helpers for the memory provider integration tests

#![allow(dead_code)]

use rxidb_core::{
    open, Database, DbError, IndexDefinition, MemoryProvider, OpenConfig, SchemaVersion,
    StoreDefinition, TransactionMode,
};
use serde_json::{json, Value};

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `people` keyed by `id`, with a unique `email` index and a `city` index.
pub fn people_schema() -> SchemaVersion {
    SchemaVersion::new(1).store(
        StoreDefinition::new("people")
            .key_path("id")
            .index(IndexDefinition::new("email").unique(true))
            .index("city"),
    )
}

pub fn person(id: i64, email: &str, city: &str) -> Value {
    json!({"id": id, "email": email, "city": city})
}

/// Five people across three cities, ids 1 to 5.
pub fn people() -> Vec<Value> {
    vec![
        person(1, "ada@example.com", "Oslo"),
        person(2, "bo@example.com", "Bergen"),
        person(3, "cy@example.com", "Oslo"),
        person(4, "di@example.com", "Bergen"),
        person(5, "ed@example.com", "Tromso"),
    ]
}

/// Open `name` with `schema` and wait for the connection.
pub fn open_db(
    memory: &MemoryProvider,
    name: &str,
    schema: Vec<SchemaVersion>,
) -> Result<Database, DbError> {
    memory.block_on(open(OpenConfig::new(name, memory.provider()).schema(schema)))
}

/// Open `name` with the people schema and the five people stored.
pub fn seeded_people(memory: &MemoryProvider, name: &str) -> Result<Database, DbError> {
    let db = open_db(memory, name, vec![people_schema()])?;
    memory.block_on(async {
        let tx = db.transaction(&["people"], TransactionMode::ReadWrite)?;
        let store = tx.object_store("people")?;
        for record in people() {
            store.put(record, None).await?;
        }
        tx.completion().await
    })?;
    Ok(db)
}
