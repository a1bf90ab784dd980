//! Cursor streams over stores and indexes

mod common;

use common::{init_tracing, seeded_people};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use rxidb_core::{
    Codec, CursorStream, DbError, Direction, Key, KeyRange, MemoryProvider, Query,
    TransactionMode,
};
use serde_json::{json, Value};

/// Drain `cursors`, collecting `(key, primary_key)` at every position.
async fn positions<C: Codec>(mut cursors: CursorStream<C>) -> Result<Vec<(Key, Key)>, DbError> {
    let mut out = Vec::new();
    while let Some(cursor) = cursors.next().await {
        let cursor = cursor?;
        out.push((cursor.key().clone(), cursor.primary_key().clone()));
    }
    Ok(out)
}

fn primaries(positions: &[(Key, Key)]) -> Vec<Key> {
    positions.iter().map(|(_, primary)| primary.clone()).collect()
}

fn entry(city: &str, id: i32) -> (Key, Key) {
    (Key::from(city), Key::from(id))
}

fn keys(ids: &[i32]) -> Vec<Key> {
    ids.iter().map(|id| Key::from(*id)).collect()
}

#[test]
fn test_store_cursor_directions() {
    init_tracing();
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let (forward, backward) = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let store = tx.object_store("people")?;
            let forward = positions(store.open_cursor(Query::All, Direction::Next)).await?;
            let backward = positions(store.open_cursor(Query::All, Direction::Prev)).await?;
            Ok::<_, DbError>((forward, backward))
        })
        .unwrap();

    assert_eq!(primaries(&forward), keys(&[1, 2, 3, 4, 5]));
    assert_eq!(primaries(&backward), keys(&[5, 4, 3, 2, 1]));
}

#[test]
fn test_cursor_over_range() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let found = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let store = tx.object_store("people")?;
            let range = KeyRange::bound(2, 4, false, true)?;
            positions(store.open_cursor(range, Direction::Next)).await
        })
        .unwrap();

    assert_eq!(primaries(&found), keys(&[2, 3]));
}

#[test]
fn test_empty_range_ends_immediately() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let found = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let store = tx.object_store("people")?;
            positions(store.open_cursor(KeyRange::lower_bound(10, false)?, Direction::Next)).await
        })
        .unwrap();

    assert!(found.is_empty());
}

#[test]
fn test_cursor_values() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let cities = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let mut cursors = tx.object_store("people")?.open_cursor(Query::All, Direction::Next);
            let mut cities = Vec::new();
            while let Some(cursor) = cursors.next().await {
                let value = cursor?.into_value().unwrap_or(Value::Null);
                cities.push(value["city"].as_str().unwrap_or_default().to_string());
            }
            Ok::<_, DbError>(cities)
        })
        .unwrap();

    assert_eq!(cities, vec!["Oslo", "Bergen", "Oslo", "Bergen", "Tromso"]);
}

#[test]
fn test_key_cursor_has_no_values() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let values = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let mut cursors = tx
                .object_store("people")?
                .open_key_cursor(Query::All, Direction::Next);
            let mut seen = 0;
            while let Some(cursor) = cursors.next().await {
                assert!(cursor?.value().is_none());
                seen += 1;
            }
            Ok::<_, DbError>(seen)
        })
        .unwrap();

    assert_eq!(values, 5);
}

#[test]
fn test_index_cursor_directions() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let (all, unique, reverse_unique) = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let city = tx.object_store("people")?.index("city")?;
            let all = positions(city.open_cursor(Query::All, Direction::Next)).await?;
            let unique = positions(city.open_cursor(Query::All, Direction::NextUnique)).await?;
            let reverse_unique =
                positions(city.open_key_cursor(Query::All, Direction::PrevUnique)).await?;
            Ok::<_, DbError>((all, unique, reverse_unique))
        })
        .unwrap();

    assert_eq!(
        all,
        vec![
            entry("Bergen", 2),
            entry("Bergen", 4),
            entry("Oslo", 1),
            entry("Oslo", 3),
            entry("Tromso", 5),
        ]
    );
    assert_eq!(
        unique,
        vec![
            entry("Bergen", 2),
            entry("Oslo", 1),
            entry("Tromso", 5),
        ]
    );
    assert_eq!(
        reverse_unique,
        vec![
            entry("Tromso", 5),
            entry("Oslo", 1),
            entry("Bergen", 2),
        ]
    );
}

#[test]
fn test_continue_to_and_advance() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let visited = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let mut cursors = tx
                .object_store("people")?
                .open_cursor(Query::All, Direction::Next);
            let mut visited = Vec::new();
            while let Some(cursor) = cursors.next().await {
                let cursor = cursor?;
                visited.push(cursor.primary_key().clone());
                match cursor.primary_key().as_f64() {
                    Some(id) if id == 1.0 => cursor.advance(2)?,
                    Some(id) if id == 3.0 => cursor.continue_to(5)?,
                    _ => {}
                }
            }
            Ok::<_, DbError>(visited)
        })
        .unwrap();

    assert_eq!(visited, keys(&[1, 3, 5]));
}

#[test]
fn test_moving_a_cursor_twice_fails() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let (second_move, zero_advance) = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let mut cursors = tx
                .object_store("people")?
                .open_cursor(Query::All, Direction::Next);
            let cursor = match cursors.next().await {
                Some(cursor) => cursor?,
                None => return Err(DbError::NotFound("no first position".into())),
            };
            let zero_advance = cursor.advance(0);
            cursor.continue_()?;
            let second_move = cursor.continue_();
            Ok::<_, DbError>((second_move, zero_advance))
        })
        .unwrap();

    assert!(matches!(second_move, Err(DbError::InvalidState(_))));
    assert!(matches!(zero_advance, Err(DbError::InvalidAccess(_))));
}

#[test]
fn test_continue_to_behind_the_cursor_is_a_data_error() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let result = memory.block_on(async {
        let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
        let mut cursors = tx
            .object_store("people")?
            .open_cursor(KeyRange::lower_bound(3, false)?, Direction::Next);
        match cursors.next().await {
            Some(cursor) => cursor?.continue_to(2),
            None => Err(DbError::NotFound("no first position".into())),
        }
    });

    assert!(matches!(result, Err(DbError::Data(_))));
}

#[test]
fn test_update_and_delete_through_cursor() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let remaining = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadWrite)?;
            let store = tx.object_store("people")?;
            let mut cursors = store.open_cursor(Query::All, Direction::Next);
            while let Some(cursor) = cursors.next().await {
                let cursor = cursor?;
                let mut record = cursor.value().cloned().unwrap_or(Value::Null);
                if record["city"] == json!("Bergen") {
                    cursor.delete().await?;
                } else {
                    record["visited"] = json!(true);
                    cursor.update(record).await?;
                }
            }
            store.get_all(Query::All, None).await
        })
        .unwrap();

    let ids: Vec<i64> = remaining.iter().filter_map(|p| p["id"].as_i64()).collect();
    assert_eq!(ids, vec![1, 3, 5]);
    assert!(remaining.iter().all(|p| p["visited"] == json!(true)));
}

#[test]
fn test_cursor_update_cannot_change_key() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let result = memory.block_on(async {
        let tx = db.transaction(&["people"], TransactionMode::ReadWrite)?;
        let mut cursors = tx
            .object_store("people")?
            .open_cursor(Query::All, Direction::Next);
        match cursors.next().await {
            Some(cursor) => {
                cursor?
                    .update(json!({"id": 42, "email": "new@example.com", "city": "Oslo"}))
                    .await
            }
            None => Err(DbError::NotFound("no first position".into())),
        }
    });

    assert!(matches!(result, Err(DbError::Data(_))));
}

#[test]
fn test_readonly_cursor_cannot_write() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let result = memory.block_on(async {
        let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
        let mut cursors = tx
            .object_store("people")?
            .open_cursor(Query::All, Direction::Next);
        match cursors.next().await {
            Some(cursor) => cursor?.delete().await,
            None => Err(DbError::NotFound("no first position".into())),
        }
    });

    assert!(matches!(result, Err(DbError::ReadOnly(_))));
}

#[test]
fn test_taking_a_prefix() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let first_two = memory
        .block_on(async {
            let tx = db.transaction(&["people"], TransactionMode::ReadOnly)?;
            let cursors = tx
                .object_store("people")?
                .open_cursor(Query::All, Direction::Prev);
            cursors
                .take(2)
                .map(|cursor| cursor.map(|c| c.primary_key().clone()))
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect::<Result<Vec<Key>, DbError>>()
        })
        .unwrap();

    assert_eq!(first_two, keys(&[5, 4]));
}
