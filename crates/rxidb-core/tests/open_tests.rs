//! Opening, upgrading, blocking and deleting databases

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{init_tracing, open_db, people_schema, seeded_people};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use rxidb_core::{
    delete_database, open, DatabaseEvent, DatabaseEventKind, DbError, IndexDefinition, Key,
    KeyPath, MemoryProvider, OpenConfig, Query, SchemaVersion, StoreDefinition, TransactionMode,
    VersionChange,
};
use serde_json::json;

#[test]
fn test_no_schema_opens_version_one() {
    init_tracing();
    let memory = MemoryProvider::new();
    let db = open_db(&memory, "bare", Vec::new()).unwrap();

    assert_eq!(db.name(), "bare");
    assert_eq!(db.version(), 1);
    assert!(db.object_store_names().is_empty());
}

#[test]
fn test_version_is_highest_schema_version() {
    let memory = MemoryProvider::new();
    let schema = vec![
        SchemaVersion::new(3).store(StoreDefinition::new("c")),
        SchemaVersion::new(1).store(StoreDefinition::new("a")),
        SchemaVersion::new(2).store(StoreDefinition::new("b")),
    ];
    let db = open_db(&memory, "tiers", schema).unwrap();

    assert_eq!(db.version(), 3);
    assert_eq!(db.object_store_names(), vec!["a", "b", "c"]);
}

#[test]
fn test_two_versions_create_both_stores() {
    let memory = MemoryProvider::new();
    let schema = vec![
        SchemaVersion::new(1).store(StoreDefinition::new("a")),
        SchemaVersion::new(2).store(StoreDefinition::new("b")),
    ];
    let db = open_db(&memory, "ab", schema).unwrap();

    assert_eq!(db.version(), 2);
    assert_eq!(db.object_store_names(), vec!["a", "b"]);
}

#[test]
fn test_reopen_and_upgrade_do_not_recreate() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();
    db.close();

    // Same version: no upgrade runs at all.
    let again = open_db(&memory, "people", vec![people_schema()]).unwrap();
    assert_eq!(again.version(), 1);
    again.close();

    // Version 2 repeats the people store with one more index.
    let upgraded = open_db(
        &memory,
        "people",
        vec![
            people_schema(),
            SchemaVersion::new(2)
                .store(
                    StoreDefinition::new("people")
                        .key_path("id")
                        .index("city")
                        .index(IndexDefinition::new("by_email_domain").key_path("email")),
                )
                .store(StoreDefinition::new("audit").auto_increment(true)),
        ],
    )
    .unwrap();

    assert_eq!(upgraded.version(), 2);
    assert_eq!(upgraded.object_store_names(), vec!["audit", "people"]);

    let (indexes, count) = memory
        .block_on(async {
            let tx = upgraded.transaction(&["people"], TransactionMode::ReadOnly)?;
            let store = tx.object_store("people")?;
            Ok::<_, DbError>((store.index_names(), store.count(Query::All).await?))
        })
        .unwrap();
    assert_eq!(indexes, vec!["by_email_domain", "city", "email"]);
    // Records survive the upgrade.
    assert_eq!(count, 5);
}

#[test]
fn test_upgrade_hook_sees_versions() {
    let memory = MemoryProvider::new();
    let calls = Rc::new(RefCell::new(Vec::new()));

    for version in 1..=2 {
        let seen = calls.clone();
        let config = OpenConfig::new("hooked", memory.provider())
            .version(SchemaVersion::new(version))
            .on_upgrade(move |db, old, new, tx| {
                assert_eq!(tx.mode(), TransactionMode::VersionChange);
                assert_eq!(db.version(), new);
                seen.borrow_mut().push((old, new));
                Ok(())
            });
        let db = memory.block_on(open(config)).unwrap();
        db.close();
    }

    assert_eq!(*calls.borrow(), vec![(0, 1), (1, 2)]);
}

#[test]
fn test_upgrade_hook_migrates_an_existing_store() {
    init_tracing();
    let memory = MemoryProvider::new();
    seeded_people(&memory, "migrated").unwrap().close();

    let config = OpenConfig::new("migrated", memory.provider())
        .schema(vec![people_schema(), SchemaVersion::new(2)])
        .on_upgrade(|db, old, _, tx| {
            if old < 2 {
                let people = tx.object_store("people")?;
                people.create_index(&IndexDefinition::new("tag"))?;
                people.delete_index("city")?;
                let _ = people
                    .put(json!({"id": 6, "email": "fy@example.com", "tag": "new"}), None)
                    .issue();

                db.create_object_store(&StoreDefinition::new("audit").index("at"))?;
                let _ = tx
                    .object_store("audit")?
                    .add(json!({"at": 1}), Some("migrated".into()))
                    .issue();
            }
            Ok(())
        });
    let db = memory.block_on(open(config)).unwrap();

    assert_eq!(db.version(), 2);
    assert_eq!(db.object_store_names(), vec!["audit", "people"]);
    let (indexes, tagged, total, audit) = memory
        .block_on(async {
            let tx = db.transaction(&["audit", "people"], TransactionMode::ReadOnly)?;
            let people = tx.object_store("people")?;
            let indexes = people.index_names();
            let tagged = people.index("tag")?.get_all_keys(Query::All, None).await?;
            let total = people.count(Query::All).await?;
            let audit = tx.object_store("audit")?.get("migrated").await?;
            Ok::<_, DbError>((indexes, tagged, total, audit))
        })
        .unwrap();

    assert_eq!(indexes, vec!["email", "tag"]);
    assert_eq!(tagged, vec![Key::from(6)]);
    assert_eq!(total, 6);
    assert_eq!(audit, Some(json!({"at": 1})));
}

#[test]
fn test_schema_changes_outside_an_upgrade_fail() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "settled").unwrap();

    let created = db.create_object_store(&StoreDefinition::new("late"));
    let deleted = db.delete_object_store("people");
    let tx = db
        .transaction(&["people"], TransactionMode::ReadWrite)
        .unwrap();
    let indexed = tx
        .object_store("people")
        .unwrap()
        .create_index(&IndexDefinition::new("late"))
        .map(|_| ());

    assert!(matches!(created, Err(DbError::InvalidState(_))));
    assert!(matches!(deleted, Err(DbError::InvalidState(_))));
    assert!(matches!(indexed, Err(DbError::InvalidState(_))));
    assert_eq!(db.object_store_names(), vec!["people"]);
}

#[test]
fn test_failing_hook_aborts_the_open() {
    let memory = MemoryProvider::new();
    let config = OpenConfig::new("doomed", memory.provider())
        .version(SchemaVersion::new(1).store(StoreDefinition::new("s")))
        .on_upgrade(|_, _, _, _| Err(DbError::Constraint("migration refused".into())));

    let result = memory.block_on(open(config));

    assert_eq!(
        result.map(|_| ()),
        Err(DbError::Constraint("migration refused".into()))
    );
    // The aborted upgrade leaves nothing behind.
    assert!(memory.database_names().is_empty());
}

#[test]
fn test_failed_upgrade_restores_previous_version() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();
    db.close();

    let config = OpenConfig::new("people", memory.provider())
        .schema(vec![
            people_schema(),
            SchemaVersion::new(2).store(StoreDefinition::new("extra")),
        ])
        .on_upgrade(|_, _, _, _| Err(DbError::Abort("not today".into())));
    assert!(memory.block_on(open(config)).is_err());

    let db = open_db(&memory, "people", vec![people_schema()]).unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["people"]);
}

#[test]
fn test_lower_version_fails() {
    let memory = MemoryProvider::new();
    let schema = vec![SchemaVersion::new(1), SchemaVersion::new(2)];
    open_db(&memory, "v", schema).unwrap().close();

    let result = open_db(&memory, "v", vec![SchemaVersion::new(1)]);

    assert!(matches!(result, Err(DbError::Version(_))));
}

#[test]
fn test_zero_schema_version_is_rejected() {
    let memory = MemoryProvider::new();
    let result = open_db(&memory, "zero", vec![SchemaVersion::new(0)]);
    assert!(matches!(result, Err(DbError::InvalidAccess(_))));
}

#[test]
fn test_version_change_closes_old_connection() {
    let memory = MemoryProvider::new();
    let old = open_db(&memory, "shared", vec![SchemaVersion::new(1)]).unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    for kind in [DatabaseEventKind::VersionChange, DatabaseEventKind::Close] {
        let events = events.clone();
        old.add_event_listener(kind, move |event| events.borrow_mut().push(event.clone()));
    }

    let new = open_db(&memory, "shared", vec![SchemaVersion::new(2)]).unwrap();

    assert_eq!(new.version(), 2);
    assert!(old.is_closed());
    assert_eq!(
        *events.borrow(),
        vec![
            DatabaseEvent::VersionChange {
                old_version: 1,
                new_version: Some(2)
            },
            DatabaseEvent::Close,
        ]
    );
    assert!(matches!(
        old.transaction(&["s"], TransactionMode::ReadOnly),
        Err(DbError::InvalidState(_))
    ));
}

#[test]
fn test_blocked_open_proceeds_after_close() {
    let memory = MemoryProvider::new();
    let config =
        OpenConfig::new("shared", memory.provider()).auto_close_on_version_change(false);
    let old = memory.block_on(open(config)).unwrap();

    let blocked = Rc::new(RefCell::new(Vec::new()));
    let seen = blocked.clone();
    let holder = old.clone();
    let config = OpenConfig::new("shared", memory.provider())
        .version(SchemaVersion::new(2))
        .on_blocked(move |change: &VersionChange| {
            seen.borrow_mut().push(*change);
            holder.close();
        });
    let new = memory.block_on(open(config)).unwrap();

    assert_eq!(new.version(), 2);
    assert!(old.is_closed());
    assert_eq!(
        *blocked.borrow(),
        vec![VersionChange {
            old_version: 1,
            new_version: Some(2)
        }]
    );
}

#[test]
#[should_panic(expected = "stalled")]
fn test_open_blocked_forever_stalls() {
    let memory = MemoryProvider::new();
    let config =
        OpenConfig::new("stuck", memory.provider()).auto_close_on_version_change(false);
    let _old = memory.block_on(open(config)).unwrap();

    let config = OpenConfig::new("stuck", memory.provider()).version(SchemaVersion::new(2));
    let _ = memory.block_on(open(config));
}

#[test]
fn test_close_waits_for_running_transaction() {
    let memory = MemoryProvider::new();
    let db = open_db(
        &memory,
        "closing",
        vec![SchemaVersion::new(1).store(StoreDefinition::new("s"))],
    )
    .unwrap();

    let outcome = memory.block_on(async {
        let tx = db.transaction(&["s"], TransactionMode::ReadWrite)?;
        let mut write = tx
            .object_store("s")?
            .put(serde_json::json!("v"), Some("k".into()));
        assert!((&mut write).now_or_never().is_none());
        db.close();
        write.await?;
        tx.completion().await
    });

    assert_eq!(outcome, Ok(()));
    assert!(matches!(
        db.transaction(&["s"], TransactionMode::ReadOnly),
        Err(DbError::InvalidState(_))
    ));
}

#[test]
fn test_clear_deletes_the_database() {
    let memory = MemoryProvider::new();
    let db = seeded_people(&memory, "people").unwrap();

    let cleared = memory.block_on(db.clear());

    assert_eq!(cleared, Ok(()));
    assert!(db.is_closed());
    assert!(memory.database_names().is_empty());
}

#[test]
fn test_clear_blocked_by_other_connection() {
    let memory = MemoryProvider::new();
    let db = open_db(&memory, "shared", vec![SchemaVersion::new(1)]).unwrap();
    let config =
        OpenConfig::new("shared", memory.provider()).auto_close_on_version_change(false);
    let _other = memory.block_on(open(config)).unwrap();

    let cleared = memory.block_on(db.clear());

    assert!(matches!(cleared, Err(DbError::Blocked(_))));
}

#[test]
fn test_delete_database() {
    let memory = MemoryProvider::new();
    open_db(&memory, "gone", vec![people_schema()]).unwrap().close();
    assert_eq!(memory.database_names(), vec!["gone"]);

    memory
        .block_on(delete_database(memory.provider(), "gone"))
        .unwrap();
    assert!(memory.database_names().is_empty());

    // Deleting a database that does not exist succeeds.
    memory
        .block_on(delete_database(memory.provider(), "gone"))
        .unwrap();
}

#[test]
fn test_config_from_json() {
    let memory = MemoryProvider::new();
    let config = OpenConfig::from_json(
        "docs",
        memory.provider(),
        r#"{
            "schema": [
                {"version": 1, "stores": [{"name": "docs", "keyPath": "id", "indexes": ["tag"]}]},
                {"version": 2, "stores": [{"name": "drafts", "autoIncrement": true}]}
            ],
            "autoCloseOnVersionChange": false
        }"#,
    )
    .unwrap();
    assert_eq!(config.target_version(), 2);

    let db = memory.block_on(open(config)).unwrap();
    let indexes = memory
        .block_on(async {
            let tx = db.transaction(&["docs", "drafts"], TransactionMode::ReadOnly)?;
            let docs = tx.object_store("docs")?;
            let drafts = tx.object_store("drafts")?;
            assert!(drafts.auto_increment());
            assert_eq!(docs.key_path(), Some(KeyPath::Single("id".into())));
            Ok::<_, DbError>(docs.index_names())
        })
        .unwrap();

    assert_eq!(db.version(), 2);
    assert_eq!(indexes, vec!["tag"]);
}

#[test]
fn test_force_close_fires_close_event() {
    let memory = MemoryProvider::new();
    let db = open_db(&memory, "host", vec![SchemaVersion::new(1)]).unwrap();
    let closed = Rc::new(RefCell::new(0));
    let counter = closed.clone();
    db.add_event_listener(DatabaseEventKind::Close, move |_| *counter.borrow_mut() += 1);

    memory.force_close("host");
    memory.run_until_idle();

    assert!(db.is_closed());
    assert_eq!(*closed.borrow(), 1);
}
